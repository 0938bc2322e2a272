// src/core/acquisition.rs
//! Turns flaky sensor polls into one capture or one typed failure.
//!
//! The attempt and timing policy lives in [`RetryMachine`], a pure state
//! machine:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!             |  ^
//!             v  |
//!          RetryWait
//!             |
//!             v
//!          Exhausted(reason)
//! ```
//!
//! [`AcquisitionController`] feeds it device results and sleeps for the
//! waits it asks for. The device is exclusively owned: one acquisition at a
//! time, process-wide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::settings::{AcquisitionParams, Settings, Threshold};
use crate::device::{
    AcquireOutcome, Capture, DeviceCapability, DeviceError, DeviceErrorKind, DeviceHandle,
    ParamCode, TemplateFormat,
};
use crate::utils::config::DeviceConfig;
use crate::utils::error::{AcquisitionFailure, EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCause {
    NoFinger,
    FailedAttempt(AcquisitionFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Attempting { attempt: u32 },
    RetryWait { wait: Duration, cause: WaitCause },
    Succeeded,
    Exhausted(AcquisitionFailure),
}

/// Result of one sensor poll as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    Captured,
    NoFinger,
    Failed(AcquisitionFailure),
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    params: AcquisitionParams,
    state: AcquisitionState,
    polls: u32,
    failed_attempts: u32,
    empty_polls: u32,
}

impl RetryMachine {
    pub fn new(params: AcquisitionParams) -> Self {
        Self {
            params,
            state: AcquisitionState::Idle,
            polls: 0,
            failed_attempts: 0,
            empty_polls: 0,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn empty_polls(&self) -> u32 {
        self.empty_polls
    }

    pub fn start(&mut self) -> AcquisitionState {
        if self.state == AcquisitionState::Idle {
            self.polls = 1;
            self.state = AcquisitionState::Attempting { attempt: 1 };
        }
        self.state
    }

    pub fn on_poll(&mut self, poll: PollResult) -> AcquisitionState {
        if !matches!(self.state, AcquisitionState::Attempting { .. }) {
            return self.state;
        }

        self.state = match poll {
            PollResult::Captured => AcquisitionState::Succeeded,
            PollResult::NoFinger => {
                self.empty_polls += 1;
                if self.empty_polls >= self.params.max_finger_polls {
                    AcquisitionState::Exhausted(AcquisitionFailure::Timeout)
                } else {
                    AcquisitionState::RetryWait {
                        wait: self.params.settle_time,
                        cause: WaitCause::NoFinger,
                    }
                }
            }
            PollResult::Failed(reason) => {
                self.failed_attempts += 1;
                if self.failed_attempts >= self.params.max_attempts {
                    AcquisitionState::Exhausted(reason)
                } else {
                    AcquisitionState::RetryWait {
                        wait: self.params.inter_attempt_delay,
                        cause: WaitCause::FailedAttempt(reason),
                    }
                }
            }
        };
        self.state
    }

    /// Ends a wait and schedules the next poll.
    pub fn resume(&mut self) -> AcquisitionState {
        if matches!(self.state, AcquisitionState::RetryWait { .. }) {
            self.polls += 1;
            self.state = AcquisitionState::Attempting { attempt: self.polls };
        }
        self.state
    }

    pub fn deadline_passed(&mut self) -> AcquisitionState {
        self.finish(AcquisitionFailure::Timeout)
    }

    pub fn cancel(&mut self) -> AcquisitionState {
        self.finish(AcquisitionFailure::Cancelled)
    }

    fn finish(&mut self, reason: AcquisitionFailure) -> AcquisitionState {
        if !matches!(
            self.state,
            AcquisitionState::Succeeded | AcquisitionState::Exhausted(_)
        ) {
            self.state = AcquisitionState::Exhausted(reason);
        }
        self.state
    }
}

enum Classified {
    Retry(AcquisitionFailure),
    Fatal(EngineError),
}

fn classify(error: DeviceError) -> Classified {
    match error.kind() {
        DeviceErrorKind::CaptureFailed
        | DeviceErrorKind::ImageProcessingFailed
        | DeviceErrorKind::Busy => Classified::Retry(AcquisitionFailure::ImageCaptureFailed),
        DeviceErrorKind::ExtractionFailed => {
            Classified::Retry(AcquisitionFailure::TemplateExtractionFailed)
        }
        DeviceErrorKind::NoDevice | DeviceErrorKind::InvalidHandle => {
            Classified::Fatal(EngineError::acquisition(AcquisitionFailure::NoDevice))
        }
        DeviceErrorKind::Cancelled => {
            Classified::Fatal(EngineError::acquisition(AcquisitionFailure::Cancelled))
        }
        _ => Classified::Fatal(EngineError::Device(error)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceOptions {
    pub index: u32,
    pub template_format: TemplateFormat,
    pub led_feedback: bool,
}

impl From<&DeviceConfig> for DeviceOptions {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            index: config.index,
            template_format: config.template_format,
            led_feedback: config.led_feedback,
        }
    }
}

#[derive(Debug)]
struct DeviceSession {
    handle: Option<DeviceHandle>,
}

/// What the scanner reported when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_count: u32,
    pub width: i32,
    pub height: i32,
    pub dpi: Option<i32>,
}

/// Resets the sensor if an acquisition ends without a capture, including
/// when the owning future is dropped mid-wait.
struct AbortGuard<'a> {
    device: &'a dyn DeviceCapability,
    handle: DeviceHandle,
    armed: bool,
}

impl AbortGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.device.abort_capture(self.handle) {
                warn!("Failed to reset sensor after abandoned acquisition: {}", e);
            }
        }
    }
}

pub struct AcquisitionController {
    device: Arc<dyn DeviceCapability>,
    session: Mutex<DeviceSession>,
    summary: DeviceSummary,
    closed: AtomicBool,
    // Threshold waiting for the device while an acquisition holds it.
    pending_threshold: parking_lot::Mutex<Option<Threshold>>,
    settings: Arc<Settings>,
    options: DeviceOptions,
}

impl AcquisitionController {
    /// Initializes the library and opens the configured scanner.
    pub fn open(
        device: Arc<dyn DeviceCapability>,
        settings: Arc<Settings>,
        options: DeviceOptions,
    ) -> Result<Self> {
        device.init()?;

        let count = match device.device_count() {
            Ok(count) => count,
            Err(e) => {
                let _ = device.terminate();
                return Err(e.into());
            }
        };
        if count == 0 {
            let _ = device.terminate();
            error!("No fingerprint devices found");
            return Err(DeviceError::new(DeviceErrorKind::NoDevice).into());
        }
        info!("Found {} fingerprint device(s)", count);

        let handle = match device.open_device(options.index) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = device.terminate();
                return Err(e.into());
            }
        };

        let width = device.get_parameter(handle, ParamCode::IMAGE_WIDTH).unwrap_or_else(|e| {
            warn!("Could not read image width: {}", e);
            0
        });
        let height = device.get_parameter(handle, ParamCode::IMAGE_HEIGHT).unwrap_or_else(|e| {
            warn!("Could not read image height: {}", e);
            0
        });
        let dpi = device.get_parameter(handle, ParamCode::IMAGE_DPI).ok();

        if let Err(e) = device.set_parameter(
            handle,
            ParamCode::TEMPLATE_FORMAT,
            options.template_format.param_value(),
        ) {
            warn!("Could not set template format: {}", e);
        }
        if let Err(e) = device.set_parameter(
            handle,
            ParamCode::VERIFY_THRESHOLD,
            i32::from(settings.threshold().value()),
        ) {
            warn!("Could not set device match threshold: {}", e);
        }

        info!(index = options.index, width, height, "Device opened");

        Ok(Self {
            device,
            session: Mutex::new(DeviceSession {
                handle: Some(handle),
            }),
            summary: DeviceSummary {
                device_count: count,
                width,
                height,
                dpi,
            },
            closed: AtomicBool::new(false),
            pending_threshold: parking_lot::Mutex::new(None),
            settings,
            options,
        })
    }

    pub fn device(&self) -> &Arc<dyn DeviceCapability> {
        &self.device
    }

    /// True while an acquisition holds the device.
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// Captures with the current process-wide acquisition parameters.
    pub async fn capture(&self, cancel: &CancelToken) -> Result<Capture> {
        let params = self.settings.acquisition();
        self.capture_with(params, cancel).await
    }

    pub async fn capture_with(&self, params: AcquisitionParams, cancel: &CancelToken) -> Result<Capture> {
        params.validate()?;
        if cancel.is_cancelled() {
            return Err(EngineError::acquisition(AcquisitionFailure::Cancelled));
        }

        let session = tokio::select! {
            session = self.session.lock() => session,
            _ = cancel.cancelled() => {
                return Err(EngineError::acquisition(AcquisitionFailure::Cancelled));
            }
        };
        let handle = session
            .handle
            .ok_or_else(|| EngineError::acquisition(AcquisitionFailure::NoDevice))?;
        self.flush_threshold(handle);

        let mut guard = AbortGuard {
            device: self.device.as_ref(),
            handle,
            armed: true,
        };

        let started = Instant::now();
        let deadline = started
            .checked_add(params.capture_timeout)
            .ok_or_else(|| EngineError::InvalidParameter("capture_timeout is out of range".to_string()))?;
        let mut machine = RetryMachine::new(params);
        let mut captured: Option<Capture> = None;
        let mut state = machine.start();

        let result = loop {
            match state {
                AcquisitionState::Idle => state = machine.start(),
                AcquisitionState::Attempting { attempt } => {
                    if cancel.is_cancelled() {
                        state = machine.cancel();
                        continue;
                    }
                    if Instant::now() >= deadline {
                        state = machine.deadline_passed();
                        continue;
                    }

                    let poll = match self.device.acquire(handle) {
                        Ok(AcquireOutcome::Captured(capture)) => {
                            captured = Some(capture);
                            PollResult::Captured
                        }
                        Ok(AcquireOutcome::NoFinger) => {
                            debug!(attempt, "Waiting for finger placement");
                            PollResult::NoFinger
                        }
                        Err(e) => match classify(e) {
                            Classified::Retry(reason) => {
                                warn!(
                                    attempt,
                                    failed = machine.failed_attempts() + 1,
                                    max = params.max_attempts,
                                    "Capture attempt failed: {}",
                                    reason
                                );
                                PollResult::Failed(reason)
                            }
                            Classified::Fatal(err) => break Err(err),
                        },
                    };
                    state = machine.on_poll(poll);
                }
                AcquisitionState::RetryWait { wait, .. } => {
                    let wake = Instant::now()
                        .checked_add(wait)
                        .map_or(deadline, |wake| wake.min(deadline));
                    tokio::select! {
                        _ = tokio::time::sleep_until(wake) => state = machine.resume(),
                        _ = cancel.cancelled() => state = machine.cancel(),
                    }
                }
                AcquisitionState::Succeeded => {
                    break captured
                        .take()
                        .ok_or_else(|| EngineError::acquisition(AcquisitionFailure::ImageCaptureFailed));
                }
                AcquisitionState::Exhausted(reason) => {
                    break Err(EngineError::acquisition(reason));
                }
            }
        };

        match &result {
            Ok(capture) => {
                guard.disarm();
                info!(
                    polls = machine.empty_polls() + machine.failed_attempts() + 1,
                    template_bytes = capture.template.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fingerprint acquired"
                );
            }
            Err(e) => {
                error!(
                    failed = machine.failed_attempts(),
                    empty_polls = machine.empty_polls(),
                    "Acquisition gave up: {}",
                    e
                );
            }
        }

        // The reset turns every LED off, so it has to run before the feedback.
        drop(guard);
        self.flush_threshold(handle);
        let light = if result.is_ok() {
            ParamCode::GREEN_LIGHT
        } else {
            ParamCode::RED_LIGHT
        };
        self.feedback(handle, light);
        drop(session);
        result
    }

    fn feedback(&self, handle: DeviceHandle, light: ParamCode) {
        if !self.options.led_feedback {
            return;
        }
        if let Err(e) = self.device.set_parameter(handle, light, 1) {
            warn!("LED feedback failed: {}", e);
        }
    }

    /// Pushes the 1:1 threshold to the device. The process-wide value stays authoritative.
    ///
    /// Never waits for the device: while an acquisition holds it, the value is
    /// parked and written when that acquisition ends.
    pub fn apply_threshold(&self, threshold: Threshold) {
        *self.pending_threshold.lock() = Some(threshold);
        match self.session.try_lock() {
            Ok(session) => {
                if let Some(handle) = session.handle {
                    self.flush_threshold(handle);
                }
            }
            Err(_) => debug!(threshold = threshold.value(), "Device busy, threshold update deferred"),
        }
    }

    fn flush_threshold(&self, handle: DeviceHandle) {
        let Some(threshold) = self.pending_threshold.lock().take() else {
            return;
        };
        if let Err(e) = self.device.set_parameter(
            handle,
            ParamCode::VERIFY_THRESHOLD,
            i32::from(threshold.value()),
        ) {
            warn!("Could not set device match threshold: {}", e);
        }
    }

    /// Geometry and device count read at open. Does not touch the device.
    pub fn describe(&self) -> Result<DeviceSummary> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Device(DeviceError::new(DeviceErrorKind::InvalidHandle)));
        }
        Ok(self.summary)
    }

    /// Closes the device and releases the library. Safe to call twice.
    pub async fn shutdown(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let Some(handle) = session.handle.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);
        self.pending_threshold.lock().take();

        let closed = self.device.close_device(handle);
        let terminated = self.device.terminate();
        info!("Device closed");
        closed?;
        terminated?;
        Ok(())
    }
}
