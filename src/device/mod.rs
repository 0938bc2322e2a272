// src/device/mod.rs
//! Capability interface over the vendor capture/match SDK.
//!
//! The engine never talks to native code directly. Everything it needs from
//! a scanner is expressed by [`DeviceCapability`], which is injected at
//! construction time: [`SimulatedDevice`] for tests and demos, and
//! `ZkfpDevice` (feature `hardware`) for a real ZKFinger scanner.

pub mod simulated;
#[cfg(feature = "hardware")]
pub mod zkfp;

pub use simulated::SimulatedDevice;
#[cfg(feature = "hardware")]
pub use zkfp::ZkfpDevice;

use thiserror::Error;

/// Vendor result codes, as returned by every native call.
pub mod codes {
    pub const OK: i32 = 0;
    pub const INIT_LIB: i32 = -1;
    pub const NO_DEVICE: i32 = -3;
    pub const INVALID_PARAM: i32 = -5;
    pub const INVALID_HANDLE: i32 = -7;
    pub const CAPTURE: i32 = -8;
    pub const EXTRACT: i32 = -9;
    pub const SUSPENDED: i32 = -10;
    pub const BUSY: i32 = -12;
    pub const DELETE: i32 = -14;
    pub const OTHER: i32 = -17;
    pub const CANCELED: i32 = -18;
    pub const VERIFY: i32 = -20;
    pub const IMAGE_PROCESS: i32 = -24;
}

/// Largest template the vendor library will produce.
pub const MAX_TEMPLATE_SIZE: usize = 2048;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    #[error("failed to initialize the algorithm library")]
    InitFailed,
    #[error("failed to load the vendor library")]
    LibraryLoad,
    #[error("no device connected")]
    NoDevice,
    #[error("failed to open device")]
    OpenFailed,
    #[error("failed to close device")]
    CloseFailed,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid device handle")]
    InvalidHandle,
    #[error("failed to capture image")]
    CaptureFailed,
    #[error("failed to extract template")]
    ExtractionFailed,
    #[error("operation suspended")]
    Suspended,
    #[error("device is busy")]
    Busy,
    #[error("failed to delete template")]
    DeleteFailed,
    #[error("capture cancelled")]
    Cancelled,
    #[error("template comparison failed")]
    ComparisonFailed,
    #[error("image processing failed")]
    ImageProcessingFailed,
    #[error("device operation failed")]
    Other,
}

impl DeviceErrorKind {
    /// Maps a non-zero vendor code. Codes outside the vendor table become `Other`.
    pub fn from_code(code: i32) -> Self {
        match code {
            codes::INIT_LIB => DeviceErrorKind::InitFailed,
            codes::NO_DEVICE => DeviceErrorKind::NoDevice,
            codes::INVALID_PARAM => DeviceErrorKind::InvalidParameter,
            codes::INVALID_HANDLE => DeviceErrorKind::InvalidHandle,
            codes::CAPTURE => DeviceErrorKind::CaptureFailed,
            codes::EXTRACT => DeviceErrorKind::ExtractionFailed,
            codes::SUSPENDED => DeviceErrorKind::Suspended,
            codes::BUSY => DeviceErrorKind::Busy,
            codes::DELETE => DeviceErrorKind::DeleteFailed,
            codes::CANCELED => DeviceErrorKind::Cancelled,
            codes::VERIFY => DeviceErrorKind::ComparisonFailed,
            codes::IMAGE_PROCESS => DeviceErrorKind::ImageProcessingFailed,
            _ => DeviceErrorKind::Other,
        }
    }
}

/// A failed device call. The raw vendor code is kept only for diagnostics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}")]
pub struct DeviceError {
    kind: DeviceErrorKind,
    code: Option<i32>,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind) -> Self {
        Self { kind, code: None }
    }

    pub fn from_code(code: i32) -> Self {
        Self {
            kind: DeviceErrorKind::from_code(code),
            code: Some(code),
        }
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }

    pub fn vendor_code(&self) -> Option<i32> {
        self.code
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Turns a vendor return code into a result.
pub fn check(code: i32) -> DeviceResult<()> {
    if code == codes::OK {
        Ok(())
    } else {
        Err(DeviceError::from_code(code))
    }
}

/// Opaque handle to an opened scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub usize);

/// Vendor parameter code for `set_parameter` / `get_parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamCode(pub i32);

impl ParamCode {
    pub const IMAGE_WIDTH: ParamCode = ParamCode(1);
    pub const IMAGE_HEIGHT: ParamCode = ParamCode(2);
    pub const IMAGE_DPI: ParamCode = ParamCode(3);
    pub const VERIFY_THRESHOLD: ParamCode = ParamCode(1);
    pub const IDENTIFY_THRESHOLD: ParamCode = ParamCode(2);
    pub const WHITE_LIGHT: ParamCode = ParamCode(101);
    pub const GREEN_LIGHT: ParamCode = ParamCode(102);
    pub const RED_LIGHT: ParamCode = ParamCode(103);
    pub const BUZZER: ParamCode = ParamCode(104);
    pub const TEMPLATE_FORMAT: ParamCode = ParamCode(10001);
}

/// Template encoding requested from the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFormat {
    #[default]
    Ansi378,
    Iso19794,
}

impl TemplateFormat {
    pub fn param_value(self) -> i32 {
        match self {
            TemplateFormat::Ansi378 => 0,
            TemplateFormat::Iso19794 => 1,
        }
    }
}

/// One finger placement: the raw image and the template extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub image: Vec<u8>,
    pub template: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Captured(Capture),
    /// The surface is empty. Expected while waiting for placement.
    NoFinger,
}

/// A stored template offered to the vendor's 1:N primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTemplate {
    pub id: u64,
    pub template: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
pub trait DeviceCapability: Send + Sync {
    fn init(&self) -> DeviceResult<()>;

    fn terminate(&self) -> DeviceResult<()>;

    fn device_count(&self) -> DeviceResult<u32>;

    fn open_device(&self, index: u32) -> DeviceResult<DeviceHandle>;

    fn close_device(&self, handle: DeviceHandle) -> DeviceResult<()>;

    fn set_parameter(&self, handle: DeviceHandle, code: ParamCode, value: i32) -> DeviceResult<()>;

    fn get_parameter(&self, handle: DeviceHandle, code: ParamCode) -> DeviceResult<i32>;

    /// Polls the sensor once. Never blocks waiting for a finger.
    fn acquire(&self, handle: DeviceHandle) -> DeviceResult<AcquireOutcome>;

    /// Returns the sensor to idle after an abandoned acquisition.
    fn abort_capture(&self, _handle: DeviceHandle) -> DeviceResult<()> {
        Ok(())
    }

    /// Similarity score of two templates on the SDK's 0-100 scale.
    fn match_templates(&self, a: &[u8], b: &[u8]) -> DeviceResult<u32>;

    /// Best candidate scoring at or above `threshold`, as `(id, score)`.
    fn identify_against_set(
        &self,
        template: &[u8],
        set: &[CandidateTemplate],
        threshold: u8,
    ) -> DeviceResult<Option<(u64, u32)>> {
        let mut best: Option<(u64, u32)> = None;
        for candidate in set {
            let score = self.match_templates(template, &candidate.template)?;
            if score >= u32::from(threshold) && best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate.id, score));
            }
        }
        Ok(best)
    }
}
