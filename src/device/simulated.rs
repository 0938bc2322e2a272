// src/device/simulated.rs
//! In-process stand-in for a scanner.
//!
//! Acquisitions replay a script; when the script runs dry the sensor reports
//! an empty surface. Templates built with [`SimulatedDevice::template`] carry
//! a finger tag in their first two bytes, and the default scorer rates two
//! templates of the same finger at `same_finger_score` and anything else at
//! `different_finger_score`. Explicit pair scores override both.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::{
    codes, AcquireOutcome, Capture, DeviceError, DeviceHandle, DeviceResult, DeviceCapability,
    ParamCode,
};

const DEFAULT_SAME_FINGER_SCORE: u32 = 80;
const DEFAULT_DIFFERENT_FINGER_SCORE: u32 = 10;

#[derive(Debug, Default)]
struct SimState {
    script: VecDeque<DeviceResult<AcquireOutcome>>,
    params: HashMap<i32, i32>,
    pair_scores: HashMap<(Vec<u8>, Vec<u8>), u32>,
    open_handles: Vec<DeviceHandle>,
    initialized: bool,
}

pub struct SimulatedDevice {
    state: Mutex<SimState>,
    device_count: u32,
    same_finger_score: u32,
    different_finger_score: u32,
    acquire_calls: AtomicU32,
    abort_calls: AtomicU32,
    match_calls: AtomicU32,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_device_count(1)
    }

    pub fn with_device_count(device_count: u32) -> Self {
        let mut state = SimState::default();
        state.params.insert(ParamCode::IMAGE_WIDTH.0, 300);
        state.params.insert(ParamCode::IMAGE_HEIGHT.0, 400);
        state.params.insert(ParamCode::IMAGE_DPI.0, 500);

        Self {
            state: Mutex::new(state),
            device_count,
            same_finger_score: DEFAULT_SAME_FINGER_SCORE,
            different_finger_score: DEFAULT_DIFFERENT_FINGER_SCORE,
            acquire_calls: AtomicU32::new(0),
            abort_calls: AtomicU32::new(0),
            match_calls: AtomicU32::new(0),
        }
    }

    pub fn with_scores(mut self, same_finger: u32, different_finger: u32) -> Self {
        self.same_finger_score = same_finger;
        self.different_finger_score = different_finger;
        self
    }

    /// Builds a template of `len` bytes (at least 4) tagged with `finger`.
    pub fn template(finger: u16, sample: u16, len: usize) -> Vec<u8> {
        let len = len.max(4);
        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&finger.to_be_bytes());
        bytes.extend_from_slice(&sample.to_be_bytes());
        let seed = finger as usize * 31 + sample as usize * 7;
        bytes.extend((4..len).map(|i| ((seed + i * 13) % 251) as u8));
        bytes
    }

    pub fn push_capture(&self, template: Vec<u8>) {
        let image = vec![0x7f; 64];
        self.state
            .lock()
            .script
            .push_back(Ok(AcquireOutcome::Captured(Capture { image, template })));
    }

    pub fn push_no_finger(&self, polls: usize) {
        let mut state = self.state.lock();
        for _ in 0..polls {
            state.script.push_back(Ok(AcquireOutcome::NoFinger));
        }
    }

    pub fn push_error(&self, code: i32) {
        self.state
            .lock()
            .script
            .push_back(Err(DeviceError::from_code(code)));
    }

    /// Fixes the score between two exact templates, in both directions.
    pub fn set_pair_score(&self, a: &[u8], b: &[u8], score: u32) {
        let mut state = self.state.lock();
        state.pair_scores.insert((a.to_vec(), b.to_vec()), score);
        state.pair_scores.insert((b.to_vec(), a.to_vec()), score);
    }

    pub fn parameter(&self, code: ParamCode) -> Option<i32> {
        self.state.lock().params.get(&code.0).copied()
    }

    pub fn pending_script(&self) -> usize {
        self.state.lock().script.len()
    }

    pub fn acquire_calls(&self) -> u32 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> u32 {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn match_calls(&self) -> u32 {
        self.match_calls.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        !self.state.lock().open_handles.is_empty()
    }

    fn finger_tag(template: &[u8]) -> Option<u16> {
        template.get(..2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn ensure_open(state: &SimState, handle: DeviceHandle) -> DeviceResult<()> {
        if state.open_handles.contains(&handle) {
            Ok(())
        } else {
            Err(DeviceError::from_code(codes::INVALID_HANDLE))
        }
    }
}

impl DeviceCapability for SimulatedDevice {
    fn init(&self) -> DeviceResult<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn terminate(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.initialized = false;
        state.open_handles.clear();
        Ok(())
    }

    fn device_count(&self) -> DeviceResult<u32> {
        if !self.state.lock().initialized {
            return Err(DeviceError::from_code(codes::INIT_LIB));
        }
        Ok(self.device_count)
    }

    fn open_device(&self, index: u32) -> DeviceResult<DeviceHandle> {
        if index >= self.device_count {
            return Err(DeviceError::from_code(codes::NO_DEVICE));
        }
        let handle = DeviceHandle(index as usize + 1);
        let mut state = self.state.lock();
        if !state.open_handles.contains(&handle) {
            state.open_handles.push(handle);
        }
        Ok(handle)
    }

    fn close_device(&self, handle: DeviceHandle) -> DeviceResult<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, handle)?;
        state.open_handles.retain(|h| *h != handle);
        Ok(())
    }

    fn set_parameter(&self, handle: DeviceHandle, code: ParamCode, value: i32) -> DeviceResult<()> {
        let mut state = self.state.lock();
        Self::ensure_open(&state, handle)?;
        state.params.insert(code.0, value);
        Ok(())
    }

    fn get_parameter(&self, handle: DeviceHandle, code: ParamCode) -> DeviceResult<i32> {
        let state = self.state.lock();
        Self::ensure_open(&state, handle)?;
        state
            .params
            .get(&code.0)
            .copied()
            .ok_or_else(|| DeviceError::from_code(codes::INVALID_PARAM))
    }

    fn acquire(&self, handle: DeviceHandle) -> DeviceResult<AcquireOutcome> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::ensure_open(&state, handle)?;
        state.script.pop_front().unwrap_or(Ok(AcquireOutcome::NoFinger))
    }

    fn abort_capture(&self, _handle: DeviceHandle) -> DeviceResult<()> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        for light in [ParamCode::GREEN_LIGHT, ParamCode::RED_LIGHT, ParamCode::WHITE_LIGHT] {
            state.params.insert(light.0, 0);
        }
        Ok(())
    }

    fn match_templates(&self, a: &[u8], b: &[u8]) -> DeviceResult<u32> {
        self.match_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if let Some(score) = state.pair_scores.get(&(a.to_vec(), b.to_vec())) {
            return Ok(*score);
        }
        match (Self::finger_tag(a), Self::finger_tag(b)) {
            (Some(x), Some(y)) if x == y => Ok(self.same_finger_score),
            (Some(_), Some(_)) => Ok(self.different_finger_score),
            _ => Err(DeviceError::from_code(codes::VERIFY)),
        }
    }
}
