// src/device/zkfp.rs
//! ZKFinger scanner reached through `libzkfp.so`.

use std::collections::HashMap;
use std::os::raw::{c_int, c_uint, c_void};
use std::path::Path;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    check, codes, AcquireOutcome, CandidateTemplate, Capture, DeviceCapability, DeviceError,
    DeviceErrorKind, DeviceHandle, DeviceResult, ParamCode, MAX_TEMPLATE_SIZE,
};

type InitFn = unsafe extern "C" fn() -> c_int;
type TerminateFn = unsafe extern "C" fn() -> c_int;
type DeviceCountFn = unsafe extern "C" fn() -> c_int;
type OpenDeviceFn = unsafe extern "C" fn(c_int) -> *mut c_void;
type CloseDeviceFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type AcquireFn =
    unsafe extern "C" fn(*mut c_void, *mut u8, c_uint, *mut u8, *mut c_uint) -> c_int;
type SetParametersFn = unsafe extern "C" fn(*mut c_void, c_int, *mut u8, c_uint) -> c_int;
type GetParametersFn = unsafe extern "C" fn(*mut c_void, c_int, *mut u8, *mut c_uint) -> c_int;
type DbInitFn = unsafe extern "C" fn() -> *mut c_void;
type DbFreeFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type DbAddFn = unsafe extern "C" fn(*mut c_void, c_uint, *mut u8, c_uint) -> c_int;
type DbIdentifyFn =
    unsafe extern "C" fn(*mut c_void, *mut u8, c_uint, *mut c_uint, *mut c_uint) -> c_int;
type DbMatchFn = unsafe extern "C" fn(*mut c_void, *mut u8, c_uint, *mut u8, c_uint) -> c_int;

struct Symbols {
    init: InitFn,
    terminate: TerminateFn,
    device_count: DeviceCountFn,
    open_device: OpenDeviceFn,
    close_device: CloseDeviceFn,
    acquire: AcquireFn,
    set_parameters: SetParametersFn,
    get_parameters: GetParametersFn,
    db_init: DbInitFn,
    db_free: DbFreeFn,
    db_add: DbAddFn,
    db_identify: DbIdentifyFn,
    db_match: DbMatchFn,
}

pub struct ZkfpDevice {
    symbols: Symbols,
    // Matching cache handle from ZKFPM_DBInit, stored as an address.
    match_cache: Mutex<Option<usize>>,
    image_sizes: Mutex<HashMap<DeviceHandle, usize>>,
    // Keeps the function pointers in `symbols` valid.
    _library: Library,
}

fn load_error(e: libloading::Error) -> DeviceError {
    warn!("Failed to load vendor symbol: {}", e);
    DeviceError::new(DeviceErrorKind::LibraryLoad)
}

impl ZkfpDevice {
    pub fn load<P: AsRef<Path>>(path: P) -> DeviceResult<Self> {
        let path = path.as_ref();
        info!("Loading fingerprint SDK from {}", path.display());

        unsafe {
            let library = Library::new(path).map_err(load_error)?;
            let symbols = Symbols {
                init: *library.get::<InitFn>(b"ZKFPM_Init\0").map_err(load_error)?,
                terminate: *library.get::<TerminateFn>(b"ZKFPM_Terminate\0").map_err(load_error)?,
                device_count: *library
                    .get::<DeviceCountFn>(b"ZKFPM_GetDeviceCount\0")
                    .map_err(load_error)?,
                open_device: *library.get::<OpenDeviceFn>(b"ZKFPM_OpenDevice\0").map_err(load_error)?,
                close_device: *library
                    .get::<CloseDeviceFn>(b"ZKFPM_CloseDevice\0")
                    .map_err(load_error)?,
                acquire: *library
                    .get::<AcquireFn>(b"ZKFPM_AcquireFingerprint\0")
                    .map_err(load_error)?,
                set_parameters: *library
                    .get::<SetParametersFn>(b"ZKFPM_SetParameters\0")
                    .map_err(load_error)?,
                get_parameters: *library
                    .get::<GetParametersFn>(b"ZKFPM_GetParameters\0")
                    .map_err(load_error)?,
                db_init: *library.get::<DbInitFn>(b"ZKFPM_DBInit\0").map_err(load_error)?,
                db_free: *library.get::<DbFreeFn>(b"ZKFPM_DBFree\0").map_err(load_error)?,
                db_add: *library.get::<DbAddFn>(b"ZKFPM_DBAdd\0").map_err(load_error)?,
                db_identify: *library.get::<DbIdentifyFn>(b"ZKFPM_DBIdentify\0").map_err(load_error)?,
                db_match: *library.get::<DbMatchFn>(b"ZKFPM_DBMatch\0").map_err(load_error)?,
            };

            Ok(Self {
                symbols,
                match_cache: Mutex::new(None),
                image_sizes: Mutex::new(HashMap::new()),
                _library: library,
            })
        }
    }

    fn raw(handle: DeviceHandle) -> *mut c_void {
        handle.0 as *mut c_void
    }

    fn with_temp_cache<T>(&self, f: impl FnOnce(*mut c_void) -> DeviceResult<T>) -> DeviceResult<T> {
        let cache = unsafe { (self.symbols.db_init)() };
        if cache.is_null() {
            return Err(DeviceError::from_code(codes::INIT_LIB));
        }
        let result = f(cache);
        let freed = unsafe { (self.symbols.db_free)(cache) };
        if freed != codes::OK {
            warn!("Failed to free temporary match cache: {}", freed);
        }
        result
    }
}

impl DeviceCapability for ZkfpDevice {
    fn init(&self) -> DeviceResult<()> {
        check(unsafe { (self.symbols.init)() })?;
        let cache = unsafe { (self.symbols.db_init)() };
        if cache.is_null() {
            return Err(DeviceError::from_code(codes::INIT_LIB));
        }
        *self.match_cache.lock() = Some(cache as usize);
        Ok(())
    }

    fn terminate(&self) -> DeviceResult<()> {
        if let Some(cache) = self.match_cache.lock().take() {
            let _ = unsafe { (self.symbols.db_free)(cache as *mut c_void) };
        }
        check(unsafe { (self.symbols.terminate)() })
    }

    fn device_count(&self) -> DeviceResult<u32> {
        let count = unsafe { (self.symbols.device_count)() };
        if count < 0 {
            return Err(DeviceError::from_code(count));
        }
        Ok(count as u32)
    }

    fn open_device(&self, index: u32) -> DeviceResult<DeviceHandle> {
        let raw = unsafe { (self.symbols.open_device)(index as c_int) };
        if raw.is_null() {
            return Err(DeviceError::new(DeviceErrorKind::OpenFailed));
        }
        let handle = DeviceHandle(raw as usize);

        let width = self.get_parameter(handle, ParamCode::IMAGE_WIDTH).unwrap_or(0);
        let height = self.get_parameter(handle, ParamCode::IMAGE_HEIGHT).unwrap_or(0);
        let size = (width.max(0) as usize) * (height.max(0) as usize);
        debug!(width, height, "Opened device {}", index);
        self.image_sizes.lock().insert(handle, size);
        Ok(handle)
    }

    fn close_device(&self, handle: DeviceHandle) -> DeviceResult<()> {
        self.image_sizes.lock().remove(&handle);
        let ret = unsafe { (self.symbols.close_device)(Self::raw(handle)) };
        if ret != codes::OK {
            warn!("Close returned vendor code {}", ret);
            return Err(DeviceError::new(DeviceErrorKind::CloseFailed));
        }
        Ok(())
    }

    fn set_parameter(&self, handle: DeviceHandle, code: ParamCode, value: i32) -> DeviceResult<()> {
        let mut bytes = value.to_ne_bytes();
        check(unsafe {
            (self.symbols.set_parameters)(
                Self::raw(handle),
                code.0,
                bytes.as_mut_ptr(),
                bytes.len() as c_uint,
            )
        })
    }

    fn get_parameter(&self, handle: DeviceHandle, code: ParamCode) -> DeviceResult<i32> {
        let mut bytes = [0u8; 4];
        let mut size = bytes.len() as c_uint;
        check(unsafe {
            (self.symbols.get_parameters)(Self::raw(handle), code.0, bytes.as_mut_ptr(), &mut size)
        })?;
        Ok(i32::from_ne_bytes(bytes))
    }

    fn acquire(&self, handle: DeviceHandle) -> DeviceResult<AcquireOutcome> {
        let image_size = self
            .image_sizes
            .lock()
            .get(&handle)
            .copied()
            .ok_or_else(|| DeviceError::from_code(codes::INVALID_HANDLE))?;

        let mut image = vec![0u8; image_size];
        let mut template = vec![0u8; MAX_TEMPLATE_SIZE];
        let mut template_len = MAX_TEMPLATE_SIZE as c_uint;

        let ret = unsafe {
            (self.symbols.acquire)(
                Self::raw(handle),
                image.as_mut_ptr(),
                image_size as c_uint,
                template.as_mut_ptr(),
                &mut template_len,
            )
        };

        match ret {
            codes::OK => {
                template.truncate(template_len as usize);
                Ok(AcquireOutcome::Captured(Capture { image, template }))
            }
            // The SDK reports an empty sensor as a capture failure.
            codes::CAPTURE => Ok(AcquireOutcome::NoFinger),
            code => Err(DeviceError::from_code(code)),
        }
    }

    fn abort_capture(&self, handle: DeviceHandle) -> DeviceResult<()> {
        // No native abort; switch indicator lights off so the sensor reads idle.
        for light in [ParamCode::GREEN_LIGHT, ParamCode::RED_LIGHT, ParamCode::WHITE_LIGHT] {
            self.set_parameter(handle, light, 0)?;
        }
        Ok(())
    }

    fn match_templates(&self, a: &[u8], b: &[u8]) -> DeviceResult<u32> {
        let cache = self
            .match_cache
            .lock()
            .ok_or_else(|| DeviceError::from_code(codes::INIT_LIB))?;

        let mut a = a.to_vec();
        let mut b = b.to_vec();
        let score = unsafe {
            (self.symbols.db_match)(
                cache as *mut c_void,
                a.as_mut_ptr(),
                a.len() as c_uint,
                b.as_mut_ptr(),
                b.len() as c_uint,
            )
        };
        if score < 0 {
            return Err(DeviceError::from_code(score));
        }
        Ok(score as u32)
    }

    fn identify_against_set(
        &self,
        template: &[u8],
        set: &[CandidateTemplate],
        threshold: u8,
    ) -> DeviceResult<Option<(u64, u32)>> {
        if set.is_empty() {
            return Ok(None);
        }

        self.with_temp_cache(|cache| {
            for (slot, candidate) in set.iter().enumerate() {
                let mut bytes = candidate.template.clone();
                check(unsafe {
                    (self.symbols.db_add)(cache, slot as c_uint, bytes.as_mut_ptr(), bytes.len() as c_uint)
                })?;
            }

            let mut probe = template.to_vec();
            let mut slot: c_uint = 0;
            let mut score: c_uint = 0;
            let ret = unsafe {
                (self.symbols.db_identify)(cache, probe.as_mut_ptr(), probe.len() as c_uint, &mut slot, &mut score)
            };
            identify_outcome(ret, slot, score, threshold, set)
        })
    }
}

/// Interprets a `ZKFPM_DBIdentify` return. Only a failed comparison is a miss.
fn identify_outcome(
    ret: c_int,
    slot: c_uint,
    score: c_uint,
    threshold: u8,
    set: &[CandidateTemplate],
) -> DeviceResult<Option<(u64, u32)>> {
    match ret {
        codes::OK => {}
        codes::VERIFY => return Ok(None),
        code => return Err(DeviceError::from_code(code)),
    }
    if score < c_uint::from(threshold) {
        return Ok(None);
    }
    Ok(set.get(slot as usize).map(|c| (c.id, score)))
}
