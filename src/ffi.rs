use crate::config::Config;
use crate::error::{codes, strerror, Error, InitDetail, ALL_CODES};
use crate::session::Instance;
use crate::Queue::RecvOutcome;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::time::Duration;

/// `LibpdCfg::test_flags` bit: connect and disconnect around every send.
pub const CFG_TEST_CONNECT_ON_EVERY_SEND: u32 = 1;

/// Handle to an instance (opaque pointer)
pub struct InstanceHandle {
    inner: Instance,
}

/// Instance configuration as passed from C.
///
/// Null URL pointers select the default URLs.
#[repr(C)]
pub struct LibpdCfg {
    pub service_name: *const c_char,
    pub receive: bool,
    pub keepalive_timeout_secs: u32,
    pub parodus_url: *const c_char,
    pub client_url: *const c_char,
    pub test_flags: u32,
}

/// Extra detail for a failed init: which step failed and the OS errno.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtraErrInfo {
    pub err_detail: i32,
    pub oserr: i32,
}

lazy_static! {
    static ref STRERROR_TABLE: HashMap<i32, CString> = ALL_CODES
        .iter()
        .map(|&code| (code, CString::new(strerror(code)).unwrap_or_default()))
        .collect();
    static ref UNKNOWN_ERROR: CString = CString::new(strerror(i32::MIN)).unwrap_or_default();
}

unsafe fn opt_string(p: *const c_char, field: InitDetail) -> Result<Option<String>, Error> {
    if p.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(p)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|e| Error::InitConfig {
            detail: field,
            reason: e.to_string(),
            oserr: libc::EINVAL,
        })
}

unsafe fn config_from_c(cfg: &LibpdCfg) -> Result<Config, Error> {
    let service_name = opt_string(cfg.service_name, InitDetail::ServiceName)?.unwrap_or_default();
    let mut config = Config::new(service_name)
        .receive(cfg.receive)
        .keepalive_timeout_secs(u64::from(cfg.keepalive_timeout_secs))
        .reconnect_every_send(cfg.test_flags & CFG_TEST_CONNECT_ON_EVERY_SEND != 0);
    if let Some(url) = opt_string(cfg.parodus_url, InitDetail::SenderUrl)? {
        config = config.parodus_url(url);
    }
    if let Some(url) = opt_string(cfg.client_url, InitDetail::ReceiverUrl)? {
        config = config.client_url(url);
    }
    Ok(config)
}

// -----------------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------------

/// Create an instance.
///
/// # Returns
/// * 0 and `*instance` set on success.
/// * A negative code with `*instance` set to NULL on failure.
#[no_mangle]
pub extern "C" fn libparodus_init(instance: *mut *mut InstanceHandle, cfg: *const LibpdCfg) -> i32 {
    libparodus_init_dbg(instance, cfg, ptr::null_mut())
}

/// Same as `libparodus_init`, also filling `err_info` (may be NULL).
#[no_mangle]
pub extern "C" fn libparodus_init_dbg(
    instance: *mut *mut InstanceHandle,
    cfg: *const LibpdCfg,
    err_info: *mut ExtraErrInfo,
) -> i32 {
    if instance.is_null() || cfg.is_null() {
        return codes::INVALID_ARG;
    }
    unsafe { *instance = ptr::null_mut() };

    let result = unsafe { config_from_c(&*cfg) }.and_then(Instance::init);
    let info = match &result {
        Ok(_) => ExtraErrInfo::default(),
        Err(e) => ExtraErrInfo {
            err_detail: e.detail().map_or(codes::detail::NONE, InitDetail::code),
            oserr: e.os_error(),
        },
    };
    if !err_info.is_null() {
        unsafe { *err_info = info };
    }

    match result {
        Ok(inner) => {
            let handle = Box::new(InstanceHandle { inner });
            unsafe { *instance = Box::into_raw(handle) };
            codes::OK
        }
        Err(e) => {
            tracing::error!(error = %e, "libparodus_init failed");
            e.code()
        }
    }
}

/// Shut an instance down and set `*instance` to NULL.
///
/// Succeeds on a NULL handle, including one left by a failed init.
#[no_mangle]
pub extern "C" fn libparodus_shutdown(instance: *mut *mut InstanceHandle) -> i32 {
    if instance.is_null() {
        return codes::OK;
    }
    let handle = unsafe { *instance };
    if handle.is_null() {
        return codes::OK;
    }
    unsafe {
        let handle = Box::from_raw(handle);
        handle.inner.shutdown();
        *instance = ptr::null_mut();
    }
    codes::OK
}

// -----------------------------------------------------------------------------
// Messaging
// -----------------------------------------------------------------------------

/// Send an encoded WRP request or event.
///
/// # Returns
/// * 0 on success, negative error code otherwise.
#[no_mangle]
pub extern "C" fn libparodus_send(instance: *mut InstanceHandle, data: *const u8, len: usize) -> i32 {
    if instance.is_null() {
        return codes::SEND_NULL_INST;
    }
    if data.is_null() {
        return codes::SEND_WRP_MSG;
    }
    let inst = unsafe { &(*instance).inner };
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };

    match inst.send_raw(bytes) {
        Ok(()) => codes::OK,
        Err(e) => e.code(),
    }
}

/// Receive a message.
///
/// # Arguments
/// * `out_buf` - Set to a buffer holding the encoded message; release it with
///   `libparodus_free_msg`.
/// * `out_len` - Set to the length of that buffer.
///
/// # Returns
/// * 0 on success, 1 on timeout, 2 if the receiver was closed.
/// * Negative error code otherwise.
#[no_mangle]
pub extern "C" fn libparodus_receive(
    instance: *mut InstanceHandle,
    out_buf: *mut *mut u8,
    out_len: *mut usize,
    timeout_ms: u32,
) -> i32 {
    if instance.is_null() {
        return codes::RCV_NULL_INST;
    }
    if out_buf.is_null() || out_len.is_null() {
        return codes::INVALID_ARG;
    }
    let inst = unsafe { &(*instance).inner };
    unsafe {
        *out_buf = ptr::null_mut();
        *out_len = 0;
    }

    match inst.receive_raw(Duration::from_millis(u64::from(timeout_ms))) {
        Ok(RecvOutcome::Message(bytes)) => {
            let bytes = bytes.into_boxed_slice();
            unsafe {
                *out_len = bytes.len();
                *out_buf = Box::into_raw(bytes) as *mut u8;
            }
            codes::OK
        }
        Ok(RecvOutcome::Timeout) => codes::RECEIVE_TIMEOUT,
        Ok(RecvOutcome::Closed) => codes::RECEIVE_CLOSED,
        Err(e) => e.code(),
    }
}

/// Free a buffer returned by `libparodus_receive`.
#[no_mangle]
pub extern "C" fn libparodus_free_msg(buf: *mut u8, len: usize) {
    if !buf.is_null() {
        unsafe {
            let _ = Box::from_raw(ptr::slice_from_raw_parts_mut(buf, len));
        }
    }
}

/// Stop receiving; blocked and later receives return 2 (closed).
#[no_mangle]
pub extern "C" fn libparodus_close_receiver(instance: *mut InstanceHandle) -> i32 {
    if instance.is_null() {
        return codes::CLOSE_RCV_NULL_INST;
    }
    let inst = unsafe { &(*instance).inner };
    match inst.close_receiver() {
        Ok(()) => codes::OK,
        Err(e) => e.code(),
    }
}

/// Read the keepalive and reconnect counters. Either out pointer may be NULL.
#[no_mangle]
pub extern "C" fn libparodus_get_counts(
    instance: *mut InstanceHandle,
    keepalive_count: *mut u64,
    reconnect_count: *mut u64,
) -> i32 {
    if instance.is_null() {
        return codes::INVALID_ARG;
    }
    let inst = unsafe { &(*instance).inner };
    unsafe {
        if !keepalive_count.is_null() {
            *keepalive_count = inst.keepalive_count();
        }
        if !reconnect_count.is_null() {
            *reconnect_count = inst.reconnect_count();
        }
    }
    codes::OK
}

/// Static, NUL-terminated text for any code returned above.
#[no_mangle]
pub extern "C" fn libparodus_strerror(code: i32) -> *const c_char {
    STRERROR_TABLE
        .get(&code)
        .unwrap_or(&*UNKNOWN_ERROR)
        .as_ptr()
}
