//! C ABI exported to host runtimes.
//!
//! Every function here is a thin shim over the process-wide [`Registry`]:
//! raw pointers are turned into slices, and the registry does the rest.
//!
//! Handles are `int64_t` tokens, `0` meaning "no session". Status returns are
//! `0` on success and negative on failure. A failing call leaves a message
//! for `ib_last_error` on the calling thread.
//!
//! A handle may be used from any thread, but callers should not drive the
//! same handle from several threads at once; calls on one handle are
//! serialized, not interleaved.

#![allow(clippy::missing_safety_doc)]

use once_cell::sync::Lazy;
use std::ffi::{c_char, CStr};
use std::path::Path;
use std::slice;
use tracing::info;

use crate::config::Config;
use crate::error::{self, BridgeError};
use crate::inference::{OnnxBackend, SlotKind};
use crate::registry::{self, on_sentinel, Registry, NO_SESSION};
use crate::{logging, LOG_TARGET};

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry::new(Box::new(OnnxBackend::new())));

/// The registry behind the exported functions.
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Borrow `length` elements at `ptr`. Non-positive lengths give an empty
/// slice so the registry can report them; a null pointer with a positive
/// length gives `None`.
unsafe fn slice_from<'a, T>(ptr: *const T, length: i32) -> Option<&'a [T]> {
    match usize::try_from(length) {
        Ok(0) | Err(_) => Some(&[]),
        Ok(_) if ptr.is_null() => None,
        Ok(n) => Some(slice::from_raw_parts(ptr, n)),
    }
}

unsafe fn slice_from_mut<'a, T>(ptr: *mut T, length: i32) -> Option<&'a mut [T]> {
    match usize::try_from(length) {
        Ok(0) | Err(_) => Some(&mut []),
        Ok(_) if ptr.is_null() => None,
        Ok(n) => Some(slice::from_raw_parts_mut(ptr, n)),
    }
}

fn null_buffer(op: &'static str) -> i32 {
    registry::status(registry::guarded(op, || {
        Err(BridgeError::buffer("buffer pointer is null"))
    }))
}

/// Initialize logging and session settings.
///
/// `config_path` names a YAML file, or is null for defaults. Safe to call
/// more than once; later calls replace the session settings, while the log
/// subscriber is only installed the first time.
#[no_mangle]
pub unsafe extern "C" fn ib_init(config_path: *const c_char) -> i32 {
    let path = if config_path.is_null() {
        None
    } else {
        Some(CStr::from_ptr(config_path).to_string_lossy().into_owned())
    };

    registry::status(registry::guarded("init", || {
        let config = match &path {
            Some(p) => Config::from_yaml_file(Path::new(p))?,
            None => Config::default(),
        };
        logging::init(&config.logging);
        REGISTRY.configure(config.session.clone());
        info!(
            target: LOG_TARGET,
            version = crate::VERSION,
            threads = config.session.num_threads,
            optimization = %config.session.optimization_level,
            "inference bridge initialized"
        );
        Ok(())
    }))
}

/// Library version as a static NUL-terminated string. Never null.
#[no_mangle]
pub extern "C" fn ib_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

/// Message for the last failure on this thread, or null.
///
/// The pointer stays valid until the next bridge call on the same thread.
#[no_mangle]
pub extern "C" fn ib_last_error() -> *const c_char {
    error::last_error_ptr()
}

/// Load a serialized model. Returns a handle, or `0` on failure.
///
/// The model bytes are copied; the caller's buffer may be released once this
/// returns.
#[no_mangle]
pub unsafe extern "C" fn ib_create(model: *const u8, model_len: usize) -> i64 {
    if model.is_null() && model_len > 0 {
        let _ = null_buffer("create");
        return NO_SESSION;
    }
    let bytes = if model_len == 0 {
        &[][..]
    } else {
        slice::from_raw_parts(model, model_len)
    };
    REGISTRY.create(bytes)
}

/// Release a session. `0` and already destroyed handles are ignored.
#[no_mangle]
pub extern "C" fn ib_destroy(handle: i64) {
    if handle == NO_SESSION {
        return on_sentinel(());
    }
    REGISTRY.destroy(handle)
}

/// Copy `length` floats from `data` into input slot `index`.
///
/// `data` must point to at least `length` readable floats.
#[no_mangle]
pub unsafe extern "C" fn ib_set_input(
    handle: i64,
    index: i32,
    data: *const f32,
    length: i32,
) -> i32 {
    match slice_from(data, length) {
        Some(src) => REGISTRY.set_input(handle, index, src, length),
        None => null_buffer("set_input"),
    }
}

/// Copy `length` raw bytes from `data` into input slot `index`.
#[no_mangle]
pub unsafe extern "C" fn ib_set_input_bytes(
    handle: i64,
    index: i32,
    data: *const u8,
    length: i32,
) -> i32 {
    match slice_from(data, length) {
        Some(src) => REGISTRY.set_input_bytes(handle, index, src, length),
        None => null_buffer("set_input_bytes"),
    }
}

/// Run the forward pass. Blocks until complete.
#[no_mangle]
pub extern "C" fn ib_invoke(handle: i64) -> i32 {
    REGISTRY.invoke(handle)
}

/// Copy `length` floats from output slot `index` into `dest`.
///
/// `dest` must point to at least `length` writable floats. A `length` larger
/// than the slot fails; nothing is clamped.
#[no_mangle]
pub unsafe extern "C" fn ib_get_output(
    handle: i64,
    index: i32,
    dest: *mut f32,
    length: i32,
) -> i32 {
    match slice_from_mut(dest, length) {
        Some(out) => REGISTRY.get_output(handle, index, out, length),
        None => null_buffer("get_output"),
    }
}

/// Copy `length` raw bytes from output slot `index` into `dest`.
#[no_mangle]
pub unsafe extern "C" fn ib_get_output_bytes(
    handle: i64,
    index: i32,
    dest: *mut u8,
    length: i32,
) -> i32 {
    match slice_from_mut(dest, length) {
        Some(out) => REGISTRY.get_output_bytes(handle, index, out, length),
        None => null_buffer("get_output_bytes"),
    }
}

/// Number of input slots, `0` for an unknown handle.
#[no_mangle]
pub extern "C" fn ib_get_input_count(handle: i64) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.input_count(handle)
}

/// Number of output slots, `0` for an unknown handle.
#[no_mangle]
pub extern "C" fn ib_get_output_count(handle: i64) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.output_count(handle)
}

unsafe fn fill_shape(handle: i64, kind: SlotKind, index: i32, shape: *mut i32, capacity: i32) {
    if handle == NO_SESSION {
        return on_sentinel(());
    }
    if let Some(dest) = slice_from_mut(shape, capacity) {
        REGISTRY.copy_shape(handle, kind, index, dest);
    }
}

/// Write up to `capacity` extents of input slot `index` into `shape`.
///
/// Silent on failure; `shape` is left untouched.
#[no_mangle]
pub unsafe extern "C" fn ib_get_input_shape(
    handle: i64,
    index: i32,
    shape: *mut i32,
    capacity: i32,
) {
    fill_shape(handle, SlotKind::Input, index, shape, capacity)
}

/// Write up to `capacity` extents of output slot `index` into `shape`.
#[no_mangle]
pub unsafe extern "C" fn ib_get_output_shape(
    handle: i64,
    index: i32,
    shape: *mut i32,
    capacity: i32,
) {
    fill_shape(handle, SlotKind::Output, index, shape, capacity)
}

/// Rank of input slot `index`, `0` when unknown.
#[no_mangle]
pub extern "C" fn ib_get_input_rank(handle: i64, index: i32) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.rank(handle, SlotKind::Input, index)
}

/// Rank of output slot `index`, `0` when unknown.
#[no_mangle]
pub extern "C" fn ib_get_output_rank(handle: i64, index: i32) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.rank(handle, SlotKind::Output, index)
}

/// Element type code of input slot `index`: 1 f32, 2 u8, 3 i8, 4 i32, 5 i64,
/// 0 when unknown.
#[no_mangle]
pub extern "C" fn ib_get_input_type(handle: i64, index: i32) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.element_type(handle, SlotKind::Input, index)
}

/// Element type code of output slot `index`.
#[no_mangle]
pub extern "C" fn ib_get_output_type(handle: i64, index: i32) -> i32 {
    if handle == NO_SESSION {
        return on_sentinel(0);
    }
    REGISTRY.element_type(handle, SlotKind::Output, index)
}
