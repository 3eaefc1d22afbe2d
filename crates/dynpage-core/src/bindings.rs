//! Host function registration for page instances.
//!
//! Scripts interact with their bound request context exclusively through
//! host functions registered under the `"page"` module:
//!
//! - `page.log(level, ptr, len)` — emit a log message
//! - `page.status(code)` — set the response status
//! - `page.emit(ptr, len)` — append bytes to the response body
//! - `page.header(nptr, nlen, vptr, vlen)` — set a response header
//! - `page.req_get(field, ptr, cap) -> len` — read a request field
//!
//! All pointers refer to the calling instance's exported `memory`.

use tracing::{debug, error, info, warn};
use wasmtime::{Caller, Linker};

use crate::context::{LogLevel, PageContext, level_from_i32};
use dynpage_common::PageError;

/// Register all page host functions on a linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<PageContext>) -> Result<(), PageError> {
    register_log(linker)?;
    register_response(linker)?;
    register_request(linker)?;
    Ok(())
}

/// Read a byte range out of the calling instance's memory.
///
/// Returns `None` (with a warning) on any invalid access; host functions
/// treat bad pointers as no-ops rather than trapping.
fn read_guest_bytes(caller: &mut Caller<'_, PageContext>, ptr: i32, len: i32) -> Option<Vec<u8>> {
    if ptr < 0 || len < 0 {
        warn!(ptr, len, "Invalid pointer or length (negative value)");
        return None;
    }

    let Some(memory) = caller
        .get_export("memory")
        .and_then(wasmtime::Extern::into_memory)
    else {
        warn!("Memory export not found in calling instance");
        return None;
    };

    #[allow(clippy::cast_sign_loss)]
    let (start, len) = (ptr as usize, len as usize);
    let data = memory.data(&caller);
    let end = start.checked_add(len)?;
    if end > data.len() {
        warn!(
            start,
            end,
            memory_size = data.len(),
            "Memory access out of bounds"
        );
        return None;
    }

    Some(data[start..end].to_vec())
}

/// Register `page.log`.
///
/// Guest logs are stored on the context and also emitted via `tracing`
/// with the current request id.
pub fn register_log(linker: &mut Linker<PageContext>) -> Result<(), PageError> {
    linker
        .func_wrap(
            "page",
            "log",
            |mut caller: Caller<'_, PageContext>, level: i32, ptr: i32, len: i32| {
                let Some(bytes) = read_guest_bytes(&mut caller, ptr, len) else {
                    return;
                };
                let message = String::from_utf8_lossy(&bytes).into_owned();
                let level = level_from_i32(level);

                let ctx = caller.data_mut();
                let request_id = ctx.request_id.clone();
                match level {
                    LogLevel::Debug => debug!(request_id, guest_log = true, "{}", message),
                    LogLevel::Info => info!(request_id, guest_log = true, "{}", message),
                    LogLevel::Warn => warn!(request_id, guest_log = true, "{}", message),
                    LogLevel::Error => error!(request_id, guest_log = true, "{}", message),
                }
                ctx.log(level, message);
            },
        )
        .map_err(|e| PageError::invalid_config(format!("Failed to register log: {e}")))?;

    Ok(())
}

/// Register `page.status`, `page.emit`, and `page.header`.
pub fn register_response(linker: &mut Linker<PageContext>) -> Result<(), PageError> {
    linker
        .func_wrap(
            "page",
            "status",
            |mut caller: Caller<'_, PageContext>, code: i32| {
                let Ok(code) = u16::try_from(code) else {
                    warn!(code, "Ignoring out-of-range status code");
                    return;
                };
                if !(100..=599).contains(&code) {
                    warn!(code, "Ignoring out-of-range status code");
                    return;
                }
                caller.data_mut().response_mut().status = code;
            },
        )
        .map_err(|e| PageError::invalid_config(format!("Failed to register status: {e}")))?;

    linker
        .func_wrap(
            "page",
            "emit",
            |mut caller: Caller<'_, PageContext>, ptr: i32, len: i32| {
                let Some(bytes) = read_guest_bytes(&mut caller, ptr, len) else {
                    return;
                };
                caller.data_mut().response_mut().body.extend_from_slice(&bytes);
            },
        )
        .map_err(|e| PageError::invalid_config(format!("Failed to register emit: {e}")))?;

    linker
        .func_wrap(
            "page",
            "header",
            |mut caller: Caller<'_, PageContext>,
             name_ptr: i32,
             name_len: i32,
             value_ptr: i32,
             value_len: i32| {
                let Some(name) = read_guest_bytes(&mut caller, name_ptr, name_len) else {
                    return;
                };
                let Some(value) = read_guest_bytes(&mut caller, value_ptr, value_len) else {
                    return;
                };
                let name = String::from_utf8_lossy(&name).into_owned();
                let value = String::from_utf8_lossy(&value).into_owned();
                caller.data_mut().response_mut().set_header(name, value);
            },
        )
        .map_err(|e| PageError::invalid_config(format!("Failed to register header: {e}")))?;

    Ok(())
}

/// Register `page.req_get`.
///
/// Returns the length of the selected request field, and copies it into
/// guest memory at `ptr` when `cap` is large enough. Returns -1 for an
/// unknown field selector.
pub fn register_request(linker: &mut Linker<PageContext>) -> Result<(), PageError> {
    linker
        .func_wrap(
            "page",
            "req_get",
            |mut caller: Caller<'_, PageContext>, field: i32, ptr: i32, cap: i32| -> i32 {
                let Some(value) = caller.data().request().field(field).map(<[u8]>::to_vec)
                else {
                    return -1;
                };
                let Ok(len) = i32::try_from(value.len()) else {
                    return -1;
                };

                if ptr < 0 || cap < len {
                    // Caller only asked for the length (or gave a short
                    // buffer); report what is needed.
                    return len;
                }

                let Some(memory) = caller
                    .get_export("memory")
                    .and_then(wasmtime::Extern::into_memory)
                else {
                    warn!("Memory export not found in calling instance");
                    return -1;
                };

                #[allow(clippy::cast_sign_loss)]
                if memory.write(&mut caller, ptr as usize, &value).is_err() {
                    warn!(ptr, len, "Request field copy out of bounds");
                    return -1;
                }

                len
            },
        )
        .map_err(|e| PageError::invalid_config(format!("Failed to register req_get: {e}")))?;

    Ok(())
}
