//! Small V8 helpers shared by the creator and restore sides.

use std::pin::pin;

use crate::error::SnapshotError;

/// Creates a V8 ArrayBuffer holding a copy of `data`.
///
/// The buffer is allocated by the isolate's ArrayBuffer allocator rather than
/// adopted from Rust memory, so it is accounted for by
/// [`crate::TrackingAllocator`] and can be written into a snapshot.
pub fn create_array_buffer_from_vec<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    data: Vec<u8>,
) -> v8::Local<'s, v8::ArrayBuffer> {
    let len = data.len();
    let ab = v8::ArrayBuffer::new(scope, len);

    if len == 0 {
        return ab;
    }

    let bs = ab.get_backing_store();
    if let Some(ptr) = bs.data() {
        // SAFETY: We just created this ArrayBuffer, so we have exclusive access.
        // The backing store is at least `len` bytes long.
        let dest = ptr.as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, len);
        }
    }

    ab
}

/// Compile and run `code` in the scope's current context.
///
/// Returns the completion value rendered as a string. Compile errors and
/// uncaught exceptions become [`SnapshotError::Script`] with the exception
/// message.
pub fn evaluate(scope: &mut v8::PinScope, code: &str) -> Result<String, SnapshotError> {
    let code_str = v8::String::new(scope, code).ok_or(SnapshotError::StringAllocation)?;

    let tc = pin!(v8::TryCatch::new(scope));
    let tc = tc.init();

    let script = v8::Script::compile(&tc, code_str, None).ok_or_else(|| {
        SnapshotError::Script(
            tc.exception()
                .and_then(|e| e.to_string(&tc).map(|s| s.to_rust_string_lossy(&tc)))
                .unwrap_or_else(|| "Compile error".to_string()),
        )
    })?;

    let result = script.run(&tc).ok_or_else(|| {
        SnapshotError::Script(
            tc.exception()
                .and_then(|e| e.to_string(&tc).map(|s| s.to_rust_string_lossy(&tc)))
                .unwrap_or_else(|| "Runtime error".to_string()),
        )
    })?;

    let rendered = result
        .to_string(&tc)
        .map(|s| s.to_rust_string_lossy(&tc))
        .unwrap_or_default();

    Ok(rendered)
}

/// Look up a global property of the scope's current context.
pub fn get_global<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    name: &str,
) -> Result<Option<v8::Local<'s, v8::Value>>, SnapshotError> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).ok_or(SnapshotError::StringAllocation)?;

    Ok(global
        .get(scope, key.into())
        .filter(|value| !value.is_undefined()))
}

/// Define a global property on the scope's current context.
pub fn set_global(
    scope: &mut v8::PinScope,
    name: &str,
    value: v8::Local<v8::Value>,
) -> Result<(), SnapshotError> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).ok_or(SnapshotError::StringAllocation)?;

    match global.set(scope, key.into(), value) {
        Some(true) => Ok(()),
        _ => Err(SnapshotError::Script(format!(
            "failed to define global `{}`",
            name
        ))),
    }
}
