//! Native data attached to internal fields of script objects.
//!
//! While an isolate is live, an internal field holds a `v8::External` that
//! points at a value owned by a [`NativeFieldStore`]. Externals can't be
//! written into a snapshot, so right before a context is registered with the
//! snapshot creator each native value is turned into an opaque payload by a
//! user callback and the field is overwritten with a `Uint8Array` holding
//! those bytes. After restore, a complementary callback turns each payload
//! back into a native value which is attached to the same field again.
//!
//! ```text
//!   creator isolate                          restored isolate
//!   ┌──────────────┐   serialize(i, &T)      ┌──────────────┐
//!   │ field i:     │ ──────────────────►     │ field i:     │
//!   │ External(&T) │   Uint8Array payload    │ Uint8Array   │
//!   └──────────────┘ ──── blob ─────────►    └──────┬───────┘
//!                                                   │ deserialize(i, &[u8])
//!                                            ┌──────▼───────┐
//!                                            │ External(&T) │
//!                                            └──────────────┘
//! ```

use std::ffi::c_void;

use crate::error::SnapshotError;

/// Owns native values attached to internal fields and resolves them back.
///
/// Values are boxed so their addresses stay stable while externals point at
/// them. The store must outlive every context whose fields it populated.
pub struct NativeFieldStore<T> {
    values: Vec<Box<T>>,
}

impl<T: 'static> NativeFieldStore<T> {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over attached values in attachment order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.values.iter().map(|value| value.as_ref())
    }

    /// Take ownership of `value` and store a pointer to it in `holder`'s field.
    pub(crate) fn attach(
        &mut self,
        scope: &mut v8::PinScope,
        holder: v8::Local<v8::Object>,
        index: usize,
        value: T,
    ) -> Result<(), SnapshotError> {
        if index >= holder.internal_field_count() {
            return Err(SnapshotError::NativeField(format!(
                "internal field {} out of range (object has {})",
                index,
                holder.internal_field_count()
            )));
        }

        let boxed = Box::new(value);
        let ptr = boxed.as_ref() as *const T as *mut c_void;
        self.values.push(boxed);

        let external = v8::External::new(scope, ptr);

        if !holder.set_internal_field(index, external.into()) {
            return Err(SnapshotError::NativeField(format!(
                "failed to set internal field {}",
                index
            )));
        }

        Ok(())
    }

    /// The value attached to `holder`'s field, if it belongs to this store.
    ///
    /// Pointers that this store didn't hand out are never dereferenced.
    pub(crate) fn resolve(
        &self,
        scope: &mut v8::PinScope,
        holder: v8::Local<v8::Object>,
        index: usize,
    ) -> Option<&T> {
        let value = internal_field_value(scope, holder, index)?;

        if !value.is_external() {
            return None;
        }

        let external: v8::Local<v8::External> = value.try_into().ok()?;
        let ptr = external.value() as *const T;

        self.values
            .iter()
            .find(|boxed| std::ptr::eq(boxed.as_ref(), ptr))
            .map(|boxed| boxed.as_ref())
    }
}

impl<T: 'static> Default for NativeFieldStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn internal_field_value<'s>(
    scope: &mut v8::PinScope<'s, '_>,
    holder: v8::Local<v8::Object>,
    index: usize,
) -> Option<v8::Local<'s, v8::Value>> {
    if index >= holder.internal_field_count() {
        return None;
    }

    let data = holder.get_internal_field(scope, index)?;
    data.try_into().ok()
}

/// Replace a field's content with a snapshot-safe payload.
pub(crate) fn store_payload(
    scope: &mut v8::PinScope,
    holder: v8::Local<v8::Object>,
    index: usize,
    payload: Vec<u8>,
) -> Result<(), SnapshotError> {
    let len = payload.len();
    let buffer = crate::v8_helpers::create_array_buffer_from_vec(scope, payload);
    let view = v8::Uint8Array::new(scope, buffer, 0, len).ok_or_else(|| {
        SnapshotError::NativeField(format!("failed to create payload view ({} bytes)", len))
    })?;

    if !holder.set_internal_field(index, view.into()) {
        return Err(SnapshotError::NativeField(format!(
            "failed to store payload in internal field {}",
            index
        )));
    }

    Ok(())
}

/// The payload stored in a field by [`store_payload`], if any.
pub(crate) fn load_payload(
    scope: &mut v8::PinScope,
    holder: v8::Local<v8::Object>,
    index: usize,
) -> Option<Vec<u8>> {
    let value = internal_field_value(scope, holder, index)?;

    if !value.is_uint8_array() {
        return None;
    }

    let view: v8::Local<v8::Uint8Array> = value.try_into().ok()?;
    let mut payload = vec![0u8; view.byte_length()];
    let copied = view.copy_contents(&mut payload);
    payload.truncate(copied);

    Some(payload)
}
