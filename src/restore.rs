//! Restoring isolates and contexts from a startup blob.

use std::pin::pin;
use std::sync::Arc;

use crate::allocator::TrackingAllocator;
use crate::blob::StartupBlob;
use crate::config::HarnessConfig;
use crate::creator::{ContextIndex, DataIndex};
use crate::error::SnapshotError;
use crate::external_refs::ExternalReferenceTable;
use crate::fields::{self, NativeFieldStore};
use crate::v8_helpers;
use crate::value::SnapshotValue;

/// A context materialized from a blob.
///
/// Must be dropped before the [`RestoredIsolate`] it came from.
pub struct RestoredContext {
    context: v8::Global<v8::Context>,
    index: ContextIndex,
}

impl RestoredContext {
    pub fn index(&self) -> ContextIndex {
        self.index
    }
}

/// An isolate created from a startup blob.
pub struct RestoredIsolate {
    isolate: v8::OwnedIsolate,
    allocator: Arc<TrackingAllocator>,
    blob_len: usize,
}

impl RestoredIsolate {
    /// Create an isolate seeded with `blob`.
    ///
    /// `external_refs` must have the size of the table the blob was created
    /// with when that size is known; the callbacks themselves may differ.
    pub fn new(
        config: &HarnessConfig,
        blob: StartupBlob,
        external_refs: Option<&ExternalReferenceTable>,
    ) -> Result<Self, SnapshotError> {
        crate::platform::get_platform(config);

        let actual = external_refs.map_or(0, ExternalReferenceTable::len);
        if let Some(expected) = blob.external_references()
            && expected != actual
        {
            return Err(SnapshotError::ExternalReferenceMismatch { expected, actual });
        }

        let blob_len = blob.len();
        let allocator = TrackingAllocator::new(config.heap_max_bytes());

        let mut params = v8::CreateParams::default()
            .heap_limits(config.heap_initial_bytes(), config.heap_max_bytes())
            .array_buffer_allocator(allocator.clone().into_v8_allocator())
            // Owned by the isolate, freed when it is dropped
            .snapshot_blob(v8::StartupData::from(blob.into_bytes()));

        if let Some(refs) = external_refs.filter(|refs| !refs.is_empty()) {
            params = params.external_references(refs.to_v8());
        }

        let isolate = v8::Isolate::new(params);

        tracing::debug!(
            "Isolate restored from {} byte blob ({} external references)",
            blob_len,
            actual
        );

        Ok(Self {
            isolate,
            allocator,
            blob_len,
        })
    }

    /// Size of the blob this isolate was created from.
    pub fn blob_len(&self) -> usize {
        self.blob_len
    }

    /// ArrayBuffer bytes currently allocated by this isolate.
    pub fn allocated_bytes(&self) -> usize {
        self.allocator.current_usage()
    }

    /// Highest ArrayBuffer usage seen by this isolate.
    pub fn peak_allocated_bytes(&self) -> usize {
        self.allocator.peak_usage()
    }

    /// Whether an ArrayBuffer allocation was denied for exceeding the heap budget.
    pub fn array_buffer_limit_hit(&self) -> bool {
        self.allocator.limit_hit()
    }

    /// Materialize the context registered at `index`.
    pub fn restore_context(&mut self, index: ContextIndex) -> Result<RestoredContext, SnapshotError> {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let scope = scope.init();

        let context = v8::Context::from_snapshot(&scope, index.0, Default::default())
            .ok_or(SnapshotError::ContextNotFound(index.0))?;

        tracing::debug!("Restored context {}", index.0);

        Ok(RestoredContext {
            context: v8::Global::new(scope.as_ref(), context),
            index,
        })
    }

    /// Compile and run `code` in `ctx`, returning the result as a string.
    pub fn eval(&mut self, ctx: &RestoredContext, code: &str) -> Result<String, SnapshotError> {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &ctx.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        v8_helpers::evaluate(scope, code)
    }

    /// Retrieve a datum registered with the context. Single use: a second
    /// call for the same index, or an index never registered, yields `None`.
    pub fn take_context_data(
        &mut self,
        ctx: &RestoredContext,
        index: DataIndex,
    ) -> Result<Option<SnapshotValue>, SnapshotError> {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &ctx.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        match scope.get_context_data_from_snapshot_once::<v8::Value>(index.0) {
            Ok(value) => SnapshotValue::from_v8(scope, value).map(Some),
            Err(err) => {
                tracing::debug!("No context data at index {}: {:?}", index.0, err);
                Ok(None)
            }
        }
    }

    /// Retrieve a datum registered independently of any context. Single use.
    pub fn take_isolate_data(
        &mut self,
        index: DataIndex,
    ) -> Result<Option<SnapshotValue>, SnapshotError> {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Context::new(&scope, Default::default());
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        match scope.get_isolate_data_from_snapshot_once::<v8::Value>(index.0) {
            Ok(value) => SnapshotValue::from_v8(scope, value).map(Some),
            Err(err) => {
                tracing::debug!("No isolate data at index {}: {:?}", index.0, err);
                Ok(None)
            }
        }
    }

    /// Rebuild the native values serialized with `ctx`.
    ///
    /// `deserializer` receives each internal field index with its payload and
    /// returns the native value to attach, or `None` to leave the field alone.
    /// The returned store owns the values and must outlive `ctx`.
    pub fn restore_native_fields<T, F>(
        &mut self,
        ctx: &RestoredContext,
        index: DataIndex,
        mut deserializer: F,
    ) -> Result<NativeFieldStore<T>, SnapshotError>
    where
        T: 'static,
        F: FnMut(usize, &[u8]) -> Option<T>,
    {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &ctx.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let holders = scope
            .get_context_data_from_snapshot_once::<v8::Array>(index.0)
            .map_err(|_| SnapshotError::MissingData(index.0))?;

        let mut store = NativeFieldStore::new();

        for i in 0..holders.length() {
            let holder = holders
                .get_index(scope, i)
                .and_then(|value| v8::Local::<v8::Object>::try_from(value).ok())
                .ok_or_else(|| {
                    SnapshotError::NativeField(format!("holder {} is not an object", i))
                })?;

            for field in 0..holder.internal_field_count() {
                let Some(payload) = fields::load_payload(scope, holder, field) else {
                    continue;
                };

                tracing::debug!(
                    "Deserializing internal field {} ({} bytes payload)",
                    field,
                    payload.len()
                );

                match deserializer(field, &payload) {
                    Some(native) => store.attach(scope, holder, field, native)?,
                    None => tracing::warn!("Payload for internal field {} was rejected", field),
                }
            }
        }

        Ok(store)
    }

    /// The native value attached to field `index` of global object `name`.
    pub fn native_field<'a, T: 'static>(
        &mut self,
        ctx: &RestoredContext,
        store: &'a NativeFieldStore<T>,
        name: &str,
        index: usize,
    ) -> Result<Option<&'a T>, SnapshotError> {
        let scope = pin!(v8::HandleScope::new(&mut self.isolate));
        let mut scope = scope.init();
        let context = v8::Local::new(&scope, &ctx.context);
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let Some(value) = v8_helpers::get_global(scope, name)? else {
            return Ok(None);
        };

        let Ok(holder) = v8::Local::<v8::Object>::try_from(value) else {
            return Ok(None);
        };

        Ok(store.resolve(scope, holder, index))
    }
}
