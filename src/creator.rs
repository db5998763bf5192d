//! Building startup blobs.
//!
//! A [`SnapshotCreator`] owns a V8 isolate in snapshot-creator mode. Each
//! [`ContextRecipe`] passed to [`SnapshotCreator::add_context`] becomes one
//! serialized context in the blob, addressed after restore by the returned
//! [`ContextIndex`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut creator = SnapshotCreator::new(&config, &ExternalReferenceTable::new());
//!
//! let recipe = ContextRecipe::new()
//!     .script("function greet() { return 'hi'; }")
//!     .data(18.0);
//! let entry = creator.add_context(recipe)?;
//!
//! let blob = creator.create_blob(config.function_code)?;
//! ```

use std::pin::pin;
use std::sync::Arc;

use crate::allocator::TrackingAllocator;
use crate::blob::StartupBlob;
use crate::config::{FunctionCodeHandling, HarnessConfig};
use crate::error::SnapshotError;
use crate::external_refs::{ExternalIndex, ExternalReferenceTable};
use crate::fields::{self, NativeFieldStore};
use crate::v8_helpers;
use crate::value::SnapshotValue;

/// Position of a context inside a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextIndex(pub usize);

/// Position of an auxiliary datum inside a blob.
///
/// Context-bound data and isolate-wide data are numbered independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataIndex(pub usize);

/// Turns a native value into the opaque payload stored in the blob.
///
/// Arguments are the internal field index and the value attached to it.
pub type FieldSerializer<T> = Box<dyn FnMut(usize, &T) -> Vec<u8>>;

/// A script object carrying native values in its internal fields.
struct NativeObject<T> {
    global: String,
    field_count: usize,
    fields: Vec<(usize, T)>,
}

/// Everything that goes into one serialized context.
///
/// Steps run in this order: native functions are installed, scripts run,
/// native objects are built and their fields serialized, data is registered.
pub struct ContextRecipe<T = ()> {
    functions: Vec<(String, ExternalIndex)>,
    scripts: Vec<String>,
    data: Vec<SnapshotValue>,
    objects: Vec<NativeObject<T>>,
    serializer: Option<FieldSerializer<T>>,
}

impl ContextRecipe<()> {
    /// A recipe without native fields.
    pub fn new() -> Self {
        Self::empty(None)
    }
}

impl Default for ContextRecipe<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> ContextRecipe<T> {
    /// A recipe whose native objects are serialized by `serializer`.
    pub fn with_fields<F>(serializer: F) -> Self
    where
        F: FnMut(usize, &T) -> Vec<u8> + 'static,
    {
        Self::empty(Some(Box::new(serializer)))
    }

    fn empty(serializer: Option<FieldSerializer<T>>) -> Self {
        Self {
            functions: Vec::new(),
            scripts: Vec::new(),
            data: Vec::new(),
            objects: Vec::new(),
            serializer,
        }
    }

    /// Run `code` in the context before it is serialized.
    pub fn script(mut self, code: impl Into<String>) -> Self {
        self.scripts.push(code.into());
        self
    }

    /// Expose the external reference at `index` as global function `name`.
    pub fn function(mut self, name: impl Into<String>, index: ExternalIndex) -> Self {
        self.functions.push((name.into(), index));
        self
    }

    /// Register a datum bound to this context. Indices follow call order.
    pub fn data(mut self, value: impl Into<SnapshotValue>) -> Self {
        self.data.push(value.into());
        self
    }

    /// Define global `name` as an object with `field_count` internal fields,
    /// attaching each `(index, value)` pair to its field.
    pub fn native_object(
        mut self,
        name: impl Into<String>,
        field_count: usize,
        fields: Vec<(usize, T)>,
    ) -> Self {
        self.objects.push(NativeObject {
            global: name.into(),
            field_count,
            fields,
        });
        self
    }
}

/// Indices assigned to one context and its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub context: ContextIndex,
    /// One per [`ContextRecipe::data`] call, in call order
    pub data: Vec<DataIndex>,
    /// Where the native object holders were recorded, if the recipe had any
    pub fields: Option<DataIndex>,
}

/// A V8 isolate in snapshot-creator mode.
///
/// Dropping a creator without calling [`SnapshotCreator::create_blob`]
/// serializes and discards a blob, V8 can't dispose a creator isolate otherwise.
pub struct SnapshotCreator {
    // Only `None` once the blob has been created
    isolate: Option<v8::OwnedIsolate>,
    external_refs: ExternalReferenceTable,
    allocator: Arc<TrackingAllocator>,
    contexts: usize,
}

impl SnapshotCreator {
    /// Allocate a snapshot-creator isolate and register its default context.
    ///
    /// Every native function installed later must come from `external_refs`.
    pub fn new(config: &HarnessConfig, external_refs: &ExternalReferenceTable) -> Self {
        crate::platform::get_platform(config);

        let allocator = TrackingAllocator::new(config.heap_max_bytes());
        let params = v8::CreateParams::default()
            .heap_limits(config.heap_initial_bytes(), config.heap_max_bytes())
            .array_buffer_allocator(allocator.clone().into_v8_allocator());

        let refs = if external_refs.is_empty() {
            None
        } else {
            Some(external_refs.to_v8())
        };

        let mut isolate = v8::Isolate::snapshot_creator(refs, Some(params));

        {
            let scope = pin!(v8::HandleScope::new(&mut isolate));
            let mut scope = scope.init();
            let default_context = v8::Context::new(&scope, Default::default());
            scope.set_default_context(default_context);
        }

        log::debug!(
            "Snapshot creator ready ({} external references)",
            external_refs.len()
        );

        Self {
            isolate: Some(isolate),
            external_refs: external_refs.clone(),
            allocator,
            contexts: 0,
        }
    }

    /// Build a context from `recipe` and register it with the snapshot.
    pub fn add_context<T: 'static>(
        &mut self,
        recipe: ContextRecipe<T>,
    ) -> Result<ContextEntry, SnapshotError> {
        let ContextRecipe {
            functions,
            scripts,
            data,
            objects,
            mut serializer,
        } = recipe;

        let external_refs = &self.external_refs;
        let isolate = self.isolate.as_mut().expect("creator isolate already consumed");

        let scope = pin!(v8::HandleScope::new(isolate));
        let mut scope = scope.init();
        let context = v8::Context::new(&scope, Default::default());

        let (data_indices, fields_index) = {
            let scope = &mut v8::ContextScope::new(&mut scope, context);

            for (name, index) in &functions {
                install_function(scope, external_refs, name, *index)?;
            }

            for code in &scripts {
                v8_helpers::evaluate(scope, code)?;
            }

            // Natives only live until their payloads are written, the store is
            // dropped when this context has been registered
            let mut store = NativeFieldStore::new();
            let mut holders: Vec<v8::Local<v8::Value>> = Vec::with_capacity(objects.len());

            for object in objects {
                let holder = build_native_object(scope, &mut store, object)?;
                holders.push(holder.into());
            }

            let fields_index = if holders.is_empty() {
                None
            } else {
                let serializer = serializer.as_mut().ok_or_else(|| {
                    SnapshotError::NativeField(
                        "recipe has native objects but no serializer".to_string(),
                    )
                })?;

                for holder in &holders {
                    let holder: v8::Local<v8::Object> = (*holder).try_into().map_err(|_| {
                        SnapshotError::NativeField("holder is not an object".to_string())
                    })?;
                    serialize_fields(scope, &store, holder, serializer)?;
                }

                let array = v8::Array::new_with_elements(scope, &holders);
                let index = scope.add_context_data(context, array);
                log::info!("Native field holders: {} (data index {})", holders.len(), index);
                Some(DataIndex(index))
            };

            let mut data_indices = Vec::with_capacity(data.len());
            for value in &data {
                let local = value.to_v8(scope)?;
                let index = scope.add_context_data(context, local);
                log::info!("Context data {:?} at index {}", value, index);
                data_indices.push(DataIndex(index));
            }

            (data_indices, fields_index)
        };

        let index = scope.add_context(context);
        self.contexts += 1;
        log::info!("Context index: {}", index);

        Ok(ContextEntry {
            context: ContextIndex(index),
            data: data_indices,
            fields: fields_index,
        })
    }

    /// Register a datum that doesn't belong to any context.
    pub fn add_isolate_data(
        &mut self,
        value: impl Into<SnapshotValue>,
    ) -> Result<DataIndex, SnapshotError> {
        let value = value.into();
        let isolate = self.isolate.as_mut().expect("creator isolate already consumed");

        let scope = pin!(v8::HandleScope::new(isolate));
        let mut scope = scope.init();
        let context = v8::Context::new(&scope, Default::default());
        let scope = &mut v8::ContextScope::new(&mut scope, context);

        let local = value.to_v8(scope)?;
        let index = scope.add_isolate_data(local);
        log::info!("Isolate data {:?} at index {}", value, index);

        Ok(DataIndex(index))
    }

    /// Number of contexts registered so far (the default context excluded).
    pub fn context_count(&self) -> usize {
        self.contexts
    }

    /// ArrayBuffer bytes currently allocated by the creator isolate.
    pub fn allocated_bytes(&self) -> usize {
        self.allocator.current_usage()
    }

    /// Serialize everything registered so far. Consumes the isolate.
    pub fn create_blob(
        mut self,
        handling: FunctionCodeHandling,
    ) -> Result<StartupBlob, SnapshotError> {
        let isolate = self
            .isolate
            .take()
            .expect("creator isolate already consumed");

        let data = isolate
            .create_blob(handling.into())
            .ok_or(SnapshotError::BlobCreation)?;

        log::info!(
            "Size of blob: {} bytes ({} contexts, {:?} function code)",
            data.len(),
            self.contexts,
            handling
        );

        Ok(StartupBlob::new(data.to_vec(), self.external_refs.len()))
    }
}

impl Drop for SnapshotCreator {
    fn drop(&mut self) {
        if let Some(isolate) = self.isolate.take() {
            log::debug!("Snapshot creator dropped without a blob, discarding");
            let _ = isolate.create_blob(v8::FunctionCodeHandling::Clear);
        }
    }
}

fn install_function(
    scope: &mut v8::PinScope,
    external_refs: &ExternalReferenceTable,
    name: &str,
    index: ExternalIndex,
) -> Result<(), SnapshotError> {
    let callback = external_refs
        .callback(index)
        .ok_or(SnapshotError::UnknownExternalReference(index.0))?;

    // The template must be built from the exact callback in the table, V8
    // serializes the function by looking its address up there
    let template = v8::FunctionTemplate::builder_raw(callback)
        .constructor_behavior(v8::ConstructorBehavior::Throw)
        .side_effect_type(v8::SideEffectType::HasSideEffect)
        .build(scope);

    let function = template
        .get_function(scope)
        .ok_or_else(|| SnapshotError::FunctionCreation(name.to_string()))?;

    let func_name = v8::String::new(scope, name).ok_or(SnapshotError::StringAllocation)?;
    function.set_name(func_name);

    v8_helpers::set_global(scope, name, function.into())?;

    log::debug!(
        "Installed `{}` from external reference {} ({})",
        name,
        index.0,
        external_refs.name(index).unwrap_or("?")
    );

    Ok(())
}

fn build_native_object<'s, T: 'static>(
    scope: &mut v8::PinScope<'s, '_>,
    store: &mut NativeFieldStore<T>,
    object: NativeObject<T>,
) -> Result<v8::Local<'s, v8::Object>, SnapshotError> {
    let template = v8::ObjectTemplate::new(scope);
    template.set_internal_field_count(object.field_count);

    let holder = template.new_instance(scope).ok_or_else(|| {
        SnapshotError::NativeField(format!("failed to instantiate `{}`", object.global))
    })?;

    for (index, value) in object.fields {
        store.attach(scope, holder, index, value)?;
    }

    v8_helpers::set_global(scope, &object.global, holder.into())?;

    Ok(holder)
}

fn serialize_fields<T: 'static>(
    scope: &mut v8::PinScope,
    store: &NativeFieldStore<T>,
    holder: v8::Local<v8::Object>,
    serializer: &mut FieldSerializer<T>,
) -> Result<(), SnapshotError> {
    for index in 0..holder.internal_field_count() {
        let Some(native) = store.resolve(scope, holder, index) else {
            continue;
        };

        let payload = serializer(index, native);
        log::debug!(
            "Serialized internal field {} ({} bytes payload)",
            index,
            payload.len()
        );

        fields::store_payload(scope, holder, index, payload)?;
    }

    Ok(())
}
