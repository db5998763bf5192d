//! The four snapshot round-trips the harness drives.
//!
//! Each scenario goes uninitialized → populated → serialized → restored →
//! verified → disposed, and returns what it observed after restore so the
//! caller (tests, the CLI) can compare it with what went in.

use crate::blob::StartupBlob;
use crate::config::HarnessConfig;
use crate::creator::{ContextRecipe, SnapshotCreator};
use crate::error::SnapshotError;
use crate::external_refs::ExternalReferenceTable;
use crate::restore::RestoredIsolate;
use crate::value::SnapshotValue;

/// Returned by `greet()` in the basic round-trip.
pub const GREETING: &str = "hello from a snapshotted function";

/// Context datum set in the data round-trip.
pub const CONTEXT_DATUM: f64 = 18.0;

/// Isolate datum set in the data round-trip.
pub const ISOLATE_DATUM: &str = "isolate-wide datum";

/// Argument passed to the native function in the external reference round-trip.
pub const NATIVE_ARGUMENT: &str = "some arg";

/// Native value carried through an internal field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: u32,
    pub text: String,
}

impl Label {
    pub fn sample() -> Self {
        Self {
            id: 7,
            text: "Some data...".to_string(),
        }
    }

    /// `id` little endian, then the UTF-8 text.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(4 + self.text.len());
        payload.extend_from_slice(&self.id.to_le_bytes());
        payload.extend_from_slice(self.text.as_bytes());
        payload
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < 4 {
            return None;
        }

        let (id, text) = payload.split_at(4);
        Some(Self {
            id: u32::from_le_bytes(id.try_into().ok()?),
            text: String::from_utf8(text.to_vec()).ok()?,
        })
    }
}

/// Registered at serialization time.
pub fn native_v1(
    scope: &mut v8::PinScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    reply(scope, &args, &mut rv, "v1");
}

/// Bound to the same table slot at restore time.
pub fn native_v2(
    scope: &mut v8::PinScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    reply(scope, &args, &mut rv, "v2");
}

fn reply(
    scope: &mut v8::PinScope,
    args: &v8::FunctionCallbackArguments,
    rv: &mut v8::ReturnValue,
    version: &str,
) {
    let arg = args.get(0).to_rust_string_lossy(scope);
    log::debug!("native {} called with {:?}", version, arg);

    if let Some(reply) = v8::String::new(scope, &format!("{} handled: {}", version, arg)) {
        rv.set(reply.into());
    }
}

/// Table with a single slot, filled with `native_v1`.
pub fn serialize_side_refs() -> ExternalReferenceTable {
    let mut refs = ExternalReferenceTable::new();
    refs.register("native_v1", native_v1);
    refs
}

/// Same size as [`serialize_side_refs`], slot 0 holds `native_v2`.
pub fn restore_side_refs() -> ExternalReferenceTable {
    let mut refs = ExternalReferenceTable::new();
    refs.register("native_v2", native_v2);
    refs
}

/// A script-defined function survives the round trip.
///
/// Returns what calling `greet()` in the restored context produced.
pub fn basic_round_trip(config: &HarnessConfig) -> Result<String, SnapshotError> {
    let refs = ExternalReferenceTable::new();
    let mut creator = SnapshotCreator::new(config, &refs);

    let recipe =
        ContextRecipe::new().script(format!("function greet() {{ return '{}'; }}", GREETING));
    let entry = creator.add_context(recipe)?;
    let blob = creator.create_blob(config.function_code)?;

    let mut isolate = RestoredIsolate::new(config, blob, None)?;
    let ctx = isolate.restore_context(entry.context)?;

    isolate.eval(&ctx, "greet();")
}

/// What the data round-trip read back.
#[derive(Debug, Clone, PartialEq)]
pub struct DataOutcome {
    pub context_datum: Option<SnapshotValue>,
    pub isolate_datum: Option<SnapshotValue>,
    /// Second retrieval of the context datum (single use, expected `None`)
    pub context_datum_again: Option<SnapshotValue>,
}

/// A context datum and an isolate datum survive the round trip.
pub fn data_round_trip(config: &HarnessConfig) -> Result<DataOutcome, SnapshotError> {
    let refs = ExternalReferenceTable::new();
    let mut creator = SnapshotCreator::new(config, &refs);

    let entry = creator.add_context(ContextRecipe::new().data(CONTEXT_DATUM))?;
    let isolate_index = creator.add_isolate_data(ISOLATE_DATUM)?;
    let blob = creator.create_blob(config.function_code)?;

    let mut isolate = RestoredIsolate::new(config, blob, None)?;
    let ctx = isolate.restore_context(entry.context)?;

    let data_index = entry.data[0];
    let context_datum = isolate.take_context_data(&ctx, data_index)?;
    let context_datum_again = isolate.take_context_data(&ctx, data_index)?;
    let isolate_datum = isolate.take_isolate_data(isolate_index)?;

    Ok(DataOutcome {
        context_datum,
        isolate_datum,
        context_datum_again,
    })
}

/// A native function is rebound by table position on restore.
///
/// Returns what calling the global produced: `v2 handled: some arg` when the
/// restore-side table was honored.
pub fn external_reference_round_trip(config: &HarnessConfig) -> Result<String, SnapshotError> {
    let refs = serialize_side_refs();
    log::info!("External references at serialization: {:?}", refs);

    let mut creator = SnapshotCreator::new(config, &refs);
    let recipe = ContextRecipe::new().function("external", crate::ExternalIndex(0));
    let entry = creator.add_context(recipe)?;
    let blob = creator.create_blob(config.function_code)?;

    let restore_refs = restore_side_refs();
    log::info!("External references at restore: {:?}", restore_refs);

    let mut isolate = RestoredIsolate::new(config, blob, Some(&restore_refs))?;
    let ctx = isolate.restore_context(entry.context)?;

    isolate.eval(&ctx, &format!("external('{}');", NATIVE_ARGUMENT))
}

/// What the internal field round-trip read back.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOutcome {
    pub original: Label,
    pub restored: Option<Label>,
}

/// A native value attached to an internal field survives the round trip.
pub fn internal_field_round_trip(config: &HarnessConfig) -> Result<FieldOutcome, SnapshotError> {
    let original = Label::sample();
    let refs = ExternalReferenceTable::new();
    let mut creator = SnapshotCreator::new(config, &refs);

    let recipe = ContextRecipe::with_fields(|index, label: &Label| {
        log::info!("Serializing field {}: {:?}", index, label.text);
        label.to_payload()
    })
    .native_object("something", 1, vec![(0, original.clone())]);

    let entry = creator.add_context(recipe)?;
    let fields_index = entry.fields.ok_or_else(|| {
        SnapshotError::NativeField("context registered without field holders".to_string())
    })?;
    let blob = creator.create_blob(config.function_code)?;

    let mut isolate = RestoredIsolate::new(config, blob, None)?;
    let ctx = isolate.restore_context(entry.context)?;

    let store = isolate.restore_native_fields(&ctx, fields_index, |index, payload| {
        log::info!("Deserializing field {} ({} bytes)", index, payload.len());
        Label::from_payload(payload)
    })?;

    let restored = isolate
        .native_field(&ctx, &store, "something", 0)?
        .cloned();

    // Contexts must go before the store whose values their fields point at
    drop(ctx);
    drop(store);

    Ok(FieldOutcome { original, restored })
}

/// A scenario's name and whether what it observed matched what went in.
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub result: Result<String, String>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run all four scenarios in order.
pub fn run_all(config: &HarnessConfig) -> Vec<ScenarioReport> {
    vec![
        report("basic round-trip", || {
            let result = basic_round_trip(config)?;
            expect(result == GREETING, result)
        }),
        report("data round-trip", || {
            let outcome = data_round_trip(config)?;
            let ok = outcome.context_datum == Some(SnapshotValue::Number(CONTEXT_DATUM))
                && outcome.isolate_datum == Some(SnapshotValue::from(ISOLATE_DATUM))
                && outcome.context_datum_again.is_none();
            expect(ok, format!("{:?}", outcome))
        }),
        report("external reference round-trip", || {
            let result = external_reference_round_trip(config)?;
            expect(result == format!("v2 handled: {}", NATIVE_ARGUMENT), result)
        }),
        report("internal field round-trip", || {
            let outcome = internal_field_round_trip(config)?;
            let ok = outcome.restored.as_ref() == Some(&outcome.original);
            expect(ok, format!("{:?}", outcome))
        }),
    ]
}

fn report<F>(name: &'static str, run: F) -> ScenarioReport
where
    F: FnOnce() -> Result<Result<String, String>, SnapshotError>,
{
    let result = match run() {
        Ok(observed) => observed,
        Err(err) => Err(err.to_string()),
    };

    match &result {
        Ok(observed) => log::info!("{}: ok ({})", name, observed),
        Err(reason) => log::warn!("{}: FAILED ({})", name, reason),
    }

    ScenarioReport { name, result }
}

fn expect(ok: bool, observed: String) -> Result<Result<String, String>, SnapshotError> {
    Ok(if ok { Ok(observed) } else { Err(observed) })
}

/// Build a blob with one context that ran `script` (if any).
///
/// Used by the CLI to write blobs to disk.
pub fn blob_for_script(
    config: &HarnessConfig,
    script: Option<&str>,
) -> Result<(crate::ContextIndex, StartupBlob), SnapshotError> {
    let refs = ExternalReferenceTable::new();
    let mut creator = SnapshotCreator::new(config, &refs);

    let mut recipe = ContextRecipe::new();
    if let Some(code) = script {
        recipe = recipe.script(code);
    }

    let entry = creator.add_context(recipe)?;
    let blob = creator.create_blob(config.function_code)?;

    Ok((entry.context, blob))
}
