pub mod allocator;
pub mod blob;
pub mod config;
pub mod creator;
pub mod error;
pub mod external_refs;
pub mod fields;
pub mod platform;
pub mod restore;
pub mod scenarios;
pub mod v8_helpers;
pub mod value;

// Core API
pub use creator::{ContextEntry, ContextIndex, ContextRecipe, DataIndex, SnapshotCreator};
pub use restore::{RestoredContext, RestoredIsolate};

pub use allocator::TrackingAllocator;
pub use blob::StartupBlob;
pub use config::{FunctionCodeHandling, HarnessConfig};
pub use error::SnapshotError;
pub use external_refs::{ExternalIndex, ExternalReferenceTable};
pub use fields::NativeFieldStore;
pub use value::SnapshotValue;
