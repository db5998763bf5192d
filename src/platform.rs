//! Global V8 platform initialization.
//!
//! V8 can only be initialized once per process. This module provides
//! a single entry point for platform initialization used by all other modules.

use std::sync::OnceLock;

use crate::config::HarnessConfig;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// Get the global V8 platform, initializing it if necessary.
///
/// Flags from `config` (random seed first) are applied on the first call only.
/// Later calls return the already initialized platform and ignore `config`.
pub fn get_platform(config: &HarnessConfig) -> &'static v8::SharedRef<v8::Platform> {
    PLATFORM.get_or_init(|| {
        // Flags must be set before V8::initialize, they are frozen afterwards
        for flag in config.flags() {
            log::debug!("Setting V8 flag {}", flag);
            v8::V8::set_flags_from_string(&flag);
        }

        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();

        log::info!("V8 {} initialized", v8::V8::get_version());
        platform
    })
}

/// Whether the platform has been initialized in this process.
pub fn is_initialized() -> bool {
    PLATFORM.get().is_some()
}
