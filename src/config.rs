//! Harness configuration.
//!
//! Defaults match what the scenarios need to be deterministic (a fixed V8
//! random seed). Every field can be overridden through `SNAPSHOT_*`
//! environment variables, see [`HarnessConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;

/// What V8 does with compiled-but-unexecuted function code when creating a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionCodeHandling {
    /// Keep compiled code in the blob (faster first call after restore)
    #[default]
    Keep,
    /// Drop compiled code, functions are lazily recompiled after restore
    Clear,
}

impl FromStr for FunctionCodeHandling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "clear" => Ok(Self::Clear),
            other => Err(format!("unknown function code handling: {other}")),
        }
    }
}

impl From<FunctionCodeHandling> for v8::FunctionCodeHandling {
    fn from(handling: FunctionCodeHandling) -> Self {
        match handling {
            FunctionCodeHandling::Keep => v8::FunctionCodeHandling::Keep,
            FunctionCodeHandling::Clear => v8::FunctionCodeHandling::Clear,
        }
    }
}

/// Configuration shared by the snapshot creator, restored isolates and the CLI.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// V8 `--random_seed` (default: 42)
    pub random_seed: u32,
    /// Extra V8 flags, applied once at platform initialization
    pub v8_flags: Vec<String>,
    /// Initial V8 heap size in MB (default: 1MB)
    pub heap_initial_mb: usize,
    /// Maximum V8 heap size in MB, also the ArrayBuffer budget (default: 128MB)
    pub heap_max_mb: usize,
    /// Compiled code handling when creating blobs (default: keep)
    pub function_code: FunctionCodeHandling,
    /// Where the CLI writes blobs when no path argument is given
    pub blob_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            random_seed: 42,
            v8_flags: Vec::new(),
            heap_initial_mb: 1,
            heap_max_mb: 128,
            function_code: FunctionCodeHandling::Keep,
            blob_path: None,
        }
    }
}

impl HarnessConfig {
    /// Build a config from the process environment.
    ///
    /// Unparseable values are logged and ignored, the default is kept.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(seed) = parse_var(&lookup, "SNAPSHOT_RANDOM_SEED") {
            config.random_seed = seed;
        }

        if let Some(flags) = lookup("SNAPSHOT_V8_FLAGS") {
            config.v8_flags = flags.split_whitespace().map(str::to_string).collect();
        }

        if let Some(mb) = parse_heap_mb(&lookup, "SNAPSHOT_HEAP_INITIAL_MB") {
            config.heap_initial_mb = mb;
        }

        if let Some(mb) = parse_heap_mb(&lookup, "SNAPSHOT_HEAP_MAX_MB") {
            config.heap_max_mb = mb;
        }

        if let Some(handling) = parse_var(&lookup, "SNAPSHOT_FUNCTION_CODE") {
            config.function_code = handling;
        }

        if let Some(path) = lookup("SNAPSHOT_BLOB_PATH").filter(|p| !p.is_empty()) {
            config.blob_path = Some(PathBuf::from(path));
        }

        // The initial heap can't exceed the maximum
        if config.heap_initial_mb > config.heap_max_mb {
            log::warn!(
                "SNAPSHOT_HEAP_INITIAL_MB ({}) exceeds max ({}), clamping",
                config.heap_initial_mb,
                config.heap_max_mb
            );
            config.heap_initial_mb = config.heap_max_mb;
        }

        config
    }

    /// All flags handed to V8 before initialization, seed first.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = vec![format!("--random_seed={}", self.random_seed)];
        flags.extend(self.v8_flags.iter().cloned());
        flags
    }

    pub(crate) fn heap_initial_bytes(&self) -> usize {
        self.heap_initial_mb.saturating_mul(1024 * 1024)
    }

    pub(crate) fn heap_max_bytes(&self) -> usize {
        self.heap_max_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;

    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

/// A heap size in MB that is non-zero and fits in bytes.
fn parse_heap_mb<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let mb: usize = parse_var(lookup, key)?;

    if mb == 0 || mb.checked_mul(1024 * 1024).is_none() {
        log::warn!("Ignoring out of range value for {}: {} MB", key, mb);
        return None;
    }

    Some(mb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::from_lookup(|_| None);

        assert_eq!(config.random_seed, 42);
        assert_eq!(config.heap_max_mb, 128);
        assert_eq!(config.function_code, FunctionCodeHandling::Keep);
        assert!(config.blob_path.is_none());
        assert_eq!(config.flags(), vec!["--random_seed=42".to_string()]);
    }

    #[test]
    fn test_overrides() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("SNAPSHOT_RANDOM_SEED", "7"),
            ("SNAPSHOT_V8_FLAGS", "--no-lazy  --single-threaded"),
            ("SNAPSHOT_HEAP_MAX_MB", "64"),
            ("SNAPSHOT_FUNCTION_CODE", "CLEAR"),
            ("SNAPSHOT_BLOB_PATH", "/tmp/blob.bin"),
        ]));

        assert_eq!(config.random_seed, 7);
        assert_eq!(config.heap_max_mb, 64);
        assert_eq!(config.function_code, FunctionCodeHandling::Clear);
        assert_eq!(config.blob_path, Some(PathBuf::from("/tmp/blob.bin")));
        assert_eq!(
            config.flags(),
            vec!["--random_seed=7", "--no-lazy", "--single-threaded"]
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("SNAPSHOT_RANDOM_SEED", "not-a-number"),
            ("SNAPSHOT_FUNCTION_CODE", "maybe"),
        ]));

        assert_eq!(config.random_seed, 42);
        assert_eq!(config.function_code, FunctionCodeHandling::Keep);
    }

    #[test]
    fn test_initial_heap_clamped() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("SNAPSHOT_HEAP_INITIAL_MB", "256"),
            ("SNAPSHOT_HEAP_MAX_MB", "16"),
        ]));

        assert_eq!(config.heap_initial_mb, 16);
        assert_eq!(config.heap_initial_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_heap_sizes_overflowing_bytes_keep_defaults() {
        let max = usize::MAX.to_string();
        let just_over = (usize::MAX / (1024 * 1024) + 1).to_string();

        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("SNAPSHOT_HEAP_INITIAL_MB", just_over.as_str()),
            ("SNAPSHOT_HEAP_MAX_MB", max.as_str()),
        ]));

        assert_eq!(config.heap_initial_mb, 1);
        assert_eq!(config.heap_max_mb, 128);
        assert_eq!(config.heap_max_bytes(), 128 * 1024 * 1024);
    }

    #[test]
    fn test_zero_heap_sizes_keep_defaults() {
        let config = HarnessConfig::from_lookup(lookup_from(&[
            ("SNAPSHOT_HEAP_INITIAL_MB", "0"),
            ("SNAPSHOT_HEAP_MAX_MB", "0"),
        ]));

        assert_eq!(config.heap_initial_mb, 1);
        assert_eq!(config.heap_max_mb, 128);
    }
}
