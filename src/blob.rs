//! Startup blobs: the serialized output of a snapshot creator.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Serialized V8 heap state produced by [`crate::SnapshotCreator::create_blob`].
///
/// The byte layout belongs to V8. The harness only records how many external
/// references were registered when the blob was built, so a restore with a
/// differently sized table can be refused before V8 aborts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupBlob {
    bytes: Vec<u8>,
    external_references: Option<usize>,
}

impl StartupBlob {
    pub(crate) fn new(bytes: Vec<u8>, external_references: usize) -> Self {
        Self {
            bytes,
            external_references: Some(external_references),
        }
    }

    /// Wrap bytes of unknown origin (e.g. read from disk).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            external_references: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of external references the blob was created with, if known.
    pub fn external_references(&self) -> Option<usize> {
        self.external_references
    }

    /// Read a blob previously written with [`StartupBlob::write_to`].
    pub fn read_from(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        log::debug!(
            "Read startup blob ({} bytes) from {}",
            bytes.len(),
            path.as_ref().display()
        );
        Ok(Self::from_bytes(bytes))
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        fs::write(path.as_ref(), &self.bytes)?;
        log::debug!(
            "Wrote startup blob ({} bytes) to {}",
            self.bytes.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Comma separated decimal bytes, newline terminated.
    ///
    /// Bytes are rendered as signed values, which is how the blob dumps used
    /// for diffing between V8 builds have always looked.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(self.bytes.len() * 4);

        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{}", *byte as i8);
        }

        out.push('\n');
        out
    }

    /// Give up the bytes, e.g. to move them into the isolate that restores them.
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_format() {
        let blob = StartupBlob::from_bytes(vec![0, 1, 127, 128, 255]);
        assert_eq!(blob.dump(), "0,1,127,-128,-1\n");
    }

    #[test]
    fn test_dump_empty() {
        let blob = StartupBlob::from_bytes(Vec::new());
        assert!(blob.is_empty());
        assert_eq!(blob.dump(), "\n");
    }

    #[test]
    fn test_file_round_trip_forgets_reference_count() {
        let path = std::env::temp_dir().join(format!(
            "snapshot-harness-blob-{}.bin",
            std::process::id()
        ));

        let blob = StartupBlob::new(vec![9, 8, 7, 6], 2);
        assert_eq!(blob.external_references(), Some(2));

        blob.write_to(&path).unwrap();
        let loaded = StartupBlob::read_from(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.as_bytes(), blob.as_bytes());
        assert_eq!(loaded.external_references(), None);
    }

    #[test]
    fn test_into_bytes_moves_without_copy() {
        let blob = StartupBlob::new(vec![1, 2, 3], 0);
        let ptr = blob.as_bytes().as_ptr();

        let bytes = blob.into_bytes();
        assert_eq!(bytes.as_ptr(), ptr);
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_read_missing_file() {
        let result = StartupBlob::read_from("/nonexistent/snapshot-harness.bin");
        assert!(result.is_err());
    }
}
