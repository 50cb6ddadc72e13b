//! Capture files: flat byte recordings of the input and output streams.
//!
//! Writes go straight to the file descriptor without a userspace buffer, so
//! whatever was relayed before teardown is on disk even if the owning relay
//! is cancelled mid-stream.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{JigError, JigResult};

/// Keystroke as recorded in the input capture: carriage returns become
/// newlines so the file reads naturally.
pub fn translate_keystroke(byte: u8) -> u8 {
    if byte == b'\r' {
        b'\n'
    } else {
        byte
    }
}

/// A single-writer byte sink backed by a file.
#[derive(Debug)]
pub struct CaptureFile {
    path: PathBuf,
    file: File,
}

impl CaptureFile {
    /// Create (or truncate) the capture file at `path`.
    pub fn create(path: &Path) -> JigResult<Self> {
        let file = File::create(path).map_err(|e| {
            JigError::Config(format!("cannot create capture file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "capture file opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw bytes.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.file.write_all(data)
    }

    /// Append one keystroke, translated with [`translate_keystroke`].
    pub fn write_keystroke(&mut self, byte: u8) -> std::io::Result<()> {
        self.file.write_all(&[translate_keystroke(byte)])
    }
}

impl Drop for CaptureFile {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "capture file closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carriage_return_becomes_newline() {
        assert_eq!(translate_keystroke(b'\r'), b'\n');
        assert_eq!(translate_keystroke(b'\n'), b'\n');
        assert_eq!(translate_keystroke(b'a'), b'a');
        assert_eq!(translate_keystroke(0x04), 0x04);
    }

    #[test]
    fn keystrokes_are_translated_raw_writes_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in");

        let mut capture = CaptureFile::create(&path).unwrap();
        for &b in b"ls\r" {
            capture.write_keystroke(b).unwrap();
        }
        capture.write(b"\r\n").unwrap();
        drop(capture);

        assert_eq!(std::fs::read(&path).unwrap(), b"ls\n\r\n");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        std::fs::write(&path, b"stale").unwrap();

        let capture = CaptureFile::create(&path).unwrap();
        assert_eq!(capture.path(), path.as_path());
        drop(capture);

        assert!(std::fs::read(&path).unwrap().is_empty());
    }

    #[test]
    fn create_in_missing_directory_fails() {
        let err = CaptureFile::create(Path::new("/nonexistent-dir/capture")).unwrap_err();
        assert!(matches!(err, JigError::Config(_)));
    }
}
