//! Errors that can occur while loading an executable image.

use supernova_derive::Error;

/// Loader failures, raised before any thread exists.
///
/// Each variant has a stable numeric status the CLI surfaces as the process
/// exit code; `0` is reserved for a successful load. On any error no guest
/// memory is materialised.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Image file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),
    /// File too small for the main header or its region table.
    #[error("file too small for image headers: {size} bytes")]
    InvalidHeader { size: u64 },
    /// Entry point lies outside the declared guest memory.
    #[error("entry point {entry_point:#x} outside guest memory of {memory_size} bytes")]
    InvalidEntryPoint { entry_point: u64, memory_size: u64 },
    /// Image was produced for an older runtime (major or minor too low).
    #[error("image version {found:#x} is older than runtime version {expected:#x}")]
    VersionMismatch { found: u64, expected: u64 },
    /// Main header or region magic does not match.
    #[error("bad magic: expected {expected:#018x}, found {found:#018x}")]
    MagicMismatch { expected: u64, found: u64 },
    /// Region does not fit the file or the declared guest memory.
    #[error("memory region {index} does not fit its file or guest-memory range")]
    InvalidMemoryRegion { index: usize },
    /// Underlying I/O failure other than a missing file.
    #[error("io error: {0}")]
    FileError(String),
}

impl LoadError {
    /// Stable numeric status code for this error.
    pub fn status(&self) -> u8 {
        match self {
            LoadError::FileNotFound(_) => 1,
            LoadError::InvalidHeader { .. } => 2,
            LoadError::InvalidEntryPoint { .. } => 3,
            LoadError::VersionMismatch { .. } => 4,
            LoadError::MagicMismatch { .. } => 5,
            LoadError::InvalidMemoryRegion { .. } => 6,
            LoadError::FileError(_) => 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(LoadError::FileNotFound(String::new()).status(), 1);
        assert_eq!(LoadError::InvalidHeader { size: 0 }.status(), 2);
        assert_eq!(
            LoadError::InvalidEntryPoint {
                entry_point: 0,
                memory_size: 0
            }
            .status(),
            3
        );
        assert_eq!(
            LoadError::VersionMismatch {
                found: 0,
                expected: 0
            }
            .status(),
            4
        );
        assert_eq!(
            LoadError::MagicMismatch {
                expected: 0,
                found: 0
            }
            .status(),
            5
        );
        assert_eq!(LoadError::InvalidMemoryRegion { index: 0 }.status(), 6);
        assert_eq!(LoadError::FileError(String::new()).status(), 7);
    }

    #[test]
    fn display_messages_carry_context() {
        let err = LoadError::MagicMismatch {
            expected: 0x6D76_6874_696E_655A,
            found: 0,
        };
        let text = err.to_string();
        assert!(text.contains("0x6d766874696e655a"));
        assert!(text.contains("0x0000000000000000"));

        let err = LoadError::FileNotFound("prog.spn".to_string());
        assert_eq!(err.to_string(), "file not found: prog.spn");
    }
}
