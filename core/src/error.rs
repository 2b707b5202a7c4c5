use thiserror::Error;

/// Error type shared by every crate in the workspace.
///
/// The variants map onto the traditional fsck outcome classes:
/// `Format` means the volume violates the specification in a way no
/// repair covered, `Io`/`ShortIo` abort the run, and `Cancelled` is
/// raised when the user backs out of an interactive session.
#[derive(Debug, Error)]
pub enum FsckError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short {op}: {got} of {want} bytes at offset {offset}")]
    ShortIo {
        op: &'static str,
        want: usize,
        got: usize,
        offset: u64,
    },

    #[error("invalid exFAT format: {0}")]
    Format(String),

    #[error("device not usable: {0}")]
    Device(String),

    #[error("operation cancelled by user")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FsckError {
    /// True for the "errors left on the volume" class, which the CLI
    /// maps to its own exit code instead of an operational failure.
    pub fn is_format(&self) -> bool {
        matches!(self, FsckError::Format(_))
    }
}
