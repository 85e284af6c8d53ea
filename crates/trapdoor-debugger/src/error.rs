/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Win32 API error.
    #[error("os error: {0}")]
    Os(#[from] windows::core::Error),

    /// Partial memory transfer.
    #[error("memory read/write {0} bytes instead of {1}")]
    PartialMemOp(usize, usize),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
