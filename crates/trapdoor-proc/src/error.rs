use std::path::PathBuf;

/// Error reported by the OS backend.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct BackendError<E>(pub E);

/// Thread handle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOp {
    /// Thread suspension.
    Suspend,

    /// Thread resumption.
    Resume,

    /// Process termination.
    Terminate,
}

impl std::fmt::Display for HandleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspend => f.write_str("suspend"),
            Self::Resume => f.write_str("resume"),
            Self::Terminate => f.write_str("terminate"),
        }
    }
}

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// The OS backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError<E>),

    /// The program to launch is not a valid executable image.
    #[error("{0}: not an executable image")]
    NotExecutable(PathBuf),

    /// The program to launch could not be found.
    #[error("{0}: program not found")]
    ProgramNotFound(PathBuf),

    /// The debuggee has exited.
    ///
    /// This is the expected terminal condition of a debugging session, not a
    /// debugger malfunction.
    #[error("process {pid} has exited with status {exit_code}")]
    ProcessExited {
        /// ID of the exited process.
        pid: u32,

        /// Exit code of the process.
        exit_code: u32,
    },

    /// A thread (or process) handle operation failed.
    ///
    /// The thread states are left as they were when the failure occurred.
    #[error("{op} of thread {thread_id} failed")]
    HandleOperationFailed {
        /// The failed operation.
        op: HandleOp,

        /// ID of the thread (or process, for termination).
        thread_id: u32,

        /// Underlying OS error.
        #[source]
        source: E,
    },

    /// The OS delivered a debug event with an unrecognized code.
    #[error("unknown debug event code: {0}")]
    UnknownDebugEvent(u32),

    /// The process must be stopped in order to kill it.
    #[error("process must be stopped in order to kill it")]
    InvalidStateForKill,

    /// The thread is not tracked by the debugger.
    #[error("untracked thread: {0}")]
    UntrackedThread(u32),

    /// A breakpoint already exists at the given address.
    #[error("breakpoint already exists at {0:#x}")]
    BreakpointExists(u64),

    /// No breakpoint exists at the given address.
    #[error("no breakpoint at {0:#x}")]
    NoBreakpoint(u64),

    /// The debugger has detached from the process.
    #[error("detached from process {0}")]
    Detached(u32),

    /// The controlling worker thread has stopped.
    #[error("process control worker has stopped")]
    WorkerGone,
}

impl<E> Error<E> {
    /// Returns whether the error reports the exit of the debuggee.
    pub const fn is_exited(&self) -> bool {
        matches!(self, Self::ProcessExited { .. })
    }

    pub(crate) fn backend(e: E) -> Self {
        Self::Backend(BackendError(e))
    }
}

/// Result type of this crate.
pub type Result<T, E> = core::result::Result<T, Error<E>>;
