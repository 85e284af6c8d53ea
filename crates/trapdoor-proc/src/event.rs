/// Kind of a raw debug notification, as identified by its OS code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An exception was raised in the debuggee.
    Exception,
    /// A thread was created.
    CreateThread,
    /// The process was created (or attached to).
    CreateProcess,
    /// A thread exited.
    ExitThread,
    /// The process exited.
    ExitProcess,
    /// A module (DLL) was loaded.
    LoadModule,
    /// A module (DLL) was unloaded.
    UnloadModule,
    /// The debuggee emitted a debug string.
    OutputString,
    /// The debuggee died outside of the debugger's control.
    Rip,
}

impl EventKind {
    /// Decodes a raw debug event code.
    ///
    /// Returns `None` if the code is not part of the debug API.
    pub const fn from_code(code: u32) -> Option<Self> {
        let kind = match code {
            1 => Self::Exception,
            2 => Self::CreateThread,
            3 => Self::CreateProcess,
            4 => Self::ExitThread,
            5 => Self::ExitProcess,
            6 => Self::LoadModule,
            7 => Self::UnloadModule,
            8 => Self::OutputString,
            9 => Self::Rip,
            _ => return None,
        };

        Some(kind)
    }
}

/// Classification of an exception code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    /// Breakpoint trap.
    Breakpoint,

    /// Single-step trap.
    SingleStep,

    /// Any other exception, passed back to the debuggee.
    Other(u32),
}

impl ExceptionCode {
    const STATUS_BREAKPOINT: u32 = 0x8000_0003;
    const STATUS_SINGLE_STEP: u32 = 0x8000_0004;
    const STATUS_WX86_SINGLE_STEP: u32 = 0x4000_001e;
    const STATUS_WX86_BREAKPOINT: u32 = 0x4000_001f;

    /// Classifies a raw exception code.
    pub const fn from_raw(code: u32) -> Self {
        match code {
            Self::STATUS_BREAKPOINT | Self::STATUS_WX86_BREAKPOINT => Self::Breakpoint,
            Self::STATUS_SINGLE_STEP | Self::STATUS_WX86_SINGLE_STEP => Self::SingleStep,
            code => Self::Other(code),
        }
    }
}

/// How a debug event is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueStatus {
    /// The event was handled by the debugger.
    Handled,

    /// The exception must be delivered to the debuggee's own handlers.
    NotHandled,
}

/// Debug event delivered by the OS.
#[derive(Debug)]
pub enum DebugEvent<H> {
    /// The process was created, along with its first thread.
    ProcessCreated {
        /// Handle of the process.
        process_handle: H,
        /// ID of the first thread.
        thread_id: u32,
        /// Handle of the first thread.
        thread_handle: H,
        /// Handle of the executable image file, if any.
        file_handle: Option<H>,
    },

    /// A thread was created.
    ThreadCreated {
        /// ID of the new thread.
        thread_id: u32,
        /// Handle of the new thread.
        thread_handle: H,
    },

    /// A thread exited.
    ThreadExited {
        /// ID of the exited thread.
        thread_id: u32,
        /// Exit code of the thread.
        exit_code: u32,
    },

    /// A module was loaded.
    ModuleLoaded {
        /// Handle of the module file, if any.
        file_handle: Option<H>,
        /// Base address of the module.
        base_addr: u64,
    },

    /// A module was unloaded.
    ModuleUnloaded {
        /// Base address of the module.
        base_addr: u64,
    },

    /// The debuggee emitted a debug string.
    OutputString,

    /// The debuggee died outside of the debugger's control.
    Rip {
        /// OS error code.
        error: u32,
    },

    /// An exception was raised.
    Exception {
        /// ID of the faulting thread.
        thread_id: u32,
        /// Address of the exception.
        address: u64,
        /// Exception classification.
        code: ExceptionCode,
        /// Whether the debugger is notified before the debuggee's handlers.
        first_chance: bool,
    },

    /// The process exited.
    ProcessExited {
        /// Exit code of the process.
        exit_code: u32,
    },

    /// The OS delivered an unrecognized notification.
    Unknown {
        /// Raw event code.
        code: u32,
    },
}

/// Debug event along with the identifiers needed to acknowledge it.
#[derive(Debug)]
pub struct DebugNotification<H> {
    /// ID of the process which emitted the event.
    pub process_id: u32,

    /// ID of the thread which emitted the event.
    pub thread_id: u32,

    /// The decoded event.
    pub event: DebugEvent<H>,
}

/// Outcome of a run of the debug event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugStop {
    /// A thread stopped at a breakpoint.
    Breakpoint {
        /// ID of the stopped thread.
        thread_id: u32,
    },

    /// A thread stopped after single-stepping.
    SingleStep {
        /// ID of the stopped thread.
        thread_id: u32,
    },

    /// The process exited.
    Exited {
        /// Exit code of the process.
        exit_code: u32,
    },

    /// No event was available (non-blocking wait only).
    Idle,
}

impl DebugStop {
    /// Returns the ID of the stopped thread, if any.
    pub const fn thread_id(&self) -> Option<u32> {
        match self {
            Self::Breakpoint { thread_id } | Self::SingleStep { thread_id } => Some(*thread_id),
            Self::Exited { .. } | Self::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DebugStop, EventKind, ExceptionCode};

    #[test]
    fn event_codes() {
        assert_eq!(EventKind::from_code(1), Some(EventKind::Exception));
        assert_eq!(EventKind::from_code(3), Some(EventKind::CreateProcess));
        assert_eq!(EventKind::from_code(5), Some(EventKind::ExitProcess));
        assert_eq!(EventKind::from_code(9), Some(EventKind::Rip));
        assert_eq!(EventKind::from_code(0), None);
        assert_eq!(EventKind::from_code(10), None);
    }

    #[test]
    fn exception_codes() {
        assert_eq!(
            ExceptionCode::from_raw(0x8000_0003),
            ExceptionCode::Breakpoint
        );
        assert_eq!(
            ExceptionCode::from_raw(0x4000_001f),
            ExceptionCode::Breakpoint
        );
        assert_eq!(
            ExceptionCode::from_raw(0x8000_0004),
            ExceptionCode::SingleStep
        );
        assert_eq!(
            ExceptionCode::from_raw(0xc000_0005),
            ExceptionCode::Other(0xc000_0005)
        );
    }

    #[test]
    fn stop_thread_id() {
        assert_eq!(DebugStop::Breakpoint { thread_id: 4 }.thread_id(), Some(4));
        assert_eq!(DebugStop::SingleStep { thread_id: 8 }.thread_id(), Some(8));
        assert_eq!(DebugStop::Exited { exit_code: 0 }.thread_id(), None);
        assert_eq!(DebugStop::Idle.thread_id(), None);
    }
}
