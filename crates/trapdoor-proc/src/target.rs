use std::path::{Path, PathBuf};

use crate::Command;
use crate::event::{ContinueStatus, DebugNotification};

/// Trait describing the instruction set of the debuggee.
pub trait Architecture: Send + Sync {
    /// Returns the encoding of the breakpoint instruction.
    fn breakpoint_instruction(&self) -> &[u8];

    /// Returns the length (in bytes) of the breakpoint instruction.
    fn breakpoint_size(&self) -> usize {
        self.breakpoint_instruction().len()
    }
}

/// `x86` and `x86_64` (`int3`).
#[derive(Debug, Clone, Copy, Default)]
pub struct X86;

impl Architecture for X86 {
    fn breakpoint_instruction(&self) -> &[u8] {
        &[0xcc]
    }
}

/// `aarch64` (`brk #0xf000`, the debug break used by Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64;

impl Architecture for Aarch64 {
    fn breakpoint_instruction(&self) -> &[u8] {
        &[0x00, 0x00, 0x3e, 0xd4]
    }
}

/// Returns the architecture of the host machine.
pub fn native_architecture() -> &'static dyn Architecture {
    #[cfg(target_arch = "aarch64")]
    {
        &Aarch64
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        &X86
    }
}

/// Base trait of the OS collaborators.
pub trait OsTarget {
    /// Owned OS handle (process, thread, or file).
    ///
    /// Dropping the handle releases the underlying OS resource.
    type Handle;

    /// Error returned by the OS.
    type Error: std::error::Error + Send + Sync + 'static;
}

/// Trait giving access to the debuggee's memory.
pub trait MemoryAccess: OsTarget {
    /// Reads memory of the given process into `buf`.
    fn read_memory(
        &self,
        process: &Self::Handle,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<(), Self::Error>;

    /// Writes `data` into the memory of the given process.
    ///
    /// Writes to code are visible to the next executed instruction.
    fn write_memory(
        &mut self,
        process: &Self::Handle,
        addr: u64,
        data: &[u8],
    ) -> Result<(), Self::Error>;
}

/// Trait giving access to the registers of a stopped thread.
pub trait RegisterAccess: OsTarget {
    /// Returns the program counter of the given thread.
    fn program_counter(&self, thread: &Self::Handle) -> Result<u64, Self::Error>;

    /// Sets the program counter of the given thread.
    fn set_program_counter(&mut self, thread: &Self::Handle, addr: u64)
    -> Result<(), Self::Error>;

    /// Enables or disables the hardware single-step mode of the given thread.
    fn set_single_step(&mut self, thread: &Self::Handle, enable: bool)
    -> Result<(), Self::Error>;
}

/// Trait interrupting a running debuggee.
///
/// Unlike the [DebugApi], it may be used from any thread, including while
/// the debugger is blocked waiting for debug events.
pub trait BreakRequest: Send + Sync + 'static {
    /// Error returned by the OS.
    type Error;

    /// Makes the process raise a breakpoint exception as soon as possible.
    fn request_break(&self) -> Result<(), Self::Error>;
}

/// Trait implementing the OS debug API.
///
/// Every method must be called from the thread which spawned (or attached to)
/// the debuggee.
pub trait DebugApi: MemoryAccess + RegisterAccess {
    /// Interrupts the debuggee from other threads.
    type Breaker: BreakRequest<Error = Self::Error>;

    /// Creates the process described by `command`, in debug mode.
    ///
    /// `program` is the resolved path of the executable image. The process
    /// does not run until its first debug event is acknowledged.
    fn spawn(&mut self, command: &Command, program: &Path) -> Result<u32, Self::Error>;

    /// Attaches to the running process with the given ID.
    fn attach(&mut self, pid: u32) -> Result<(), Self::Error>;

    /// Returns the path of the executable image of the given process.
    fn executable_path(&self, pid: u32) -> Result<PathBuf, Self::Error>;

    /// Creates a [BreakRequest] for the process with the given ID.
    fn breaker(&self, pid: u32) -> Result<Self::Breaker, Self::Error>;

    /// Waits for the next debug event.
    ///
    /// If `blocking` is `false`, the OS is polled once and `None` is returned
    /// when no event is available.
    fn wait_for_event(
        &mut self,
        blocking: bool,
    ) -> Result<Option<DebugNotification<Self::Handle>>, Self::Error>;

    /// Acknowledges the pending debug event of the given thread.
    fn continue_event(
        &mut self,
        pid: u32,
        thread_id: u32,
        status: ContinueStatus,
    ) -> Result<(), Self::Error>;

    /// Increments the suspend count of the given thread.
    fn suspend_thread(&mut self, thread: &Self::Handle) -> Result<(), Self::Error>;

    /// Decrements the suspend count of the given thread.
    fn resume_thread(&mut self, thread: &Self::Handle) -> Result<(), Self::Error>;

    /// Forcefully terminates the given process.
    fn terminate_process(&mut self, process: &Self::Handle, exit_code: u32)
    -> Result<(), Self::Error>;

    /// Stops debugging the process with the given ID.
    fn detach(&mut self, pid: u32) -> Result<(), Self::Error>;
}
