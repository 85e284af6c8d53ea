use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use windows::Win32::Foundation::{DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, ERROR_SEM_TIMEOUT};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, DEBUG_EVENT, WaitForDebugEvent,
};
use windows::Win32::System::Threading::INFINITE;

use trapdoor_proc::Command;
use trapdoor_proc::event::{ContinueStatus, DebugNotification};
use trapdoor_proc::target::{BreakRequest, DebugApi, MemoryAccess, OsTarget, RegisterAccess};

use crate::{Handle, mem, process, thread};

/// Debugger of processes running on the host machine.
///
/// The Win32 debug API ties a debuggee to the thread which created (or
/// attached to) it, so a `Debugger` never leaves the thread it was created
/// on.
#[derive(Debug, Default)]
pub struct Debugger {
    _thread_bound: PhantomData<*const ()>,
}

impl Debugger {
    /// Creates a new debugger, bound to the current thread.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Breaks into a debuggee from any thread.
#[derive(Debug)]
pub struct Breaker {
    process: Handle,
}

// SAFETY: the process handle is owned by the breaker, and `DebugBreakProcess`
// may be called on it from any thread.
unsafe impl Send for Breaker {}
unsafe impl Sync for Breaker {}

impl BreakRequest for Breaker {
    type Error = crate::Error;

    fn request_break(&self) -> crate::Result<()> {
        process::request_break(&self.process)
    }
}

impl OsTarget for Debugger {
    type Handle = Handle;
    type Error = crate::Error;
}

impl MemoryAccess for Debugger {
    fn read_memory(&self, process: &Handle, addr: u64, buf: &mut [u8]) -> crate::Result<()> {
        mem::read_process_memory(process, addr, buf)
    }

    fn write_memory(&mut self, process: &Handle, addr: u64, data: &[u8]) -> crate::Result<()> {
        mem::write_process_memory(process, addr, data)
    }
}

impl RegisterAccess for Debugger {
    fn program_counter(&self, thread: &Handle) -> crate::Result<u64> {
        thread::program_counter(thread)
    }

    fn set_program_counter(&mut self, thread: &Handle, addr: u64) -> crate::Result<()> {
        thread::set_program_counter(thread, addr)
    }

    fn set_single_step(&mut self, thread: &Handle, enable: bool) -> crate::Result<()> {
        thread::set_single_step(thread, enable)
    }
}

impl DebugApi for Debugger {
    type Breaker = Breaker;

    fn spawn(&mut self, command: &Command, program: &Path) -> crate::Result<u32> {
        process::spawn_debuggee(command, program)
    }

    fn attach(&mut self, pid: u32) -> crate::Result<()> {
        process::attach(pid)
    }

    fn executable_path(&self, pid: u32) -> crate::Result<PathBuf> {
        process::executable_path(pid)
    }

    fn wait_for_event(
        &mut self,
        blocking: bool,
    ) -> crate::Result<Option<DebugNotification<Handle>>> {
        let mut raw = DEBUG_EVENT::default();
        let timeout = if blocking { INFINITE } else { 0 };

        match unsafe { WaitForDebugEvent(&mut raw, timeout) } {
            Ok(()) => Ok(Some(crate::decode_event(&raw))),
            Err(e) if !blocking && e.code() == ERROR_SEM_TIMEOUT.to_hresult() => Ok(None),
            Err(e) => {
                tracing::error!(error = %e, "WaitForDebugEvent");
                Err(e.into())
            }
        }
    }

    fn continue_event(
        &mut self,
        pid: u32,
        thread_id: u32,
        status: ContinueStatus,
    ) -> crate::Result<()> {
        let status = match status {
            ContinueStatus::Handled => DBG_CONTINUE,
            ContinueStatus::NotHandled => DBG_EXCEPTION_NOT_HANDLED,
        };

        unsafe { ContinueDebugEvent(pid, thread_id, status) }
            .inspect_err(|e| tracing::error!(error = %e, pid, thread_id, "ContinueDebugEvent"))?;

        Ok(())
    }

    fn suspend_thread(&mut self, thread: &Handle) -> crate::Result<()> {
        thread::suspend_thread(thread)
    }

    fn resume_thread(&mut self, thread: &Handle) -> crate::Result<()> {
        thread::resume_thread(thread)
    }

    fn terminate_process(&mut self, process: &Handle, exit_code: u32) -> crate::Result<()> {
        process::terminate(process, exit_code)
    }

    fn detach(&mut self, pid: u32) -> crate::Result<()> {
        process::detach(pid)
    }

    fn breaker(&self, pid: u32) -> crate::Result<Breaker> {
        let process = process::open_for_break(pid)?;
        Ok(Breaker { process })
    }
}
