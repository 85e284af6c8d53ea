mod dispatch;
mod freeze;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::breakpoint::{Breakpoint, BreakpointManager};
use crate::error::HandleOp;
use crate::event::{ContinueStatus, DebugStop};
use crate::target::{Architecture, BreakRequest, DebugApi};
use crate::thread::{Thread, ThreadManager};
use crate::{Command, Error, image};

/// Process being debugged.
///
/// Every method talks to the OS debug API, and must therefore be called from
/// the thread which launched (or attached to) the process. See
/// [ProcessController](crate::ProcessController) for driving a process from
/// other threads.
pub struct Process<D: DebugApi> {
    /// OS debug API.
    api: D,

    /// Instruction set of the debuggee.
    arch: &'static dyn Architecture,

    /// ID of the process.
    pid: u32,

    /// Path of the executable image.
    exe_path: PathBuf,

    /// OS handle of the process (released on exit or detach).
    handle: Option<D::Handle>,

    /// Interrupts the process from any thread.
    breaker: Arc<D::Breaker>,

    /// Live threads of the process.
    threads: ThreadManager<D::Handle>,

    /// Thread the debugger is focused on.
    current_thread: Option<u32>,

    /// Breakpoints installed in the process.
    breakpoints: BreakpointManager,

    /// Thread which produced the last breakpoint (or single-step) stop.
    break_thread: u32,

    /// Whether the debug event of the last stop still awaits acknowledgment.
    pending_ack: bool,

    /// Exit code of the process, once it has exited.
    exit_code: Option<u32>,

    /// Whether the debugger has detached from the process.
    detached: bool,
}

impl<D: DebugApi> Process<D> {
    fn new(
        api: D,
        arch: &'static dyn Architecture,
        pid: u32,
        exe_path: PathBuf,
    ) -> crate::Result<Self, D::Error> {
        let breaker = api.breaker(pid).map_err(Error::backend)?;

        Ok(Self {
            api,
            arch,
            pid,
            exe_path,
            handle: None,
            breaker: Arc::new(breaker),
            threads: ThreadManager::new(),
            current_thread: None,
            breakpoints: BreakpointManager::new(),
            break_thread: 0,
            pending_ack: false,
            exit_code: None,
            detached: false,
        })
    }

    /// Launches a new process and starts debugging it.
    ///
    /// On success, every thread of the process is suspended.
    #[tracing::instrument(name = "Launch", skip_all, fields(program = %command.program.display()))]
    pub fn launch(
        mut api: D,
        arch: &'static dyn Architecture,
        command: &Command,
    ) -> crate::Result<Self, D::Error> {
        let program = image::resolve_program(&command.program)
            .ok_or_else(|| Error::ProgramNotFound(command.program.clone()))?;

        if !image::is_executable_image(&program) {
            return Err(Error::NotExecutable(program));
        }

        let pid = api.spawn(command, &program).map_err(Error::backend)?;

        tracing::info!(pid, program = %program.display(), "spawned");

        Self::new(api, arch, pid, program)?.init()
    }

    /// Attaches to a running process and starts debugging it.
    ///
    /// On success, every thread of the process is suspended.
    #[tracing::instrument(name = "Attach", skip(api, arch))]
    pub fn attach(
        mut api: D,
        arch: &'static dyn Architecture,
        pid: u32,
    ) -> crate::Result<Self, D::Error> {
        api.attach(pid).map_err(Error::backend)?;

        let exe_path = api.executable_path(pid).map_err(Error::backend)?;

        tracing::info!(pid, exe = %exe_path.display(), "attached");

        Self::new(api, arch, pid, exe_path)?.init()
    }

    /// Waits for the initial stop of a newly debugged process.
    fn init(mut self) -> crate::Result<Self, D::Error> {
        let thread_id = loop {
            match self.wait_for_debug_event(true, false)? {
                DebugStop::Breakpoint { thread_id } | DebugStop::SingleStep { thread_id } => {
                    break thread_id;
                }
                DebugStop::Exited { exit_code } => {
                    // the process exited before reaching its initial stop
                    self.post_exit(exit_code);
                    return Err(Error::ProcessExited {
                        pid: self.pid,
                        exit_code,
                    });
                }
                DebugStop::Idle => continue,
            }
        };

        // keep the process frozen once the initial event is acknowledged
        self.suspend_all()?;
        self.acknowledge()?;

        if self.threads.contains(thread_id) {
            self.current_thread = Some(thread_id);
        }

        tracing::debug!(
            thread_id,
            threads = self.threads.len(),
            "process stopped at initial breakpoint"
        );

        Ok(self)
    }

    /// Kills the process.
    ///
    /// The process must be stopped. Killing an exited process does nothing.
    #[tracing::instrument(name = "Kill", skip(self), fields(pid = self.pid))]
    pub fn kill(&mut self) -> crate::Result<(), D::Error> {
        if self.is_exited() {
            return Ok(());
        }

        self.ensure_attached()?;

        if self.threads.iter().any(Thread::is_running) {
            return Err(Error::InvalidStateForKill);
        }

        if let Some(handle) = self.handle.as_ref() {
            self.api
                .terminate_process(handle, 1)
                .map_err(|source| Error::HandleOperationFailed {
                    op: HandleOp::Terminate,
                    thread_id: self.pid,
                    source,
                })?;
        }

        // let the OS deliver the remaining events up to the process exit
        let exit_code = match self.drain_until_exit() {
            Ok(exit_code) => exit_code,
            Err(e) => {
                tracing::warn!(error = %e, "draining debug events after termination");
                1
            }
        };

        self.post_exit(exit_code);

        tracing::info!("process killed");

        Ok(())
    }

    /// Stops debugging the process.
    ///
    /// Unless `kill` is specified, every breakpoint is removed and every thread
    /// is resumed before detaching, so that the process keeps running.
    #[tracing::instrument(name = "Detach", skip(self), fields(pid = self.pid))]
    pub fn detach(&mut self, kill: bool) -> crate::Result<(), D::Error> {
        if self.is_exited() || self.detached {
            return Ok(());
        }

        if kill {
            self.kill()?;

            if let Err(e) = self.api.detach(self.pid) {
                tracing::debug!(error = %e, "detach from killed process");
            }

            return Ok(());
        }

        if let Some(handle) = self.handle.as_ref() {
            self.breakpoints.remove_all(&mut self.api, handle)?;
        }

        for thread in self.threads.iter_mut() {
            thread.current_breakpoint = None;

            if !thread.running {
                self.api
                    .resume_thread(thread.handle())
                    .map_err(|source| Error::HandleOperationFailed {
                        op: HandleOp::Resume,
                        thread_id: thread.id(),
                        source,
                    })?;
                thread.running = true;
            }
        }

        self.acknowledge()?;

        self.api.detach(self.pid).map_err(Error::backend)?;

        self.detached = true;
        self.release();

        tracing::info!("detached");

        Ok(())
    }

    /// Asks the OS to break into the process.
    ///
    /// The process stops with a breakpoint as soon as it runs. See
    /// [breaker](Self::breaker) for interrupting a running process.
    pub fn request_manual_stop(&self) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        self.breaker.request_break().map_err(Error::backend)
    }

    /// Returns a handle interrupting the process from any thread.
    pub fn breaker(&self) -> Arc<D::Breaker> {
        Arc::clone(&self.breaker)
    }

    /// Adds a breakpoint at the given address.
    pub fn set_breakpoint(&mut self, addr: u64) -> crate::Result<&Breakpoint, D::Error> {
        self.ensure_alive()?;

        let Some(handle) = self.handle.as_ref() else {
            return Err(self.gone());
        };

        self.breakpoints
            .insert(&mut self.api, handle, self.arch, addr)
    }

    /// Removes the breakpoint at the given address.
    ///
    /// Threads parked on that breakpoint no longer need to step over it.
    pub fn clear_breakpoint(&mut self, addr: u64) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        let Some(handle) = self.handle.as_ref() else {
            return Err(self.gone());
        };

        self.breakpoints.remove(&mut self.api, handle, addr)?;

        self.threads
            .iter_mut()
            .filter(|thread| thread.current_breakpoint == Some(addr))
            .for_each(|thread| thread.current_breakpoint = None);

        Ok(())
    }

    /// Returns the breakpoints installed in the process.
    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.iter()
    }

    /// Reads memory of the process.
    pub fn read_memory(&self, addr: u64, len: usize) -> crate::Result<Vec<u8>, D::Error> {
        self.ensure_alive()?;

        let Some(handle) = self.handle.as_ref() else {
            return Err(self.gone());
        };

        let mut buf = vec![0u8; len];
        self.api
            .read_memory(handle, addr, &mut buf)
            .map_err(Error::backend)?;

        Ok(buf)
    }

    /// Writes memory of the process.
    pub fn write_memory(&mut self, addr: u64, data: &[u8]) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        let Some(handle) = self.handle.as_ref() else {
            return Err(self.gone());
        };

        self.api
            .write_memory(handle, addr, data)
            .map_err(Error::backend)
    }

    /// Returns the program counter of the given thread.
    pub fn program_counter(&self, thread_id: u32) -> crate::Result<u64, D::Error> {
        self.ensure_alive()?;

        let thread = self
            .threads
            .get(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?;

        self.api
            .program_counter(thread.handle())
            .map_err(Error::backend)
    }

    /// Focuses the debugger on the given thread.
    pub fn switch_thread(&mut self, thread_id: u32) -> crate::Result<(), D::Error> {
        if !self.threads.contains(thread_id) {
            return Err(Error::UntrackedThread(thread_id));
        }

        self.current_thread = Some(thread_id);

        Ok(())
    }

    /// Returns the ID of the process.
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns the path of the executable image of the process.
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    /// Returns the instruction set of the process.
    pub fn arch(&self) -> &'static dyn Architecture {
        self.arch
    }

    /// Returns the OS debug API.
    pub const fn api(&self) -> &D {
        &self.api
    }

    /// Returns whether the process has exited.
    pub const fn is_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Returns the exit code of the process, once it has exited.
    pub const fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Returns whether the debugger has detached from the process.
    pub const fn is_detached(&self) -> bool {
        self.detached
    }

    /// Returns the thread the debugger is focused on.
    pub const fn current_thread(&self) -> Option<u32> {
        self.current_thread
    }

    /// Returns the thread which produced the last stop.
    pub const fn break_thread(&self) -> u32 {
        self.break_thread
    }

    /// Returns the given thread.
    pub fn thread(&self, thread_id: u32) -> Option<&Thread<D::Handle>> {
        self.threads.get(thread_id)
    }

    /// Returns the live threads of the process.
    pub fn threads(&self) -> impl Iterator<Item = &Thread<D::Handle>> {
        self.threads.iter()
    }

    /// Acknowledges the debug event of the last stop, if not done yet.
    fn acknowledge(&mut self) -> crate::Result<(), D::Error> {
        if std::mem::take(&mut self.pending_ack) {
            self.api
                .continue_event(self.pid, self.break_thread, ContinueStatus::Handled)
                .map_err(Error::backend)?;
        }

        Ok(())
    }

    /// Acknowledges every debug event until the process exits.
    fn drain_until_exit(&mut self) -> crate::Result<u32, D::Error> {
        loop {
            self.acknowledge()?;

            if let DebugStop::Exited { exit_code } = self.wait_for_debug_event(true, false)? {
                break Ok(exit_code);
            }
        }
    }

    /// Marks the process as exited, releasing its OS resources.
    fn post_exit(&mut self, exit_code: u32) {
        self.exit_code.get_or_insert(exit_code);
        self.release();
    }

    fn release(&mut self) {
        self.pending_ack = false;
        self.current_thread = None;
        self.threads.clear();
        self.breakpoints = BreakpointManager::new();
        self.handle = None;
    }

    fn ensure_attached(&self) -> crate::Result<(), D::Error> {
        if self.detached {
            Err(Error::Detached(self.pid))
        } else {
            Ok(())
        }
    }

    /// Checks that the process can still be controlled.
    fn ensure_alive(&self) -> crate::Result<(), D::Error> {
        self.ensure_attached()?;

        match self.exit_code {
            Some(exit_code) => Err(Error::ProcessExited {
                pid: self.pid,
                exit_code,
            }),
            None => Ok(()),
        }
    }

    /// Error reported when the process handle is unexpectedly missing.
    fn gone(&self) -> Error<D::Error> {
        Error::ProcessExited {
            pid: self.pid,
            exit_code: self.exit_code.unwrap_or_default(),
        }
    }
}
