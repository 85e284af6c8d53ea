#![allow(dead_code)]

//! Scripted OS backend.
//!
//! Debug events are queued by the tests, and delivered by the backend as a
//! real debug API would. The backend checks that every delivered event is
//! acknowledged exactly once before the next one is delivered.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use trapdoor_proc::{Aarch64, Architecture, Command};
use trapdoor_proc::event::{
    ContinueStatus, DebugEvent, DebugNotification, ExceptionCode,
};
use trapdoor_proc::target::{
    BreakRequest, DebugApi, MemoryAccess, OsTarget, RegisterAccess,
};

pub const PID: u32 = 4242;
pub const MAIN_TID: u32 = 100;

/// Address of the loader breakpoint reported when debugging starts.
pub const LOADER_BREAKPOINT: u64 = 0x7ff0_0000;

/// Start of a region filled with `nop` instructions.
pub const CODE: u64 = 0x1_4000_1000;
pub const CODE_SIZE: u64 = 0x100;

pub const NOP: u8 = 0x90;
pub const INT3: u8 = 0xcc;

/// First ID of the threads injected by break requests.
pub const BREAK_TID: u32 = 900;

/// How long a blocking wait lasts on an empty script before failing.
const HANG_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_ACCESS_VIOLATION: u32 = 0xc000_0005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Process(u32),
    Thread(u32),
    File,
}

/// OS handle whose release is recorded.
#[derive(Debug)]
pub struct FakeHandle {
    kind: HandleKind,
    released: Arc<Mutex<Vec<HandleKind>>>,
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        if let Ok(mut released) = self.released.lock() {
            released.push(self.kind);
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeThread {
    pub pc: u64,
    pub suspend_count: u32,
    pub single_step: bool,
}

/// A single-step executed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub thread_id: u32,
    pub pc: u64,
    pub opcode: u8,
}

enum Scripted {
    Event(DebugNotification<FakeHandle>),
    /// Nothing happens until the debugger waits for events (blocking).
    Pause,
}

#[derive(Default)]
pub struct State {
    script: VecDeque<Scripted>,
    pending: Option<u32>,
    pub memory: BTreeMap<u64, u8>,
    pub threads: HashMap<u32, FakeThread>,
    pub continued: Vec<(u32, ContinueStatus)>,
    pub steps: Vec<Step>,
    pub attached: Option<u32>,
    pub detached: Option<u32>,
    pub terminated: Option<u32>,
    pub break_requests: u32,
    /// Thread whose suspension fails.
    pub fail_suspend: Option<u32>,
    /// Thread whose resumption fails.
    pub fail_resume: Option<u32>,
    /// The next single-step ends on a breakpoint trap at this address
    /// instead (e.g., the stepped instruction faulted, and its exception
    /// handler ran into a breakpoint).
    pub divert_step: Option<u64>,
    /// How far the program counter moves past an executed trap.
    trap_advance: u64,
}

/// Scripted implementation of the OS debug API.
#[derive(Clone, Default)]
pub struct FakeOs {
    state: Arc<Mutex<State>>,
    wakeup: Arc<Condvar>,
    released: Arc<Mutex<Vec<HandleKind>>>,
}

/// Break requester of the [FakeOs].
///
/// Like `DebugBreakProcess`, each request creates a thread in the debuggee
/// which executes a trap instruction.
pub struct FakeBreaker(FakeOs);

fn os_error(msg: &str) -> io::Error {
    io::Error::other(msg.to_owned())
}

impl FakeOs {
    /// Backend of an `x86` process whose main thread stops at the loader
    /// breakpoint.
    pub fn new() -> Self {
        Self::with_trap(&[INT3], 1)
    }

    /// Backend of an `aarch64` process, where the program counter stays on
    /// an executed trap instruction.
    pub fn aarch64() -> Self {
        Self::with_trap(Aarch64.breakpoint_instruction(), 0)
    }

    fn with_trap(trap: &[u8], trap_advance: u64) -> Self {
        let os = Self::default();

        {
            let mut state = os.state();
            state.trap_advance = trap_advance;

            for (addr, byte) in (LOADER_BREAKPOINT..).zip(trap) {
                state.memory.insert(addr, *byte);
            }

            for addr in CODE..CODE + CODE_SIZE {
                state.memory.insert(addr, NOP);
            }
        }

        os.push_process_created(MAIN_TID);
        os
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn released(&self) -> Vec<HandleKind> {
        self.released.lock().unwrap().clone()
    }

    pub fn thread(&self, thread_id: u32) -> FakeThread {
        self.state().threads.get(&thread_id).cloned().unwrap()
    }

    pub fn byte(&self, addr: u64) -> u8 {
        self.state().memory[&addr]
    }

    fn handle(&self, kind: HandleKind) -> FakeHandle {
        FakeHandle {
            kind,
            released: self.released.clone(),
        }
    }

    fn push(&self, thread_id: u32, event: DebugEvent<FakeHandle>) {
        self.state()
            .script
            .push_back(Scripted::Event(DebugNotification {
                process_id: PID,
                thread_id,
                event,
            }));

        self.wakeup.notify_all();
    }

    pub fn push_pause(&self) {
        self.state().script.push_back(Scripted::Pause);
    }

    pub fn push_process_created(&self, thread_id: u32) {
        self.state().threads.insert(thread_id, FakeThread::default());

        self.push(
            thread_id,
            DebugEvent::ProcessCreated {
                process_handle: self.handle(HandleKind::Process(PID)),
                thread_id,
                thread_handle: self.handle(HandleKind::Thread(thread_id)),
                file_handle: Some(self.handle(HandleKind::File)),
            },
        );
    }

    pub fn push_thread_created(&self, thread_id: u32) {
        self.state().threads.insert(thread_id, FakeThread::default());

        self.push(
            thread_id,
            DebugEvent::ThreadCreated {
                thread_id,
                thread_handle: self.handle(HandleKind::Thread(thread_id)),
            },
        );
    }

    pub fn push_thread_exited(&self, thread_id: u32) {
        self.push(
            thread_id,
            DebugEvent::ThreadExited {
                thread_id,
                exit_code: 0,
            },
        );
    }

    pub fn push_module_loaded(&self, base_addr: u64) {
        self.push(
            MAIN_TID,
            DebugEvent::ModuleLoaded {
                file_handle: Some(self.handle(HandleKind::File)),
                base_addr,
            },
        );
    }

    /// Queues the loader breakpoint of the main thread.
    pub fn push_loader_breakpoint(&self) {
        self.push_breakpoint(MAIN_TID, LOADER_BREAKPOINT);
    }

    /// Queues a breakpoint exception raised at `address`.
    ///
    /// When delivered, the program counter of the thread points right after
    /// the trap instruction.
    pub fn push_breakpoint(&self, thread_id: u32, address: u64) {
        self.push_exception(thread_id, address, ExceptionCode::Breakpoint);
    }

    pub fn push_access_violation(&self, thread_id: u32, address: u64) {
        self.push_exception(
            thread_id,
            address,
            ExceptionCode::Other(STATUS_ACCESS_VIOLATION),
        );
    }

    fn push_exception(&self, thread_id: u32, address: u64, code: ExceptionCode) {
        self.push(
            thread_id,
            DebugEvent::Exception {
                thread_id,
                address,
                code,
                first_chance: true,
            },
        );
    }

    pub fn push_process_exited(&self, exit_code: u32) {
        self.push(MAIN_TID, DebugEvent::ProcessExited { exit_code });
    }

    pub fn push_unknown(&self, code: u32) {
        self.push(MAIN_TID, DebugEvent::Unknown { code });
    }

    fn thread_id(handle: &FakeHandle) -> io::Result<u32> {
        match handle.kind {
            HandleKind::Thread(thread_id) => Ok(thread_id),
            _ => Err(os_error("not a thread handle")),
        }
    }

    fn check_process(handle: &FakeHandle) -> io::Result<()> {
        match handle.kind {
            HandleKind::Process(PID) => Ok(()),
            _ => Err(os_error("not a process handle")),
        }
    }
}

fn thread_mut(state: &mut State, thread_id: u32) -> io::Result<&mut FakeThread> {
    state
        .threads
        .get_mut(&thread_id)
        .ok_or_else(|| os_error("no such thread"))
}

impl OsTarget for FakeOs {
    type Handle = FakeHandle;
    type Error = io::Error;
}

impl MemoryAccess for FakeOs {
    fn read_memory(&self, process: &FakeHandle, addr: u64, buf: &mut [u8]) -> io::Result<()> {
        Self::check_process(process)?;

        let state = self.state();

        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = *state
                .memory
                .get(&(addr + i as u64))
                .ok_or_else(|| os_error("unmapped memory"))?;
        }

        Ok(())
    }

    fn write_memory(&mut self, process: &FakeHandle, addr: u64, data: &[u8]) -> io::Result<()> {
        Self::check_process(process)?;

        let mut state = self.state();

        for (i, byte) in data.iter().enumerate() {
            let cell = state
                .memory
                .get_mut(&(addr + i as u64))
                .ok_or_else(|| os_error("unmapped memory"))?;
            *cell = *byte;
        }

        Ok(())
    }
}

impl RegisterAccess for FakeOs {
    fn program_counter(&self, thread: &FakeHandle) -> io::Result<u64> {
        let thread_id = Self::thread_id(thread)?;
        Ok(thread_mut(&mut self.state(), thread_id)?.pc)
    }

    fn set_program_counter(&mut self, thread: &FakeHandle, addr: u64) -> io::Result<()> {
        let thread_id = Self::thread_id(thread)?;
        thread_mut(&mut self.state(), thread_id)?.pc = addr;
        Ok(())
    }

    fn set_single_step(&mut self, thread: &FakeHandle, enable: bool) -> io::Result<()> {
        let thread_id = Self::thread_id(thread)?;
        thread_mut(&mut self.state(), thread_id)?.single_step = enable;
        Ok(())
    }
}

impl DebugApi for FakeOs {
    type Breaker = FakeBreaker;

    fn spawn(&mut self, _command: &Command, _program: &Path) -> io::Result<u32> {
        Ok(PID)
    }

    fn attach(&mut self, pid: u32) -> io::Result<()> {
        if pid != PID {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }

        self.state().attached = Some(pid);
        Ok(())
    }

    fn executable_path(&self, _pid: u32) -> io::Result<PathBuf> {
        Ok(PathBuf::from(r"C:\app\app.exe"))
    }

    fn breaker(&self, _pid: u32) -> io::Result<FakeBreaker> {
        Ok(FakeBreaker(self.clone()))
    }

    fn wait_for_event(
        &mut self,
        blocking: bool,
    ) -> io::Result<Option<DebugNotification<FakeHandle>>> {
        let mut state = self.state();

        if state.pending.is_some() {
            return Err(os_error("previous debug event not acknowledged"));
        }

        let notification = loop {
            match state.script.pop_front() {
                Some(Scripted::Event(notification)) => break notification,
                Some(Scripted::Pause) if blocking => continue,
                Some(Scripted::Pause) => {
                    state.script.push_front(Scripted::Pause);
                    return Ok(None);
                }
                None if blocking => {
                    // the debuggee runs until something is queued
                    let (guard, res) = self.wakeup.wait_timeout(state, HANG_TIMEOUT).unwrap();
                    state = guard;

                    if res.timed_out() && state.script.is_empty() {
                        return Err(os_error("debuggee would hang"));
                    }
                }
                None => return Ok(None),
            }
        };

        if let DebugEvent::Exception {
            thread_id,
            address,
            code: ExceptionCode::Breakpoint,
            ..
        } = notification.event
        {
            let trap_advance = state.trap_advance;
            thread_mut(&mut state, thread_id)?.pc = address + trap_advance;
        }

        state.pending = Some(notification.thread_id);

        Ok(Some(notification))
    }

    fn continue_event(&mut self, pid: u32, thread_id: u32, status: ContinueStatus) -> io::Result<()> {
        let mut state = self.state();

        if pid != PID || state.pending != Some(thread_id) {
            return Err(os_error("no such pending debug event"));
        }

        state.pending = None;
        state.continued.push((thread_id, status));

        Ok(())
    }

    fn suspend_thread(&mut self, thread: &FakeHandle) -> io::Result<()> {
        let thread_id = Self::thread_id(thread)?;
        let mut state = self.state();

        if state.fail_suspend == Some(thread_id) {
            return Err(os_error("access denied"));
        }

        thread_mut(&mut state, thread_id)?.suspend_count += 1;
        Ok(())
    }

    fn resume_thread(&mut self, thread: &FakeHandle) -> io::Result<()> {
        let thread_id = Self::thread_id(thread)?;
        let mut state = self.state();

        if state.fail_resume == Some(thread_id) {
            return Err(os_error("access denied"));
        }

        let thread = thread_mut(&mut state, thread_id)?;
        thread.suspend_count = thread.suspend_count.saturating_sub(1);

        if thread.suspend_count > 0 || !thread.single_step {
            return Ok(());
        }

        if let Some(address) = state.divert_step.take() {
            state.script.push_front(Scripted::Event(DebugNotification {
                process_id: PID,
                thread_id,
                event: DebugEvent::Exception {
                    thread_id,
                    address,
                    code: ExceptionCode::Breakpoint,
                    first_chance: true,
                },
            }));

            return Ok(());
        }

        // execute a single instruction
        let thread = thread_mut(&mut state, thread_id)?;
        let pc = thread.pc;
        thread.pc += 1;

        let opcode = state.memory.get(&pc).copied().unwrap_or_default();
        state.steps.push(Step {
            thread_id,
            pc,
            opcode,
        });

        state.script.push_front(Scripted::Event(DebugNotification {
            process_id: PID,
            thread_id,
            event: DebugEvent::Exception {
                thread_id,
                address: pc + 1,
                code: ExceptionCode::SingleStep,
                first_chance: true,
            },
        }));

        Ok(())
    }

    fn terminate_process(&mut self, process: &FakeHandle, exit_code: u32) -> io::Result<()> {
        Self::check_process(process)?;

        let mut state = self.state();
        state.terminated = Some(exit_code);
        state.script.clear();
        state.script.push_back(Scripted::Event(DebugNotification {
            process_id: PID,
            thread_id: MAIN_TID,
            event: DebugEvent::ProcessExited { exit_code },
        }));

        Ok(())
    }

    fn detach(&mut self, pid: u32) -> io::Result<()> {
        self.state().detached = Some(pid);
        Ok(())
    }
}

impl BreakRequest for FakeBreaker {
    type Error = io::Error;

    fn request_break(&self) -> io::Result<()> {
        let os = &self.0;

        let thread_id = {
            let mut state = os.state();

            if state.terminated.is_some() {
                return Err(os_error("process is gone"));
            }

            state.break_requests += 1;
            BREAK_TID + state.break_requests
        };

        os.push_thread_created(thread_id);
        os.push_breakpoint(thread_id, LOADER_BREAKPOINT);

        Ok(())
    }
}
