use super::Process;
use crate::Error;
use crate::error::HandleOp;
use crate::event::DebugStop;
use crate::target::DebugApi;
use crate::thread::{Thread, set_current_breakpoint};

impl<D: DebugApi> Process<D> {
    /// Resumes the process and waits until a thread stops.
    ///
    /// Once a thread stops, every thread of the process is suspended and the
    /// debugger is focused on the stopped thread, whose ID is returned.
    ///
    /// If the process exits, [Error::ProcessExited] is returned.
    #[tracing::instrument(name = "Continue", skip(self), fields(pid = self.pid))]
    pub fn continue_and_wait(&mut self) -> crate::Result<u32, D::Error> {
        self.resume()?;

        loop {
            match self.wait_for_debug_event(true, false)? {
                DebugStop::Breakpoint { thread_id } | DebugStop::SingleStep { thread_id } => {
                    self.freeze_world(thread_id)?;
                    self.current_thread = Some(thread_id);

                    break Ok(thread_id);
                }
                DebugStop::Exited { exit_code } => {
                    self.post_exit(exit_code);

                    tracing::info!(exit_code, "process exited");

                    break Err(Error::ProcessExited {
                        pid: self.pid,
                        exit_code,
                    });
                }
                DebugStop::Idle => continue,
            }
        }
    }

    /// Suspends every thread after `trap_thread_id` has stopped.
    ///
    /// Other threads may have stopped at a breakpoint while the debug event
    /// of `trap_thread_id` was being delivered, so pending debug events are
    /// drained until none is left. Every thread stopped at a breakpoint is
    /// recorded as such.
    #[tracing::instrument(name = "FreezeWorld", skip(self))]
    pub fn freeze_world(&mut self, trap_thread_id: u32) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        self.record_current_breakpoint(trap_thread_id)?;

        // without explicit suspension, acknowledging the pending debug event
        // would let the other threads run
        self.suspend_all()?;

        loop {
            self.acknowledge()?;

            match self.wait_for_debug_event(false, true)? {
                DebugStop::Breakpoint { thread_id } | DebugStop::SingleStep { thread_id } => {
                    tracing::debug!(thread_id, "additional thread stopped");

                    self.record_current_breakpoint(thread_id)?;
                }
                DebugStop::Idle => break,
                DebugStop::Exited { exit_code } => {
                    self.post_exit(exit_code);

                    return Err(Error::ProcessExited {
                        pid: self.pid,
                        exit_code,
                    });
                }
            }
        }

        tracing::debug!(
            parked = ?self
                .threads
                .iter()
                .filter(|thread| thread.current_breakpoint.is_some())
                .map(Thread::id)
                .collect::<Vec<_>>(),
            "world frozen"
        );

        Ok(())
    }

    /// Resumes every thread of a frozen process.
    ///
    /// Threads parked on a breakpoint first step over it, so that they don't
    /// trigger it again right away.
    #[tracing::instrument(name = "Resume", skip(self))]
    pub fn resume(&mut self) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        let parked = self
            .threads
            .iter()
            .filter(|thread| thread.current_breakpoint.is_some())
            .map(Thread::id)
            .collect::<Vec<_>>();

        for thread_id in parked {
            self.step_instruction(thread_id)?;
        }

        let mut resumed = Vec::with_capacity(self.threads.len());

        for thread in self.threads.iter_mut() {
            thread.trapped = None;

            if let Err(source) = self.api.resume_thread(thread.handle()) {
                tracing::error!(
                    thread_id = thread.id(),
                    ?resumed,
                    "threads partially resumed"
                );

                return Err(Error::HandleOperationFailed {
                    op: HandleOp::Resume,
                    thread_id: thread.id(),
                    source,
                });
            }

            thread.running = true;
            resumed.push(thread.id());
        }

        self.acknowledge()
    }

    /// Makes the given thread execute a single instruction, while the other
    /// threads stay suspended.
    ///
    /// If the thread is parked on a breakpoint, the original instruction is
    /// executed, and the breakpoint is placed back afterwards. If the thread
    /// ends up on another breakpoint instead (e.g., reached by an exception
    /// handler), it is parked there.
    #[tracing::instrument(name = "Step", skip(self))]
    pub fn step_instruction(&mut self, thread_id: u32) -> crate::Result<(), D::Error> {
        self.ensure_alive()?;

        let parked_on = self
            .threads
            .get(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?
            .current_breakpoint;

        let Some(addr) = parked_on else {
            let trapped = self.single_step(thread_id)?;
            return self.park_if_trapped(thread_id, trapped);
        };

        if let Some(process) = self.handle.as_ref() {
            self.breakpoints
                .restore_original(&mut self.api, process, addr)?;
        }

        let stepped = self.single_step(thread_id);

        if self.is_exited() {
            return stepped.map(|_| ());
        }

        let repatched = match self.handle.as_ref() {
            Some(process) => self
                .breakpoints
                .repatch(&mut self.api, process, self.arch, addr),
            None => Ok(()),
        };

        let trapped = stepped?;
        repatched?;

        if let Some(thread) = self.threads.get_mut(thread_id) {
            thread.current_breakpoint = None;
        }

        self.park_if_trapped(thread_id, trapped)
    }

    fn park_if_trapped(&mut self, thread_id: u32, trapped: bool) -> crate::Result<(), D::Error> {
        if trapped {
            tracing::debug!(thread_id, "breakpoint reached while single-stepping");
            self.record_current_breakpoint(thread_id)?;
        }

        Ok(())
    }

    /// Single-steps a suspended thread.
    ///
    /// Returns whether the thread stopped on a breakpoint instead of
    /// completing the step.
    fn single_step(&mut self, thread_id: u32) -> crate::Result<bool, D::Error> {
        self.set_single_step(thread_id, true)?;
        self.acknowledge()?;
        self.resume_thread(thread_id)?;

        let trapped = loop {
            match self.wait_for_debug_event(true, true)? {
                DebugStop::SingleStep { thread_id: id } if id == thread_id => break false,
                DebugStop::Breakpoint { thread_id: id } if id == thread_id => break true,
                DebugStop::Exited { exit_code } => {
                    self.post_exit(exit_code);

                    return Err(Error::ProcessExited {
                        pid: self.pid,
                        exit_code,
                    });
                }
                stop => {
                    tracing::debug!(?stop, "ignored stop while single-stepping");
                    self.acknowledge()?;
                }
            }
        };

        self.suspend_thread(thread_id)?;
        self.set_single_step(thread_id, false)?;

        Ok(trapped)
    }

    /// Marks every thread as suspended, and suspends them.
    pub(super) fn suspend_all(&mut self) -> crate::Result<(), D::Error> {
        for thread in self.threads.iter_mut() {
            thread.running = false;

            self.api
                .suspend_thread(thread.handle())
                .map_err(|source| Error::HandleOperationFailed {
                    op: HandleOp::Suspend,
                    thread_id: thread.id(),
                    source,
                })?;
        }

        Ok(())
    }

    fn record_current_breakpoint(&mut self, thread_id: u32) -> crate::Result<(), D::Error> {
        let thread = self
            .threads
            .get_mut(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?;

        set_current_breakpoint(&mut self.api, thread, &self.breakpoints)?;

        Ok(())
    }

    fn suspend_thread(&mut self, thread_id: u32) -> crate::Result<(), D::Error> {
        let thread = self
            .threads
            .get(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?;

        self.api
            .suspend_thread(thread.handle())
            .map_err(|source| Error::HandleOperationFailed {
                op: HandleOp::Suspend,
                thread_id,
                source,
            })
    }

    fn resume_thread(&mut self, thread_id: u32) -> crate::Result<(), D::Error> {
        let thread = self
            .threads
            .get(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?;

        self.api
            .resume_thread(thread.handle())
            .map_err(|source| Error::HandleOperationFailed {
                op: HandleOp::Resume,
                thread_id,
                source,
            })
    }

    fn set_single_step(&mut self, thread_id: u32, enable: bool) -> crate::Result<(), D::Error> {
        let thread = self
            .threads
            .get(thread_id)
            .ok_or(Error::UntrackedThread(thread_id))?;

        self.api
            .set_single_step(thread.handle(), enable)
            .map_err(Error::backend)
    }
}
