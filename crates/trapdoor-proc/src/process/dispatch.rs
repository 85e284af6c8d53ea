use super::Process;
use crate::Error;
use crate::error::HandleOp;
use crate::event::{ContinueStatus, DebugEvent, DebugNotification, DebugStop, ExceptionCode};
use crate::target::DebugApi;

impl<D: DebugApi> Process<D> {
    /// Runs the debug event loop until a thread stops or the process exits.
    ///
    /// If `blocking` is `false`, the OS is polled until no more event is
    /// available, in which case [DebugStop::Idle] is returned.
    ///
    /// If `suspend_new_threads` is `true`, threads created meanwhile are
    /// suspended before they get a chance to run.
    ///
    /// # Note
    ///
    /// The debug event which stopped a thread is not acknowledged, the
    /// process remains stopped until [resume](Self::resume) (or the next
    /// wait) is called.
    #[tracing::instrument(name = "DebugEventLoop", skip(self))]
    pub fn wait_for_debug_event(
        &mut self,
        blocking: bool,
        suspend_new_threads: bool,
    ) -> crate::Result<DebugStop, D::Error> {
        loop {
            let Some(notification) = self.api.wait_for_event(blocking).map_err(Error::backend)?
            else {
                if blocking {
                    continue;
                }

                break Ok(DebugStop::Idle);
            };

            let DebugNotification {
                process_id,
                thread_id,
                event,
            } = notification;

            let mut status = ContinueStatus::Handled;
            let mut process_exit_code = None;

            match event {
                DebugEvent::ProcessCreated {
                    process_handle,
                    thread_id,
                    thread_handle,
                    file_handle,
                } => {
                    drop(file_handle);

                    tracing::debug!(process_id, thread_id, "process created");

                    if self.handle.is_none() {
                        self.handle = Some(process_handle);
                    }

                    self.add_thread(thread_id, thread_handle, suspend_new_threads)?;
                }
                DebugEvent::ThreadCreated {
                    thread_id,
                    thread_handle,
                } => {
                    tracing::debug!(thread_id, "thread created");

                    self.add_thread(thread_id, thread_handle, suspend_new_threads)?;
                }
                DebugEvent::ThreadExited {
                    thread_id,
                    exit_code,
                } => {
                    tracing::debug!(thread_id, exit_code, "thread exited");

                    self.threads.register_thread_exit(thread_id);

                    if self.current_thread == Some(thread_id) {
                        self.current_thread = self.threads.ids().next();
                    }
                }
                DebugEvent::ModuleLoaded {
                    file_handle,
                    base_addr,
                } => {
                    drop(file_handle);

                    tracing::debug!(base_addr = format_args!("{base_addr:#x}"), "module loaded");
                }
                DebugEvent::ModuleUnloaded { base_addr } => {
                    tracing::debug!(
                        base_addr = format_args!("{base_addr:#x}"),
                        "module unloaded"
                    );
                }
                DebugEvent::OutputString => tracing::trace!(thread_id, "debug string"),
                DebugEvent::Rip { error } => tracing::warn!(error, "RIP event"),
                DebugEvent::Exception {
                    thread_id,
                    address,
                    code,
                    first_chance,
                } => match code {
                    ExceptionCode::Breakpoint => {
                        if self.is_breakpoint_trap(thread_id, address)? {
                            tracing::debug!(
                                thread_id,
                                addr = format_args!("{address:#x}"),
                                "breakpoint"
                            );

                            if let Some(thread) = self.threads.get_mut(thread_id) {
                                thread.trapped = Some(address);
                            }

                            break Ok(self.register_stop(DebugStop::Breakpoint { thread_id }));
                        }

                        tracing::debug!(
                            thread_id,
                            addr = format_args!("{address:#x}"),
                            "breakpoint trap without breakpoint instruction"
                        );
                    }
                    ExceptionCode::SingleStep => {
                        break Ok(self.register_stop(DebugStop::SingleStep { thread_id }));
                    }
                    ExceptionCode::Other(raw) => {
                        tracing::debug!(
                            thread_id,
                            code = format_args!("{raw:#x}"),
                            addr = format_args!("{address:#x}"),
                            first_chance,
                            "exception passed to debuggee"
                        );

                        status = ContinueStatus::NotHandled;
                    }
                },
                DebugEvent::ProcessExited { exit_code } => {
                    tracing::debug!(exit_code, "process exited");

                    process_exit_code = Some(exit_code);
                }
                DebugEvent::Unknown { code } => break Err(Error::UnknownDebugEvent(code)),
            }

            self.api
                .continue_event(process_id, thread_id, status)
                .map_err(Error::backend)?;

            if let Some(exit_code) = process_exit_code {
                break Ok(DebugStop::Exited { exit_code });
            }
        }
    }

    /// Records the thread which stopped, leaving its debug event pending.
    fn register_stop(&mut self, stop: DebugStop) -> DebugStop {
        if let Some(thread_id) = stop.thread_id() {
            self.break_thread = thread_id;
            self.pending_ack = true;
        }

        stop
    }

    /// Checks whether a breakpoint exception was raised by an actual
    /// breakpoint instruction.
    ///
    /// The breakpoint may have been removed while the exception was being
    /// delivered, in which case the instruction pointer of the thread is set
    /// back to the exception address.
    fn is_breakpoint_trap(&mut self, thread_id: u32, address: u64) -> crate::Result<bool, D::Error> {
        let (Some(thread), Some(process)) = (self.threads.get(thread_id), self.handle.as_ref())
        else {
            return Ok(true);
        };

        let mut opcodes = vec![0u8; self.arch.breakpoint_size()];

        if let Err(e) = self.api.read_memory(process, address, &mut opcodes) {
            tracing::debug!(error = %e, addr = format_args!("{address:#x}"), "read trap opcodes");
            return Ok(true);
        }

        if opcodes == self.arch.breakpoint_instruction() {
            return Ok(true);
        }

        self.api
            .set_program_counter(thread.handle(), address)
            .map_err(Error::backend)?;

        Ok(false)
    }

    /// Registers a new thread.
    fn add_thread(
        &mut self,
        thread_id: u32,
        handle: D::Handle,
        suspend: bool,
    ) -> crate::Result<(), D::Error> {
        let Some(thread) = self.threads.register_thread_create(thread_id, handle) else {
            return Ok(());
        };

        if suspend {
            self.api
                .suspend_thread(thread.handle())
                .map_err(|source| Error::HandleOperationFailed {
                    op: HandleOp::Suspend,
                    thread_id,
                    source,
                })?;

            thread.running = false;
        }

        if self.current_thread.is_none() {
            self.current_thread = Some(thread_id);
        }

        Ok(())
    }
}
