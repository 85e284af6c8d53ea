use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::target::{Architecture, BreakRequest, DebugApi};
use crate::{Command, Error, Process};

type Reply<T, E> = oneshot::Sender<crate::Result<T, E>>;

/// Request served by the process control worker.
enum Request<E> {
    ContinueAndWait(Reply<u32, E>),
    StepInstruction(u32, Reply<(), E>),
    SetBreakpoint(u64, Reply<(), E>),
    ClearBreakpoint(u64, Reply<(), E>),
    ReadMemory(u64, usize, Reply<Vec<u8>, E>),
    WriteMemory(u64, Vec<u8>, Reply<(), E>),
    ProgramCounter(u32, Reply<u64, E>),
    Threads(Reply<Vec<ThreadInfo>, E>),
    Kill(Reply<(), E>),
    Detach(bool, Reply<(), E>),
}

/// Snapshot of the state of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    /// ID of the thread.
    pub id: u32,

    /// Whether the thread is schedulable.
    pub running: bool,

    /// Address of the breakpoint the thread is parked on.
    pub current_breakpoint: Option<u64>,
}

/// Handle over a [Process] owned by a dedicated worker thread.
///
/// The OS debug API only accepts requests from the thread which launched
/// (or attached to) the debuggee. The worker thread performs every OS call,
/// while this handle can be used from any thread or async task.
///
/// Once every handle is dropped, the worker kills the debuggee (unless it
/// has exited, or was detached).
pub struct ProcessController<E> {
    /// Request queue of the worker.
    requests: mpsc::UnboundedSender<Request<E>>,

    /// Interrupts the debuggee without going through the worker.
    breaker: Arc<dyn BreakRequest<Error = E>>,

    /// ID of the debuggee.
    pid: u32,
}

impl<E> Clone for ProcessController<E> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            breaker: Arc::clone(&self.breaker),
            pid: self.pid,
        }
    }
}

impl<E> ProcessController<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Launches a new process on a new worker thread.
    ///
    /// `make_api` is called on the worker thread to create the OS debug API.
    pub async fn launch<D, F>(
        make_api: F,
        arch: &'static dyn Architecture,
        command: Command,
    ) -> crate::Result<Self, E>
    where
        D: DebugApi<Error = E>,
        F: FnOnce() -> D + Send + 'static,
    {
        Self::start(move || Process::launch(make_api(), arch, &command)).await
    }

    /// Attaches to a running process from a new worker thread.
    ///
    /// `make_api` is called on the worker thread to create the OS debug API.
    pub async fn attach<D, F>(
        make_api: F,
        arch: &'static dyn Architecture,
        pid: u32,
    ) -> crate::Result<Self, E>
    where
        D: DebugApi<Error = E>,
        F: FnOnce() -> D + Send + 'static,
    {
        Self::start(move || Process::attach(make_api(), arch, pid)).await
    }

    async fn start<D, F>(init: F) -> crate::Result<Self, E>
    where
        D: DebugApi<Error = E>,
        F: FnOnce() -> crate::Result<Process<D>, E> + Send + 'static,
    {
        let (init_tx, init_rx) = oneshot::channel();
        let (requests, requests_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("trapdoor-worker".to_owned())
            .spawn(move || match init() {
                Ok(process) => {
                    let breaker: Arc<dyn BreakRequest<Error = E>> = process.breaker();
                    let _ = init_tx.send(Ok((process.pid(), breaker)));
                    serve(process, requests_rx);
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                }
            })
            .map_err(|e| {
                tracing::error!(error = %e, "spawn worker thread");
                Error::WorkerGone
            })?;

        let (pid, breaker) = init_rx.await.map_err(|_| Error::WorkerGone)??;

        Ok(Self {
            requests,
            breaker,
            pid,
        })
    }

    /// Returns the ID of the debuggee.
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// See [Process::continue_and_wait].
    pub async fn continue_and_wait(&self) -> crate::Result<u32, E> {
        self.request(Request::ContinueAndWait).await
    }

    /// See [Process::step_instruction].
    pub async fn step_instruction(&self, thread_id: u32) -> crate::Result<(), E> {
        self.request(|reply| Request::StepInstruction(thread_id, reply))
            .await
    }

    /// See [Process::set_breakpoint].
    pub async fn set_breakpoint(&self, addr: u64) -> crate::Result<(), E> {
        self.request(|reply| Request::SetBreakpoint(addr, reply))
            .await
    }

    /// See [Process::clear_breakpoint].
    pub async fn clear_breakpoint(&self, addr: u64) -> crate::Result<(), E> {
        self.request(|reply| Request::ClearBreakpoint(addr, reply))
            .await
    }

    /// See [Process::read_memory].
    pub async fn read_memory(&self, addr: u64, len: usize) -> crate::Result<Vec<u8>, E> {
        self.request(|reply| Request::ReadMemory(addr, len, reply))
            .await
    }

    /// See [Process::write_memory].
    pub async fn write_memory(&self, addr: u64, data: Vec<u8>) -> crate::Result<(), E> {
        self.request(|reply| Request::WriteMemory(addr, data, reply))
            .await
    }

    /// See [Process::program_counter].
    pub async fn program_counter(&self, thread_id: u32) -> crate::Result<u64, E> {
        self.request(|reply| Request::ProgramCounter(thread_id, reply))
            .await
    }

    /// Returns a snapshot of the live threads of the debuggee.
    pub async fn threads(&self) -> crate::Result<Vec<ThreadInfo>, E> {
        self.request(Request::Threads).await
    }

    /// See [Process::kill].
    ///
    /// The worker thread stops afterwards.
    pub async fn kill(&self) -> crate::Result<(), E> {
        self.request(Request::Kill).await
    }

    /// See [Process::request_manual_stop].
    ///
    /// The request is not queued: it interrupts the debuggee even while the
    /// worker waits for it to stop (e.g., within
    /// [continue_and_wait](Self::continue_and_wait)).
    pub fn request_manual_stop(&self) -> crate::Result<(), E> {
        self.breaker.request_break().map_err(Error::backend)
    }

    /// See [Process::detach].
    ///
    /// The worker thread stops afterwards.
    pub async fn detach(&self, kill: bool) -> crate::Result<(), E> {
        self.request(|reply| Request::Detach(kill, reply)).await
    }

    async fn request<T>(
        &self,
        make_request: impl FnOnce(Reply<T, E>) -> Request<E>,
    ) -> crate::Result<T, E> {
        let (reply, reply_rx) = oneshot::channel();

        self.requests
            .send(make_request(reply))
            .map_err(|_| Error::WorkerGone)?;

        reply_rx.await.map_err(|_| Error::WorkerGone)?
    }
}

/// Serves requests until the debugger is done with the process.
#[tracing::instrument(name = "Worker", skip_all, fields(pid = process.pid()))]
fn serve<D: DebugApi>(
    mut process: Process<D>,
    mut requests: mpsc::UnboundedReceiver<Request<D::Error>>,
) {
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::ContinueAndWait(reply) => {
                let _ = reply.send(process.continue_and_wait());
            }
            Request::StepInstruction(thread_id, reply) => {
                let _ = reply.send(process.step_instruction(thread_id));
            }
            Request::SetBreakpoint(addr, reply) => {
                let _ = reply.send(process.set_breakpoint(addr).map(|_| ()));
            }
            Request::ClearBreakpoint(addr, reply) => {
                let _ = reply.send(process.clear_breakpoint(addr));
            }
            Request::ReadMemory(addr, len, reply) => {
                let _ = reply.send(process.read_memory(addr, len));
            }
            Request::WriteMemory(addr, data, reply) => {
                let _ = reply.send(process.write_memory(addr, &data));
            }
            Request::ProgramCounter(thread_id, reply) => {
                let _ = reply.send(process.program_counter(thread_id));
            }
            Request::Threads(reply) => {
                let threads = process
                    .threads()
                    .map(|thread| ThreadInfo {
                        id: thread.id(),
                        running: thread.is_running(),
                        current_breakpoint: thread.current_breakpoint(),
                    })
                    .collect();

                let _ = reply.send(Ok(threads));
            }
            Request::Kill(reply) => {
                let _ = reply.send(process.kill());
                break;
            }
            Request::Detach(kill, reply) => {
                let _ = reply.send(process.detach(kill));
                break;
            }
        }
    }

    if !process.is_exited() && !process.is_detached() {
        tracing::debug!("no more controller, killing debuggee");

        if let Err(e) = process.kill() {
            tracing::warn!(error = %e, "kill debuggee");
        }
    }
}
