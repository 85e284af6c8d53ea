use trapdoor_proc::{Error, ProcessController};

use crate::{OnFinish, SessionConfig};

/// Stop of the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stop {
    /// ID of the stopped thread.
    pub thread_id: u32,

    /// Program counter of the stopped thread.
    pub pc: u64,
}

/// Outcome of a debugging session.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    /// Stops of the debuggee, in order.
    pub stops: Vec<Stop>,

    /// Exit code of the debuggee, if it exited during the session.
    pub exit_code: Option<u32>,
}

/// Runs a debugging session on a stopped debuggee.
///
/// The configured breakpoints are set, then the debuggee is resumed until
/// it exits or the maximum number of stops is reached.
#[tracing::instrument(name = "Session", skip_all, fields(pid = process.pid()))]
pub async fn run_session<E>(
    process: &ProcessController<E>,
    config: &SessionConfig,
    extra_breakpoints: &[u64],
) -> trapdoor_proc::Result<SessionOutcome, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let addrs = config
        .breakpoints
        .iter()
        .map(|bk| bk.addr)
        .chain(extra_breakpoints.iter().copied());

    for addr in addrs {
        match process.set_breakpoint(addr).await {
            Ok(()) => (),
            Err(Error::BreakpointExists(_)) => {
                tracing::warn!(addr = format_args!("{addr:#x}"), "duplicate breakpoint");
            }
            Err(e) => return Err(e),
        }
    }

    let mut outcome = SessionOutcome::default();

    while outcome.stops.len() < config.max_stops {
        let thread_id = match process.continue_and_wait().await {
            Ok(thread_id) => thread_id,
            Err(Error::ProcessExited { exit_code, .. }) => {
                outcome.exit_code = Some(exit_code);
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };

        let pc = process.program_counter(thread_id).await?;

        tracing::info!(thread_id, pc = format_args!("{pc:#x}"), "debuggee stopped");

        outcome.stops.push(Stop { thread_id, pc });
    }

    tracing::info!(on_finish = ?config.on_finish, "maximum number of stops reached");

    match config.on_finish {
        OnFinish::Kill => process.kill().await?,
        OnFinish::Detach => process.detach(false).await?,
    }

    Ok(outcome)
}
