//! Crate implementing the CLI commands.

mod cli;
mod config;
mod session;

pub use self::cli::{CliAction, CliOpts, CliSession};
pub use self::config::{BreakpointConfig, OnFinish, SessionConfig};
pub use self::session::{SessionOutcome, Stop, run_session};
