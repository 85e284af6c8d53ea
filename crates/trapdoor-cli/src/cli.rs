use std::num::ParseIntError;
use std::path::PathBuf;

/// The Trapdoor debugger.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to spawn a new process and debug it.
    Run {
        /// Session configuration.
        #[clap(flatten)]
        session: CliSession,

        /// Working directory of the program (defaults to the current one).
        #[clap(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Name of program to run.
        program: PathBuf,

        /// Program's arguments.
        args: Vec<String>,
    },

    /// Command to attach to a running process and debug it.
    Attach {
        /// Session configuration.
        #[clap(flatten)]
        session: CliSession,

        /// ID of the process.
        pid: u32,
    },
}

/// Configuration of a debugging session.
#[derive(clap::Parser)]
pub struct CliSession {
    /// Session configuration (KDL format).
    ///
    /// If it ends with `.kdl`, it is treated as a path to a configuration
    /// file for the debugging session. Otherwise it is directly parsed as
    /// inline KDL-formatted configuration.
    #[clap(short, long, value_name = "CONTENT/PATH")]
    pub config: Option<String>,

    /// Address of a breakpoint to set (in addition to the configured ones).
    #[clap(short, long = "break", value_name = "ADDR", value_parser = parse_address)]
    pub breakpoints: Vec<u64>,
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

/// Parses an hexadecimal (`0x` prefixed) or decimal address.
fn parse_address(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    }
}
