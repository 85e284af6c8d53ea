#![allow(missing_docs)]
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]

use std::ffi::OsStr;
use std::path::Path;

use miette::IntoDiagnostic;

use trapdoor_cli::{CliAction, CliOpts, SessionConfig};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("TRAPDOOR_LOG")
                .from_env_lossy(),
        )
        .init();

    match evaluate(cli.action) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

#[cfg(windows)]
fn evaluate(action: CliAction) -> miette::Result<i32> {
    use trapdoor_debugger::Debugger;
    use trapdoor_proc::{Command, ProcessController, native_architecture};

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async move {
        let (process, session) = match action {
            CliAction::Run {
                session,
                cwd,
                program,
                args,
            } => {
                let mut command = Command::new(program).args(args);

                if let Some(dir) = cwd {
                    command = command.current_dir(dir);
                }

                let process =
                    ProcessController::launch(Debugger::new, native_architecture(), command)
                        .await
                        .into_diagnostic()?;

                (process, session)
            }
            CliAction::Attach { session, pid } => {
                let process = ProcessController::attach(Debugger::new, native_architecture(), pid)
                    .await
                    .into_diagnostic()?;

                (process, session)
            }
        };

        let config = parse_session_config(session.config)?;

        let outcome = trapdoor_cli::run_session(&process, &config, &session.breakpoints)
            .await
            .into_diagnostic()?;

        for stop in &outcome.stops {
            println!("thread {} stopped at {:#x}", stop.thread_id, stop.pc);
        }

        match outcome.exit_code {
            Some(exit_code) => {
                println!("process {} exited with status {exit_code}", process.pid());
                Ok(exit_code as i32)
            }
            None => Ok(0),
        }
    })
}

#[cfg(not(windows))]
fn evaluate(action: CliAction) -> miette::Result<i32> {
    let session = match action {
        CliAction::Run { session, .. } | CliAction::Attach { session, .. } => session,
    };

    // still report configuration errors
    parse_session_config(session.config)?;

    Err(miette::miette!(
        "no debugger backend is available for this platform"
    ))
}

fn parse_session_config(config: Option<String>) -> miette::Result<SessionConfig> {
    let Some(config) = config else {
        return Ok(knus::parse("<content>", "")?);
    };

    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}
