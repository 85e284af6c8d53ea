//! This crate implements the process-control core of the Trapdoor debugger.
//!
//! It drives a debuggee through the debug-event model of the Windows debug
//! API: every state change of the debuggee (thread creation, exception,
//! exit, ...) is delivered to the debugger as a debug event, and the
//! debuggee stays frozen until the debugger acknowledges it.
//!
//! On top of this model, the crate provides:
//! - Software breakpoints, patched into the debuggee's memory.
//! - A "freeze-the-world" protocol: when a thread stops, every other thread
//!   is suspended as well.
//! - A resume protocol, stepping parked threads over their breakpoint before
//!   letting the whole process run again.
//!
//! The OS itself is abstracted by the traits of the [target] module, so that
//! the protocols are independent from the actual debug API.
//!
//! # Usage
//!
//! ```no_run
//! # async fn example<D>(make_api: impl FnOnce() -> D + Send + 'static)
//! # where D: trapdoor_proc::target::DebugApi<Error = std::io::Error> {
//! use trapdoor_proc::{Command, ProcessController, native_architecture};
//!
//! let process = ProcessController::launch(
//!     make_api,
//!     native_architecture(),
//!     Command::new("notepad.exe"),
//! )
//! .await
//! .unwrap();
//!
//! process.set_breakpoint(0x1_4000_1000).await.unwrap();
//!
//! let thread_id = process.continue_and_wait().await.unwrap();
//! let pc = process.program_counter(thread_id).await.unwrap();
//!
//! process.kill().await.unwrap();
//! # }
//! ```

mod breakpoint;
mod command;
mod controller;
mod error;
mod image;
mod process;
mod thread;

pub mod event;
pub mod target;

pub use self::breakpoint::Breakpoint;
pub use self::command::{Command, CommandEnv};
pub use self::controller::{ProcessController, ThreadInfo};
pub use self::error::{BackendError, Error, HandleOp, Result};
pub use self::image::{is_executable_image, resolve_program};
pub use self::process::Process;
pub use self::target::{Aarch64, Architecture, BreakRequest, X86, native_architecture};
pub use self::thread::Thread;
