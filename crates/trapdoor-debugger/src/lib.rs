//! This crate provides the default OS backend of the Trapdoor debugger,
//! built on top of the Win32 debug API.
//!
//! It implements the traits of [trapdoor_proc::target] for processes running
//! on the **same host machine**.
//!
//! <div class="warning">
//!
//! *This crate is not meant to be used on its own! It merely implements the
//! interface (traits) provided by `trapdoor-proc`, so that the debuggee can
//! be driven by that crate.*
//!
//! </div>
//!
//! # Supported Platforms
//!
//! <table>
//!     <thead>
//!         <tr>
//!             <th>Host Machine</th>
//!             <th>Debuggee Platform</th>
//!         </tr>
//!     </thead>
//!     <tbody>
//!         <tr>
//!             <td>Windows <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!         <tr>
//!             <td>Windows <code>aarch64</code></td>
//!             <td><code>aarch64</code></td>
//!         </tr>
//!     </tbody>
//! </table>
//!
//! On other hosts, this crate is empty.

#[cfg(windows)]
mod debugger;
#[cfg(windows)]
mod error;
#[cfg(windows)]
mod event;
#[cfg(windows)]
mod handle;
#[cfg(windows)]
mod mem;
#[cfg(windows)]
mod process;
#[cfg(windows)]
mod thread;

#[cfg(windows)]
pub use self::debugger::{Breaker, Debugger};
#[cfg(windows)]
pub use self::error::{Error, Result};
#[cfg(windows)]
pub use self::event::decode_event;
#[cfg(windows)]
pub use self::handle::Handle;
