use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString, c_void};
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use windows::Win32::Foundation::{
    DUPLICATE_SAME_ACCESS, DuplicateHandle, ERROR_INSUFFICIENT_BUFFER, HANDLE,
};
use windows::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::Diagnostics::Debug::{
    DebugActiveProcess, DebugActiveProcessStop, DebugBreakProcess,
};
use windows::Win32::System::Threading::{
    CREATE_UNICODE_ENVIRONMENT, CreateProcessW, DEBUG_ONLY_THIS_PROCESS, GetCurrentProcess,
    OpenProcess, PROCESS_ALL_ACCESS, PROCESS_INFORMATION, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW, STARTF_USESTDHANDLES,
    STARTUPINFOW, TerminateProcess,
};
use windows::core::{PCWSTR, PWSTR};

use trapdoor_proc::Command;

use crate::Handle;

/// Initial length (in UTF-16 units) of the image path buffer.
const IMAGE_PATH_INITIAL_LEN: usize = 128;

/// Maximum length (in UTF-16 units) of the image path buffer.
const IMAGE_PATH_MAX_LEN: usize = 10_000;

/// Spawns a new process.
///
/// # Note
///
/// The process is created in debug-mode, and only runs once its first debug
/// events are acknowledged. It inherits the standard handles of the
/// debugger.
pub fn spawn_debuggee(command: &Command, program: &Path) -> crate::Result<u32> {
    let program = to_wide(program.as_os_str());
    let mut command_line = to_wide(OsStr::new(&command.to_command_line()));

    let env_block = command.env.captured().map(|env| to_env_block(&env));
    let current_dir = command
        .current_dir
        .as_ref()
        .map(|dir| to_wide(dir.as_os_str()));

    let creation_flags = if env_block.is_some() {
        DEBUG_ONLY_THIS_PROCESS | CREATE_UNICODE_ENVIRONMENT
    } else {
        DEBUG_ONLY_THIS_PROCESS
    };

    // closed once the process is created (or failed to be)
    let [stdin, stdout, stderr] = inheritable_stdio()?;
    let raw = |h: &Option<Handle>| h.as_ref().map(Handle::raw).unwrap_or_default();

    let startup_info = STARTUPINFOW {
        cb: std::mem::size_of::<STARTUPINFOW>() as u32,
        dwFlags: STARTF_USESTDHANDLES,
        hStdInput: raw(&stdin),
        hStdOutput: raw(&stdout),
        hStdError: raw(&stderr),
        ..Default::default()
    };

    let mut process_info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            PCWSTR(program.as_ptr()),
            PWSTR(command_line.as_mut_ptr()),
            None,
            None,
            true,
            creation_flags,
            env_block
                .as_ref()
                .map(|block| block.as_ptr().cast::<c_void>()),
            current_dir
                .as_ref()
                .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
            &startup_info,
            &mut process_info,
        )
    }
    .inspect_err(|e| tracing::error!(error = %e, "CreateProcessW"))?;

    // the debug events deliver their own handles
    drop(Handle::owned(process_info.hThread));
    drop(Handle::owned(process_info.hProcess));

    Ok(process_info.dwProcessId)
}

/// Attaches to the running process with the given ID.
pub fn attach(pid: u32) -> crate::Result<()> {
    unsafe { DebugActiveProcess(pid) }
        .inspect_err(|e| tracing::error!(error = %e, pid, "DebugActiveProcess"))?;

    Ok(())
}

/// Stops debugging the process with the given ID.
pub fn detach(pid: u32) -> crate::Result<()> {
    unsafe { DebugActiveProcessStop(pid) }?;
    Ok(())
}

/// Opens a handle on the given process, usable to break into it.
pub fn open_for_break(pid: u32) -> crate::Result<Handle> {
    let process = unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) }
        .inspect_err(|e| tracing::error!(error = %e, pid, "OpenProcess"))?;

    Ok(Handle::owned(process))
}

/// Makes the given process raise a breakpoint exception.
pub fn request_break(process: &Handle) -> crate::Result<()> {
    unsafe { DebugBreakProcess(process.raw()) }?;
    Ok(())
}

pub fn terminate(process: &Handle, exit_code: u32) -> crate::Result<()> {
    unsafe { TerminateProcess(process.raw(), exit_code) }?;
    Ok(())
}

/// Returns the path of the executable image of the given process.
pub fn executable_path(pid: u32) -> crate::Result<PathBuf> {
    let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }
        .map(Handle::owned)?;

    let mut capacity = IMAGE_PATH_INITIAL_LEN;

    loop {
        let mut buf = vec![0u16; capacity];
        let mut len = capacity as u32;

        let res = unsafe {
            QueryFullProcessImageNameW(
                process.raw(),
                PROCESS_NAME_WIN32,
                PWSTR(buf.as_mut_ptr()),
                &mut len,
            )
        };

        match res {
            Ok(()) => {
                buf.truncate(len as usize);
                return Ok(PathBuf::from(OsString::from_wide(&buf)));
            }
            Err(e) if e.code() == ERROR_INSUFFICIENT_BUFFER.to_hresult() => {
                capacity = grow_image_path_len(capacity).ok_or(e)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Returns the next length of the image path buffer, if not too big.
fn grow_image_path_len(len: usize) -> Option<usize> {
    let len = len * 2;
    (len <= IMAGE_PATH_MAX_LEN).then_some(len)
}

/// Duplicates the standard handles of the debugger as inheritable handles.
///
/// Missing standard handles (e.g., no console) are left missing.
fn inheritable_stdio() -> crate::Result<[Option<Handle>; 3]> {
    let duplicate = |std: STD_HANDLE| -> crate::Result<Option<Handle>> {
        let raw = unsafe { GetStdHandle(std) }?;

        if raw.is_invalid() || raw.0 == 0 {
            return Ok(None);
        }

        let current = unsafe { GetCurrentProcess() };
        let mut dup = HANDLE::default();

        unsafe {
            DuplicateHandle(
                current,
                raw,
                current,
                &mut dup,
                0,
                true,
                DUPLICATE_SAME_ACCESS,
            )
        }
        .inspect_err(|e| tracing::error!(error = %e, "DuplicateHandle"))?;

        Ok(Some(Handle::owned(dup)))
    };

    Ok([
        duplicate(STD_INPUT_HANDLE)?,
        duplicate(STD_OUTPUT_HANDLE)?,
        duplicate(STD_ERROR_HANDLE)?,
    ])
}

/// Encodes a NUL-terminated wide string.
fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Builds a Unicode environment block (`KEY=value` entries, each one
/// NUL-terminated, with a final NUL).
fn to_env_block(env: &BTreeMap<String, String>) -> Vec<u16> {
    let mut block = env
        .iter()
        .flat_map(|(key, val)| {
            key.encode_utf16()
                .chain("=".encode_utf16())
                .chain(val.encode_utf16())
                .chain(std::iter::once(0))
        })
        .collect::<Vec<_>>();

    if block.is_empty() {
        block.push(0);
    }

    block.push(0);
    block
}
