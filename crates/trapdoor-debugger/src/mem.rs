use std::ffi::c_void;

use windows::Win32::System::Diagnostics::Debug::{
    FlushInstructionCache, ReadProcessMemory, WriteProcessMemory,
};

use crate::Handle;

/// Reads memory from the given process.
pub fn read_process_memory(process: &Handle, addr: u64, buf: &mut [u8]) -> crate::Result<()> {
    let mut len = 0usize;

    unsafe {
        ReadProcessMemory(
            process.raw(),
            addr as usize as *const c_void,
            buf.as_mut_ptr().cast(),
            buf.len(),
            Some(&mut len as *mut usize),
        )
    }
    .inspect_err(|e| {
        tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "ReadProcessMemory")
    })?;

    if len != buf.len() {
        Err(crate::Error::PartialMemOp(len, buf.len()))
    } else {
        Ok(())
    }
}

/// Writes memory into the given process.
///
/// The instruction cache is flushed afterwards, so that patched code is
/// visible to the next executed instruction.
pub fn write_process_memory(process: &Handle, addr: u64, buf: &[u8]) -> crate::Result<()> {
    let mut len = 0usize;
    let remote = addr as usize as *const c_void;

    unsafe {
        WriteProcessMemory(
            process.raw(),
            remote,
            buf.as_ptr().cast(),
            buf.len(),
            Some(&mut len as *mut usize),
        )
    }
    .inspect_err(|e| {
        tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "WriteProcessMemory")
    })?;

    if len != buf.len() {
        return Err(crate::Error::PartialMemOp(len, buf.len()));
    }

    unsafe { FlushInstructionCache(process.raw(), Some(remote), buf.len()) }?;

    Ok(())
}
