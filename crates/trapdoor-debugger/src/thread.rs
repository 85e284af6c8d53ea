use windows::Win32::System::Diagnostics::Debug::{CONTEXT, GetThreadContext, SetThreadContext};
use windows::Win32::System::Threading::{ResumeThread, SuspendThread};

use crate::Handle;

#[cfg(target_arch = "x86_64")]
mod arch {
    use windows::Win32::System::Diagnostics::Debug::{
        CONTEXT, CONTEXT_CONTROL_AMD64, CONTEXT_FLAGS,
    };

    pub const CONTROL_REGISTERS: CONTEXT_FLAGS = CONTEXT_CONTROL_AMD64;

    /// Trap flag of `EFLAGS`.
    const TRAP_FLAG: u32 = 0x100;

    pub const fn program_counter(ctx: &CONTEXT) -> u64 {
        ctx.Rip
    }

    pub fn set_program_counter(ctx: &mut CONTEXT, addr: u64) {
        ctx.Rip = addr;
    }

    pub fn set_single_step(ctx: &mut CONTEXT, enable: bool) {
        if enable {
            ctx.EFlags |= TRAP_FLAG;
        } else {
            ctx.EFlags &= !TRAP_FLAG;
        }
    }
}

#[cfg(target_arch = "x86")]
mod arch {
    use windows::Win32::System::Diagnostics::Debug::{CONTEXT, CONTEXT_CONTROL_X86, CONTEXT_FLAGS};

    pub const CONTROL_REGISTERS: CONTEXT_FLAGS = CONTEXT_CONTROL_X86;

    /// Trap flag of `EFLAGS`.
    const TRAP_FLAG: u32 = 0x100;

    pub const fn program_counter(ctx: &CONTEXT) -> u64 {
        ctx.Eip as u64
    }

    pub fn set_program_counter(ctx: &mut CONTEXT, addr: u64) {
        ctx.Eip = addr as u32;
    }

    pub fn set_single_step(ctx: &mut CONTEXT, enable: bool) {
        if enable {
            ctx.EFlags |= TRAP_FLAG;
        } else {
            ctx.EFlags &= !TRAP_FLAG;
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use windows::Win32::System::Diagnostics::Debug::{
        CONTEXT, CONTEXT_CONTROL_ARM64, CONTEXT_FLAGS,
    };

    pub const CONTROL_REGISTERS: CONTEXT_FLAGS = CONTEXT_CONTROL_ARM64;

    /// Software step bit of `CPSR`.
    const SS_FLAG: u32 = 0x20_0000;

    pub const fn program_counter(ctx: &CONTEXT) -> u64 {
        ctx.Pc
    }

    pub fn set_program_counter(ctx: &mut CONTEXT, addr: u64) {
        ctx.Pc = addr;
    }

    pub fn set_single_step(ctx: &mut CONTEXT, enable: bool) {
        if enable {
            ctx.Cpsr |= SS_FLAG;
        } else {
            ctx.Cpsr &= !SS_FLAG;
        }
    }
}

fn get_control_registers(thread: &Handle) -> crate::Result<CONTEXT> {
    let mut ctx = CONTEXT {
        ContextFlags: arch::CONTROL_REGISTERS,
        ..Default::default()
    };

    unsafe { GetThreadContext(thread.raw(), &mut ctx) }
        .inspect_err(|e| tracing::error!(error = %e, "GetThreadContext"))?;

    Ok(ctx)
}

fn update_control_registers(
    thread: &Handle,
    update: impl FnOnce(&mut CONTEXT),
) -> crate::Result<()> {
    let mut ctx = get_control_registers(thread)?;

    update(&mut ctx);

    unsafe { SetThreadContext(thread.raw(), &ctx) }
        .inspect_err(|e| tracing::error!(error = %e, "SetThreadContext"))?;

    Ok(())
}

pub fn program_counter(thread: &Handle) -> crate::Result<u64> {
    get_control_registers(thread).map(|ctx| arch::program_counter(&ctx))
}

pub fn set_program_counter(thread: &Handle, addr: u64) -> crate::Result<()> {
    update_control_registers(thread, |ctx| arch::set_program_counter(ctx, addr))
}

pub fn set_single_step(thread: &Handle, enable: bool) -> crate::Result<()> {
    update_control_registers(thread, |ctx| arch::set_single_step(ctx, enable))
}

pub fn suspend_thread(thread: &Handle) -> crate::Result<()> {
    if unsafe { SuspendThread(thread.raw()) } == u32::MAX {
        return Err(windows::core::Error::from_win32().into());
    }

    Ok(())
}

pub fn resume_thread(thread: &Handle) -> crate::Result<()> {
    if unsafe { ResumeThread(thread.raw()) } == u32::MAX {
        return Err(windows::core::Error::from_win32().into());
    }

    Ok(())
}
