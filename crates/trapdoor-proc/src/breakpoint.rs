use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::Error;
use crate::target::{Architecture, MemoryAccess};

/// Software breakpoint installed in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Address of the patched instruction.
    pub addr: u64,

    /// Instruction bytes overwritten by the trap instruction.
    orig_opcodes: Vec<u8>,
}

impl Breakpoint {
    /// Returns the instruction bytes overwritten by the trap instruction.
    pub fn orig_opcodes(&self) -> &[u8] {
        &self.orig_opcodes
    }
}

/// Store of the instruction bytes patched by breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    /// Breakpoints placed within the debuggee.
    bks: HashMap<u64, Breakpoint>,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u64) -> Option<&Breakpoint> {
        self.bks.get(&addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.bks.values()
    }

    /// Patches the instruction at `addr` with a trap instruction.
    pub fn insert<M: MemoryAccess>(
        &mut self,
        mem: &mut M,
        process: &M::Handle,
        arch: &dyn Architecture,
        addr: u64,
    ) -> crate::Result<&Breakpoint, M::Error> {
        let entry = match self.bks.entry(addr) {
            Entry::Occupied(_) => return Err(Error::BreakpointExists(addr)),
            Entry::Vacant(v) => v,
        };

        let mut orig_opcodes = vec![0u8; arch.breakpoint_size()];
        mem.read_memory(process, addr, &mut orig_opcodes)
            .map_err(Error::backend)?;

        mem.write_memory(process, addr, arch.breakpoint_instruction())
            .map_err(Error::backend)?;

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint inserted");

        Ok(entry.insert(Breakpoint { addr, orig_opcodes }))
    }

    /// Removes the breakpoint at `addr`, restoring the original instruction.
    pub fn remove<M: MemoryAccess>(
        &mut self,
        mem: &mut M,
        process: &M::Handle,
        addr: u64,
    ) -> crate::Result<(), M::Error> {
        let Entry::Occupied(e) = self.bks.entry(addr) else {
            return Err(Error::NoBreakpoint(addr));
        };

        mem.write_memory(process, addr, &e.get().orig_opcodes)
            .map_err(Error::backend)?;

        e.remove();

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint removed");

        Ok(())
    }

    /// Removes every breakpoint.
    pub fn remove_all<M: MemoryAccess>(
        &mut self,
        mem: &mut M,
        process: &M::Handle,
    ) -> crate::Result<(), M::Error> {
        let addrs = self.bks.keys().copied().collect::<Vec<_>>();

        for addr in addrs {
            self.remove(mem, process, addr)?;
        }

        Ok(())
    }

    /// Temporarily writes back the original instruction of the breakpoint at
    /// `addr`.
    pub fn restore_original<M: MemoryAccess>(
        &self,
        mem: &mut M,
        process: &M::Handle,
        addr: u64,
    ) -> crate::Result<(), M::Error> {
        let bk = self.bks.get(&addr).ok_or(Error::NoBreakpoint(addr))?;

        mem.write_memory(process, addr, &bk.orig_opcodes)
            .map_err(Error::backend)
    }

    /// Writes the trap instruction of the breakpoint at `addr` again.
    pub fn repatch<M: MemoryAccess>(
        &self,
        mem: &mut M,
        process: &M::Handle,
        arch: &dyn Architecture,
        addr: u64,
    ) -> crate::Result<(), M::Error> {
        if !self.bks.contains_key(&addr) {
            return Err(Error::NoBreakpoint(addr));
        }

        mem.write_memory(process, addr, arch.breakpoint_instruction())
            .map_err(Error::backend)
    }
}
