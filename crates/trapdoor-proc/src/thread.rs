use indexmap::IndexMap;

use crate::Error;
use crate::breakpoint::BreakpointManager;
use crate::target::RegisterAccess;

/// Thread of the debuggee.
#[derive(Debug)]
pub struct Thread<H> {
    /// ID of the thread.
    id: u32,

    /// OS handle of the thread.
    handle: H,

    /// Whether the OS may schedule the thread.
    pub(crate) running: bool,

    /// Address of the breakpoint the thread is parked on.
    pub(crate) current_breakpoint: Option<u64>,

    /// Address of the trap instruction the thread has just executed.
    pub(crate) trapped: Option<u64>,
}

impl<H> Thread<H> {
    /// Returns the thread's ID.
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Returns the thread's OS handle.
    pub const fn handle(&self) -> &H {
        &self.handle
    }

    /// Returns whether the thread is schedulable (not suspended by the
    /// debugger).
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Returns the address of the breakpoint the thread is parked on.
    pub const fn current_breakpoint(&self) -> Option<u64> {
        self.current_breakpoint
    }
}

/// Registry of the live threads of the debuggee.
#[derive(Debug)]
pub struct ThreadManager<H> {
    threads: IndexMap<u32, Thread<H>>,
}

impl<H> Default for ThreadManager<H> {
    fn default() -> Self {
        Self {
            threads: IndexMap::new(),
        }
    }
}

impl<H> ThreadManager<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly created thread.
    ///
    /// Returns `None` if the thread was already registered, in which case the
    /// given handle is dropped.
    pub fn register_thread_create(&mut self, id: u32, handle: H) -> Option<&mut Thread<H>> {
        if self.threads.contains_key(&id) {
            return None;
        }

        let thread = self.threads.entry(id).or_insert(Thread {
            id,
            handle,
            running: true,
            current_breakpoint: None,
            trapped: None,
        });

        Some(thread)
    }

    /// Unregisters an exited thread, releasing its handle.
    pub fn register_thread_exit(&mut self, id: u32) -> Option<Thread<H>> {
        self.threads.swap_remove(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Thread<H>> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Thread<H>> {
        self.threads.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.threads.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.threads.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread<H>> {
        self.threads.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread<H>> {
        self.threads.values_mut()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Unregisters every thread, releasing their handles.
    pub fn clear(&mut self) {
        self.threads.clear();
    }
}

/// Records the breakpoint the given thread is stopped at (if any).
///
/// If the thread has executed a trap instruction, the breakpoint is the one
/// at the trap address, and the instruction pointer is rewound to it when
/// the CPU has moved past the trap. Otherwise (e.g., after a single-step)
/// only a breakpoint located exactly at the instruction pointer is considered.
pub(crate) fn set_current_breakpoint<R: RegisterAccess>(
    regs: &mut R,
    thread: &mut Thread<R::Handle>,
    breakpoints: &BreakpointManager,
) -> crate::Result<Option<u64>, R::Error> {
    let pc = regs
        .program_counter(thread.handle())
        .map_err(Error::backend)?;

    let bk = match thread.trapped.take() {
        Some(trap_addr) => breakpoints.get(trap_addr),
        None => breakpoints.get(pc),
    };

    let Some(bk) = bk else {
        return Ok(None);
    };

    if pc != bk.addr {
        // rewind the instruction pointer
        regs.set_program_counter(thread.handle(), bk.addr)
            .map_err(Error::backend)?;
    }

    tracing::debug!(
        thread_id = thread.id(),
        addr = format_args!("{:#x}", bk.addr),
        "thread parked on breakpoint"
    );

    thread.current_breakpoint = Some(bk.addr);

    Ok(Some(bk.addr))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    use super::ThreadManager;

    struct TrackedHandle {
        id: u32,
        released: Rc<RefCell<Vec<u32>>>,
    }

    impl Drop for TrackedHandle {
        fn drop(&mut self) {
            self.released.borrow_mut().push(self.id);
        }
    }

    enum Event {
        Created(u32),
        Exited(u32),
    }

    #[test]
    fn key_set_matches_live_threads() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut threads = ThreadManager::new();
        let mut live = BTreeSet::new();

        let events = [
            Event::Created(100),
            Event::Created(101),
            Event::Created(102),
            Event::Exited(101),
            Event::Created(103),
            Event::Exited(100),
            Event::Exited(999),
            Event::Created(101),
            Event::Exited(103),
        ];

        for event in events {
            match event {
                Event::Created(id) => {
                    let handle = TrackedHandle {
                        id,
                        released: released.clone(),
                    };
                    threads.register_thread_create(id, handle);
                    live.insert(id);
                }
                Event::Exited(id) => {
                    threads.register_thread_exit(id);
                    live.remove(&id);
                }
            }

            assert_eq!(threads.ids().collect::<BTreeSet<_>>(), live);
        }

        assert_eq!(*released.borrow(), [101, 100, 103]);
    }

    #[test]
    fn duplicate_creation_keeps_first_handle() {
        let mut threads = ThreadManager::new();

        assert!(threads.register_thread_create(7, "first").is_some());
        assert!(threads.register_thread_create(7, "second").is_none());

        let thread = threads.get(7).unwrap();
        assert_eq!(*thread.handle(), "first");
        assert!(thread.is_running());
        assert_eq!(thread.current_breakpoint(), None);
        assert_eq!(threads.len(), 1);
    }

    #[test]
    fn clear_releases_all_handles() {
        let released = Rc::new(RefCell::new(Vec::new()));
        let mut threads = ThreadManager::new();

        for id in [1, 2] {
            let handle = TrackedHandle {
                id,
                released: released.clone(),
            };
            threads.register_thread_create(id, handle);
        }

        threads.clear();

        assert_eq!(threads.ids().count(), 0);
        assert_eq!(released.borrow().len(), 2);
    }
}
