use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// OS handle of a process, thread, or file.
///
/// Handles created by the debugger are closed on drop. Handles delivered
/// along with process and thread debug events belong to the system, which
/// closes them itself once the corresponding exit event is acknowledged.
#[derive(Debug)]
pub struct Handle {
    raw: HANDLE,
    close_on_drop: bool,
}

impl Handle {
    /// Takes ownership of the given handle.
    pub(crate) const fn owned(raw: HANDLE) -> Self {
        Self {
            raw,
            close_on_drop: true,
        }
    }

    /// Wraps a handle owned by the system.
    pub(crate) const fn system(raw: HANDLE) -> Self {
        Self {
            raw,
            close_on_drop: false,
        }
    }

    /// Takes ownership of the given handle, unless it is invalid.
    pub(crate) fn owned_if_valid(raw: HANDLE) -> Option<Self> {
        (!raw.is_invalid()).then(|| Self::owned(raw))
    }

    /// Returns the raw OS handle.
    pub const fn raw(&self) -> HANDLE {
        self.raw
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if self.close_on_drop && !self.raw.is_invalid() {
            if let Err(e) = unsafe { CloseHandle(self.raw) } {
                tracing::warn!(error = %e, handle = ?self.raw, "CloseHandle");
            }
        }
    }
}
