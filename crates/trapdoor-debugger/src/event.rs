use windows::Win32::System::Diagnostics::Debug::DEBUG_EVENT;

use trapdoor_proc::event::{DebugEvent, DebugNotification, EventKind, ExceptionCode};

use crate::Handle;

/// Decodes a raw debug event.
///
/// The image and module file handles carried by the event are owned by the
/// debugger, and are closed once dropped.
pub fn decode_event(raw: &DEBUG_EVENT) -> DebugNotification<Handle> {
    let code = raw.dwDebugEventCode.0;
    let thread_id = raw.dwThreadId;

    // SAFETY (union accesses): the active member is given by the event code
    let event = match EventKind::from_code(code) {
        Some(EventKind::Exception) => {
            let info = unsafe { &raw.u.Exception };
            let record = &info.ExceptionRecord;

            DebugEvent::Exception {
                thread_id,
                address: record.ExceptionAddress as u64,
                code: ExceptionCode::from_raw(record.ExceptionCode.0 as u32),
                first_chance: info.dwFirstChance != 0,
            }
        }
        Some(EventKind::CreateThread) => {
            let info = unsafe { &raw.u.CreateThread };

            DebugEvent::ThreadCreated {
                thread_id,
                thread_handle: Handle::system(info.hThread),
            }
        }
        Some(EventKind::CreateProcess) => {
            let info = unsafe { &raw.u.CreateProcessInfo };

            DebugEvent::ProcessCreated {
                process_handle: Handle::system(info.hProcess),
                thread_id,
                thread_handle: Handle::system(info.hThread),
                file_handle: Handle::owned_if_valid(info.hFile),
            }
        }
        Some(EventKind::ExitThread) => DebugEvent::ThreadExited {
            thread_id,
            exit_code: unsafe { raw.u.ExitThread.dwExitCode },
        },
        Some(EventKind::ExitProcess) => DebugEvent::ProcessExited {
            exit_code: unsafe { raw.u.ExitProcess.dwExitCode },
        },
        Some(EventKind::LoadModule) => {
            let info = unsafe { &raw.u.LoadDll };

            DebugEvent::ModuleLoaded {
                file_handle: Handle::owned_if_valid(info.hFile),
                base_addr: info.lpBaseOfDll as u64,
            }
        }
        Some(EventKind::UnloadModule) => DebugEvent::ModuleUnloaded {
            base_addr: unsafe { raw.u.UnloadDll.lpBaseOfDll } as u64,
        },
        Some(EventKind::OutputString) => DebugEvent::OutputString,
        Some(EventKind::Rip) => DebugEvent::Rip {
            error: unsafe { raw.u.RipInfo.dwError },
        },
        None => DebugEvent::Unknown { code },
    };

    DebugNotification {
        process_id: raw.dwProcessId,
        thread_id,
        event,
    }
}
