// Once clippy takes `clippy.toml` into account (for `tests` targets),
// we can remove these.
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

mod common;

use std::time::Duration;

use test_log::test;
use trapdoor_proc::{Error, ProcessController, ThreadInfo, X86};

use self::common::{BREAK_TID, CODE, FakeOs, INT3, LOADER_BREAKPOINT, MAIN_TID, PID};

#[test(tokio::test)]
async fn controller_round_trip() {
    let os = FakeOs::new();
    os.push_thread_created(101);
    os.push_loader_breakpoint();
    os.push_pause();
    os.push_breakpoint(101, CODE);
    os.push_pause();

    let api = os.clone();
    let process = ProcessController::attach(move || api, &X86, PID)
        .await
        .unwrap();

    assert_eq!(process.pid(), PID);

    process.set_breakpoint(CODE).await.unwrap();
    assert_eq!(process.read_memory(CODE, 1).await.unwrap(), [INT3]);

    assert_eq!(process.continue_and_wait().await.unwrap(), 101);
    assert_eq!(process.program_counter(101).await.unwrap(), CODE);

    let threads = process.threads().await.unwrap();
    assert_eq!(
        threads,
        [
            ThreadInfo {
                id: MAIN_TID,
                running: false,
                current_breakpoint: None,
            },
            ThreadInfo {
                id: 101,
                running: false,
                current_breakpoint: Some(CODE),
            },
        ]
    );

    process.kill().await.unwrap();
    assert_eq!(os.state().terminated, Some(1));

    // the worker is gone along with the process
    assert!(matches!(
        process.continue_and_wait().await,
        Err(Error::WorkerGone)
    ));
}

#[test(tokio::test)]
async fn controller_reports_attach_failure() {
    let res = ProcessController::attach(FakeOs::new, &X86, PID + 1).await;

    assert!(matches!(res, Err(Error::Backend(_))));
}

#[test(tokio::test)]
async fn manual_stop_interrupts_running_debuggee() {
    let os = FakeOs::new();
    os.push_loader_breakpoint();

    let api = os.clone();
    let process = ProcessController::attach(move || api, &X86, PID)
        .await
        .unwrap();

    // the worker stays blocked until something stops the debuggee
    let running = tokio::spawn({
        let process = process.clone();
        async move { process.continue_and_wait().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!running.is_finished());

    process.request_manual_stop().unwrap();

    let thread_id = running.await.unwrap().unwrap();
    assert_eq!(thread_id, BREAK_TID + 1);
    assert_eq!(os.state().break_requests, 1);
    assert_eq!(
        process.program_counter(thread_id).await.unwrap(),
        LOADER_BREAKPOINT + 1
    );

    process.kill().await.unwrap();
    assert!(process.request_manual_stop().is_err());
}

#[test(tokio::test)]
async fn dropped_controller_kills_debuggee() {
    let os = FakeOs::new();
    os.push_loader_breakpoint();

    let api = os.clone();
    let process = ProcessController::attach(move || api, &X86, PID)
        .await
        .unwrap();

    let other = process.clone();
    drop(process);

    // still owned by the other controller
    process_is_alive(&other).await;
    drop(other);

    for _ in 0..200 {
        if os.state().terminated.is_some() {
            break;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(os.state().terminated, Some(1));
}

async fn process_is_alive(process: &ProcessController<std::io::Error>) {
    assert_eq!(
        process.program_counter(MAIN_TID).await.unwrap(),
        LOADER_BREAKPOINT + 1
    );
}
