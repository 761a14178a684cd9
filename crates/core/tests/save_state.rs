// Tandem - Multi-Core Emulation Scheduler
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod common;

use common::*;
use tandem_core::snapshot::{DirectoryStore, SaveStateStore};
use tandem_core::{EmuError, ResultStatus, Signal, System};

fn busy_system() -> Harness {
    let mut h = Harness::new(new_hardware());
    assert_eq!(h.system.load(GAME), ResultStatus::Success);
    {
        let mut state = h.state();
        state.work[0] = 50_000;
        state.frame_work = [1_000, 500, 0, 0];
    }
    for _ in 0..10 {
        assert_eq!(h.system.run_loop(), ResultStatus::Success);
    }
    h
}

#[test]
fn test_save_then_load_restores_clocks_and_events() {
    let mut h = busy_system();

    assert!(h.system.send_signal(Signal::Save { slot: 1 }));
    assert_eq!(h.system.run_loop(), ResultStatus::Success);
    let saved_ticks = h.ticks();
    let timing = h.system.timing().unwrap();
    let saved_global = timing.global_ticks();
    let saved_next_event = timing.next_event_time();
    let (saved_vblanks, saved_work) = {
        let state = h.state();
        (state.vblanks, state.work)
    };
    assert!(saved_vblanks > 0);

    for _ in 0..10 {
        h.system.run_loop();
    }
    assert_ne!(h.ticks(), saved_ticks);

    assert!(h.system.send_signal(Signal::Load { slot: 1 }));
    assert_eq!(h.system.run_loop(), ResultStatus::Success);

    assert_eq!(h.ticks(), saved_ticks);
    let timing = h.system.timing().unwrap();
    assert_eq!(timing.global_ticks(), saved_global);
    assert_eq!(timing.next_event_time(), saved_next_event);
    assert!(!timing.is_event_queue_locked());
    {
        let state = h.state();
        assert_eq!(state.vblanks, saved_vblanks);
        assert_eq!(state.work, saved_work);
        assert_eq!(state.synced, 1);
        // Re-initialization for a load is not a full shutdown.
        assert!(!state.debug_calls.iter().any(|c| c == "shutdown"));
    }
    assert!(h.system.perf_stats().is_some());

    for _ in 0..10 {
        h.system.run_loop();
    }
    assert!(h.state().vblanks > saved_vblanks);
}

#[test]
fn test_restore_validates_before_teardown() {
    let mut h = busy_system();
    let snapshot = h.system.snapshot().unwrap();
    let ticks = h.ticks();

    let mut wrong_cores = snapshot.clone();
    wrong_cores.num_cores = 1;
    assert!(matches!(
        h.system.restore(&wrong_cores),
        Err(EmuError::CoreCountMismatch {
            saved: 1,
            current: 4
        })
    ));

    let mut wrong_title = snapshot.clone();
    wrong_title.program_id = OTHER_GAME_ID;
    assert!(matches!(
        h.system.restore(&wrong_title),
        Err(EmuError::ProgramMismatch { .. })
    ));

    let mut wrong_version = snapshot;
    wrong_version.version += 1;
    assert!(matches!(
        h.system.restore(&wrong_version),
        Err(EmuError::SnapshotVersion { .. })
    ));

    assert!(h.system.is_powered_on());
    assert_eq!(h.ticks(), ticks);
}

#[test]
fn test_truncated_thread_state_keeps_session_running() {
    let mut h = busy_system();
    let mut snapshot = h.system.snapshot().unwrap();
    snapshot.kernel.thread_managers.pop();
    let ticks = h.ticks();
    let vblanks = h.state().vblanks;

    assert!(matches!(
        h.system.restore(&snapshot),
        Err(EmuError::CoreCountMismatch {
            saved: 3,
            current: 4
        })
    ));
    assert!(h.system.is_powered_on());
    assert_eq!(h.ticks(), ticks);
    let timing = h.system.timing().unwrap();
    assert!(!timing.is_event_queue_locked());

    for _ in 0..50 {
        assert_eq!(h.system.run_loop(), ResultStatus::Success);
    }
    assert!(h.state().vblanks > vblanks);
    assert!(h.ticks().iter().zip(&ticks).all(|(now, then)| now > then));
}

#[test]
fn test_short_timer_or_core_lists_rejected() {
    let mut h = busy_system();
    let snapshot = h.system.snapshot().unwrap();

    let mut short_timers = snapshot.clone();
    short_timers.timing.timers.truncate(2);
    assert!(matches!(
        h.system.restore(&short_timers),
        Err(EmuError::CoreCountMismatch { saved: 2, .. })
    ));

    let mut short_cores = snapshot;
    short_cores.cores.pop();
    assert!(matches!(
        h.system.restore(&short_cores),
        Err(EmuError::CoreCountMismatch { saved: 3, .. })
    ));
    assert!(h.system.is_powered_on());
}

#[test]
fn test_failure_after_teardown_powers_off() {
    let mut h = busy_system();
    let mut snapshot = h.system.snapshot().unwrap();
    snapshot.kernel.thread_managers[1] = serde_json::json!({});

    assert!(matches!(
        h.system.restore(&snapshot),
        Err(EmuError::Collaborator(_))
    ));
    assert!(!h.system.is_powered_on());
    assert!(h.system.timing().is_none());

    // The title path survives, so a reset brings the session back.
    assert!(h.system.send_signal(Signal::Reset));
    assert_eq!(h.system.run_loop(), ResultStatus::Success);
    assert!(h.system.is_powered_on());
    assert!(!h.system.timing().unwrap().is_event_queue_locked());
}

#[test]
fn test_save_requires_running_session() {
    let mut h = Harness::new(new_hardware());
    assert!(matches!(h.system.save_state(0), Err(EmuError::NotPoweredOn)));
    assert!(matches!(h.system.load_state(0), Err(EmuError::NotPoweredOn)));
}

#[test]
fn test_directory_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let state = SharedState::default();
    let platform = MockPlatform::new(state.clone());
    let mut system = System::new(Box::new(platform), new_hardware())
        .with_save_state_store(Box::new(DirectoryStore::new(dir.path())));
    assert_eq!(system.load(GAME), ResultStatus::Success);
    lock(&state).work[2] = 7_000;
    for _ in 0..5 {
        system.run_loop();
    }

    system.save_state(4).unwrap();
    let path = DirectoryStore::new(dir.path()).slot_path(GAME_ID, 4);
    assert!(path.exists());
    let saved_global = system.timing().unwrap().global_ticks();

    for _ in 0..5 {
        system.run_loop();
    }
    system.load_state(4).unwrap();
    assert_eq!(system.timing().unwrap().global_ticks(), saved_global);

    let raw = DirectoryStore::new(dir.path()).load(GAME_ID, 4).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(json["num_cores"], 4);
    assert_eq!(json["program_id"], GAME_ID);
}
