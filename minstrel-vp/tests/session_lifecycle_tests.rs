//! Session state machine lifecycle tests
//!
//! Drive a session end-to-end through a scripted opener and a manually
//! signalled sink: auto-advance, skip, end-after-current, reshuffle, error
//! recovery and load cancellation.

mod helpers;

use helpers::*;
use minstrel_common::events::{MinstrelEvent, SessionPhase};
use minstrel_vp::playback::session::{EndOutcome, ShuffleOutcome, SkipOutcome};
use minstrel_vp::playback::types::GuildId;

const GUILD: GuildId = GuildId(7001);

#[tokio::test]
async fn auto_advances_through_three_tracks_then_idles() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(test_settings(), opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    let queued = handle
        .enqueue(tracks(&["t1.mp3", "t2.mp3", "t3.mp3"]), true)
        .await
        .unwrap();
    assert_eq!(queued, 3);

    for name in ["t1.mp3", "t2.mp3", "t3.mp3"] {
        assert!(
            wait_for_current(&handle, name, 2000).await,
            "{} never became current",
            name
        );
        wait_for_event(&mut events, 2000, |e| {
            matches!(e, MinstrelEvent::TrackStarted { track, .. } if track == name)
        })
        .await;
        sink.complete_current();
    }

    assert!(wait_for_phase(&handle, SessionPhase::Idle, 2000).await);
    let status = handle.status().await.unwrap();
    assert!(status.queue.is_empty());
    assert!(status.current_track.is_none());

    // Every track was opened exactly once, in insertion order
    assert_eq!(opener.opened(), vec!["t1.mp3", "t2.mp3", "t3.mp3"]);
    assert_eq!(sink.attach_count(), 3);
}

#[tokio::test]
async fn spawn_failure_advances_to_next_track() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(test_settings(), opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    handle
        .enqueue(tracks(&["bad1.mp3", "t2.mp3", "t3.mp3"]), true)
        .await
        .unwrap();

    // Track 2 starts playing without the session dying
    assert!(wait_for_current(&handle, "t2.mp3", 2000).await);

    // The failure surfaced as a user-visible diagnostic
    let failed = wait_for_event(&mut events, 2000, |e| {
        matches!(e, MinstrelEvent::TrackFailed { track, .. } if track == "bad1.mp3")
    })
    .await;
    match failed {
        MinstrelEvent::TrackFailed { reason, .. } => {
            assert!(reason.contains("spawn"), "unexpected reason: {}", reason)
        }
        _ => unreachable!(),
    }

    assert_eq!(opener.opened(), vec!["bad1.mp3", "t2.mp3"]);
}

#[tokio::test]
async fn consecutive_failures_trip_the_guard() {
    let mut settings = test_settings();
    settings.playback.max_consecutive_failures = 3;
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(settings, opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    handle
        .enqueue(
            tracks(&["bad1.mp3", "bad2.mp3", "bad3.mp3", "bad4.mp3", "t5.mp3"]),
            true,
        )
        .await
        .unwrap();

    let halted = wait_for_event(&mut events, 2000, |e| {
        matches!(e, MinstrelEvent::QueueHalted { .. })
    })
    .await;
    match halted {
        MinstrelEvent::QueueHalted {
            consecutive_failures,
            ..
        } => assert_eq!(consecutive_failures, 3),
        _ => unreachable!(),
    }

    // The guard fired after three broken tracks; the rest were abandoned
    assert!(wait_for_phase(&handle, SessionPhase::Idle, 2000).await);
    let status = handle.status().await.unwrap();
    assert!(status.queue.is_empty());
    assert_eq!(opener.opened(), vec!["bad1.mp3", "bad2.mp3", "bad3.mp3"]);
    assert_eq!(sink.attach_count(), 0);
}

#[tokio::test]
async fn sink_error_is_handled_like_a_decode_error() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(test_settings(), opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    handle
        .enqueue(tracks(&["t1.mp3", "t2.mp3"]), true)
        .await
        .unwrap();

    assert!(wait_for_current(&handle, "t1.mp3", 2000).await);
    sink.fail_current("transport hiccup");

    wait_for_event(&mut events, 2000, |e| {
        matches!(e, MinstrelEvent::TrackFailed { track, .. } if track == "t1.mp3")
    })
    .await;

    // Advanced past the failed delivery
    assert!(wait_for_current(&handle, "t2.mp3", 2000).await);
}

#[tokio::test]
async fn end_after_current_clears_queue_and_goes_idle() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, _bus) = test_registry(test_settings(), opener.clone(), sink.clone());

    let handle = registry.get_or_create(GUILD);
    handle
        .enqueue(tracks(&["t1.mp3", "t2.mp3", "t3.mp3", "t4.mp3"]), true)
        .await
        .unwrap();

    // Let track 1 finish, then arm the end during track 2
    assert!(wait_for_current(&handle, "t1.mp3", 2000).await);
    sink.complete_current();
    assert!(wait_for_current(&handle, "t2.mp3", 2000).await);

    match handle.end_after_current().await.unwrap() {
        EndOutcome::Armed { track, dropped } => {
            assert_eq!(track, "t2.mp3");
            assert_eq!(dropped, 2);
        }
        other => panic!("expected Armed, got {:?}", other),
    }

    // Queue cleared but the current track untouched
    let status = handle.status().await.unwrap();
    assert!(status.queue.is_empty());
    assert_eq!(status.current_track.as_deref(), Some("t2.mp3"));
    assert!(status.end_after_current);

    // Track 2 finishes; the session idles instead of loading anything
    sink.complete_current();
    assert!(wait_for_phase(&handle, SessionPhase::Idle, 2000).await);
    let status = handle.status().await.unwrap();
    assert!(!status.end_after_current);
    assert_eq!(opener.opened(), vec!["t1.mp3", "t2.mp3"]);
}

#[tokio::test]
async fn shuffle_while_playing_reloads_snapshot() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, _bus) = test_registry(test_settings(), opener.clone(), sink.clone());

    let names = ["t1.mp3", "t2.mp3", "t3.mp3", "t4.mp3", "t5.mp3"];
    let handle = registry.get_or_create(GUILD);
    handle.enqueue(tracks(&names), true).await.unwrap();
    assert!(wait_for_current(&handle, "t1.mp3", 2000).await);

    match handle.shuffle().await.unwrap() {
        ShuffleOutcome::Reshuffled { queue_len } => assert_eq!(queue_len, 5),
        other => panic!("expected Reshuffled, got {:?}", other),
    }

    // A new head starts immediately and the multiset of tracks is intact
    assert!(
        wait_until(|| sink.attach_count() == 2, 2000).await,
        "new head never reached the sink"
    );
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Playing);

    let mut all: Vec<String> = status.queue.clone();
    all.push(status.current_track.unwrap());
    all.sort();
    let mut expected: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(all, expected);
}

#[tokio::test]
async fn shuffle_while_idle_only_toggles_mode() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, _bus) = test_registry(test_settings(), opener.clone(), sink.clone());

    let handle = registry.get_or_create(GUILD);
    match handle.shuffle().await.unwrap() {
        ShuffleOutcome::ModeToggled { enabled } => assert!(enabled),
        other => panic!("expected ModeToggled, got {:?}", other),
    }
    match handle.shuffle().await.unwrap() {
        ShuffleOutcome::ModeToggled { enabled } => assert!(!enabled),
        other => panic!("expected ModeToggled, got {:?}", other),
    }
    assert_eq!(sink.attach_count(), 0);
}

#[tokio::test]
async fn skip_advances_and_reports_nothing_when_idle() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, _bus) = test_registry(test_settings(), opener.clone(), sink.clone());

    let handle = registry.get_or_create(GUILD);
    handle
        .enqueue(tracks(&["t1.mp3", "t2.mp3"]), true)
        .await
        .unwrap();
    assert!(wait_for_current(&handle, "t1.mp3", 2000).await);

    match handle.skip().await.unwrap() {
        SkipOutcome::Skipped { track } => assert_eq!(track, "t1.mp3"),
        other => panic!("expected Skipped, got {:?}", other),
    }
    assert!(wait_for_current(&handle, "t2.mp3", 2000).await);

    sink.complete_current();
    assert!(wait_for_phase(&handle, SessionPhase::Idle, 2000).await);
    match handle.skip().await.unwrap() {
        SkipOutcome::NothingPlaying => {}
        other => panic!("expected NothingPlaying, got {:?}", other),
    }
}

#[tokio::test]
async fn enqueue_without_start_stays_idle() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, _bus) = test_registry(test_settings(), opener.clone(), sink.clone());

    let handle = registry.get_or_create(GUILD);
    handle.enqueue(tracks(&["t1.mp3"]), false).await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Idle);
    assert_eq!(status.queue.len(), 1);
    assert!(opener.opened().is_empty());

    // A later enqueue with start=true begins with the earlier head
    handle.enqueue(tracks(&["t2.mp3"]), true).await.unwrap();
    assert!(wait_for_current(&handle, "t1.mp3", 2000).await);
}

#[tokio::test]
async fn stop_cancels_in_flight_pipeline_open() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(test_settings(), opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    handle.enqueue(tracks(&["slow1.mp3"]), true).await.unwrap();

    // The open hangs; the session sits in Loading
    assert!(wait_until(|| !opener.opened().is_empty(), 2000).await);
    let status = handle.status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Loading);

    // Stop must abort the open and tear the session down
    assert!(registry.stop(GUILD).await.unwrap());
    wait_for_event(&mut events, 2000, |e| {
        matches!(e, MinstrelEvent::SessionEnded { .. })
    })
    .await;

    assert!(
        wait_until(|| opener.hang_cancelled(), 2000).await,
        "in-flight open was not cancelled"
    );
    assert!(wait_until(|| registry.is_empty(), 2000).await);
    assert_eq!(sink.release_count(), 1);
}

#[tokio::test]
async fn volume_applies_to_session_default() {
    let opener = StubOpener::new();
    let sink = ManualSink::new();
    let (registry, bus) = test_registry(test_settings(), opener.clone(), sink.clone());
    let mut events = bus.subscribe();

    let handle = registry.get_or_create(GUILD);
    handle.set_volume(85).await.unwrap();
    wait_for_event(&mut events, 2000, |e| {
        matches!(e, MinstrelEvent::VolumeChanged { volume: 85, .. })
    })
    .await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.volume, 85);
}
