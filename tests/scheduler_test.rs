//! Scheduler integration tests
//!
//! Runs the scheduler against a real relay worker with scripted producers
//! writing into plain files.

mod common;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use channelcast::events::{DrainEnd, PlayoutEvent};
use channelcast::handoff::HandoffSlot;
use channelcast::playlist::PlaylistItem;
use channelcast::relay::PACKET_SIZE;
use channelcast::{Error, RelayError};
use chrono::Utc;
use common::{pattern, trickle_bytes, FailingSink, Harness};
use tokio_util::sync::CancellationToken;

fn untimed(names: &[&str]) -> Vec<PlaylistItem> {
    names.iter().map(|n| PlaylistItem::new(*n)).collect()
}

#[tokio::test]
async fn test_empty_playlist_starts_and_stops_relay() {
    let h = Harness::new();
    let start = Instant::now();

    let summary = h.scheduler().run(Vec::new(), h.relay()).await.unwrap();

    assert_eq!(summary.launched, 0);
    assert_eq!(summary.skipped, 0);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(h.transcoder.launches().is_empty());
    assert!(h
        .history()
        .contains(&PlayoutEvent::RelayStopped { packets: 0, bytes: 0 }));
}

#[tokio::test]
async fn test_slots_alternate_across_items() {
    let h = Harness::new();
    let items = untimed(&["one.ts", "two.ts", "three.ts", "four.ts"]);

    let summary = h.scheduler().run(items, h.relay()).await.unwrap();
    assert_eq!(summary.launched, 4);

    let slots: Vec<HandoffSlot> = h.transcoder.launches().iter().map(|l| l.slot).collect();
    assert_eq!(
        slots,
        [HandoffSlot::A, HandoffSlot::B, HandoffSlot::A, HandoffSlot::B]
    );
    assert_eq!(h.sink.bytes(), b"one.tstwo.tsthree.tsfour.ts".to_vec());
}

#[tokio::test]
async fn test_overlapping_items_are_sent_back_to_back() {
    let h = Harness::new();
    let a = pattern(PACKET_SIZE * 5 + 100, 1);
    let b = pattern(PACKET_SIZE * 3 + 17, 2);
    h.transcoder.set_payload("a.ts", a.clone());
    h.transcoder.set_payload("b.ts", b.clone());

    let summary = h
        .scheduler()
        .run(untimed(&["a.ts", "b.ts"]), h.relay())
        .await
        .unwrap();

    let mut expected = a.clone();
    expected.extend_from_slice(&b);
    assert_eq!(h.sink.bytes(), expected);
    assert!(h.sink.payloads().iter().all(|p| p.len() <= PACKET_SIZE));
    assert_eq!(summary.relay.bytes, expected.len() as u64);

    let drained: Vec<(String, HandoffSlot)> = h
        .history()
        .into_iter()
        .filter_map(|e| match e {
            PlayoutEvent::SlotDrained { media, slot, .. } => Some((media, slot)),
            _ => None,
        })
        .collect();
    assert_eq!(
        drained,
        [
            ("a.ts".to_string(), HandoffSlot::A),
            ("b.ts".to_string(), HandoffSlot::B)
        ]
    );
}

#[tokio::test]
async fn test_timed_overlap_scenario() {
    let h = Harness::new();
    let a = pattern(PACKET_SIZE * 4 + 3, 5);
    let b = pattern(PACKET_SIZE * 2 + 600, 6);
    h.transcoder.set_payload("a.ts", a.clone());
    h.transcoder.set_payload("b.ts", b.clone());
    // a runs 2.3s; b is scheduled one second before a would finish.
    h.oracle.set("a.ts", 2.3);
    h.oracle.set("b.ts", 0.5);

    let a_start = Utc::now() + chrono::Duration::milliseconds(300);
    let b_start = a_start + chrono::Duration::milliseconds(1300);
    let items = vec![
        PlaylistItem::at("a.ts", a_start),
        PlaylistItem::at("b.ts", b_start),
    ];

    let summary = h.scheduler().run(items, h.relay()).await.unwrap();
    assert_eq!(summary.launched, 2);

    let launches = h.transcoder.launches();
    assert_eq!(launches[0].slot, HandoffSlot::A);
    assert_eq!(launches[1].slot, HandoffSlot::B);
    assert!(launches[0].at >= a_start);
    assert!(launches[1].at >= b_start);

    let mut expected = a.clone();
    expected.extend_from_slice(&b);
    assert_eq!(h.sink.bytes(), expected);
}

#[tokio::test]
async fn test_elapsed_item_is_skipped() {
    let h = Harness::new();
    h.oracle.set("old.ts", 10.0);
    let items = vec![PlaylistItem::at(
        "old.ts",
        Utc::now() - chrono::Duration::seconds(60),
    )];

    let summary = h.scheduler().run(items, h.relay()).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.launched, 0);
    assert!(h.transcoder.launches().is_empty());
    assert!(h.sink.payloads().is_empty());
    assert!(h.history().iter().any(|e| matches!(
        e,
        PlayoutEvent::ItemSkipped { media, lateness_secs, .. }
            if media == "old.ts" && *lateness_secs >= 60.0
    )));
}

#[tokio::test]
async fn test_late_item_is_joined_with_seek() {
    let h = Harness::new();
    // Five seconds late on a six second item: one second left, no pre-roll.
    h.oracle.set("live.ts", 6.0);
    let items = vec![PlaylistItem::at(
        "live.ts",
        Utc::now() - chrono::Duration::seconds(5),
    )];

    h.scheduler().run(items, h.relay()).await.unwrap();

    let launches = h.transcoder.launches();
    assert_eq!(launches.len(), 1);
    let seek = launches[0].seek.as_deref().unwrap();
    assert!(seek.starts_with("00:00:05."), "seek was {seek}");
}

#[tokio::test]
async fn test_on_time_item_has_no_seek_and_never_starts_early() {
    let h = Harness::new();
    let start = Utc::now() + chrono::Duration::milliseconds(300);
    let items = vec![PlaylistItem::at("next.ts", start)];

    h.scheduler().run(items, h.relay()).await.unwrap();

    let launches = h.transcoder.launches();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].seek.is_none());
    assert!(launches[0].at >= start, "launched before its start time");
}

#[tokio::test]
async fn test_playlist_is_sorted_before_scheduling() {
    let h = Harness::new();
    let now = Utc::now();
    let items = vec![
        PlaylistItem::at("second.ts", now + chrono::Duration::milliseconds(150)),
        PlaylistItem::at("first.ts", now + chrono::Duration::milliseconds(50)),
    ];

    h.scheduler().run(items, h.relay()).await.unwrap();

    let order: Vec<String> = h
        .transcoder
        .launches()
        .into_iter()
        .map(|l| l.media)
        .collect();
    assert_eq!(order, ["first.ts", "second.ts"]);
}

#[tokio::test]
async fn test_relay_failure_surfaces_from_run() {
    let h = Harness::new();
    let items = untimed(&["a.ts", "b.ts", "c.ts"]);

    let err = h
        .scheduler()
        .run(items, h.relay_with(Box::new(FailingSink)))
        .await
        .unwrap_err();

    assert_matches!(err, Error::Relay(RelayError::Send(_)));
}

#[tokio::test]
async fn test_cancellation_stops_waiting() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let items = vec![PlaylistItem::at(
        "tonight.ts",
        Utc::now() + chrono::Duration::seconds(60),
    )];

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let summary = h
        .scheduler()
        .with_cancellation(cancel)
        .run(items, h.relay())
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.launched, 0);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_crashed_producer_is_reported_and_playout_continues() {
    let h = Harness::new();
    h.transcoder.crash("bad.ts");
    h.transcoder.set_payload("good.ts", pattern(PACKET_SIZE + 1, 9));

    let summary = h
        .scheduler()
        .run(untimed(&["bad.ts", "good.ts"]), h.relay())
        .await
        .unwrap();

    assert_eq!(summary.launched, 2);
    assert_eq!(h.sink.bytes(), pattern(PACKET_SIZE + 1, 9));

    let history = h.history();
    assert!(history.contains(&PlayoutEvent::ProducerExited {
        media: "bad.ts".into(),
        slot: HandoffSlot::A,
        success: false,
        code: Some(1),
    }));
    assert!(history.iter().any(|e| matches!(
        e,
        PlayoutEvent::SlotDrained { media, end: DrainEnd::NoData, .. } if media == "bad.ts"
    )));
}

#[tokio::test]
async fn test_refused_launch_is_not_fatal() {
    let h = Harness::new();
    h.transcoder.refuse("broken.ts");

    let summary = h
        .scheduler()
        .run(untimed(&["broken.ts", "fine.ts", "also-fine.ts"]), h.relay())
        .await
        .unwrap();

    assert_eq!(summary.launched, 3);
    assert_eq!(h.sink.bytes(), b"fine.tsalso-fine.ts".to_vec());

    // The refused item still took its turn in the rotation.
    let slots: Vec<HandoffSlot> = h.transcoder.launches().iter().map(|l| l.slot).collect();
    assert_eq!(slots, [HandoffSlot::A, HandoffSlot::B, HandoffSlot::A]);
    assert!(h.history().iter().any(|e| matches!(
        e,
        PlayoutEvent::ProducerExited {
            media,
            success: false,
            code: None,
            ..
        } if media == "broken.ts"
    )));
}

#[tokio::test]
async fn test_busy_slot_is_a_conflict() {
    let h = Harness::new();
    // Hold slot B as if an earlier occupant were never drained.
    h.handoff.channel(HandoffSlot::B).try_claim().unwrap();

    let err = h
        .scheduler()
        .with_slot_timeout(Duration::from_millis(200))
        .run(untimed(&["a.ts", "b.ts"]), h.relay())
        .await
        .unwrap_err();

    assert_matches!(
        err,
        Error::SlotConflict {
            slot: HandoffSlot::B,
            ..
        }
    );
}

#[tokio::test]
async fn test_slot_is_not_reused_while_its_producer_runs() {
    let h = Harness::new();
    // Writes its bytes at once, then lingers long after the relay is done.
    h.transcoder.hold("stuck.ts", Duration::from_millis(1500));

    let summary = h
        .scheduler()
        .run(untimed(&["stuck.ts", "b.ts", "c.ts"]), h.relay())
        .await
        .unwrap();
    assert_eq!(summary.launched, 3);

    let launches = h.transcoder.launches();
    let slots: Vec<HandoffSlot> = launches.iter().map(|l| l.slot).collect();
    assert_eq!(slots, [HandoffSlot::A, HandoffSlot::B, HandoffSlot::A]);

    let stuck_exit = h.transcoder.exit_of("stuck.ts").unwrap();
    assert!(
        launches[2].at >= stuck_exit,
        "c.ts took slot A while stuck.ts was still writing to it"
    );
    assert_eq!(h.sink.bytes(), b"stuck.tsb.tsc.ts".to_vec());
}

#[tokio::test]
async fn test_third_launch_waits_for_a_producer_to_exit() {
    let h = Harness::new();
    let one = h.transcoder.gate("one.ts");
    let two = h.transcoder.gate("two.ts");

    let control = async {
        let deadline = Instant::now() + Duration::from_secs(2);
        while h.transcoder.launches().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Both producers are alive; the pool is exhausted.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let waiting = h.transcoder.launches().len();

        let released = Utc::now();
        one.cancel();
        (waiting, released)
    };

    let (summary, (waiting, released)) = tokio::join!(
        h.scheduler()
            .run(untimed(&["one.ts", "two.ts", "three.ts"]), h.relay()),
        control
    );
    two.cancel();

    assert_eq!(waiting, 2);
    assert_eq!(summary.unwrap().launched, 3);

    let launches = h.transcoder.launches();
    assert_eq!(launches[2].media, "three.ts");
    assert_eq!(launches[2].slot, HandoffSlot::A);
    assert!(launches[2].at >= released, "third launch did not wait for a permit");
}

#[tokio::test]
async fn test_shutdown_waits_for_the_queued_tail() {
    let h = Harness::new();
    h.oracle.set("tail.ts", 1.5);
    // Still writing well after the playlist is exhausted.
    h.transcoder.trickle("tail.ts", 20, Duration::from_millis(40));

    let summary = h
        .scheduler()
        .with_shutdown_grace(Duration::from_millis(100))
        .run(untimed(&["tail.ts"]), h.relay())
        .await
        .unwrap();

    assert_eq!(summary.relay.items, 1);
    assert_eq!(h.sink.bytes(), trickle_bytes(20));
    assert!(h.history().iter().any(|e| matches!(
        e,
        PlayoutEvent::SlotDrained {
            end: DrainEnd::Idle,
            ..
        }
    )));
}
