//! Property tests for the sync state machine.

use moi_engine::{
    Dispatch, FlushTrigger, LocalId, PendingWrite, RetryPolicy, SyncCore, WriteOutcome,
};
use proptest::prelude::*;
use serde_json::json;

#[derive(Debug, Clone)]
enum Step {
    Enqueue,
    Reachable(bool),
    ToggleOffline,
    /// Flush where each entry succeeds according to the pattern.
    Flush(Vec<bool>),
    Periodic,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => Just(Step::Enqueue),
        2 => any::<bool>().prop_map(Step::Reachable),
        1 => Just(Step::ToggleOffline),
        2 => prop::collection::vec(any::<bool>(), 0..8).prop_map(Step::Flush),
        1 => Just(Step::Periodic),
    ]
}

proptest! {
    #[test]
    fn pending_changes_track_enqueues_minus_flushed(steps in prop::collection::vec(step(), 0..60)) {
        let mut core = SyncCore::new(false, RetryPolicy::new(0, 0, None));
        let mut enqueued = 0usize;
        let mut flushed = 0usize;
        let mut now = 1u64;

        for step in steps {
            now += 1;
            match step {
                Step::Enqueue => {
                    let write = PendingWrite::create(LocalId::new(now), "events", json!({ "n": now }), now).unwrap();
                    core.enqueue(write);
                    enqueued += 1;
                }
                Step::Reachable(r) => {
                    core.set_reachable(r);
                }
                Step::ToggleOffline => {
                    core.toggle_manual_offline(true);
                }
                Step::Flush(pattern) => {
                    let was_online = core.status().online();
                    let before = core.status();
                    match core.begin_flush(FlushTrigger::Manual, now) {
                        Ok(mut batch) => {
                            prop_assert!(was_online);
                            prop_assert!(core.status().syncing() && core.status().online());
                            for i in 0..batch.len() {
                                let ok = pattern.get(i).copied().unwrap_or(true);
                                let outcome = match batch.dispatch(i) {
                                    Dispatch::Send(_) if ok => WriteOutcome::Acknowledged { id: format!("r{now}-{i}") },
                                    Dispatch::Send(_) => WriteOutcome::Unavailable { reason: "down".into() },
                                    Dispatch::Defer => WriteOutcome::Deferred,
                                    Dispatch::Reject(reason) => WriteOutcome::Rejected { reason },
                                };
                                batch.record(i, outcome);
                            }
                            let report = core.finish_flush(batch, now).unwrap();
                            flushed += report.acknowledged.len() + report.rejected.len();
                            if report.succeeded() {
                                prop_assert_eq!(core.status().last_sync(), Some(report.finished_at));
                                prop_assert!(report.finished_at >= report.started_at);
                            }
                        }
                        Err(_) => {
                            prop_assert_eq!(core.status(), before);
                        }
                    }
                }
                Step::Periodic => {
                    let before = core.status();
                    if !before.online() {
                        prop_assert!(core.begin_flush(FlushTrigger::Periodic, now).is_err());
                        prop_assert_eq!(core.status(), before);
                    }
                }
            }

            let status = core.status();
            prop_assert_eq!(status.pending_changes(), enqueued - flushed);
            prop_assert_eq!(status.pending_changes(), core.queue().len());
            prop_assert!(!status.syncing() || status.online());
        }
    }

    #[test]
    fn flush_dispatches_in_fifo_order(count in 1usize..40) {
        let mut core = SyncCore::new(false, RetryPolicy::default());
        let mut expected = Vec::new();
        for n in 0..count as u64 {
            let write = PendingWrite::create(LocalId::new(n), "events", json!({ "n": n }), n).unwrap();
            expected.push(write.local_id().clone());
            core.enqueue(write);
        }

        core.set_reachable(true);
        let mut batch = core.begin_flush(FlushTrigger::Reconnect, 1_000).unwrap();
        let mut seen = Vec::new();
        for i in 0..batch.len() {
            if let Dispatch::Send(call) = batch.dispatch(i) {
                if let moi_engine::RemoteCall::Create { payload, .. } = call {
                    seen.push(payload["localId"].as_str().unwrap().parse::<LocalId>().unwrap());
                }
            }
            batch.record(i, WriteOutcome::Acknowledged { id: format!("r{i}") });
        }
        core.finish_flush(batch, 1_001).unwrap();

        prop_assert_eq!(seen, expected);
        prop_assert!(core.queue().is_empty());
    }
}
