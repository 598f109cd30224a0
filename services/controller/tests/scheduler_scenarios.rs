//! End-to-end scheduler behavior against scripted agents.

mod support;

use std::time::{Duration, Instant};

use hotplug_controller::admission::AdmissionPolicy;
use hotplug_controller::error::EngineError;
use hotplug_controller::ledger::{JobKey, JobState};
use hotplug_controller::registry::RegisterOutcome;
use hotplug_controller::scheduler::RequestOutcome;
use hotplug_events::{AllocationPath, EventAction, EventDetail};

use support::{
    agent, eventually, job, job_request, registration, Harness, RecordedCall, AGENT_TIMEOUT,
};

fn allocated(outcome: &RequestOutcome) -> (Vec<usize>, Vec<usize>, AllocationPath) {
    match outcome {
        RequestOutcome::Allocated {
            cores,
            stolen,
            path,
        } => (cores.clone(), stolen.clone(), *path),
        other => panic!("expected allocation, got {other:?}"),
    }
}

fn key(agent_name: &str, job_name: &str) -> JobKey {
    JobKey::new(agent(agent_name), job(job_name))
}

#[tokio::test]
async fn test_direct_fit_on_own_range() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;

    let outcome = h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    let (cores, stolen, path) = allocated(&outcome);
    assert_eq!(cores, vec![0, 1, 2, 3]);
    assert!(stolen.is_empty());
    assert_eq!(path, AllocationPath::Direct);

    assert!(
        eventually(|| {
            h.agents.calls()
                == vec![RecordedCall::Allocate {
                    endpoint: support::endpoint("agentX"),
                    request: hotplug_controller::agent_client::AllocateRequest {
                        job: job("J1"),
                        pid: 4242,
                        cores: vec![0, 1, 2, 3],
                    },
                }]
        })
        .await
    );
    assert_eq!(h.agents.status_queries(), 0);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_pooled_fit_uses_other_agent_without_probing() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.register("agentY", 4, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();

    let outcome = h.scheduler.request(job_request("agentX", "J2", 2)).await.unwrap();
    let (cores, stolen, path) = allocated(&outcome);
    assert_eq!(cores, vec![4, 5]);
    assert!(stolen.is_empty());
    assert_eq!(path, AllocationPath::Pooled);
    assert_eq!(h.agents.status_queries(), 0);
    assert_eq!(h.events.count(EventAction::Steal), 0);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_steal_from_idle_job_respects_floor() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 10.0);

    let outcome = h.scheduler.request(job_request("agentX", "J3", 2)).await.unwrap();
    let (cores, stolen, path) = allocated(&outcome);
    assert_eq!(cores, vec![2, 3]);
    assert_eq!(stolen, vec![2, 3]);
    assert_eq!(path, AllocationPath::Steal);

    let summary = h.scheduler.summary().await.unwrap();
    let j1 = summary
        .allocations
        .iter()
        .find(|a| a.job == job("J1"))
        .unwrap();
    assert_eq!(j1.cores, vec![0, 1]);

    assert!(eventually(|| { h.agents.releases_for("agentX").len() == 1 }).await);
    let release = &h.agents.releases_for("agentX")[0];
    assert_eq!(release.job, job("J1"));
    assert_eq!(release.keep_cores, vec![0, 1]);

    let steal = h
        .events
        .events()
        .into_iter()
        .find_map(|e| match e.detail {
            EventDetail::Steal(p) => Some(p),
            _ => None,
        })
        .unwrap();
    assert_eq!(steal.victim_remaining, 2);
    assert_eq!(steal.beneficiary_job, job("J3"));
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_busy_job_is_never_stolen_from() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 95.0);

    let outcome = h.scheduler.request(job_request("agentX", "J3", 1)).await.unwrap();
    assert_eq!(outcome, RequestOutcome::Queued { position: 1 });
    assert_eq!(h.agents.status_queries(), 1);
}

#[tokio::test]
async fn test_timed_out_agent_excluded_and_request_queued() {
    let h = Harness::start();
    h.register("agentX", 0, 2).await;
    h.register("agentZ", 2, 2).await;
    h.scheduler.request(job_request("agentX", "J1", 2)).await.unwrap();
    h.scheduler.request(job_request("agentZ", "JZ", 2)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 10.0);
    h.agents.set_cpu("agentZ", "JZ", 10.0);
    h.agents.hang("agentZ");

    let started = Instant::now();
    let outcome = h.scheduler.request(job_request("agentX", "J3", 2)).await.unwrap();
    assert_eq!(outcome, RequestOutcome::Queued { position: 1 });
    assert!(started.elapsed() < Duration::from_secs(2));

    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.pending.len(), 1);
    assert_eq!(summary.stats.steals, 0);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_complete_then_tick_serves_queued_request() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 100.0);
    assert!(!h
        .scheduler
        .request(job_request("agentX", "J2", 3))
        .await
        .unwrap()
        .is_allocated());

    let done = h.scheduler.complete(key("agentX", "J1")).await.unwrap();
    assert_eq!(done.freed, vec![0, 1, 2, 3]);
    assert!(!done.withdrawn);

    let report = h.scheduler.reconcile_now().await.unwrap();
    assert_eq!(report.direct, 1);
    assert_eq!(report.still_pending, 0);

    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.allocations.len(), 1);
    assert_eq!(summary.allocations[0].cores, vec![0, 1, 2]);
    assert_eq!(summary.totals.free, 1);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_direct_fit_may_overtake_queue() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 3)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 100.0);

    let queued = h.scheduler.request(job_request("agentX", "BIG", 2)).await.unwrap();
    assert_eq!(queued, RequestOutcome::Queued { position: 1 });

    // One core is still free, so a smaller request is served at once.
    let small = h.scheduler.request(job_request("agentX", "SMALL", 1)).await.unwrap();
    assert!(small.is_allocated());

    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.pending.len(), 1);
    assert_eq!(summary.pending[0].key, key("agentX", "BIG"));
}

#[tokio::test]
async fn test_fifo_without_head_of_line_blocking() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 100.0);

    h.scheduler.request(job_request("agentX", "A", 3)).await.unwrap();
    h.scheduler.request(job_request("agentX", "B", 3)).await.unwrap();
    h.scheduler.request(job_request("agentX", "C", 1)).await.unwrap();

    h.scheduler.complete(key("agentX", "J1")).await.unwrap();
    let report = h.scheduler.reconcile_now().await.unwrap();
    assert_eq!(report.direct, 2);

    // A takes three of the four freed cores; B cannot fit and does not block C.
    let summary = h.scheduler.summary().await.unwrap();
    let a = summary.allocations.iter().find(|a| a.job == job("A")).unwrap();
    let c = summary.allocations.iter().find(|a| a.job == job("C")).unwrap();
    assert_eq!(a.cores, vec![0, 1, 2]);
    assert_eq!(c.cores, vec![3]);
    assert_eq!(summary.pending.len(), 1);
    assert_eq!(summary.pending[0].key, key("agentX", "B"));
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_stale_candidate_is_abandoned() {
    let h = Harness::start();
    h.register("agentX", 0, 4).await;
    h.scheduler.request(job_request("agentX", "J1", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "J1", 10.0);

    // Both requests probe the same generation of J1; the first steal bumps
    // it, so the second finds its candidate stale and queues.
    let (first, second) = tokio::join!(
        h.scheduler.request(job_request("agentX", "J2", 2)),
        h.scheduler.request(job_request("agentX", "J3", 1)),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    let allocated_count = [&first, &second].iter().filter(|o| o.is_allocated()).count();
    assert_eq!(allocated_count, 1);

    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.stats.stale_candidates, 1);
    assert_eq!(summary.stats.steals, 1);
    assert_eq!(summary.pending.len(), 1);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_completing_queued_job_withdraws_it() {
    let h = Harness::start();
    h.register("agentX", 0, 1).await;
    h.scheduler.request(job_request("agentX", "J1", 1)).await.unwrap();
    h.scheduler.request(job_request("agentX", "J2", 1)).await.unwrap();

    let outcome = h.scheduler.complete(key("agentX", "J2")).await.unwrap();
    assert!(outcome.withdrawn);
    assert!(outcome.freed.is_empty());

    let summary = h.scheduler.summary().await.unwrap();
    assert!(summary.pending.is_empty());
    assert_eq!(summary.stats.withdrawn, 1);

    let err = h.scheduler.complete(key("agentX", "J2")).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownJob { .. }));
}

#[tokio::test]
async fn test_duplicate_job_rejected() {
    let h = Harness::start();
    h.register("agentX", 0, 1).await;
    h.scheduler.request(job_request("agentX", "J1", 1)).await.unwrap();
    h.scheduler.request(job_request("agentX", "J2", 1)).await.unwrap();

    let err = h.scheduler.request(job_request("agentX", "J1", 1)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::DuplicateJob {
            state: JobState::Allocated,
            ..
        }
    ));
    let err = h.scheduler.request(job_request("agentX", "J2", 1)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::DuplicateJob {
            state: JobState::Queued,
            ..
        }
    ));
}

#[tokio::test]
async fn test_registration_is_idempotent_and_busy_resize_rejected() {
    let h = Harness::start();
    let first = h.scheduler.register(registration("agentX", 0, 4)).await.unwrap();
    assert_eq!(first.outcome, RegisterOutcome::Registered);
    let again = h.scheduler.register(registration("agentX", 0, 4)).await.unwrap();
    assert_eq!(again.outcome, RegisterOutcome::Refreshed);

    h.scheduler.request(job_request("agentX", "J1", 2)).await.unwrap();
    let err = h
        .scheduler
        .register(registration("agentX", 0, 8))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AgentBusy { owned: 2, .. }));

    let err = h
        .scheduler
        .register(registration("agentY", 3, 4))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OffsetConflict { .. }));

    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.totals.total_cores, 4);
    assert_eq!(summary.core_map.len(), 4);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_pending_request_dropped_after_deregister() {
    let h = Harness::start();
    h.register("agentX", 0, 1).await;
    h.register("agentY", 1, 1).await;
    h.scheduler.request(job_request("agentX", "J1", 1)).await.unwrap();
    h.scheduler.request(job_request("agentY", "J2", 2)).await.unwrap();

    h.scheduler.deregister(agent("agentY")).await.unwrap();
    let report = h.scheduler.reconcile_now().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(h.events.count(EventAction::Drop), 1);
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_unreachable_agent_keeps_engine_state() {
    let h = Harness::start();
    h.register("agentX", 0, 2).await;
    h.agents.fail("agentX");

    let outcome = h.scheduler.request(job_request("agentX", "J1", 2)).await.unwrap();
    assert!(outcome.is_allocated());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let summary = h.scheduler.summary().await.unwrap();
    assert_eq!(summary.allocations.len(), 1);
    assert!(h.agents.calls().is_empty());
}

#[tokio::test]
async fn test_hung_agent_does_not_delay_calls_to_other_agents() {
    let h = Harness::start();
    h.register("agentX", 0, 2).await;
    h.register("agentZ", 2, 4).await;
    h.agents.hang("agentZ");

    // Each of these allocate notices holds agentZ's lane for a full timeout.
    for name in ["JZ1", "JZ2", "JZ3"] {
        h.scheduler.request(job_request("agentZ", name, 1)).await.unwrap();
    }
    h.scheduler.complete(key("agentZ", "JZ1")).await.unwrap();

    let started = Instant::now();
    h.scheduler.request(job_request("agentX", "J1", 2)).await.unwrap();
    let delivered = eventually(|| {
        h.agents.calls().iter().any(|call| {
            matches!(call, RecordedCall::Allocate { request, .. } if request.job == job("J1"))
        })
    })
    .await;
    assert!(delivered);
    assert!(started.elapsed() < AGENT_TIMEOUT);

    let zeta = support::endpoint("agentZ");
    assert!(h.agents.calls().iter().all(|call| match call {
        RecordedCall::Allocate { endpoint, .. } | RecordedCall::Release { endpoint, .. } => {
            endpoint != &zeta
        }
    }));
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_oversized_registration_rejected_and_scheduler_keeps_running() {
    let h = Harness::start();
    let err = h
        .scheduler
        .register(registration("agentX", 0, usize::MAX / 2))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    h.register("agentY", 0, 2).await;
    assert!(h.scheduler.is_running());
    h.assert_invariants().await;
}

#[tokio::test]
async fn test_oldest_allocation_first_order() {
    let h = Harness::with_policy(AdmissionPolicy {
        steal_order: hotplug_controller::admission::StealOrder::OldestAllocationFirst,
        ..AdmissionPolicy::default()
    });
    h.register("agentX", 0, 6).await;
    h.scheduler.request(job_request("agentX", "OLD", 2)).await.unwrap();
    h.scheduler.request(job_request("agentX", "NEW", 4)).await.unwrap();
    h.agents.set_cpu("agentX", "OLD", 0.0);
    h.agents.set_cpu("agentX", "NEW", 0.0);

    let outcome = h.scheduler.request(job_request("agentX", "J3", 1)).await.unwrap();
    let (_, stolen, _) = allocated(&outcome);
    // OLD owns [0, 1]; its highest index goes first.
    assert_eq!(stolen, vec![1]);
}

#[tokio::test]
async fn test_events_follow_commit_order() {
    let h = Harness::start();
    h.register("agentX", 0, 2).await;
    h.scheduler.request(job_request("agentX", "J1", 2)).await.unwrap();
    h.scheduler.complete(key("agentX", "J1")).await.unwrap();

    assert_eq!(
        h.events.actions(),
        vec![EventAction::Register, EventAction::Allocate, EventAction::Complete]
    );
    let summary = h.scheduler.summary().await.unwrap();
    assert!(summary.activity[0].message.starts_with("completed J1@agentX"));
}
