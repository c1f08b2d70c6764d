//! Station-side flow tests over the in-memory seams.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use loomline_core::payload::{
    InspectionPayload, PENDING_WORKER_ID, RollStatus, UNASSIGNED_WORKER_ID, WorkerRef,
};
use loomline_core::queue::{INSPECTION_QUEUE, PayloadQueue};
use loomline_core::store::RollStore;
use loomline_station::{LogPrinter, RollService, SequenceIssuer, SessionManager, StationError};
use loomline_station::service::StartInspection;
use loomline_testing::{
    FixedMeter, MemoryCounterStore, MemoryLocalStore, MemoryQueue, MemoryRollStore,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    service: RollService,
    counter: MemoryCounterStore,
    queue: MemoryQueue,
    local: MemoryLocalStore,
    central: MemoryRollStore,
    meter: FixedMeter,
}

fn harness() -> Harness {
    let counter = MemoryCounterStore::new();
    let queue = MemoryQueue::new();
    let local = MemoryLocalStore::new();
    let central = MemoryRollStore::new();
    let meter = FixedMeter::new();

    let issuer = SequenceIssuer::new(
        Arc::new(counter.clone()),
        Arc::new(central.clone()),
        Arc::new(local.clone()),
    );
    let service = RollService::new(
        Arc::new(SessionManager::new()),
        issuer,
        Arc::new(queue.clone()),
        Arc::new(local.clone()),
        Arc::new(central.clone()),
        Arc::new(meter.clone()),
        Arc::new(LogPrinter),
    );

    Harness {
        service,
        counter,
        queue,
        local,
        central,
        meter,
    }
}

fn start_params() -> StartInspection {
    StartInspection {
        machine_id: "M01".into(),
        fabric_name: "2601XYZ-FABRIC.XYZ".into(),
        inspector_id: Some("I1".into()),
        order_number: Some("PO-1".into()),
        deployment_ticket_id: Some("D-1".into()),
        manual: false,
    }
}

async fn queued_payload(queue: &MemoryQueue) -> InspectionPayload {
    let bytes = queue
        .pop_front(INSPECTION_QUEUE, Duration::from_millis(50))
        .await
        .unwrap()
        .expect("queue should hold a payload");
    InspectionPayload::from_bytes(&bytes).unwrap()
}

#[tokio::test]
async fn finish_saves_locally_queues_the_payload_and_ends_the_session() {
    let h = harness();
    let session = h.service.start_session("st-1", start_params()).await.unwrap();
    assert!(session.roll_code.ends_with("0001"));

    h.service
        .start_worker_shift("st-1", WorkerRef::new("W1", "An"), "1".into())
        .await
        .unwrap();
    h.meter.set(80.0);
    h.service.end_worker_shift("st-1", 78.0, 2.0).await.unwrap();

    let payload = h
        .service
        .finish_roll("st-1", RollStatus::ToInspectedWarehouse, "done")
        .await
        .unwrap();

    assert_eq!(payload.status, RollStatus::ToInspectedWarehouse);
    assert!((payload.meters_grade1 - 78.0).abs() < f64::EPSILON);
    assert_eq!(h.local.len(), 1);
    assert!(h.service.sessions().get("st-1").await.is_none());

    let queued = queued_payload(&h.queue).await;
    assert_eq!(queued, payload);
}

#[tokio::test]
async fn queue_failure_is_a_hard_stop_but_the_local_save_survives() {
    let h = harness();
    h.service.start_session("st-1", start_params()).await.unwrap();
    h.meter.set(30.0);
    h.queue.fail_pushes(true);

    let err = h
        .service
        .finish_roll("st-1", RollStatus::ToInspectedWarehouse, "")
        .await
        .unwrap_err();
    assert!(matches!(err, StationError::Queue(_)));

    // The durable local record exists, the session survives for a retry.
    assert_eq!(h.local.len(), 1);
    assert!(h.service.sessions().get("st-1").await.is_some());

    h.queue.fail_pushes(false);
    h.service
        .finish_roll("st-1", RollStatus::ToInspectedWarehouse, "")
        .await
        .unwrap();
    assert_eq!(h.queue.len(INSPECTION_QUEUE), 1);
}

#[tokio::test]
async fn sequence_outage_blocks_the_session_start() {
    let h = harness();
    h.counter.set_offline(true);
    h.central.set_offline(true);
    h.local.set_offline(true);

    let err = h.service.start_session("st-1", start_params()).await.unwrap_err();
    assert!(matches!(err, StationError::Sequence(_)));
    assert!(h.service.sessions().get("st-1").await.is_none());
}

#[tokio::test]
async fn split_issues_the_next_code_and_carries_the_open_shift() {
    let h = harness();
    let first = h.service.start_session("st-1", start_params()).await.unwrap();

    h.service
        .start_worker_shift("st-1", WorkerRef::new("W1", "An"), "1".into())
        .await
        .unwrap();
    h.service.record_meters("st-1", 55.0, 5.0).await.unwrap();
    h.meter.set(60.0);

    let outcome = h.service.split_roll("st-1").await.unwrap();

    // Closed payload synthesized the open shift instead of dropping it.
    assert_eq!(outcome.closed.ticket_id, first.ticket_id);
    assert_eq!(outcome.closed.workers.len(), 1);
    assert!((outcome.closed.meters_grade1 - 55.0).abs() < f64::EPSILON);

    // The new session continues with the next sequence and the same shift.
    assert_ne!(outcome.new_session.ticket_id, first.ticket_id);
    assert!(outcome.new_session.roll_code.ends_with("0002"));
    let carried = outcome.new_session.current_worker.as_ref().unwrap();
    assert_eq!(carried.worker.id, "W1");
    assert!((carried.start_meter - 0.0).abs() < f64::EPSILON);

    let queued = queued_payload(&h.queue).await;
    assert_eq!(queued.ticket_id, first.ticket_id);
}

#[tokio::test]
async fn split_captures_unassigned_tail_meters_as_pending() {
    let h = harness();
    h.service.start_session("st-1", start_params()).await.unwrap();

    h.service
        .start_worker_shift("st-1", WorkerRef::new("W1", "An"), "1".into())
        .await
        .unwrap();
    h.meter.set(40.0);
    h.service.end_worker_shift("st-1", 40.0, 0.0).await.unwrap();

    // Production continues to 52 m with nobody badged in, then the split.
    h.meter.set(52.0);
    let outcome = h.service.split_roll("st-1").await.unwrap();

    let pending: Vec<_> = outcome
        .closed
        .workers
        .iter()
        .filter(|w| w.worker.id == PENDING_WORKER_ID)
        .collect();
    assert_eq!(pending.len(), 1);
    assert!((pending[0].meters_g1 - 12.0).abs() < f64::EPSILON);
    assert_eq!(pending[0].shift, "SYSTEM");
}

#[tokio::test]
async fn badge_in_reconciles_the_previous_rolls_pending_rows() {
    let h = harness();
    h.service.start_session("st-1", start_params()).await.unwrap();
    h.meter.set(20.0);
    let outcome = h.service.split_roll("st-1").await.unwrap();

    // Persist the closed roll (as the consumer would) so its pending row
    // is visible centrally.
    h.central.persist_payload(&outcome.closed).await.unwrap();
    let before = h.central.roll(&outcome.closed.ticket_id).unwrap();
    assert_eq!(before.productions[0].worker_id, PENDING_WORKER_ID);

    // Persist the new roll's header so reconciliation can find the machine,
    // then badge the next worker in.
    h.central
        .persist_payload(&loomline_station::builder::build(
            &h.service.sessions().get("st-1").await.unwrap(),
        ))
        .await
        .unwrap();
    h.service
        .start_worker_shift("st-1", WorkerRef::new("W9", "Chi"), "2".into())
        .await
        .unwrap();

    let after = h.central.roll(&outcome.closed.ticket_id).unwrap();
    assert_eq!(after.productions[0].worker_id, "W9");
}

#[tokio::test]
async fn defect_before_badge_in_rides_the_placeholder_into_the_payload() {
    let h = harness();
    h.service.start_session("st-1", start_params()).await.unwrap();
    h.meter.set(5.0);
    h.service
        .log_defect("st-1", "slub".into(), 2)
        .await
        .unwrap();

    let session = h.service.sessions().get("st-1").await.unwrap();
    assert_eq!(
        session.current_worker.as_ref().unwrap().worker.id,
        UNASSIGNED_WORKER_ID
    );

    let payload = h
        .service
        .finish_roll("st-1", RollStatus::ToRepairWarehouse, "needs repair")
        .await
        .unwrap();
    assert_eq!(payload.workers.len(), 1);
    assert_eq!(payload.workers[0].worker.id, UNASSIGNED_WORKER_ID);
    assert_eq!(payload.workers[0].defects.len(), 1);
}

#[tokio::test]
async fn change_fabric_reissues_the_code_under_the_new_prefix() {
    let h = harness();
    let first = h.service.start_session("st-1", start_params()).await.unwrap();

    let new_code = h
        .service
        .change_fabric("st-1", "OTHER.998877".into())
        .await
        .unwrap();
    assert_ne!(new_code, first.roll_code);
    assert!(new_code.contains("998877"));

    let session = h.service.sessions().get("st-1").await.unwrap();
    assert_eq!(session.fabric_name, "OTHER.998877");
    assert_eq!(session.roll_code, new_code);
}
