//! Pure payload construction from session state.
//!
//! `build_at` is a pure function: no I/O, no clock reads, no session
//! mutation. The session's own log is deep-copied, an open shift is
//! synthesized into a completed-looking entry (a worker's partial shift is
//! never silently dropped just because the operator forgot to badge out
//! before a split), and the grade totals are recomputed from the final
//! entry list — totals carried in session state are never trusted.

use crate::session::InspectionSession;
use chrono::{DateTime, Utc};
use loomline_core::payload::{InspectionPayload, WorkerLog};

/// Snapshot a session into a payload stamped with the current wall clock.
#[must_use]
pub fn build(session: &InspectionSession) -> InspectionPayload {
    build_at(session, Utc::now())
}

/// Snapshot a session into a payload stamped with `captured_at`.
#[must_use]
pub fn build_at(session: &InspectionSession, captured_at: DateTime<Utc>) -> InspectionPayload {
    let mut workers: Vec<WorkerLog> = session.completed_workers.clone();

    // An open shift becomes a completed-looking entry with its running
    // tallies treated as final.
    if let Some(current) = &session.current_worker {
        let total = current.meters_g1 + current.meters_g2;
        workers.push(WorkerLog {
            worker: current.worker.clone(),
            shift: current.shift.clone(),
            start_meter: current.start_meter,
            end_meter: current.start_meter + total,
            total_meters: total,
            meters_g1: current.meters_g1,
            meters_g2: current.meters_g2,
            defects: current.defects.clone(),
        });
    }

    let meters_grade1 = workers.iter().map(|w| w.meters_g1).sum();
    let meters_grade2 = workers.iter().map(|w| w.meters_g2).sum();

    InspectionPayload {
        ticket_id: session.ticket_id.clone(),
        roll_code: session.roll_code.clone(),
        fabric_name: session.fabric_name.clone(),
        machine_id: session.machine_id.clone(),
        inspector_id: session.inspector_id.clone(),
        order_number: session.order_number.clone(),
        deployment_ticket_id: session.deployment_ticket_id.clone(),
        inspection_date: captured_at,
        status: session.status,
        meters_grade1,
        meters_grade2,
        workers,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::session::SessionStart;
    use loomline_core::payload::{DefectEntry, RollStatus, WorkerRef};

    fn session() -> InspectionSession {
        InspectionSession::start(SessionStart {
            machine_id: "M01".into(),
            ticket_id: "t-1".into(),
            roll_code: "2601XYZ0001".into(),
            fabric_name: "XYZ".into(),
            inspector_id: Some("I1".into()),
            order_number: Some("PO-1".into()),
            deployment_ticket_id: None,
            manual: false,
        })
    }

    #[test]
    fn totals_are_the_sum_over_completed_workers() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.complete_shift(48.0, 2.0, 50.0).unwrap();
        s.assign_worker(WorkerRef::new("W2", "Binh"), "2".into())
            .unwrap();
        s.complete_shift(29.0, 1.0, 80.0).unwrap();

        let payload = build_at(&s, Utc::now());
        assert_eq!(payload.workers.len(), 2);
        assert!((payload.meters_grade1 - 77.0).abs() < f64::EPSILON);
        assert!((payload.meters_grade2 - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn an_open_shift_is_synthesized_not_dropped() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.complete_shift(50.0, 0.0, 50.0).unwrap();
        s.assign_worker(WorkerRef::new("W2", "Binh"), "2".into())
            .unwrap();
        s.update_current_meters(18.0, 2.0).unwrap();

        let payload = build_at(&s, Utc::now());
        assert_eq!(payload.workers.len(), 2);

        let synthesized = &payload.workers[1];
        assert_eq!(synthesized.worker.id, "W2");
        assert!((synthesized.start_meter - 50.0).abs() < f64::EPSILON);
        assert!((synthesized.total_meters - 20.0).abs() < f64::EPSILON);
        assert!((payload.meters_grade1 - 68.0).abs() < f64::EPSILON);
        assert!((payload.meters_grade2 - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn synthesized_entry_carries_the_open_shifts_defects() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.log_defect(DefectEntry {
            id: Some("err_1".into()),
            error_type: "slub".into(),
            meter_location: 3.0,
            points: 1,
            is_fixed: false,
        });

        let payload = build_at(&s, Utc::now());
        assert_eq!(payload.workers.len(), 1);
        assert_eq!(payload.workers[0].defects.len(), 1);

        // The wire format carries defects under the canonical key.
        let value = serde_json::to_value(&payload).unwrap();
        let entry = &value["workers_log"][0];
        assert!(entry.get("errors").is_some());
        assert!(entry.get("current_errors").is_none());
    }

    #[test]
    fn building_does_not_mutate_the_session() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.update_current_meters(10.0, 0.0).unwrap();
        let before = s.clone();

        let _ = build_at(&s, Utc::now());
        assert_eq!(s, before);
    }

    #[test]
    fn status_and_capture_time_are_stamped() {
        let mut s = session();
        s.status = RollStatus::ToRepairWarehouse;
        let at = Utc::now();

        let payload = build_at(&s, at);
        assert_eq!(payload.status, RollStatus::ToRepairWarehouse);
        assert_eq!(payload.inspection_date, at);
        assert_eq!(payload.ticket_id, "t-1");
        assert_eq!(payload.roll_code, "2601XYZ0001");
    }
}
