//! Per-station inspection session state.
//!
//! One [`InspectionSession`] exists per physical station at a time, owned
//! through the [`SessionManager`]. It is never persisted directly — it is
//! the source object the payload builder snapshots at roll boundaries.
//!
//! # Worker lifecycle inside a session
//!
//! Production is continuous: meters keep accumulating whether or not a
//! worker is badged in. Three bookkeeping rules keep every meter owned:
//!
//! - Defects logged with nobody badged in go to an `UNASSIGNED` placeholder
//!   shift, which the next badge-in claims in place.
//! - Meters produced with nobody badged in are captured at the roll
//!   boundary as a `PENDING_NEXT_ROLL` sentinel entry
//!   ([`InspectionSession::finalize_unassigned_meters`]) and retroactively
//!   reassigned once the next roll's worker is known.
//! - An open shift at a roll boundary is synthesized into the payload by
//!   the builder rather than dropped.

use loomline_core::payload::{
    DefectEntry, PENDING_WORKER_ID, RollStatus, UNASSIGNED_WORKER_ID, WorkerLog, WorkerRef,
};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Meter tolerance when comparing operator-entered grade figures against
/// the machine's span, and the minimum gap worth capturing as a pending
/// entry.
pub const METER_TOLERANCE: f64 = 0.1;

/// Errors from session operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// No session is active for the station.
    #[error("no active session for station {0}")]
    NoActiveSession(String),

    /// A worker is already badged in; the shift must be ended first.
    #[error("a worker shift is already open")]
    ShiftAlreadyOpen,

    /// No worker shift is open to complete.
    #[error("no worker shift is open")]
    NoOpenShift,

    /// The entered grade figures do not add up to the machine span.
    #[error("grade total {reported:.2} m does not match machine span {span:.2} m")]
    MeterMismatch {
        /// Meter span measured by the machine.
        span: f64,
        /// Grade-1 + grade-2 total entered by the operator.
        reported: f64,
    },
}

/// The worker currently badged in, with their running tallies.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentWorker {
    /// Who is badged in (may be the `UNASSIGNED` placeholder).
    pub worker: WorkerRef,
    /// Shift label, empty until a real badge-in claims a placeholder.
    pub shift: String,
    /// Cumulative meter reading when the shift started.
    pub start_meter: f64,
    /// Grade-1 meters accumulated so far (running figure).
    pub meters_g1: f64,
    /// Grade-2 meters accumulated so far (running figure).
    pub meters_g2: f64,
    /// Defects logged during this shift.
    pub defects: Vec<DefectEntry>,
}

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct SessionStart {
    /// Weaving machine the roll comes off.
    pub machine_id: String,
    /// Fresh ticket token for the roll.
    pub ticket_id: String,
    /// Roll code issued by the sequence pipeline.
    pub roll_code: String,
    /// Fabric under inspection.
    pub fabric_name: String,
    /// Inspector starting the session.
    pub inspector_id: Option<String>,
    /// Production order, when order-driven.
    pub order_number: Option<String>,
    /// Parent deployment order, when order-driven.
    pub deployment_ticket_id: Option<String>,
    /// Whether the session was set up manually (no deployment order).
    pub manual: bool,
}

/// Ephemeral working state of one roll being inspected.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionSession {
    /// Weaving machine id.
    pub machine_id: String,
    /// Ticket token of the roll in progress.
    pub ticket_id: String,
    /// Human-facing roll code.
    pub roll_code: String,
    /// Fabric under inspection.
    pub fabric_name: String,
    /// Inspector on duty.
    pub inspector_id: Option<String>,
    /// Production order number.
    pub order_number: Option<String>,
    /// Parent deployment order reference.
    pub deployment_ticket_id: Option<String>,
    /// Completed shift entries, in completion order.
    pub completed_workers: Vec<WorkerLog>,
    /// The worker badged in right now, if any.
    pub current_worker: Option<CurrentWorker>,
    /// Whether the session was set up manually.
    pub manual: bool,
    /// Operator notes accumulated over the session.
    pub notes: String,
    /// Current roll status.
    pub status: RollStatus,
    /// Cumulative meter reading at the end of the last accounted span.
    pub last_end_meter: f64,
}

impl InspectionSession {
    /// Open a fresh session.
    #[must_use]
    pub fn start(params: SessionStart) -> Self {
        Self {
            machine_id: params.machine_id,
            ticket_id: params.ticket_id,
            roll_code: params.roll_code,
            fabric_name: params.fabric_name,
            inspector_id: params.inspector_id,
            order_number: params.order_number,
            deployment_ticket_id: params.deployment_ticket_id,
            completed_workers: Vec::new(),
            current_worker: None,
            manual: params.manual,
            notes: String::new(),
            status: RollStatus::Pending,
            last_end_meter: 0.0,
        }
    }

    /// Badge a worker in.
    ///
    /// If defects were logged before anyone badged in, the session holds an
    /// `UNASSIGNED` placeholder shift — the new worker claims it in place,
    /// inheriting its start meter and defects.
    ///
    /// # Errors
    ///
    /// [`SessionError::ShiftAlreadyOpen`] when a real worker is already
    /// badged in.
    pub fn assign_worker(&mut self, worker: WorkerRef, shift: String) -> Result<(), SessionError> {
        if let Some(current) = &mut self.current_worker {
            if current.worker.id == UNASSIGNED_WORKER_ID {
                current.worker = worker;
                current.shift = shift;
                return Ok(());
            }
            return Err(SessionError::ShiftAlreadyOpen);
        }

        self.current_worker = Some(CurrentWorker {
            worker,
            shift,
            start_meter: self.last_end_meter,
            meters_g1: 0.0,
            meters_g2: 0.0,
            defects: Vec::new(),
        });
        Ok(())
    }

    /// Record the running grade tallies for the open shift.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoOpenShift`] when nobody is badged in.
    pub fn update_current_meters(&mut self, g1: f64, g2: f64) -> Result<(), SessionError> {
        let current = self.current_worker.as_mut().ok_or(SessionError::NoOpenShift)?;
        current.meters_g1 = g1;
        current.meters_g2 = g2;
        Ok(())
    }

    /// Close the open shift with final grade figures at the given machine
    /// reading, appending a completed log entry.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoOpenShift`] when nobody is badged in;
    /// [`SessionError::MeterMismatch`] when the entered figures disagree
    /// with the machine span beyond [`METER_TOLERANCE`].
    pub fn complete_shift(
        &mut self,
        meters_g1: f64,
        meters_g2: f64,
        end_meter: f64,
    ) -> Result<(), SessionError> {
        let current = self.current_worker.as_ref().ok_or(SessionError::NoOpenShift)?;
        let span = end_meter - current.start_meter;
        let reported = meters_g1 + meters_g2;
        if (reported - span).abs() > METER_TOLERANCE {
            return Err(SessionError::MeterMismatch { span, reported });
        }

        let current = self
            .current_worker
            .take()
            .ok_or(SessionError::NoOpenShift)?;
        self.completed_workers.push(WorkerLog {
            worker: current.worker,
            shift: current.shift,
            start_meter: current.start_meter,
            end_meter,
            total_meters: span,
            meters_g1,
            meters_g2,
            defects: current.defects,
        });
        self.last_end_meter = end_meter;
        Ok(())
    }

    /// Log a defect against the open shift, creating an `UNASSIGNED`
    /// placeholder shift if nobody is badged in.
    pub fn log_defect(&mut self, defect: DefectEntry) {
        let current = self.current_worker.get_or_insert_with(|| CurrentWorker {
            worker: WorkerRef::new(UNASSIGNED_WORKER_ID, ""),
            shift: String::new(),
            start_meter: self.last_end_meter,
            meters_g1: 0.0,
            meters_g2: 0.0,
            defects: Vec::new(),
        });
        current.defects.push(defect);
    }

    /// Remove a defect from the open shift by its station-local id.
    pub fn remove_defect(&mut self, defect_id: &str) {
        if let Some(current) = &mut self.current_worker {
            current
                .defects
                .retain(|d| d.id.as_deref() != Some(defect_id));
        }
    }

    /// Capture meters produced with nobody badged in as a pending-worker
    /// sentinel entry.
    ///
    /// Production is continuous across roll boundaries; the worker for the
    /// tail of one roll is often only known once they badge in on the next
    /// roll. No-op when a shift is open, when the reading went backwards
    /// (meter was reset), or when the gap is below [`METER_TOLERANCE`].
    pub fn finalize_unassigned_meters(&mut self, current_machine_meter: f64) {
        if self.current_worker.is_some() {
            return;
        }
        if current_machine_meter < self.last_end_meter {
            return;
        }
        let gap = current_machine_meter - self.last_end_meter;
        if gap <= METER_TOLERANCE {
            return;
        }

        self.completed_workers.push(WorkerLog {
            worker: WorkerRef::new(PENDING_WORKER_ID, "pending identification"),
            shift: "SYSTEM".to_string(),
            start_meter: self.last_end_meter,
            end_meter: current_machine_meter,
            total_meters: gap,
            meters_g1: gap,
            meters_g2: 0.0,
            defects: Vec::new(),
        });
        self.last_end_meter = current_machine_meter;
        tracing::info!(
            ticket_id = %self.ticket_id,
            gap_meters = gap,
            "captured unassigned meters as pending-worker entry"
        );
    }

    /// Clone the session for a split: same machine, fabric and order, fresh
    /// ticket and code, meters rebased to zero.
    ///
    /// An open shift carries over into the new roll (the closing payload
    /// gets its synthesized entry from the builder), starting again from
    /// meter zero with a clean defect list.
    #[must_use]
    pub fn clone_for_split(&self, new_ticket_id: String, new_roll_code: String) -> Self {
        let current_worker = self.current_worker.as_ref().map(|current| CurrentWorker {
            worker: current.worker.clone(),
            shift: current.shift.clone(),
            start_meter: 0.0,
            meters_g1: 0.0,
            meters_g2: 0.0,
            defects: Vec::new(),
        });

        Self {
            machine_id: self.machine_id.clone(),
            ticket_id: new_ticket_id,
            roll_code: new_roll_code,
            fabric_name: self.fabric_name.clone(),
            inspector_id: self.inspector_id.clone(),
            order_number: self.order_number.clone(),
            deployment_ticket_id: self.deployment_ticket_id.clone(),
            completed_workers: Vec::new(),
            current_worker,
            manual: self.manual,
            notes: String::new(),
            status: RollStatus::Pending,
            last_end_meter: 0.0,
        }
    }

    /// Switch the session to a different fabric (the roll code is re-issued
    /// by the caller).
    pub fn update_fabric(&mut self, fabric_name: String, roll_code: String) {
        self.fabric_name = fabric_name;
        self.roll_code = roll_code;
    }

    /// Append to the operator notes.
    pub fn append_note(&mut self, note: &str) {
        if note.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push(' ');
        }
        self.notes.push_str(note);
    }
}

/// Owner of all station sessions in a process.
///
/// A map from station id to session behind one async lock — per-station
/// single-writer state with an explicit lifecycle, not ad-hoc global
/// state. Request handlers mutate through [`SessionManager::with_session`]
/// so a session is never cloned out, raced, and written back.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, InspectionSession>>,
}

impl SessionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session for a station, replacing any existing one.
    pub async fn insert(&self, station_id: &str, session: InspectionSession) {
        self.sessions
            .write()
            .await
            .insert(station_id.to_owned(), session);
    }

    /// Snapshot a station's session.
    pub async fn get(&self, station_id: &str) -> Option<InspectionSession> {
        self.sessions.read().await.get(station_id).cloned()
    }

    /// Destroy a station's session, returning its final state.
    pub async fn end(&self, station_id: &str) -> Option<InspectionSession> {
        let removed = self.sessions.write().await.remove(station_id);
        if removed.is_some() {
            tracing::info!(station_id, "session ended");
        }
        removed
    }

    /// Run a closure against a station's session under the write lock.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveSession`] when the station has no session;
    /// otherwise whatever the closure returns.
    pub async fn with_session<R>(
        &self,
        station_id: &str,
        f: impl FnOnce(&mut InspectionSession) -> Result<R, SessionError>,
    ) -> Result<R, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(station_id)
            .ok_or_else(|| SessionError::NoActiveSession(station_id.to_owned()))?;
        f(session)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn session() -> InspectionSession {
        InspectionSession::start(SessionStart {
            machine_id: "M01".into(),
            ticket_id: "t-1".into(),
            roll_code: "2601XYZ0001".into(),
            fabric_name: "XYZ".into(),
            inspector_id: Some("I1".into()),
            order_number: Some("PO-1".into()),
            deployment_ticket_id: Some("D-1".into()),
            manual: false,
        })
    }

    fn defect(id: &str) -> DefectEntry {
        DefectEntry {
            id: Some(id.into()),
            error_type: "slub".into(),
            meter_location: 5.0,
            points: 1,
            is_fixed: false,
        }
    }

    #[test]
    fn shift_completion_validates_the_meter_span() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();

        let err = s.complete_shift(30.0, 5.0, 100.0).unwrap_err();
        assert!(matches!(err, SessionError::MeterMismatch { .. }));

        s.complete_shift(95.0, 5.0, 100.0).unwrap();
        assert_eq!(s.completed_workers.len(), 1);
        assert!((s.last_end_meter - 100.0).abs() < f64::EPSILON);
        assert!(s.current_worker.is_none());
    }

    #[test]
    fn second_badge_in_is_rejected_while_a_shift_is_open() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        let err = s
            .assign_worker(WorkerRef::new("W2", "Binh"), "1".into())
            .unwrap_err();
        assert_eq!(err, SessionError::ShiftAlreadyOpen);
    }

    #[test]
    fn next_shift_starts_where_the_last_ended() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.complete_shift(50.0, 0.0, 50.0).unwrap();
        s.assign_worker(WorkerRef::new("W2", "Binh"), "2".into())
            .unwrap();

        let current = s.current_worker.as_ref().unwrap();
        assert!((current.start_meter - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn defect_before_badge_in_creates_a_placeholder_the_worker_claims() {
        let mut s = session();
        s.log_defect(defect("err_1"));

        let current = s.current_worker.as_ref().unwrap();
        assert_eq!(current.worker.id, UNASSIGNED_WORKER_ID);
        assert_eq!(current.defects.len(), 1);

        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        let current = s.current_worker.as_ref().unwrap();
        assert_eq!(current.worker.id, "W1");
        assert_eq!(current.defects.len(), 1, "placeholder defects are kept");
    }

    #[test]
    fn removing_a_defect_filters_by_station_local_id() {
        let mut s = session();
        s.log_defect(defect("err_1"));
        s.log_defect(defect("err_2"));
        s.remove_defect("err_1");

        let current = s.current_worker.as_ref().unwrap();
        assert_eq!(current.defects.len(), 1);
        assert_eq!(current.defects[0].id.as_deref(), Some("err_2"));
    }

    #[test]
    fn unassigned_meters_become_a_pending_entry() {
        let mut s = session();
        s.finalize_unassigned_meters(42.0);

        assert_eq!(s.completed_workers.len(), 1);
        let entry = &s.completed_workers[0];
        assert_eq!(entry.worker.id, PENDING_WORKER_ID);
        assert_eq!(entry.shift, "SYSTEM");
        assert!((entry.meters_g1 - 42.0).abs() < f64::EPSILON);
        assert!((entry.meters_g2 - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gap_capture_is_a_no_op_with_an_open_shift_or_tiny_gap() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.finalize_unassigned_meters(42.0);
        assert!(s.completed_workers.is_empty());

        let mut s = session();
        s.finalize_unassigned_meters(0.05);
        assert!(s.completed_workers.is_empty());

        // A reading behind the accounted span means the meter was reset.
        let mut s = session();
        s.last_end_meter = 80.0;
        s.finalize_unassigned_meters(40.0);
        assert!(s.completed_workers.is_empty());
    }

    #[test]
    fn split_clone_rebases_the_open_shift() {
        let mut s = session();
        s.assign_worker(WorkerRef::new("W1", "An"), "1".into())
            .unwrap();
        s.update_current_meters(30.0, 1.0).unwrap();
        s.log_defect(defect("err_1"));
        s.append_note("roll one");

        let cloned = s.clone_for_split("t-2".into(), "2601XYZ0002".into());
        assert_eq!(cloned.ticket_id, "t-2");
        assert_eq!(cloned.roll_code, "2601XYZ0002");
        assert_eq!(cloned.machine_id, s.machine_id);
        assert!(cloned.completed_workers.is_empty());
        assert!(cloned.notes.is_empty());
        assert_eq!(cloned.status, RollStatus::Pending);

        let carried = cloned.current_worker.as_ref().unwrap();
        assert_eq!(carried.worker.id, "W1");
        assert!((carried.start_meter - 0.0).abs() < f64::EPSILON);
        assert!((carried.meters_g1 - 0.0).abs() < f64::EPSILON);
        assert!(carried.defects.is_empty());
    }

    #[tokio::test]
    async fn manager_owns_the_session_lifecycle() {
        let manager = SessionManager::new();
        manager.insert("st-1", session()).await;
        assert!(manager.get("st-1").await.is_some());

        manager
            .with_session("st-1", |s| {
                s.append_note("note");
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(manager.get("st-1").await.unwrap().notes, "note");

        let ended = manager.end("st-1").await;
        assert!(ended.is_some());
        assert!(manager.get("st-1").await.is_none());

        let err = manager
            .with_session("st-1", |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoActiveSession(_)));
    }
}
