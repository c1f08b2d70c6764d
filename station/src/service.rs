//! Roll-boundary orchestration: finish, split, shifts, defects, fabric
//! changes.
//!
//! [`RollService`] is the station's single entry point for everything that
//! touches the pipeline. The roll-boundary flow is always the same:
//!
//! 1. Capture any unassigned tail meters as a pending-worker entry.
//! 2. Build the payload from the session (open shift synthesized in).
//! 3. Save it to the local store — the synchronous durability backup,
//!    independent of network reachability.
//! 4. Push it onto the durable queue. A push failure is a hard stop
//!    surfaced to the operator: the previous roll's local save has already
//!    completed, only the hand-off to central persistence is blocked.
//! 5. Peripherals (label print, meter reset) run last and only log on
//!    failure — the data is already safe.

use crate::builder;
use crate::sequence::{SequenceError, SequenceIssuer};
use crate::session::{InspectionSession, SessionError, SessionManager, SessionStart};
use chrono::{DateTime, Utc};
use loomline_core::local::{LocalStore, LocalStoreError};
use loomline_core::meter::MeterReader;
use loomline_core::payload::{DefectEntry, InspectionPayload, RollStatus, WorkerRef};
use loomline_core::queue::{INSPECTION_QUEUE, PayloadQueue, QueueError};
use loomline_core::store::RollStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to the station operator.
#[derive(Debug, Error)]
pub enum StationError {
    /// Session-state violation (no session, open shift, meter mismatch).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// All sequence tiers failed — no roll code can be issued, the
    /// operation must not proceed with a guessed or empty code.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// The durable queue rejected the payload — hard stop for this
    /// roll-boundary action; the local save has already completed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The local durability write failed.
    #[error(transparent)]
    Local(#[from] LocalStoreError),

    /// The payload could not be serialized for the queue.
    #[error("payload serialization failed: {0}")]
    Encode(String),

    /// The printing collaborator failed.
    #[error(transparent)]
    Print(#[from] PrintError),

    /// A printable ticket was not found in the local store.
    #[error("ticket {0} not found in local store")]
    TicketNotFound(String),
}

/// Denormalized label fields handed to the printing collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RollLabel {
    /// Ticket token.
    pub ticket_id: String,
    /// Human-facing roll code.
    pub roll_code: String,
    /// Fabric name.
    pub fabric_name: String,
    /// Machine id.
    pub machine_id: String,
    /// Production order, when known.
    pub order_number: Option<String>,
    /// Capture time of the roll snapshot.
    pub inspection_date: DateTime<Utc>,
    /// Total meters across all workers.
    pub total_meters: f64,
    /// Grade-1 total.
    pub meters_grade1: f64,
    /// Grade-2 total.
    pub meters_grade2: f64,
    /// Inspector on duty, when known.
    pub inspector_id: Option<String>,
}

/// Label printing failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("label printing failed: {0}")]
pub struct PrintError(pub String);

/// Printing collaborator invoked after a roll boundary. Outside the
/// pipeline's scope; it consumes the label's denormalized fields only.
pub trait LabelPrinter: Send + Sync {
    /// Print one roll label.
    ///
    /// # Errors
    ///
    /// [`PrintError`] when the label cannot be printed; callers treat this
    /// as a peripheral fault and log it.
    fn print_roll(
        &self,
        label: &RollLabel,
    ) -> Pin<Box<dyn Future<Output = Result<(), PrintError>> + Send + '_>>;
}

/// Printer that logs the label instead of driving hardware. Default for
/// deployments without a label printer attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPrinter;

impl LabelPrinter for LogPrinter {
    fn print_roll(
        &self,
        label: &RollLabel,
    ) -> Pin<Box<dyn Future<Output = Result<(), PrintError>> + Send + '_>> {
        tracing::info!(
            roll_code = %label.roll_code,
            fabric = %label.fabric_name,
            total_meters = label.total_meters,
            "label printed (log only)"
        );
        Box::pin(async { Ok(()) })
    }
}

/// Parameters for starting an inspection.
#[derive(Debug, Clone)]
pub struct StartInspection {
    /// Machine the station is inspecting.
    pub machine_id: String,
    /// Fabric under inspection.
    pub fabric_name: String,
    /// Inspector starting the session.
    pub inspector_id: Option<String>,
    /// Production order, when order-driven.
    pub order_number: Option<String>,
    /// Parent deployment order, when order-driven.
    pub deployment_ticket_id: Option<String>,
    /// Manual setup (no deployment order).
    pub manual: bool,
}

/// Result of a split: the closed roll's payload and the fresh session that
/// continues on the same machine.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// Payload of the roll just closed (already saved and queued).
    pub closed: InspectionPayload,
    /// The continuing session with its new ticket and code.
    pub new_session: InspectionSession,
}

/// Station-side orchestration over the pipeline's seams.
#[derive(Clone)]
pub struct RollService {
    sessions: Arc<SessionManager>,
    issuer: SequenceIssuer,
    queue: Arc<dyn PayloadQueue>,
    local: Arc<dyn LocalStore>,
    central: Arc<dyn RollStore>,
    meter: Arc<dyn MeterReader>,
    printer: Arc<dyn LabelPrinter>,
}

impl RollService {
    /// Wire the service to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionManager>,
        issuer: SequenceIssuer,
        queue: Arc<dyn PayloadQueue>,
        local: Arc<dyn LocalStore>,
        central: Arc<dyn RollStore>,
        meter: Arc<dyn MeterReader>,
        printer: Arc<dyn LabelPrinter>,
    ) -> Self {
        Self {
            sessions,
            issuer,
            queue,
            local,
            central,
            meter,
            printer,
        }
    }

    /// Session manager handle (read paths for UI state).
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Start a new inspection session: issue a roll code through the tier
    /// chain, mint a ticket token, install the session.
    ///
    /// # Errors
    ///
    /// [`StationError::Sequence`] when no code can be issued — the session
    /// is not created.
    pub async fn start_session(
        &self,
        station_id: &str,
        params: StartInspection,
    ) -> Result<InspectionSession, StationError> {
        let roll_code = self.issuer.issue_roll_code(&params.fabric_name).await?;
        let ticket_id = Uuid::new_v4().to_string();

        let session = InspectionSession::start(SessionStart {
            machine_id: params.machine_id,
            ticket_id,
            roll_code,
            fabric_name: params.fabric_name,
            inspector_id: params.inspector_id,
            order_number: params.order_number,
            deployment_ticket_id: params.deployment_ticket_id,
            manual: params.manual,
        });

        tracing::info!(
            station_id,
            ticket_id = %session.ticket_id,
            roll_code = %session.roll_code,
            "inspection session started"
        );
        self.sessions.insert(station_id, session.clone()).await;
        Ok(session)
    }

    /// Badge a worker in, then retroactively claim any pending-worker rows
    /// on the previous roll of this machine (best-effort).
    ///
    /// # Errors
    ///
    /// [`StationError::Session`] when no session is active or a shift is
    /// already open. Reconciliation failures are logged, never surfaced.
    pub async fn start_worker_shift(
        &self,
        station_id: &str,
        worker: WorkerRef,
        shift: String,
    ) -> Result<(), StationError> {
        let worker_id = worker.id.clone();
        let ticket_id = self
            .sessions
            .with_session(station_id, |session| {
                session.assign_worker(worker, shift)?;
                Ok(session.ticket_id.clone())
            })
            .await?;

        if let Err(e) = self
            .central
            .reconcile_pending_worker(&ticket_id, &worker_id)
            .await
        {
            tracing::warn!(
                ticket_id = %ticket_id,
                worker_id = %worker_id,
                error = %e,
                "pending-worker reconciliation failed (best-effort, continuing)"
            );
        }
        Ok(())
    }

    /// Close the open shift at the current machine reading.
    ///
    /// # Errors
    ///
    /// [`StationError::Session`] when no shift is open or the figures do
    /// not match the machine span.
    pub async fn end_worker_shift(
        &self,
        station_id: &str,
        meters_g1: f64,
        meters_g2: f64,
    ) -> Result<(), StationError> {
        let end_meter = self.meter.current_meters();
        self.sessions
            .with_session(station_id, |session| {
                session.complete_shift(meters_g1, meters_g2, end_meter)
            })
            .await?;
        Ok(())
    }

    /// Record the open shift's running grade tallies.
    ///
    /// # Errors
    ///
    /// [`StationError::Session`] when nobody is badged in.
    pub async fn record_meters(
        &self,
        station_id: &str,
        meters_g1: f64,
        meters_g2: f64,
    ) -> Result<(), StationError> {
        self.sessions
            .with_session(station_id, |session| {
                session.update_current_meters(meters_g1, meters_g2)
            })
            .await?;
        Ok(())
    }

    /// Log a defect at the current meter position, creating a placeholder
    /// shift when nobody is badged in.
    ///
    /// # Errors
    ///
    /// [`StationError::Session`] when no session is active.
    pub async fn log_defect(
        &self,
        station_id: &str,
        error_type: String,
        points: i32,
    ) -> Result<DefectEntry, StationError> {
        let defect = DefectEntry {
            id: Some(format!("err_{}", Utc::now().timestamp_millis())),
            error_type,
            meter_location: self.meter.current_meters(),
            points,
            is_fixed: false,
        };
        let recorded = defect.clone();
        self.sessions
            .with_session(station_id, |session| {
                session.log_defect(defect);
                Ok(())
            })
            .await?;
        Ok(recorded)
    }

    /// Remove a defect from the open shift by its station-local id.
    ///
    /// # Errors
    ///
    /// [`StationError::Session`] when no session is active.
    pub async fn remove_defect(&self, station_id: &str, defect_id: &str) -> Result<(), StationError> {
        self.sessions
            .with_session(station_id, |session| {
                session.remove_defect(defect_id);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Switch the session to a different fabric, re-issuing the roll code
    /// under the new fabric's prefix.
    ///
    /// # Errors
    ///
    /// [`StationError::Sequence`] when no code can be issued under the new
    /// prefix; the session keeps its old fabric and code.
    pub async fn change_fabric(
        &self,
        station_id: &str,
        new_fabric_name: String,
    ) -> Result<String, StationError> {
        let roll_code = self.issuer.issue_roll_code(&new_fabric_name).await?;
        let reissued = roll_code.clone();
        self.sessions
            .with_session(station_id, |session| {
                session.update_fabric(new_fabric_name, roll_code);
                Ok(())
            })
            .await?;
        Ok(reissued)
    }

    /// Finalize the current roll with a terminal status and destroy the
    /// session.
    ///
    /// # Errors
    ///
    /// [`StationError`] when the session is missing, the local save fails,
    /// or the queue push fails. On queue failure the session is retained so
    /// the operator can retry; the local save has already completed.
    pub async fn finish_roll(
        &self,
        station_id: &str,
        status: RollStatus,
        notes: &str,
    ) -> Result<InspectionPayload, StationError> {
        let payload = self.close_roll(station_id, status, notes).await?;
        self.sessions.end(station_id).await;
        self.run_peripherals(&payload.ticket_id);
        Ok(payload)
    }

    /// Close the current roll and continue inspecting the same fabric on a
    /// fresh roll (split).
    ///
    /// The closed roll keeps its session until the new code is issued, so a
    /// sequence failure leaves the operator able to retry — the close is
    /// idempotent end to end (local upsert, queued payload upserts).
    ///
    /// # Errors
    ///
    /// [`StationError`] from the close path or from issuing the new code.
    pub async fn split_roll(&self, station_id: &str) -> Result<SplitOutcome, StationError> {
        let closed = self
            .close_roll(station_id, RollStatus::ToInspectedWarehouse, "")
            .await?;
        self.run_peripherals(&closed.ticket_id);

        let new_roll_code = self.issuer.issue_roll_code(&closed.fabric_name).await?;
        let new_ticket_id = Uuid::new_v4().to_string();
        let new_session = self
            .sessions
            .with_session(station_id, |session| {
                Ok(session.clone_for_split(new_ticket_id, new_roll_code))
            })
            .await?;
        self.sessions.insert(station_id, new_session.clone()).await;

        tracing::info!(
            station_id,
            closed_roll = %closed.roll_code,
            new_roll = %new_session.roll_code,
            "roll split"
        );
        Ok(SplitOutcome {
            closed,
            new_session,
        })
    }

    /// Reprint the label for a locally stored ticket.
    ///
    /// # Errors
    ///
    /// [`StationError::TicketNotFound`] when the ticket is not in the local
    /// store; [`StationError::Local`] when the read fails.
    pub async fn reprint(&self, ticket_id: &str) -> Result<(), StationError> {
        self.print_ticket(ticket_id).await
    }

    /// Shared close path: gap capture, snapshot, local save, queue push.
    async fn close_roll(
        &self,
        station_id: &str,
        status: RollStatus,
        notes: &str,
    ) -> Result<InspectionPayload, StationError> {
        let machine_meter = self.meter.current_meters();
        let (payload, session_notes) = self
            .sessions
            .with_session(station_id, |session| {
                session.finalize_unassigned_meters(machine_meter);
                session.status = status;
                session.append_note(notes);
                Ok((builder::build(session), session.notes.clone()))
            })
            .await?;

        // Local first: the durable record must exist before any network
        // hand-off is attempted.
        self.local.save_roll(&payload, &session_notes).await?;

        let bytes = payload
            .to_bytes()
            .map_err(|e| StationError::Encode(e.to_string()))?;
        self.queue.push_back(INSPECTION_QUEUE, &bytes).await?;

        tracing::info!(
            station_id,
            ticket_id = %payload.ticket_id,
            roll_code = %payload.roll_code,
            status = payload.status.as_str(),
            "roll closed: saved locally and queued"
        );
        Ok(payload)
    }

    /// Post-boundary peripherals: meter reset and label print. Failures are
    /// logged — the roll data is already safe.
    fn run_peripherals(&self, ticket_id: &str) {
        if let Err(e) = self.meter.reset() {
            tracing::warn!(error = %e, "meter reset failed after roll boundary");
        }

        let service = self.clone();
        let ticket_id = ticket_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = service.print_ticket(&ticket_id).await {
                tracing::warn!(ticket_id = %ticket_id, error = %e, "label print failed");
            }
        });
    }

    async fn print_ticket(&self, ticket_id: &str) -> Result<(), StationError> {
        let info = self
            .local
            .ticket_info(ticket_id)
            .await?
            .ok_or_else(|| StationError::TicketNotFound(ticket_id.to_owned()))?;
        let log = self.local.worker_log(ticket_id).await?;

        let total_meters = log.iter().map(|row| row.total_meters).sum();
        let meters_grade1 = log.iter().map(|row| row.meters_g1).sum();
        let meters_grade2 = log.iter().map(|row| row.meters_g2).sum();

        let label = RollLabel {
            ticket_id: info.ticket_id,
            roll_code: info.roll_code,
            fabric_name: info.fabric_name,
            machine_id: info.machine_id,
            order_number: info.order_number,
            inspection_date: info.inspection_date,
            total_meters,
            meters_grade1,
            meters_grade2,
            inspector_id: info.inspector_id,
        };

        self.printer.print_roll(&label).await?;
        Ok(())
    }
}
