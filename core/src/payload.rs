//! The inspection payload — the wire format of the durable queue.
//!
//! An [`InspectionPayload`] is a flattened, self-contained snapshot of one
//! roll at a boundary event (finish or split). It is serialized to JSON by
//! the producing station, buffered in the queue, and consumed by the
//! persistence worker with at-least-once delivery — so every field a
//! consumer needs must travel inside the payload, and replaying the same
//! payload must be harmless (the consumer upserts, never blind-inserts).
//!
//! # Legacy field names
//!
//! Two generations of stations serialize worker meters and defect lists
//! under different keys (`meters_g1` vs `meters_grade1`, `errors` vs
//! `current_errors`). Deserialization accepts both; serialization always
//! emits the canonical form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel worker id for meters produced across a roll boundary before the
/// next shift's worker has badged in. Rows carrying this id are claimed
/// retroactively by [`RollStore::reconcile_pending_worker`].
///
/// [`RollStore::reconcile_pending_worker`]: crate::store::RollStore::reconcile_pending_worker
pub const PENDING_WORKER_ID: &str = "PENDING_NEXT_ROLL";

/// Sentinel worker id for defects logged while nobody is badged in at the
/// station. Claimed in place when the next worker starts a shift.
pub const UNASSIGNED_WORKER_ID: &str = "UNASSIGNED";

/// Lifecycle status of a roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollStatus {
    /// Session open, roll still being inspected.
    #[default]
    Pending,
    /// Freshly issued roll, no inspection data yet.
    New,
    /// Closed and routed to the inspected-goods warehouse.
    ToInspectedWarehouse,
    /// Closed and routed to the repair warehouse.
    ToRepairWarehouse,
    /// Closed as downgraded quality.
    Downgraded,
}

impl RollStatus {
    /// Wire/database representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::New => "NEW",
            Self::ToInspectedWarehouse => "TO_INSPECTED_WAREHOUSE",
            Self::ToRepairWarehouse => "TO_REPAIR_WAREHOUSE",
            Self::Downgraded => "DOWNGRADED",
        }
    }
}

impl std::str::FromStr for RollStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "NEW" => Ok(Self::New),
            "TO_INSPECTED_WAREHOUSE" => Ok(Self::ToInspectedWarehouse),
            "TO_REPAIR_WAREHOUSE" => Ok(Self::ToRepairWarehouse),
            "DOWNGRADED" => Ok(Self::Downgraded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A status string that is not one of the known lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown roll status: {0}")]
pub struct UnknownStatus(pub String);

/// A worker reference as it appears in payloads: opaque id plus the display
/// name captured at badge-in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRef {
    /// Worker id — a personnel id or one of the sentinel values.
    pub id: String,
    /// Display name at the time the entry was recorded.
    #[serde(default)]
    pub name: String,
}

impl WorkerRef {
    /// Build a reference from an id/name pair.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Whether this reference is the pending-identification sentinel.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.id == PENDING_WORKER_ID
    }
}

/// One defect observation inside a worker's shift log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectEntry {
    /// Station-local id (used only for in-session edits, not persisted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Defect classification name.
    pub error_type: String,
    /// Cumulative meter reading where the defect was observed.
    #[serde(default)]
    pub meter_location: f64,
    /// Penalty points for this defect.
    #[serde(default = "default_points")]
    pub points: i32,
    /// Whether the defect has been repaired.
    #[serde(default)]
    pub is_fixed: bool,
}

const fn default_points() -> i32 {
    1
}

/// One worker's recorded contribution to a roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLog {
    /// Who produced this span.
    pub worker: WorkerRef,
    /// Shift label (`"1"`, `"2"`, `"SYSTEM"` for gap entries, ...).
    pub shift: String,
    /// Cumulative meter reading when the span started.
    #[serde(default)]
    pub start_meter: f64,
    /// Cumulative meter reading when the span ended.
    #[serde(default)]
    pub end_meter: f64,
    /// Span length in meters.
    #[serde(default)]
    pub total_meters: f64,
    /// Grade-1 meters produced in the span.
    #[serde(default, alias = "meters_grade1")]
    pub meters_g1: f64,
    /// Grade-2 meters produced in the span.
    #[serde(default, alias = "meters_grade2")]
    pub meters_g2: f64,
    /// Defects observed during the span. Canonical key is `errors`;
    /// `current_errors` is accepted from older stations.
    #[serde(default, rename = "errors", alias = "current_errors")]
    pub defects: Vec<DefectEntry>,
}

/// Self-contained snapshot of one roll at a boundary event.
///
/// Constructed once per boundary by the payload builder, pushed to the
/// durable queue, and consumed (at-least-once) by the persistence worker.
/// The grade totals are computed from the worker entries at construction
/// time — consumers re-derive them again from what they actually persist,
/// so a hand-crafted payload cannot skew roll totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionPayload {
    /// Opaque unique ticket token (UUID) for the roll's inspection record.
    pub ticket_id: String,
    /// Human-facing roll code issued by the sequence pipeline.
    pub roll_code: String,
    /// Fabric name under inspection.
    pub fabric_name: String,
    /// Weaving machine the roll came off.
    pub machine_id: String,
    /// Inspector on duty, when known.
    #[serde(default)]
    pub inspector_id: Option<String>,
    /// Production order number, when known.
    #[serde(default)]
    pub order_number: Option<String>,
    /// Parent deployment order reference, when the session is order-driven.
    #[serde(default)]
    pub deployment_ticket_id: Option<String>,
    /// Wall-clock capture time of this snapshot.
    pub inspection_date: DateTime<Utc>,
    /// Roll status at capture time.
    #[serde(default)]
    pub status: RollStatus,
    /// Grade-1 total across all worker entries.
    #[serde(default)]
    pub meters_grade1: f64,
    /// Grade-2 total across all worker entries.
    #[serde(default)]
    pub meters_grade2: f64,
    /// Per-worker shift logs, each carrying its own defect list.
    #[serde(default, rename = "workers_log")]
    pub workers: Vec<WorkerLog>,
}

impl InspectionPayload {
    /// Serialize to the queue wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if serialization fails
    /// (not expected for well-formed payloads).
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the queue wire format.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error for malformed bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn status_uses_screaming_snake_case_on_the_wire() {
        let json = serde_json::to_string(&RollStatus::ToInspectedWarehouse).unwrap();
        assert_eq!(json, "\"TO_INSPECTED_WAREHOUSE\"");
    }

    #[test]
    fn worker_log_accepts_both_meter_key_generations() {
        let legacy: WorkerLog = serde_json::from_str(
            r#"{"worker":{"id":"W1","name":"An"},"shift":"1",
                "meters_grade1":80.0,"meters_grade2":2.5,"errors":[]}"#,
        )
        .unwrap();
        let canonical: WorkerLog = serde_json::from_str(
            r#"{"worker":{"id":"W1","name":"An"},"shift":"1",
                "meters_g1":80.0,"meters_g2":2.5,"errors":[]}"#,
        )
        .unwrap();
        assert_eq!(legacy.meters_g1, canonical.meters_g1);
        assert_eq!(legacy.meters_g2, canonical.meters_g2);
    }

    #[test]
    fn worker_log_accepts_both_defect_list_keys() {
        let current: WorkerLog = serde_json::from_str(
            r#"{"worker":{"id":"W1"},"shift":"1",
                "current_errors":[{"error_type":"slub","meter_location":10.0}]}"#,
        )
        .unwrap();
        assert_eq!(current.defects.len(), 1);
        assert_eq!(current.defects[0].points, 1);

        let serialized = serde_json::to_value(&current).unwrap();
        assert!(serialized.get("errors").is_some());
        assert!(serialized.get("current_errors").is_none());
    }

    #[test]
    fn payload_round_trips_byte_for_byte_content() {
        let payload = InspectionPayload {
            ticket_id: "t-1".into(),
            roll_code: "2601XYZ0001".into(),
            fabric_name: "XYZ".into(),
            machine_id: "M01".into(),
            inspector_id: Some("I9".into()),
            order_number: Some("PO-77".into()),
            deployment_ticket_id: None,
            inspection_date: Utc::now(),
            status: RollStatus::ToInspectedWarehouse,
            meters_grade1: 120.0,
            meters_grade2: 3.0,
            workers: vec![WorkerLog {
                worker: WorkerRef::new("W1", "An"),
                shift: "1".into(),
                start_meter: 0.0,
                end_meter: 123.0,
                total_meters: 123.0,
                meters_g1: 120.0,
                meters_g2: 3.0,
                defects: vec![DefectEntry {
                    id: None,
                    error_type: "slub".into(),
                    meter_location: 55.0,
                    points: 2,
                    is_fixed: false,
                }],
            }],
        };

        let bytes = payload.to_bytes().unwrap();
        let decoded = InspectionPayload::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }
}
