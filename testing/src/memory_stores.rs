//! In-memory counter, relational, local, and meter implementations.

use chrono::{DateTime, Utc};
use loomline_core::counter::{CounterError, CounterStore};
use loomline_core::local::{LocalStore, LocalStoreError, LocalTicket, LocalWorkerRow};
use loomline_core::meter::{MeterError, MeterReader};
use loomline_core::payload::{DefectEntry, InspectionPayload, PENDING_WORKER_ID, RollStatus};
use loomline_core::roll::parse_sequence_suffix;
use loomline_core::store::{RollStore, RollStoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

// ─────────────────────────────────────────────────────────────────────────
// Counter store
// ─────────────────────────────────────────────────────────────────────────

/// In-memory atomic counter store.
///
/// One lock guards the whole key map, so increments to a key are serialized
/// exactly like the production store serializes them — N concurrent
/// increments yield N distinct values.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    counters: Arc<Mutex<HashMap<String, u64>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryCounterStore {
    /// Create an empty counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store being unreachable (or reachable again).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current value of `key` without incrementing (assertion helper; the
    /// production store has no peek in the issuance path).
    #[must_use]
    pub fn value(&self, key: &str) -> u64 {
        self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, CounterError>> + Send + '_>> {
        let this = self.clone();
        let key = key.to_owned();
        Box::pin(async move {
            if this.offline.load(Ordering::SeqCst) {
                return Err(CounterError::Unreachable("offline (injected)".into()));
            }
            let mut counters = this.counters.lock().unwrap();
            let value = counters.entry(key).or_insert(0);
            *value += 1;
            Ok(*value)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let offline = self.offline.load(Ordering::SeqCst);
        Box::pin(async move { !offline })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Relational store
// ─────────────────────────────────────────────────────────────────────────

/// One persisted production row, keyed `(roll, worker, shift)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedProduction {
    /// Worker id (possibly a sentinel until reconciled).
    pub worker_id: String,
    /// Shift label.
    pub shift: String,
    /// Grade-1 meters (latest payload wins).
    pub meters_g1: f64,
    /// Grade-2 meters (latest payload wins).
    pub meters_g2: f64,
    /// Defect set — fully replaced on every persist.
    pub defects: Vec<DefectEntry>,
}

/// One persisted roll with its ticket header and production rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRoll {
    /// Ticket token (also the roll id).
    pub ticket_id: String,
    /// Human-facing code — set once, never overwritten by replays.
    pub roll_code: String,
    /// Fabric name as resolved at persist time.
    pub fabric_name: String,
    /// Machine the roll came off.
    pub machine_id: String,
    /// Inspector on duty.
    pub inspector_id: Option<String>,
    /// Capture time of the last persisted payload.
    pub inspection_date: DateTime<Utc>,
    /// Roll status (latest payload wins).
    pub status: RollStatus,
    /// Grade-1 total, re-derived from production rows on every persist.
    pub meters_grade1: f64,
    /// Grade-2 total, re-derived from production rows on every persist.
    pub meters_grade2: f64,
    /// Production rows keyed `(worker, shift)`.
    pub productions: Vec<PersistedProduction>,
}

/// In-memory model of the relational store.
///
/// Reproduces the consumer-facing contract exactly: upsert by ticket id,
/// roll code never overwritten once set, production rows keyed
/// `(roll, worker, shift)`, defect sets replaced wholesale, and roll totals
/// re-derived from production rows rather than trusted from the payload.
/// `fail_next(n)` scripts the next `n` persists to fail, which is how the
/// requeue-on-failure tests drive the consumer.
#[derive(Clone, Default)]
pub struct MemoryRollStore {
    rolls: Arc<Mutex<HashMap<String, PersistedRoll>>>,
    failures_remaining: Arc<AtomicU32>,
    persist_count: Arc<AtomicU32>,
    offline: Arc<AtomicBool>,
}

impl MemoryRollStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` persist calls to fail with a query error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Simulate the whole store being unreachable (all calls fail).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), RollStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RollStoreError::Unreachable("offline (injected)".into()))
        } else {
            Ok(())
        }
    }

    /// Total persist attempts seen (including failed ones).
    #[must_use]
    pub fn persist_attempts(&self) -> u32 {
        self.persist_count.load(Ordering::SeqCst)
    }

    /// Fetch a persisted roll by ticket token.
    #[must_use]
    pub fn roll(&self, ticket_id: &str) -> Option<PersistedRoll> {
        self.rolls.lock().unwrap().get(ticket_id).cloned()
    }

    /// Number of persisted rolls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rolls.lock().unwrap().len()
    }

    /// Whether nothing has been persisted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rolls.lock().unwrap().is_empty()
    }

    /// Seed a roll directly (for reconciliation and tier-2 tests).
    pub fn insert_roll(&self, roll: PersistedRoll) {
        self.rolls
            .lock()
            .unwrap()
            .insert(roll.ticket_id.clone(), roll);
    }

    fn apply(&self, payload: &InspectionPayload) {
        let mut rolls = self.rolls.lock().unwrap();
        let roll = rolls
            .entry(payload.ticket_id.clone())
            .or_insert_with(|| PersistedRoll {
                ticket_id: payload.ticket_id.clone(),
                roll_code: payload.roll_code.clone(),
                fabric_name: payload.fabric_name.clone(),
                machine_id: payload.machine_id.clone(),
                inspector_id: payload.inspector_id.clone(),
                inspection_date: payload.inspection_date,
                status: payload.status,
                meters_grade1: 0.0,
                meters_grade2: 0.0,
                productions: Vec::new(),
            });

        // Header fields overwrite — except the code, which sticks once set.
        roll.fabric_name = payload.fabric_name.clone();
        roll.machine_id = payload.machine_id.clone();
        roll.inspector_id = payload.inspector_id.clone();
        roll.inspection_date = payload.inspection_date;
        roll.status = payload.status;
        if roll.roll_code.is_empty() {
            roll.roll_code = payload.roll_code.clone();
        }

        for entry in &payload.workers {
            let key_worker = entry.worker.id.clone();
            let key_shift = entry.shift.clone();
            match roll
                .productions
                .iter_mut()
                .find(|p| p.worker_id == key_worker && p.shift == key_shift)
            {
                Some(row) => {
                    row.meters_g1 = entry.meters_g1;
                    row.meters_g2 = entry.meters_g2;
                    row.defects = entry.defects.clone();
                }
                None => roll.productions.push(PersistedProduction {
                    worker_id: key_worker,
                    shift: key_shift,
                    meters_g1: entry.meters_g1,
                    meters_g2: entry.meters_g2,
                    defects: entry.defects.clone(),
                }),
            }
        }

        roll.meters_grade1 = roll.productions.iter().map(|p| p.meters_g1).sum();
        roll.meters_grade2 = roll.productions.iter().map(|p| p.meters_g2).sum();
    }
}

impl RollStore for MemoryRollStore {
    fn persist_payload(
        &self,
        payload: &InspectionPayload,
    ) -> Pin<Box<dyn Future<Output = Result<(), RollStoreError>> + Send + '_>> {
        let this = self.clone();
        let payload = payload.clone();
        Box::pin(async move {
            this.persist_count.fetch_add(1, Ordering::SeqCst);
            this.check_reachable()?;
            let remaining = this.failures_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                this.failures_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(RollStoreError::Query("persist failure (injected)".into()));
            }
            this.apply(&payload);
            Ok(())
        })
    }

    fn max_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<u64>, RollStoreError>> + Send + '_>> {
        let this = self.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move {
            this.check_reachable()?;
            let rolls = this.rolls.lock().unwrap();
            Ok(rolls
                .values()
                .filter(|r| r.roll_code.starts_with(&prefix))
                .filter_map(|r| parse_sequence_suffix(&r.roll_code))
                .max())
        })
    }

    fn reconcile_pending_worker(
        &self,
        current_ticket: &str,
        worker_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, RollStoreError>> + Send + '_>> {
        let this = self.clone();
        let current_ticket = current_ticket.to_owned();
        let worker_id = worker_id.to_owned();
        Box::pin(async move {
            this.check_reachable()?;
            let mut rolls = this.rolls.lock().unwrap();

            let machine_id = match rolls.get(&current_ticket) {
                Some(roll) => roll.machine_id.clone(),
                None => return Ok(0),
            };

            // Most recent roll on the same machine, excluding the current
            // ticket — roll codes sort chronologically within a prefix.
            let previous = rolls
                .values_mut()
                .filter(|r| r.machine_id == machine_id && r.ticket_id != current_ticket)
                .max_by(|a, b| a.roll_code.cmp(&b.roll_code));

            let Some(previous) = previous else {
                return Ok(0);
            };

            let mut updated = 0u64;
            for row in &mut previous.productions {
                if row.worker_id == PENDING_WORKER_ID {
                    row.worker_id = worker_id.clone();
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Local store
// ─────────────────────────────────────────────────────────────────────────

/// In-memory per-station fallback store: stores the saved payloads keyed by
/// ticket and answers the tier-3 sequence query from them.
#[derive(Clone, Default)]
pub struct MemoryLocalStore {
    saved: Arc<Mutex<HashMap<String, (InspectionPayload, String)>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryLocalStore {
    /// Create an empty local store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate local storage failure (or recovery).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of locally saved rolls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    /// Whether nothing has been saved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.lock().unwrap().is_empty()
    }

    /// Seed a saved roll directly (for tier-3 tests).
    pub fn seed(&self, payload: InspectionPayload) {
        self.saved
            .lock()
            .unwrap()
            .insert(payload.ticket_id.clone(), (payload, String::new()));
    }

    fn check(&self) -> Result<(), LocalStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(LocalStoreError::Storage("offline (injected)".into()))
        } else {
            Ok(())
        }
    }
}

impl LocalStore for MemoryLocalStore {
    fn save_roll(
        &self,
        payload: &InspectionPayload,
        notes: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>> {
        let this = self.clone();
        let payload = payload.clone();
        let notes = notes.to_owned();
        Box::pin(async move {
            this.check()?;
            this.saved
                .lock()
                .unwrap()
                .insert(payload.ticket_id.clone(), (payload, notes));
            Ok(())
        })
    }

    fn next_sequence(
        &self,
        prefix: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LocalStoreError>> + Send + '_>> {
        let this = self.clone();
        let prefix = prefix.to_owned();
        Box::pin(async move {
            this.check()?;
            let saved = this.saved.lock().unwrap();
            let max = saved
                .values()
                .filter(|(p, _)| p.roll_code.starts_with(&prefix))
                .filter_map(|(p, _)| parse_sequence_suffix(&p.roll_code))
                .max();
            Ok(max.map_or(1, |m| m + 1))
        })
    }

    fn ticket_info(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<LocalTicket>, LocalStoreError>> + Send + '_>>
    {
        let this = self.clone();
        let ticket_id = ticket_id.to_owned();
        Box::pin(async move {
            this.check()?;
            let saved = this.saved.lock().unwrap();
            Ok(saved.get(&ticket_id).map(|(p, notes)| LocalTicket {
                ticket_id: p.ticket_id.clone(),
                roll_code: p.roll_code.clone(),
                fabric_name: p.fabric_name.clone(),
                machine_id: p.machine_id.clone(),
                inspector_id: p.inspector_id.clone(),
                order_number: p.order_number.clone(),
                inspection_date: p.inspection_date,
                status: p.status,
                notes: notes.clone(),
            }))
        })
    }

    fn worker_log(
        &self,
        ticket_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<LocalWorkerRow>, LocalStoreError>> + Send + '_>>
    {
        let this = self.clone();
        let ticket_id = ticket_id.to_owned();
        Box::pin(async move {
            this.check()?;
            let saved = this.saved.lock().unwrap();
            Ok(saved.get(&ticket_id).map_or_else(Vec::new, |(p, _)| {
                p.workers
                    .iter()
                    .map(|w| LocalWorkerRow {
                        worker_name: w.worker.name.clone(),
                        shift: w.shift.clone(),
                        total_meters: w.total_meters,
                        meters_g1: w.meters_g1,
                        meters_g2: w.meters_g2,
                    })
                    .collect()
            }))
        })
    }

    fn update_post_action(
        &self,
        ticket_id: &str,
        notes: &str,
        status: RollStatus,
    ) -> Pin<Box<dyn Future<Output = Result<(), LocalStoreError>> + Send + '_>> {
        let this = self.clone();
        let ticket_id = ticket_id.to_owned();
        let notes = notes.to_owned();
        Box::pin(async move {
            this.check()?;
            let mut saved = this.saved.lock().unwrap();
            if let Some((payload, stored_notes)) = saved.get_mut(&ticket_id) {
                payload.status = status;
                *stored_notes = notes;
            }
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Meter
// ─────────────────────────────────────────────────────────────────────────

/// Settable meter reading for tests.
#[derive(Clone, Default)]
pub struct FixedMeter {
    meters: Arc<Mutex<f64>>,
}

impl FixedMeter {
    /// Create a meter reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current reading.
    pub fn set(&self, meters: f64) {
        *self.meters.lock().unwrap() = meters;
    }
}

impl MeterReader for FixedMeter {
    fn current_meters(&self) -> f64 {
        *self.meters.lock().unwrap()
    }

    fn reset(&self) -> Result<(), MeterError> {
        *self.meters.lock().unwrap() = 0.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomline_core::payload::{WorkerLog, WorkerRef};

    fn payload(ticket: &str, code: &str, workers: Vec<WorkerLog>) -> InspectionPayload {
        InspectionPayload {
            ticket_id: ticket.into(),
            roll_code: code.into(),
            fabric_name: "XYZ".into(),
            machine_id: "M01".into(),
            inspector_id: None,
            order_number: None,
            deployment_ticket_id: None,
            inspection_date: Utc::now(),
            status: RollStatus::ToInspectedWarehouse,
            meters_grade1: 0.0,
            meters_grade2: 0.0,
            workers,
        }
    }

    fn worker(id: &str, shift: &str, g1: f64, g2: f64) -> WorkerLog {
        WorkerLog {
            worker: WorkerRef::new(id, id),
            shift: shift.into(),
            start_meter: 0.0,
            end_meter: g1 + g2,
            total_meters: g1 + g2,
            meters_g1: g1,
            meters_g2: g2,
            defects: vec![],
        }
    }

    #[tokio::test]
    async fn counter_increments_are_distinct_and_dense() {
        let store = MemoryCounterStore::new();
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(store.increment("seq:roll:2601XYZ").await.unwrap());
        }
        assert_eq!(seen, (1..=10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn replaying_a_payload_does_not_double_count() {
        let store = MemoryRollStore::new();
        let p = payload("t-1", "2601XYZ0001", vec![worker("W1", "1", 100.0, 5.0)]);

        store.persist_payload(&p).await.unwrap();
        store.persist_payload(&p).await.unwrap();

        let roll = store.roll("t-1").unwrap();
        assert_eq!(roll.productions.len(), 1);
        assert!((roll.meters_grade1 - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reconcile_claims_pending_rows_on_previous_roll() {
        let store = MemoryRollStore::new();
        let mut previous = payload(
            "t-prev",
            "2601XYZ0001",
            vec![worker(PENDING_WORKER_ID, "SYSTEM", 12.0, 0.0)],
        );
        previous.status = RollStatus::ToInspectedWarehouse;
        store.persist_payload(&previous).await.unwrap();
        let current = payload("t-curr", "2601XYZ0002", vec![]);
        store.persist_payload(&current).await.unwrap();

        let updated = store.reconcile_pending_worker("t-curr", "W9").await.unwrap();
        assert_eq!(updated, 1);
        let roll = store.roll("t-prev").unwrap();
        assert_eq!(roll.productions[0].worker_id, "W9");

        // Second call finds nothing pending.
        let again = store.reconcile_pending_worker("t-curr", "W9").await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn local_sequence_continues_from_station_history() {
        let store = MemoryLocalStore::new();
        assert_eq!(store.next_sequence("2601XYZ").await.unwrap(), 1);
        store.seed(payload("t-1", "2601XYZ0007", vec![]));
        assert_eq!(store.next_sequence("2601XYZ").await.unwrap(), 8);
        assert_eq!(store.next_sequence("2601ABC").await.unwrap(), 1);
    }
}
