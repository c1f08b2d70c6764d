//! Three-tier roll-sequence issuance.
//!
//! Tiers are tried in strict order, first success wins:
//!
//! 1. **Shared counter** — one atomic server-side increment. Safe under
//!    arbitrary concurrent callers; the only tier that cannot duplicate.
//! 2. **Central database** — highest persisted code under the prefix + 1.
//!    A plain read-then-use: two stations racing through it can collide.
//!    Exists to keep a station operable during a counter outage; duplicate
//!    codes are reconciled by out-of-band repair tooling.
//! 3. **Local history** — same read-then-use, but only over this station's
//!    own issuance history. The weakest tier, for total network outage.
//!
//! A tier failure is logged and silently demoted to the next tier; only
//! the last tier's failure reaches the caller — the station must never
//! issue a roll without a code.

use loomline_core::counter::{CounterStore, roll_sequence_key};
use loomline_core::local::LocalStore;
use loomline_core::roll::{format_roll_code, sequence_prefix};
use loomline_core::store::RollStore;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// All sequence tiers failed; no roll code can be issued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot issue roll sequence for prefix {prefix}: all tiers failed (last: {last_error})")]
pub struct SequenceError {
    /// Prefix the issuance was for.
    pub prefix: String,
    /// Failure reported by the last tier.
    pub last_error: String,
}

/// The ordered fallback tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    SharedCounter,
    CentralDb,
    LocalHistory,
}

/// Strict evaluation order.
const TIERS: [Tier; 3] = [Tier::SharedCounter, Tier::CentralDb, Tier::LocalHistory];

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedCounter => write!(f, "shared-counter"),
            Self::CentralDb => write!(f, "central-db"),
            Self::LocalHistory => write!(f, "local-history"),
        }
    }
}

/// Issues the next roll sequence for a prefix through the tier chain.
#[derive(Clone)]
pub struct SequenceIssuer {
    counter: Arc<dyn CounterStore>,
    central: Arc<dyn RollStore>,
    local: Arc<dyn LocalStore>,
}

impl SequenceIssuer {
    /// Wire the issuer to its three sequence sources.
    #[must_use]
    pub fn new(
        counter: Arc<dyn CounterStore>,
        central: Arc<dyn RollStore>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            counter,
            central,
            local,
        }
    }

    /// Issue the next sequence number for `prefix`.
    ///
    /// Never returns a value already returned for the prefix as long as
    /// tier 1 answers; under the degraded tiers, monotonic against the
    /// visible history only (see the module docs for the race window).
    ///
    /// # Errors
    ///
    /// [`SequenceError`] when every tier fails — fatal to the roll-boundary
    /// action; the caller surfaces it to the operator.
    pub async fn next_sequence(&self, prefix: &str) -> Result<u64, SequenceError> {
        let mut last_error = String::new();

        for tier in TIERS {
            match self.try_tier(tier, prefix).await {
                Ok(sequence) => {
                    if tier != Tier::SharedCounter {
                        tracing::warn!(
                            %tier,
                            prefix,
                            sequence,
                            "issued sequence from degraded tier"
                        );
                    }
                    return Ok(sequence);
                }
                Err(reason) => {
                    tracing::warn!(%tier, prefix, %reason, "sequence tier failed, demoting");
                    last_error = reason;
                }
            }
        }

        tracing::error!(prefix, %last_error, "all sequence tiers failed");
        Err(SequenceError {
            prefix: prefix.to_owned(),
            last_error,
        })
    }

    /// Issue a full roll code for a fabric at the current instant.
    ///
    /// # Errors
    ///
    /// [`SequenceError`] when every tier fails.
    pub async fn issue_roll_code(&self, fabric_name: &str) -> Result<String, SequenceError> {
        let prefix = sequence_prefix(fabric_name, Utc::now());
        let sequence = self.next_sequence(&prefix).await?;
        Ok(format_roll_code(&prefix, sequence))
    }

    async fn try_tier(&self, tier: Tier, prefix: &str) -> Result<u64, String> {
        match tier {
            Tier::SharedCounter => self
                .counter
                .increment(&roll_sequence_key(prefix))
                .await
                .map_err(|e| e.to_string()),
            Tier::CentralDb => self
                .central
                .max_sequence(prefix)
                .await
                .map(|max| max.map_or(1, |m| m + 1))
                .map_err(|e| e.to_string()),
            Tier::LocalHistory => self.local.next_sequence(prefix).await.map_err(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use loomline_core::payload::{InspectionPayload, RollStatus};
    use loomline_testing::{MemoryCounterStore, MemoryLocalStore, MemoryRollStore, PersistedRoll};

    fn issuer(
        counter: &MemoryCounterStore,
        central: &MemoryRollStore,
        local: &MemoryLocalStore,
    ) -> SequenceIssuer {
        SequenceIssuer::new(
            Arc::new(counter.clone()),
            Arc::new(central.clone()),
            Arc::new(local.clone()),
        )
    }

    fn persisted(ticket: &str, code: &str) -> PersistedRoll {
        PersistedRoll {
            ticket_id: ticket.into(),
            roll_code: code.into(),
            fabric_name: "XYZ".into(),
            machine_id: "M01".into(),
            inspector_id: None,
            inspection_date: chrono::Utc::now(),
            status: RollStatus::ToInspectedWarehouse,
            meters_grade1: 0.0,
            meters_grade2: 0.0,
            productions: vec![],
        }
    }

    fn local_payload(ticket: &str, code: &str) -> InspectionPayload {
        InspectionPayload {
            ticket_id: ticket.into(),
            roll_code: code.into(),
            fabric_name: "XYZ".into(),
            machine_id: "M01".into(),
            inspector_id: None,
            order_number: None,
            deployment_ticket_id: None,
            inspection_date: chrono::Utc::now(),
            status: RollStatus::ToInspectedWarehouse,
            meters_grade1: 0.0,
            meters_grade2: 0.0,
            workers: vec![],
        }
    }

    #[tokio::test]
    async fn tier_one_counts_from_one_and_is_monotonic() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        let issuer = issuer(&counter, &central, &local);

        assert_eq!(issuer.next_sequence("2601XYZ").await.unwrap(), 1);
        assert_eq!(issuer.next_sequence("2601XYZ").await.unwrap(), 2);
        assert_eq!(issuer.next_sequence("2601ABC").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_tier_one_issuance_never_duplicates() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        let issuer = issuer(&counter, &central, &local);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let issuer = issuer.clone();
            handles.push(tokio::spawn(async move {
                issuer.next_sequence("2601XYZ").await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<u64> = (1..=32).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn counter_outage_demotes_to_central_db() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        counter.set_offline(true);
        central.insert_roll(persisted("t-1", "2601XYZ0041"));
        let issuer = issuer(&counter, &central, &local);

        assert_eq!(issuer.next_sequence("2601XYZ").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn central_db_answers_one_for_an_unseen_prefix() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        counter.set_offline(true);
        let issuer = issuer(&counter, &central, &local);

        assert_eq!(issuer.next_sequence("2601XYZ").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn double_outage_falls_back_to_local_history() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        counter.set_offline(true);
        central.set_offline(true);
        local.seed(local_payload("t-1", "2601XYZ0007"));
        let issuer = issuer(&counter, &central, &local);

        assert_eq!(issuer.next_sequence("2601XYZ").await.unwrap(), 8);
    }

    #[tokio::test]
    async fn total_failure_surfaces_an_error() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        counter.set_offline(true);
        central.set_offline(true);
        local.set_offline(true);
        let issuer = issuer(&counter, &central, &local);

        let err = issuer.next_sequence("2601XYZ").await.unwrap_err();
        assert_eq!(err.prefix, "2601XYZ");
    }

    #[tokio::test]
    async fn issued_code_is_prefix_plus_padded_sequence() {
        let counter = MemoryCounterStore::new();
        let central = MemoryRollStore::new();
        let local = MemoryLocalStore::new();
        let issuer = issuer(&counter, &central, &local);

        let code = issuer.issue_roll_code("ABC.123456").await.unwrap();
        let prefix = sequence_prefix("ABC.123456", Utc::now());
        assert_eq!(code, format!("{prefix}0001"));
    }
}
