//! Trial window and purchased-entitlement tracking.
//!
//! Two orthogonal machines decide access:
//! - Trial: `NoTrial -> Active -> Expired`. The trial starts once, on the
//!   first launch ever; expiry is derived from the stored end date on every
//!   query and never stored as a flag.
//! - Purchase: `NotPurchased -> Purchased`, driven by verified transaction
//!   events. Purchased is terminal and overrides the trial.

use crate::clock::Clock;
use crate::events::Subscribers;
use crate::store::{keys, write_all, KeyValueStore, Value};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Length of the free trial started on first launch
pub const TRIAL_LENGTH_DAYS: i64 = 7;

/// Where the trial stands at a given instant
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    NoTrial,
    Active {
        ends_at: DateTime<Utc>,
        days_remaining: i64,
    },
    Expired {
        ended_at: DateTime<Utc>,
    },
}

impl TrialStatus {
    fn at(trial_end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match trial_end_date {
            None => TrialStatus::NoTrial,
            Some(ends_at) if now < ends_at => TrialStatus::Active {
                ends_at,
                days_remaining: (ends_at - now).num_days(),
            },
            Some(ended_at) => TrialStatus::Expired { ended_at },
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TrialStatus::Active { .. })
    }
}

/// Outcome of the store's signature check on a transaction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Verification {
    Verified,
    Unverified { reason: String },
}

/// A transaction delivered by the store integration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub product_id: String,
    pub verification: Verification,
}

impl TransactionEvent {
    pub fn verified(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            verification: Verification::Verified,
        }
    }

    pub fn unverified(product_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            verification: Verification::Unverified {
                reason: reason.into(),
            },
        }
    }
}

/// What the store reported for a purchase attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseResult {
    Success(TransactionEvent),
    UserCancelled,
    Pending,
}

/// What a purchase or transaction did to entitlement state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Purchased {
        product_id: String,
        newly_added: bool,
    },
    /// Nothing was granted; the caller should offer a retry
    Unverified {
        product_id: String,
        reason: String,
    },
    Cancelled,
    Pending,
}

impl PurchaseOutcome {
    pub fn is_purchased(&self) -> bool {
        matches!(self, PurchaseOutcome::Purchased { .. })
    }
}

/// Result of replaying the store's current entitlements
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub restored: Vec<String>,
    pub unverified: Vec<String>,
}

/// Point-in-time view of access, as published to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AccessSnapshot {
    pub has_full_access: bool,
    pub trial: TrialStatus,
    pub purchased: BTreeSet<String>,
}

#[derive(Clone, Debug, Default)]
struct EntitlementState {
    has_launched_before: bool,
    trial_end_date: Option<DateTime<Utc>>,
    purchased: BTreeSet<String>,
}

impl EntitlementState {
    fn load(store: &dyn KeyValueStore) -> Self {
        Self {
            has_launched_before: store.flag(keys::HAS_LAUNCHED_BEFORE),
            trial_end_date: store.timestamp(keys::TRIAL_END_DATE),
            purchased: store.text_set(keys::PURCHASED_PRODUCT_IDS),
        }
    }

    fn has_access(&self, now: DateTime<Utc>) -> bool {
        !self.purchased.is_empty() || self.trial_end_date.is_some_and(|end| now < end)
    }
}

/// Decides whether the user currently has full access
///
/// Safe to share between a transaction-listener thread and UI readers:
/// every mutation happens under one write lock together with its
/// persistence, so readers never see a half-applied update.
pub struct EntitlementManager {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<EntitlementState>,
    subscribers: Subscribers<AccessSnapshot>,
}

impl EntitlementManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let state = EntitlementState::load(store.as_ref());
        Self {
            store,
            clock,
            state: RwLock::new(state),
            subscribers: Subscribers::new(),
        }
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&AccessSnapshot) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback);
    }

    fn read(&self) -> RwLockReadGuard<'_, EntitlementState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntitlementState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }

    // ------------------------------------------------------------------
    // Trial
    // ------------------------------------------------------------------

    /// Launch-time check: starts the trial on the very first launch, then
    /// reports the current trial status
    pub fn check_trial_status(&self) -> Result<TrialStatus> {
        let persisted = {
            let mut state = self.write();
            if state.has_launched_before {
                Ok(())
            } else {
                self.begin_trial(&mut state)
            }
        };
        let status = self.trial_status();
        match &status {
            TrialStatus::Active { days_remaining, .. } => {
                tracing::debug!("Trial active, {} days remaining", days_remaining)
            }
            TrialStatus::Expired { ended_at } => tracing::debug!("Trial expired on {}", ended_at),
            TrialStatus::NoTrial => tracing::debug!("No trial information found"),
        }
        self.publish();
        persisted.map(|_| status)
    }

    fn begin_trial(&self, state: &mut EntitlementState) -> Result<()> {
        let ends_at = self.now() + Duration::days(TRIAL_LENGTH_DAYS);
        state.trial_end_date = Some(ends_at);
        state.has_launched_before = true;
        tracing::info!("Trial started, ending on {}", ends_at);
        write_all(
            self.store.as_ref(),
            vec![
                (keys::TRIAL_END_DATE, Value::Timestamp(ends_at)),
                (keys::HAS_LAUNCHED_BEFORE, Value::Bool(true)),
            ],
        )
    }

    /// Trial status at this instant, without starting anything
    pub fn trial_status(&self) -> TrialStatus {
        TrialStatus::at(self.read().trial_end_date, self.now())
    }

    pub fn is_trial_active(&self) -> bool {
        self.trial_status().is_active()
    }

    pub fn trial_end_date(&self) -> Option<DateTime<Utc>> {
        self.read().trial_end_date
    }

    pub fn has_launched_before(&self) -> bool {
        self.read().has_launched_before
    }

    /// Whole days left in an active trial
    pub fn days_remaining(&self) -> Option<i64> {
        match self.trial_status() {
            TrialStatus::Active { days_remaining, .. } => Some(days_remaining),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------

    /// Purchased anything, or still inside the trial window
    pub fn evaluate_access(&self) -> bool {
        let now = self.now();
        self.read().has_access(now)
    }

    pub fn purchased_products(&self) -> BTreeSet<String> {
        self.read().purchased.clone()
    }

    pub fn snapshot(&self) -> AccessSnapshot {
        let now = self.now();
        let state = self.read();
        AccessSnapshot {
            has_full_access: state.has_access(now),
            trial: TrialStatus::at(state.trial_end_date, now),
            purchased: state.purchased.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Purchases
    // ------------------------------------------------------------------

    /// Add a verified product to the entitlement set
    ///
    /// Returns true if the product was not already owned. A duplicate
    /// delivery writes nothing unless an earlier write was lost, in which
    /// case the set is stored again.
    pub fn record_verified_purchase(&self, product_id: &str) -> Result<bool> {
        let (newly_added, persisted) = {
            let mut state = self.write();
            let newly_added = state.purchased.insert(product_id.to_string());
            if newly_added {
                tracing::info!("Entitlement granted for {}", product_id);
            } else if self
                .store
                .text_set(keys::PURCHASED_PRODUCT_IDS)
                .contains(product_id)
            {
                tracing::debug!("Product {} already owned", product_id);
                return Ok(false);
            } else {
                tracing::info!("Re-persisting unsaved entitlement for {}", product_id);
            }
            let persisted = self.store.set(
                keys::PURCHASED_PRODUCT_IDS,
                Value::TextSet(state.purchased.clone()),
            );
            (newly_added, persisted)
        };
        if let Err(e) = &persisted {
            tracing::warn!("Failed to persist entitlement for {}: {}", product_id, e);
        }
        self.publish();
        persisted.map(|_| newly_added)
    }

    /// Apply a transaction from the store's update stream
    pub fn handle_transaction(&self, event: TransactionEvent) -> Result<PurchaseOutcome> {
        match event.verification {
            Verification::Verified => {
                let newly_added = self.record_verified_purchase(&event.product_id)?;
                Ok(PurchaseOutcome::Purchased {
                    product_id: event.product_id,
                    newly_added,
                })
            }
            Verification::Unverified { reason } => {
                tracing::warn!(
                    "Ignoring unverified transaction for {}: {}",
                    event.product_id,
                    reason
                );
                Ok(PurchaseOutcome::Unverified {
                    product_id: event.product_id,
                    reason,
                })
            }
        }
    }

    /// Apply the result of an interactive purchase attempt
    pub fn apply_purchase_result(&self, result: PurchaseResult) -> Result<PurchaseOutcome> {
        match result {
            PurchaseResult::Success(event) => self.handle_transaction(event),
            PurchaseResult::UserCancelled => {
                tracing::info!("Purchase cancelled by user");
                Ok(PurchaseOutcome::Cancelled)
            }
            PurchaseResult::Pending => {
                tracing::info!("Purchase pending approval");
                Ok(PurchaseOutcome::Pending)
            }
        }
    }

    /// Replay the store's current entitlements
    pub fn restore_purchases<I>(&self, events: I) -> Result<RestoreSummary>
    where
        I: IntoIterator<Item = TransactionEvent>,
    {
        let mut summary = RestoreSummary::default();
        for event in events {
            match self.handle_transaction(event)? {
                PurchaseOutcome::Purchased { product_id, .. } => summary.restored.push(product_id),
                PurchaseOutcome::Unverified { product_id, .. } => {
                    summary.unverified.push(product_id)
                }
                PurchaseOutcome::Cancelled | PurchaseOutcome::Pending => {}
            }
        }
        tracing::info!(
            "Restored {} products ({} unverified)",
            summary.restored.len(),
            summary.unverified.len()
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Test and debug controls
    // ------------------------------------------------------------------

    /// Start a fresh trial window from now, regardless of history
    pub fn start_trial_explicitly(&self) -> Result<DateTime<Utc>> {
        let persisted = {
            let mut state = self.write();
            self.begin_trial(&mut state)
        };
        self.publish();
        persisted?;
        self.trial_end_date()
            .ok_or_else(|| crate::Error::Other("trial end date missing after start".into()))
    }

    /// Forget the trial entirely, as if freshly installed
    ///
    /// The next [`check_trial_status`](Self::check_trial_status) starts a
    /// new trial.
    pub fn reset_trial_for_testing(&self) -> Result<()> {
        let persisted = {
            let mut state = self.write();
            state.has_launched_before = false;
            state.trial_end_date = None;
            tracing::info!("Trial reset");
            self.store
                .remove(keys::HAS_LAUNCHED_BEFORE)
                .and(self.store.remove(keys::TRIAL_END_DATE))
        };
        self.publish();
        persisted
    }

    /// Move the trial end to one second ago
    pub fn expire_trial_immediately(&self) -> Result<()> {
        let persisted = {
            let mut state = self.write();
            let ended_at = self.now() - Duration::seconds(1);
            state.trial_end_date = Some(ended_at);
            tracing::info!("Trial expired at {}", ended_at);
            self.store
                .set(keys::TRIAL_END_DATE, Value::Timestamp(ended_at))
        };
        self.publish();
        persisted
    }

    fn publish(&self) {
        if !self.subscribers.is_empty() {
            self.subscribers.publish(&self.snapshot());
        }
    }
}
