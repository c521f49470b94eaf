//! Promotion/rollback controller.
//!
//! The only component that changes which model serves a target. Every
//! mutation holds the target's promotion lock; a second attempt while the
//! lock is held fails fast with [`PromotionError::Conflict`] and the public
//! entry points retry it with exponential backoff.
//!
//! A rollback that fails for any reason other than there being nothing to
//! restore freezes the target. Freezes are held in memory as well as in the
//! stability store, so a store that cannot persist the freeze still blocks
//! promotions for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::models::StabilityRecord;
use crate::domain::ports::{Clock, ModelRegistry, StabilityRepository};

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("Promotion already in progress for target {0}")]
    Conflict(String),

    #[error("Promotions for target {target_id} are frozen: {reason}")]
    Frozen { target_id: String, reason: String },

    #[error("Nothing to roll back for target {0}")]
    NothingToRollBack(String),

    #[error("Stability store failed: {0}")]
    Store(#[source] DomainError),

    #[error("Model registry failed: {0}")]
    Registry(#[source] DomainError),
}

impl PromotionError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub struct PromotionController {
    stability: Arc<dyn StabilityRepository>,
    registry: Arc<dyn ModelRegistry>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Freeze reasons by target, mirrored from the store.
    frozen: Mutex<HashMap<String, String>>,
    conflict_retry_max_elapsed: Duration,
}

impl PromotionController {
    pub fn new(
        stability: Arc<dyn StabilityRepository>,
        registry: Arc<dyn ModelRegistry>,
        clock: Arc<dyn Clock>,
        conflict_retry_max_elapsed: Duration,
    ) -> Self {
        Self {
            stability,
            registry,
            clock,
            locks: Mutex::new(HashMap::new()),
            frozen: Mutex::new(HashMap::new()),
            conflict_retry_max_elapsed,
        }
    }

    fn lock_for(&self, target_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        locks
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn held_freeze(&self, target_id: &str) -> Option<String> {
        self.frozen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(target_id)
            .cloned()
    }

    /// Why promotions for `target_id` are frozen, if they are.
    pub async fn frozen_reason(&self, target_id: &str) -> Result<Option<String>, PromotionError> {
        if let Some(reason) = self.held_freeze(target_id) {
            return Ok(Some(reason));
        }
        Ok(self
            .stability
            .get(target_id)
            .await
            .map_err(PromotionError::Store)?
            .filter(|r| r.frozen)
            .map(|r| r.frozen_reason.unwrap_or_default()))
    }

    /// `record` with any freeze held in memory applied on top.
    pub fn with_held_freeze(&self, mut record: StabilityRecord) -> StabilityRecord {
        if let Some(reason) = self.held_freeze(&record.target_id) {
            record.frozen = true;
            record.frozen_reason = Some(reason);
        }
        record
    }

    async fn load(&self, target_id: &str) -> Result<StabilityRecord, PromotionError> {
        self.stability
            .get(target_id)
            .await
            .map_err(PromotionError::Store)?
            .ok_or_else(|| PromotionError::Store(DomainError::StabilityRecordNotFound(target_id.to_string())))
    }

    /// Record the registry's current production model as the original baseline
    /// if the target has no stability record yet.
    pub async fn bootstrap(&self, target_id: &str) -> Result<Option<StabilityRecord>, PromotionError> {
        if let Some(existing) = self.stability.get(target_id).await.map_err(PromotionError::Store)? {
            return Ok(Some(existing));
        }

        let Some(production_ref) = self
            .registry
            .get_production(target_id)
            .await
            .map_err(PromotionError::Registry)?
        else {
            return Ok(None);
        };

        let record = StabilityRecord::baseline(target_id, production_ref);
        if self
            .stability
            .create_if_absent(&record)
            .await
            .map_err(PromotionError::Store)?
        {
            info!(target_id, production_ref = %record.current_production_ref, "recorded baseline model");
        }
        self.stability.get(target_id).await.map_err(PromotionError::Store)
    }

    /// Single promotion attempt that fails fast when another is in flight.
    pub async fn try_promote(
        &self,
        target_id: &str,
        artifact_ref: &str,
    ) -> Result<StabilityRecord, PromotionError> {
        let lock = self.lock_for(target_id);
        let _guard = lock
            .try_lock()
            .map_err(|_| PromotionError::Conflict(target_id.to_string()))?;

        let record = self.with_held_freeze(self.load(target_id).await?);
        if record.frozen {
            return Err(PromotionError::Frozen {
                target_id: target_id.to_string(),
                reason: record.frozen_reason.unwrap_or_default(),
            });
        }

        self.registry
            .set_production(target_id, artifact_ref)
            .await
            .map_err(PromotionError::Registry)?;

        let next = record.promoted(artifact_ref, self.clock.now());
        if let Err(e) = self
            .stability
            .compare_and_swap(&record.current_production_ref, &next)
            .await
        {
            // Keep the registry consistent with the record that is still stored.
            if let Err(revert) = self
                .registry
                .set_production(target_id, &record.current_production_ref)
                .await
            {
                error!(target_id, error = %revert, "failed to revert registry after store failure");
            }
            return Err(PromotionError::Store(e));
        }

        info!(
            target_id,
            production_ref = %next.current_production_ref,
            previous_ref = ?next.previous_stable_ref,
            "promoted model"
        );
        Ok(next)
    }

    /// Single rollback attempt that fails fast when a promotion is in flight.
    /// Does not freeze; see [`Self::rollback`].
    pub async fn try_rollback(&self, target_id: &str) -> Result<StabilityRecord, PromotionError> {
        let lock = self.lock_for(target_id);
        let _guard = lock
            .try_lock()
            .map_err(|_| PromotionError::Conflict(target_id.to_string()))?;

        let record = match self.stability.get(target_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(PromotionError::NothingToRollBack(target_id.to_string())),
            Err(e) => return Err(PromotionError::Store(e)),
        };
        let Some(next) = record.rolled_back(self.clock.now()) else {
            return Err(PromotionError::NothingToRollBack(target_id.to_string()));
        };

        self.registry
            .set_production(target_id, &next.current_production_ref)
            .await
            .map_err(PromotionError::Registry)?;

        self.stability
            .compare_and_swap(&record.current_production_ref, &next)
            .await
            .map_err(PromotionError::Store)?;

        warn!(
            target_id,
            restored_ref = %next.current_production_ref,
            removed_ref = %record.current_production_ref,
            "rolled back model"
        );
        Ok(next)
    }

    /// Promote, retrying while another promotion for the target is in flight.
    pub async fn promote(
        &self,
        target_id: &str,
        artifact_ref: &str,
    ) -> Result<StabilityRecord, PromotionError> {
        self.retry_conflicts(|| self.try_promote(target_id, artifact_ref)).await
    }

    /// Roll back, retrying while a promotion for the target is in flight.
    ///
    /// Every failure except [`PromotionError::NothingToRollBack`] freezes the
    /// target before the error is returned, including running out of
    /// conflict retries.
    pub async fn rollback(&self, target_id: &str) -> Result<StabilityRecord, PromotionError> {
        let result = self.retry_conflicts(|| self.try_rollback(target_id)).await;
        match &result {
            Err(PromotionError::NothingToRollBack(_)) | Ok(_) => {}
            Err(e) => self.freeze(target_id, &format!("rollback failed: {e}")).await,
        }
        result
    }

    /// Clear a freeze left by a failed rollback.
    pub async fn unfreeze(&self, target_id: &str) -> Result<StabilityRecord, PromotionError> {
        let lock = self.lock_for(target_id);
        let _guard = lock.lock().await;

        self.stability
            .set_frozen(target_id, None)
            .await
            .map_err(PromotionError::Store)?;
        self.frozen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(target_id);
        info!(target_id, "promotions unfrozen");
        self.load(target_id).await
    }

    /// Freeze promotions for `target_id` until [`Self::unfreeze`] is called.
    pub async fn freeze(&self, target_id: &str, reason: &str) {
        error!(target_id, reason, "freezing promotions after rollback failure");
        self.frozen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(target_id.to_string(), reason.to_string());
        if let Err(e) = self.stability.set_frozen(target_id, Some(reason)).await {
            error!(target_id, error = %e, "failed to persist promotion freeze, holding it in memory");
        }
    }

    async fn retry_conflicts<F, Fut>(&self, mut attempt: F) -> Result<StabilityRecord, PromotionError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<StabilityRecord, PromotionError>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(2))
            .with_max_elapsed_time(Some(self.conflict_retry_max_elapsed))
            .build();

        backoff::future::retry(policy, || {
            let fut = attempt();
            async move {
                fut.await.map_err(|e| {
                    if e.is_conflict() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}
