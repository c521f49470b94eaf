//! Admission controller: per-target retrain budget plus a global slot ceiling.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AdmissionConfig, BudgetWindowPolicy, RetrainRequest, TrainingJob, WeekendBudget,
};
use crate::domain::ports::BudgetRepository;

/// A granted admission. Dropping it releases the resource slot.
#[derive(Debug)]
pub struct Admission {
    pub job: TrainingJob,
    pub budget: WeekendBudget,
    pub permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
pub enum AdmissionOutcome {
    Admitted(Admission),
    /// The target's cap for the current window is used up; discard the request.
    BudgetExhausted(WeekendBudget),
    /// The request belongs to a budget window that has closed; discard it.
    WindowRolledOver,
    /// Every slot is taken; the request stays queued.
    NoSlot,
}

pub struct AdmissionController {
    budgets: Arc<dyn BudgetRepository>,
    policy: BudgetWindowPolicy,
    cap: u32,
    ceiling: usize,
    slots: Arc<Semaphore>,
}

impl AdmissionController {
    pub fn new(config: &AdmissionConfig, budgets: Arc<dyn BudgetRepository>) -> Self {
        Self {
            budgets,
            policy: config.window_policy(),
            cap: config.max_weekend_retrains,
            ceiling: config.resource_concurrency_ceiling,
            slots: Arc::new(Semaphore::new(config.resource_concurrency_ceiling)),
        }
    }

    pub fn window_policy(&self) -> BudgetWindowPolicy {
        self.policy
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Budget for `target_id` in the window containing `now`.
    pub async fn budget(&self, target_id: &str, now: DateTime<Utc>) -> DomainResult<WeekendBudget> {
        self.budgets
            .current(target_id, self.policy.window_for(now), self.cap)
            .await
    }

    /// Try to admit `request`: budget first, then a slot, then the atomic
    /// consume-and-create.
    pub async fn try_admit(
        &self,
        request: &RetrainRequest,
        now: DateTime<Utc>,
    ) -> DomainResult<AdmissionOutcome> {
        let target_id = request.target_id.as_str();
        let window = self.policy.window_for(now);

        if request.window_start < window.0 {
            info!(
                target_id,
                request_id = %request.id,
                request_window = %request.window_start,
                current_window = %window.0,
                "budget window rolled over while request was queued"
            );
            return Ok(AdmissionOutcome::WindowRolledOver);
        }

        let budget = self.budgets.current(target_id, window, self.cap).await?;
        if budget.is_exhausted() {
            return Ok(AdmissionOutcome::BudgetExhausted(budget));
        }

        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            debug!(target_id, request_id = %request.id, "no free training slot");
            return Ok(AdmissionOutcome::NoSlot);
        };

        let job = TrainingJob::new(target_id, request.id, now);
        match self.budgets.admit(window, self.cap, &job).await? {
            Some(budget) => {
                info!(
                    target_id,
                    request_id = %request.id,
                    job_id = %job.id,
                    retrains_used = budget.retrains_used,
                    retrains_cap = budget.retrains_cap,
                    "request admitted"
                );
                Ok(AdmissionOutcome::Admitted(Admission { job, budget, permit }))
            }
            // Lost the race for the last retrain in this window.
            None => {
                let budget = self.budgets.current(target_id, window, self.cap).await?;
                Ok(AdmissionOutcome::BudgetExhausted(budget))
            }
        }
    }

    /// Give back a retrain consumed by a cycle whose job never started.
    pub async fn refund(&self, target_id: &str, window_start: DateTime<Utc>) -> DomainResult<()> {
        self.budgets.refund(target_id, window_start).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteBudgetRepository};
    use chrono::{Duration, TimeZone};

    async fn controller(cap: u32, ceiling: usize) -> AdmissionController {
        let pool = create_migrated_test_pool().await.unwrap();
        let config = AdmissionConfig {
            max_weekend_retrains: cap,
            resource_concurrency_ceiling: ceiling,
            ..AdmissionConfig::default()
        };
        AdmissionController::new(&config, Arc::new(SqliteBudgetRepository::new(pool)))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 14, 0, 0).unwrap()
    }

    fn request(controller: &AdmissionController, target: &str) -> RetrainRequest {
        let window_start = controller.window_policy().window_for(now()).0;
        RetrainRequest::new(target, 0.9, now(), window_start)
    }

    #[tokio::test]
    async fn test_slots_bound_concurrent_admissions() {
        let c = controller(3, 2).await;
        let first = c.try_admit(&request(&c, "a"), now()).await.unwrap();
        let second = c.try_admit(&request(&c, "b"), now()).await.unwrap();
        let third = c.try_admit(&request(&c, "c"), now()).await.unwrap();

        assert!(matches!(first, AdmissionOutcome::Admitted(_)));
        assert!(matches!(second, AdmissionOutcome::Admitted(_)));
        assert!(matches!(third, AdmissionOutcome::NoSlot));
        assert_eq!(c.available_slots(), 0);

        drop(first);
        assert_eq!(c.available_slots(), 1);
        assert!(matches!(
            c.try_admit(&request(&c, "c"), now()).await.unwrap(),
            AdmissionOutcome::Admitted(_)
        ));
    }

    #[tokio::test]
    async fn test_budget_checked_before_slot() {
        let c = controller(1, 1).await;
        let admitted = c.try_admit(&request(&c, "a"), now()).await.unwrap();
        let AdmissionOutcome::Admitted(admission) = admitted else {
            panic!("expected admission");
        };
        drop(admission.permit);

        match c.try_admit(&request(&c, "a"), now()).await.unwrap() {
            AdmissionOutcome::BudgetExhausted(budget) => {
                assert_eq!(budget.retrains_used, 1);
                assert_eq!(budget.retrains_cap, 1);
            }
            other => panic!("expected BudgetExhausted, got {other:?}"),
        }
        assert_eq!(c.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_request_from_closed_window_is_discarded() {
        let c = controller(3, 2).await;
        let req = request(&c, "a");
        let next_week = now() + Duration::days(7);
        assert!(matches!(
            c.try_admit(&req, next_week).await.unwrap(),
            AdmissionOutcome::WindowRolledOver
        ));
    }

    #[tokio::test]
    async fn test_refund_restores_budget() {
        let c = controller(1, 1).await;
        let AdmissionOutcome::Admitted(admission) = c.try_admit(&request(&c, "a"), now()).await.unwrap() else {
            panic!("expected admission");
        };
        c.refund("a", admission.budget.window_start).await.unwrap();
        assert_eq!(c.budget("a", now()).await.unwrap().retrains_used, 0);
    }
}
