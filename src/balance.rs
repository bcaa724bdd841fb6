//! # Balance & Level — Cumulative Points and Ladder Position
//!
//! Maintains each user's lifetime beam balance and settles their level after
//! every credit. Balances are created lazily on first grant (entry level) and
//! never deleted; `total_points` only moves through atomic storage increments.
//!
//! ## Transition rule
//!
//! A credit triggers a level-up only when the new total strictly exceeds the
//! current level's `max_points`; landing exactly on the boundary stays put.
//! Transitions advance a single level per call even when the credited amount
//! spans several ranges — a later grant picks up the next step. Promotion is
//! a conditional storage update keyed on the current level number, so a stale
//! writer can never move a user downward.

use crate::levels::{Level, LevelCatalog};
use crate::store::Store;
use crate::EngineResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One row per user: lifetime balance and current ladder position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: Uuid,
    pub total_points: i64,
    pub level_number: i32,
}

/// Result of a credit, for caller-side celebratory UI.
#[derive(Clone, Debug, Serialize)]
pub struct CreditOutcome {
    pub balance: UserBalance,
    pub leveled_up: bool,
    pub new_level: Level,
}

pub struct BalanceAndLevel {
    store: Arc<dyn Store>,
    levels: Arc<LevelCatalog>,
}

impl BalanceAndLevel {
    pub fn new(store: Arc<dyn Store>, levels: Arc<LevelCatalog>) -> Self {
        BalanceAndLevel { store, levels }
    }

    /// Credit `amount` beams and settle the level. Creates the balance at the
    /// entry level if this is the user's first grant. No floor is applied
    /// here; callers performing debits validate sufficiency first.
    pub async fn credit_points(&self, user: Uuid, amount: i64) -> EngineResult<CreditOutcome> {
        let balance = self.store.credit_balance(user, amount).await?;
        self.settle_level(balance).await
    }

    /// Evaluate the single-step transition rule against an already-credited
    /// balance and persist the promotion if one applies.
    pub(crate) async fn settle_level(&self, balance: UserBalance) -> EngineResult<CreditOutcome> {
        let current = self
            .levels
            .get(balance.level_number)
            .ok_or_else(|| {
                crate::EngineError::Storage(anyhow::anyhow!(
                    "balance for {} references level {} missing from the catalog",
                    balance.user_id,
                    balance.level_number
                ))
            })?
            .clone();

        if balance.total_points > current.max_points {
            if let Some(next) = self.levels.next_after(current.level_number) {
                let promoted = self
                    .store
                    .promote_level(balance.user_id, current.level_number, next.level_number)
                    .await?;
                if promoted {
                    return Ok(CreditOutcome {
                        balance: UserBalance {
                            level_number: next.level_number,
                            ..balance
                        },
                        leveled_up: true,
                        new_level: next.clone(),
                    });
                }
                // A concurrent credit already advanced this user; report the
                // stored state rather than our stale view.
                if let Some(fresh) = self.store.get_balance(balance.user_id).await? {
                    let level = self
                        .levels
                        .get(fresh.level_number)
                        .cloned()
                        .unwrap_or(current);
                    return Ok(CreditOutcome {
                        balance: fresh,
                        leveled_up: false,
                        new_level: level,
                    });
                }
            }
        }

        Ok(CreditOutcome {
            balance,
            leveled_up: false,
            new_level: current,
        })
    }

    pub async fn balance(&self, user: Uuid) -> EngineResult<Option<UserBalance>> {
        self.store.get_balance(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn component() -> BalanceAndLevel {
        BalanceAndLevel::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LevelCatalog::default_ladder()),
        )
    }

    #[tokio::test]
    async fn first_credit_creates_at_entry_level() {
        let balance = component();
        let user = Uuid::new_v4();
        let outcome = balance.credit_points(user, 40).await.unwrap();
        assert_eq!(outcome.balance.total_points, 40);
        assert_eq!(outcome.new_level.level_number, 1);
        assert!(!outcome.leveled_up);
    }

    #[tokio::test]
    async fn exact_boundary_does_not_advance_but_one_more_does() {
        let balance = component();
        let user = Uuid::new_v4();

        // Level 1 spans 0..=99: landing exactly on 99 stays put.
        let outcome = balance.credit_points(user, 99).await.unwrap();
        assert!(!outcome.leveled_up);
        assert_eq!(outcome.new_level.level_number, 1);

        let outcome = balance.credit_points(user, 1).await.unwrap();
        assert!(outcome.leveled_up);
        assert_eq!(outcome.new_level.level_number, 2);
        assert_eq!(outcome.balance.level_number, 2);
    }

    #[tokio::test]
    async fn large_credit_advances_a_single_level() {
        let balance = component();
        let user = Uuid::new_v4();

        // 600 beams would satisfy level 4 (500..=999), but one call advances
        // one step.
        let outcome = balance.credit_points(user, 600).await.unwrap();
        assert!(outcome.leveled_up);
        assert_eq!(outcome.new_level.level_number, 2);

        // A follow-up zero-point settle-style credit takes the next step.
        let outcome = balance.credit_points(user, 0).await.unwrap();
        assert!(outcome.leveled_up);
        assert_eq!(outcome.new_level.level_number, 3);
    }

    #[tokio::test]
    async fn balance_read_reflects_credits() {
        let balance = component();
        let user = Uuid::new_v4();
        assert!(balance.balance(user).await.unwrap().is_none());
        balance.credit_points(user, 25).await.unwrap();
        let row = balance.balance(user).await.unwrap().unwrap();
        assert_eq!(row.total_points, 25);
    }
}
