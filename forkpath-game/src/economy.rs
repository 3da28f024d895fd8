//! Persisted money balance with atomic debit and credit.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_COST_PER_CHOICE, DEFAULT_REWARD_PER_LEVEL, DEFAULT_START_BALANCE, KEY_MONEY_BALANCE,
    KEY_MONEY_INITIALIZED, TOGGLE_ON,
};
use crate::storage::{KeyValueStore, StorageError};

/// Economy tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    pub start_balance: i64,
    pub cost_per_choice: i64,
    pub reward_per_level: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            start_balance: DEFAULT_START_BALANCE,
            cost_per_choice: DEFAULT_COST_PER_CHOICE,
            reward_per_level: DEFAULT_REWARD_PER_LEVEL,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Money balance backed by a [`KeyValueStore`].
///
/// Every mutation is persisted and flushed before it is acknowledged; a
/// storage failure leaves the in-memory balance untouched.
#[derive(Debug)]
pub struct EconomyLedger<S> {
    store: S,
    config: EconomyConfig,
    balance: i64,
}

impl<S: KeyValueStore> EconomyLedger<S> {
    /// Open the ledger, seeding the start balance on first run.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read, or if first-run
    /// initialization cannot be persisted.
    pub fn open(store: S, config: EconomyConfig) -> Result<Self, StorageError> {
        let balance = if store.contains(KEY_MONEY_INITIALIZED)? {
            let stored = store.get_int(KEY_MONEY_BALANCE)?.unwrap_or(0);
            if stored < 0 {
                log::warn!("persisted balance {stored} is negative; clamping to 0");
            }
            stored.max(0)
        } else {
            log::debug!("first run: seeding balance {}", config.start_balance);
            store.set_int(KEY_MONEY_BALANCE, config.start_balance)?;
            store.set_int(KEY_MONEY_INITIALIZED, TOGGLE_ON)?;
            store.flush()?;
            config.start_balance
        };
        Ok(Self {
            store,
            config,
            balance,
        })
    }

    #[must_use]
    pub const fn balance(&self) -> i64 {
        self.balance
    }

    #[must_use]
    pub const fn config(&self) -> &EconomyConfig {
        &self.config
    }

    /// Whether `amount` could be spent right now.
    #[must_use]
    pub const fn can_spend(&self, amount: i64) -> bool {
        amount <= 0 || self.balance >= amount
    }

    /// Debit `amount`, distinguishing shortfall from storage failure.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InsufficientFunds`] when the balance is too low
    /// and [`LedgerError::Storage`] when the new balance cannot be persisted.
    pub fn try_spend(&mut self, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Ok(());
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.commit(self.balance - amount)?;
        Ok(())
    }

    /// Debit `amount`; `false` leaves the balance unchanged.
    pub fn spend(&mut self, amount: i64) -> bool {
        match self.try_spend(amount) {
            Ok(()) => true,
            Err(LedgerError::InsufficientFunds { .. }) => false,
            Err(err) => {
                log::error!("spend of {amount} rolled back: {err}");
                false
            }
        }
    }

    /// Credit `amount`. Non-positive amounts are ignored.
    pub fn reward(&mut self, amount: i64) {
        if amount <= 0 {
            return;
        }
        let next = self.balance.saturating_add(amount);
        if let Err(err) = self.commit(next) {
            log::error!("reward of {amount} rolled back: {err}");
        }
    }

    pub fn spend_choice(&mut self) -> bool {
        self.spend(self.config.cost_per_choice)
    }

    pub fn reward_level_complete(&mut self) {
        self.reward(self.config.reward_per_level);
    }

    /// Restore the configured start balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset cannot be persisted.
    pub fn reset(&mut self) -> Result<(), StorageError> {
        self.store.set_int(KEY_MONEY_INITIALIZED, TOGGLE_ON)?;
        self.commit(self.config.start_balance)
    }

    fn commit(&mut self, next: i64) -> Result<(), StorageError> {
        self.store.set_int(KEY_MONEY_BALANCE, next)?;
        if let Err(err) = self.store.flush() {
            // Put the durable value back in step with memory.
            if let Err(rollback) = self.store.set_int(KEY_MONEY_BALANCE, self.balance) {
                log::error!(
                    "balance rollback to {} failed; store may hold {next}: {rollback}",
                    self.balance
                );
            }
            return Err(err);
        }
        self.balance = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::cell::Cell;

    /// Once armed, accepts a single write and then refuses everything.
    struct OneWriteThenFail {
        inner: MemoryStore,
        armed: Cell<bool>,
        writes: Cell<usize>,
    }

    impl OneWriteThenFail {
        fn refuse(key: &str) -> StorageError {
            StorageError::ReadOnly {
                key: key.to_string(),
            }
        }
    }

    impl KeyValueStore for OneWriteThenFail {
        fn get_int(&self, key: &str) -> Result<Option<i64>, StorageError> {
            self.inner.get_int(key)
        }

        fn set_int(&self, key: &str, value: i64) -> Result<(), StorageError> {
            if self.armed.get() {
                if self.writes.get() > 0 {
                    return Err(Self::refuse(key));
                }
                self.writes.set(1);
            }
            self.inner.set_int(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }

        fn flush(&self) -> Result<(), StorageError> {
            if self.armed.get() {
                return Err(Self::refuse("flush"));
            }
            self.inner.flush()
        }
    }

    fn ledger(store: &MemoryStore) -> EconomyLedger<MemoryStore> {
        EconomyLedger::open(store.clone(), EconomyConfig::default()).unwrap()
    }

    #[test]
    fn first_run_seeds_start_balance_once() {
        let store = MemoryStore::new();
        let mut first = ledger(&store);
        assert_eq!(first.balance(), DEFAULT_START_BALANCE);
        assert!(first.spend(1_000));

        let second = ledger(&store);
        assert_eq!(second.balance(), DEFAULT_START_BALANCE - 1_000);
        assert_eq!(store.get_int(KEY_MONEY_INITIALIZED).unwrap(), Some(1));
    }

    #[test]
    fn overspend_is_rejected_without_change() {
        let store = MemoryStore::new();
        let mut ledger = ledger(&store);
        let before = ledger.balance();
        assert!(!ledger.can_spend(before + 1));
        assert!(!ledger.spend(before + 1));
        assert_eq!(ledger.balance(), before);
        assert!(matches!(
            ledger.try_spend(before + 1),
            Err(LedgerError::InsufficientFunds { requested, .. }) if requested == before + 1
        ));
    }

    #[test]
    fn spend_then_reward_restores_balance() {
        let store = MemoryStore::new();
        let mut ledger = ledger(&store);
        let before = ledger.balance();
        assert!(ledger.spend_choice());
        assert_eq!(ledger.balance(), before - DEFAULT_COST_PER_CHOICE);
        ledger.reward(DEFAULT_COST_PER_CHOICE);
        assert_eq!(ledger.balance(), before);
        assert_eq!(store.get_int(KEY_MONEY_BALANCE).unwrap(), Some(before));
    }

    #[test]
    fn non_positive_amounts_are_noops() {
        let store = MemoryStore::new();
        let mut ledger = ledger(&store);
        let before = ledger.balance();
        assert!(ledger.spend(0));
        assert!(ledger.spend(-5));
        ledger.reward(-10);
        assert_eq!(ledger.balance(), before);
    }

    #[test]
    fn storage_failure_rolls_back() {
        let store = MemoryStore::new();
        let mut ledger = ledger(&store);
        let before = ledger.balance();
        store.set_read_only(true);

        assert!(!ledger.spend(10));
        ledger.reward_level_complete();
        assert_eq!(ledger.balance(), before);
        assert!(matches!(ledger.try_spend(10), Err(LedgerError::Storage(_))));
    }

    #[test]
    fn failed_rollback_keeps_memory_balance_and_reports_storage_error() {
        let backing = MemoryStore::new();
        let store = OneWriteThenFail {
            inner: backing.clone(),
            armed: Cell::new(false),
            writes: Cell::new(0),
        };
        let mut ledger = EconomyLedger::open(store, EconomyConfig::default()).unwrap();
        let before = ledger.balance();
        ledger.store.armed.set(true);

        assert!(matches!(ledger.try_spend(10), Err(LedgerError::Storage(_))));
        assert_eq!(ledger.balance(), before);
        // The refused rollback leaves the durable value diverged.
        assert_eq!(backing.get_int(KEY_MONEY_BALANCE).unwrap(), Some(before - 10));
    }

    #[test]
    fn reset_restores_start_balance_and_negative_is_clamped() {
        let store = MemoryStore::with_values([(KEY_MONEY_INITIALIZED, 1), (KEY_MONEY_BALANCE, -40)]);
        let mut ledger = ledger(&store);
        assert_eq!(ledger.balance(), 0);
        ledger.reset().unwrap();
        assert_eq!(ledger.balance(), DEFAULT_START_BALANCE);
    }
}
