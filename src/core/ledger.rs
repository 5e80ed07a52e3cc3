use serde::Serialize;

use super::error::EngineError;
use super::types::{Bucket, LIQUID_INDEX};

/// Per-bucket balances, index-aligned with the configured buckets.
///
/// Every operation returns a fresh vector; a balance is never negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BalanceVector(Vec<f64>);

impl BalanceVector {
    pub fn from_allocation(corpus: f64, buckets: &[Bucket]) -> Self {
        Self(
            buckets
                .iter()
                .map(|b| (corpus * b.allocation_percent / 100.0).max(0.0))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn liquid(&self) -> f64 {
        self.get(LIQUID_INDEX).unwrap_or(0.0)
    }

    /// Grows each bucket by its sampled percentage. Returns the new balances
    /// and the signed currency amount gained or lost per bucket.
    pub fn apply_returns(&self, return_percents: &[f64]) -> (Self, Vec<f64>) {
        let mut grown = Vec::with_capacity(self.0.len());
        let mut amounts = Vec::with_capacity(self.0.len());
        for (balance, pct) in self.0.iter().zip(return_percents) {
            let next = (balance * (1.0 + pct / 100.0)).max(0.0);
            amounts.push(next - balance);
            grown.push(next);
        }
        (Self(grown), amounts)
    }

    /// Draws `expense` from buckets in configuration order. When the whole
    /// portfolio cannot cover it, every bucket is emptied.
    pub fn withdraw_in_order(&self, expense: f64) -> (Self, f64) {
        let total = self.total();
        if total < expense {
            return (Self(vec![0.0; self.0.len()]), total);
        }

        let mut balances = self.0.clone();
        let mut remaining = expense;
        for balance in balances.iter_mut() {
            if remaining <= 0.0 {
                break;
            }
            let x = balance.min(remaining);
            *balance -= x;
            remaining -= x;
        }
        (Self(balances), expense - remaining.max(0.0))
    }

    /// Draws `expense` from the liquid bucket alone, or `None` when it falls
    /// short.
    pub fn draw_liquid(&self, expense: f64) -> Option<Self> {
        let liquid = self.liquid();
        if liquid < expense {
            return None;
        }
        let mut balances = self.0.clone();
        balances[LIQUID_INDEX] = (liquid - expense).max(0.0);
        Some(Self(balances))
    }

    pub fn liquid_shortfall(&self, expense: f64) -> f64 {
        (expense - self.liquid()).max(0.0)
    }

    pub fn transfer(&self, from: usize, to: usize, amount: f64) -> Result<Self, EngineError> {
        let n = self.0.len();
        if from >= n || to >= n {
            return Err(EngineError::InvalidTransfer(format!(
                "bucket index out of range (from {from}, to {to}, buckets {n})"
            )));
        }
        if from == to {
            return Err(EngineError::InvalidTransfer(
                "source and destination must differ".to_string(),
            ));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EngineError::InvalidTransfer(format!(
                "amount must be > 0, got {amount}"
            )));
        }
        if self.0[from] < amount {
            return Err(EngineError::InvalidTransfer(format!(
                "bucket {from} holds {:.2}, cannot move {amount:.2}",
                self.0[from]
            )));
        }
        Ok(self.shifted(from, to, amount))
    }

    /// Applies a transfer delta already validated against the live ledger.
    pub(crate) fn shifted(&self, from: usize, to: usize, amount: f64) -> Self {
        let mut balances = self.0.clone();
        balances[from] = (balances[from] - amount).max(0.0);
        balances[to] += amount;
        Self(balances)
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for BalanceVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values.into_iter().map(|v| v.max(0.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn bucket(name: &str, allocation: f64) -> Bucket {
        Bucket {
            name: name.to_string(),
            allocation_percent: allocation,
            avg_return_percent: 0.0,
            volatility_percent: 0.0,
        }
    }

    #[test]
    fn from_allocation_splits_corpus() {
        let b = BalanceVector::from_allocation(
            1_000_000.0,
            &[bucket("liquid", 5.0), bucket("equity", 95.0)],
        );
        assert_eq!(b.as_slice(), &[50_000.0, 950_000.0]);
    }

    #[test]
    fn apply_returns_clamps_losses_beyond_total() {
        let b = BalanceVector::from(vec![1_000.0, 2_000.0]);
        let (grown, amounts) = b.apply_returns(&[10.0, -150.0]);
        assert_approx(grown.as_slice()[0], 1_100.0);
        assert_eq!(grown.as_slice()[1], 0.0);
        assert_approx(amounts[0], 100.0);
        assert_approx(amounts[1], -2_000.0);
    }

    #[test]
    fn withdraw_in_order_walks_buckets_in_configuration_order() {
        let b = BalanceVector::from(vec![30.0, 50.0, 100.0]);
        let (after, withdrawn) = b.withdraw_in_order(60.0);
        assert_eq!(after.as_slice(), &[0.0, 20.0, 100.0]);
        assert_approx(withdrawn, 60.0);
    }

    #[test]
    fn withdraw_in_order_depletes_everything_when_short() {
        let b = BalanceVector::from(vec![30.0, 50.0]);
        let (after, withdrawn) = b.withdraw_in_order(100.0);
        assert_eq!(after.as_slice(), &[0.0, 0.0]);
        assert_approx(withdrawn, 80.0);
    }

    #[test]
    fn draw_liquid_only_touches_first_bucket() {
        let b = BalanceVector::from(vec![500.0, 500.0]);
        let after = b.draw_liquid(100.0).expect("liquid covers expense");
        assert_eq!(after.as_slice(), &[400.0, 500.0]);
        assert!(b.draw_liquid(600.0).is_none());
        assert_approx(b.liquid_shortfall(600.0), 100.0);
    }

    #[test]
    fn transfer_rejects_bad_requests() {
        let b = BalanceVector::from(vec![100.0, 0.0]);
        assert!(matches!(
            b.transfer(0, 0, 10.0),
            Err(EngineError::InvalidTransfer(_))
        ));
        assert!(matches!(
            b.transfer(0, 1, 0.0),
            Err(EngineError::InvalidTransfer(_))
        ));
        assert!(matches!(
            b.transfer(0, 1, f64::NAN),
            Err(EngineError::InvalidTransfer(_))
        ));
        assert!(matches!(
            b.transfer(1, 0, 1.0),
            Err(EngineError::InvalidTransfer(_))
        ));
        assert!(matches!(
            b.transfer(0, 7, 1.0),
            Err(EngineError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn from_vec_clamps_negative_values() {
        let b = BalanceVector::from(vec![-5.0, 3.0]);
        assert_eq!(b.as_slice(), &[0.0, 3.0]);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_withdraw_in_order_takes_min_of_expense_and_total(
            a in 0u32..500_000,
            b in 0u32..500_000,
            c in 0u32..500_000,
            expense in 0u32..2_000_000
        ) {
            let balances = BalanceVector::from(vec![a as f64, b as f64, c as f64]);
            let total = balances.total();
            let expense = expense as f64;
            let (after, withdrawn) = balances.withdraw_in_order(expense);

            prop_assert!(after.as_slice().iter().all(|v| *v >= 0.0));
            prop_assert!((withdrawn - expense.min(total)).abs() < 1e-6);
            prop_assert!((total - after.total() - withdrawn).abs() < 1e-6);
            if total < expense {
                prop_assert!(after.as_slice().iter().all(|v| *v == 0.0));
            }
        }

        #[test]
        fn prop_transfer_conserves_pair_total(
            from_balance in 1u32..1_000_000,
            to_balance in 0u32..1_000_000,
            share_pct in 1u32..=100
        ) {
            let balances = BalanceVector::from(vec![from_balance as f64, to_balance as f64]);
            let amount = from_balance as f64 * share_pct as f64 / 100.0;
            let after = balances.transfer(0, 1, amount).expect("valid transfer");

            prop_assert!(after.as_slice().iter().all(|v| *v >= 0.0));
            prop_assert!((after.total() - balances.total()).abs() < 1e-6);
        }
    }
}
