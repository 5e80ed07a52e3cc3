use serde::{Deserialize, Serialize};

use super::ledger::BalanceVector;
use super::returns::CorrelationMatrix;

/// Index of the bucket ordinary expenses are drawn from.
pub const LIQUID_INDEX: usize = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    pub allocation_percent: f64,
    pub avg_return_percent: f64,
    pub volatility_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub buckets: Vec<Bucket>,
    pub starting_corpus: f64,
    pub first_year_expense: f64,
    /// Annual expense growth as a fraction, e.g. 0.06.
    pub inflation_rate: f64,
    pub mode: WithdrawalMode,
    pub correlation: CorrelationMatrix,
}

impl SimulationConfig {
    pub fn avg_returns(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.avg_return_percent).collect()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.volatility_percent).collect()
    }

    pub fn allocation_total(&self) -> f64 {
        self.buckets.iter().map(|b| b.allocation_percent).sum()
    }

    pub fn expense_for_year(&self, years_completed: u32) -> f64 {
        self.first_year_expense * (1.0 + self.inflation_rate).powi(years_completed as i32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub year_index: u32,
    pub expense: f64,
    /// Less than `expense` only when auto mode ran the portfolio dry.
    pub withdrawn: f64,
    pub return_percents: Vec<f64>,
    pub return_amounts: Vec<f64>,
    pub ending_balances: Vec<f64>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingYear {
    pub year_index: u32,
    pub return_percents: Vec<f64>,
    pub return_amounts: Vec<f64>,
    /// Post-return, pre-withdrawal balances, updated by every transfer.
    pub balances: BalanceVector,
    pub expense: f64,
    pub shortfall: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "pending", rename_all = "camelCase")]
pub enum EngineState {
    #[default]
    Idle,
    AwaitingTransfer(PendingYear),
}

impl EngineState {
    pub fn pending(&self) -> Option<&PendingYear> {
        match self {
            EngineState::Idle => None,
            EngineState::AwaitingTransfer(pending) => Some(pending),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "year", rename_all = "camelCase")]
pub enum YearOutcome {
    Committed(HistoryRow),
    Pending(PendingYear),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TransferOutcome {
    Applied,
    StillPending { shortfall: f64 },
    Resolved { year: HistoryRow },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStop {
    Completed,
    AwaitingTransfer,
    Depleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub started: bool,
    pub years_completed: u32,
    pub next_expense: Option<f64>,
    pub balances: Option<BalanceVector>,
    pub total: Option<f64>,
    pub history: Vec<HistoryRow>,
    #[serde(flatten)]
    pub state: EngineState,
}

impl EngineSnapshot {
    pub fn not_started() -> Self {
        Self {
            started: false,
            years_completed: 0,
            next_expense: None,
            balances: None,
            total: None,
            history: Vec::new(),
            state: EngineState::Idle,
        }
    }
}
