mod engine;
mod error;
mod history;
mod ledger;
mod returns;
mod types;

pub use engine::Simulator;
pub use error::EngineError;
pub use history::HistoryStore;
pub use ledger::BalanceVector;
pub use returns::{
    CholeskyFactor, CorrelatedReturnGenerator, CorrelationMatrix, RandomSource, StdRandom,
    standard_normal,
};
pub use types::{
    BatchStop, Bucket, EngineSnapshot, EngineState, HistoryRow, LIQUID_INDEX, PendingYear,
    SimulationConfig, TransferOutcome, WithdrawalMode, YearOutcome,
};
