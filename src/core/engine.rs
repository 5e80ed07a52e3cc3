use tracing::{debug, info, warn};

use super::error::EngineError;
use super::history::HistoryStore;
use super::ledger::BalanceVector;
use super::returns::CorrelatedReturnGenerator;
use super::types::{
    BatchStop, EngineSnapshot, EngineState, HistoryRow, PendingYear, SimulationConfig,
    TransferOutcome, WithdrawalMode, YearOutcome,
};

#[derive(Debug)]
struct Run {
    config: SimulationConfig,
    balances: BalanceVector,
    history: HistoryStore,
    state: EngineState,
}

/// Returns drawn for one year; fixed once sampled even if the withdrawal is
/// deferred.
struct SampledYear {
    year_index: u32,
    expense: f64,
    return_percents: Vec<f64>,
    return_amounts: Vec<f64>,
}

impl From<PendingYear> for SampledYear {
    fn from(pending: PendingYear) -> Self {
        Self {
            year_index: pending.year_index,
            expense: pending.expense,
            return_percents: pending.return_percents,
            return_amounts: pending.return_amounts,
        }
    }
}

impl Run {
    fn years_completed(&self) -> u32 {
        self.history.len() as u32
    }

    fn next_expense(&self) -> f64 {
        match &self.state {
            EngineState::AwaitingTransfer(pending) => pending.expense,
            EngineState::Idle => self.config.expense_for_year(self.years_completed()),
        }
    }

    fn commit(&mut self, year: SampledYear, withdrawn: f64, balances: BalanceVector) -> HistoryRow {
        let row = HistoryRow {
            year_index: year.year_index,
            expense: year.expense,
            withdrawn,
            return_percents: year.return_percents,
            return_amounts: year.return_amounts,
            ending_balances: balances.as_slice().to_vec(),
            total: balances.total(),
        };
        debug!(
            year_index = row.year_index,
            expense = row.expense,
            withdrawn = row.withdrawn,
            total = row.total,
            "year committed"
        );
        self.history.append(row.clone());
        self.balances = balances;
        self.state = EngineState::Idle;
        row
    }
}

/// Owns one drawdown run: configuration, live balances, committed history
/// and the pending-year gate.
pub struct Simulator {
    generator: CorrelatedReturnGenerator,
    run: Option<Run>,
}

impl Simulator {
    pub fn new(generator: CorrelatedReturnGenerator) -> Self {
        Self {
            generator,
            run: None,
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(CorrelatedReturnGenerator::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(CorrelatedReturnGenerator::seeded(seed))
    }

    /// Validates `config` and begins a fresh run, discarding any previous
    /// balances, history and pending year.
    pub fn start(&mut self, config: SimulationConfig) -> Result<(), EngineError> {
        validate_config(&config)?;
        let balances = BalanceVector::from_allocation(config.starting_corpus, &config.buckets);
        info!(
            buckets = config.buckets.len(),
            corpus = config.starting_corpus,
            mode = ?config.mode,
            "simulation started"
        );
        self.run = Some(Run {
            config,
            balances,
            history: HistoryStore::new(),
            state: EngineState::Idle,
        });
        Ok(())
    }

    pub fn reset(&mut self) {
        if self.run.take().is_some() {
            info!("simulation reset");
        }
    }

    pub fn is_started(&self) -> bool {
        self.run.is_some()
    }

    pub fn config(&self) -> Option<&SimulationConfig> {
        self.run.as_ref().map(|run| &run.config)
    }

    pub fn balances(&self) -> Option<&BalanceVector> {
        self.run.as_ref().map(|run| &run.balances)
    }

    pub fn history(&self) -> &[HistoryRow] {
        match &self.run {
            Some(run) => run.history.rows(),
            None => &[],
        }
    }

    pub fn pending(&self) -> Option<&PendingYear> {
        self.run.as_ref().and_then(|run| run.state.pending())
    }

    pub fn years_completed(&self) -> u32 {
        self.run.as_ref().map_or(0, Run::years_completed)
    }

    pub fn advance_year(&mut self) -> Result<YearOutcome, EngineError> {
        let run = self.run.as_mut().ok_or(EngineError::NotStarted)?;
        if let EngineState::AwaitingTransfer(pending) = &run.state {
            return Err(EngineError::StateConflict {
                year_index: pending.year_index,
                shortfall: pending.shortfall,
            });
        }

        let year_index = run.history.next_year_index();
        let expense = run.config.expense_for_year(run.years_completed());
        let return_percents = self.generator.sample(
            &run.config.avg_returns(),
            &run.config.volatilities(),
            &run.config.correlation,
        )?;
        let (grown, return_amounts) = run.balances.apply_returns(&return_percents);

        let mode = run.config.mode;
        match mode {
            WithdrawalMode::Auto => {
                if grown.total() < expense {
                    warn!(
                        year_index,
                        expense,
                        available = grown.total(),
                        "portfolio depleted"
                    );
                }
                let (after, withdrawn) = grown.withdraw_in_order(expense);
                let year = SampledYear {
                    year_index,
                    expense,
                    return_percents,
                    return_amounts,
                };
                Ok(YearOutcome::Committed(run.commit(year, withdrawn, after)))
            }
            WithdrawalMode::Manual => match grown.draw_liquid(expense) {
                Some(after) => {
                    let year = SampledYear {
                        year_index,
                        expense,
                        return_percents,
                        return_amounts,
                    };
                    Ok(YearOutcome::Committed(run.commit(year, expense, after)))
                }
                None => {
                    let shortfall = grown.liquid_shortfall(expense);
                    info!(year_index, expense, shortfall, "year awaiting transfer");
                    let pending = PendingYear {
                        year_index,
                        return_percents,
                        return_amounts,
                        balances: grown.clone(),
                        expense,
                        shortfall,
                    };
                    run.balances = grown;
                    run.state = EngineState::AwaitingTransfer(pending.clone());
                    Ok(YearOutcome::Pending(pending))
                }
            },
        }
    }

    /// Moves `amount` between buckets. While a year is pending the same move
    /// is applied to its snapshot, which commits the year once the liquid
    /// bucket covers the expense.
    pub fn transfer(
        &mut self,
        from: usize,
        to: usize,
        amount: f64,
    ) -> Result<TransferOutcome, EngineError> {
        let run = self.run.as_mut().ok_or(EngineError::NotStarted)?;
        let balances = run.balances.transfer(from, to, amount)?;

        let pending = match &run.state {
            EngineState::Idle => {
                debug!(from, to, amount, "transfer applied");
                run.balances = balances;
                return Ok(TransferOutcome::Applied);
            }
            EngineState::AwaitingTransfer(pending) => pending.clone(),
        };

        let snapshot = pending.balances.shifted(from, to, amount);
        match snapshot.draw_liquid(pending.expense) {
            Some(resolved) => {
                info!(year_index = pending.year_index, "pending year resolved");
                let expense = pending.expense;
                let row = run.commit(SampledYear::from(pending), expense, resolved);
                Ok(TransferOutcome::Resolved { year: row })
            }
            None => {
                let shortfall = snapshot.liquid_shortfall(pending.expense);
                debug!(
                    year_index = pending.year_index,
                    from, to, amount, shortfall, "transfer applied, year still pending"
                );
                run.balances = balances;
                run.state = EngineState::AwaitingTransfer(PendingYear {
                    balances: snapshot,
                    shortfall,
                    ..pending
                });
                Ok(TransferOutcome::StillPending { shortfall })
            }
        }
    }

    /// Advances up to `years` times, stopping early on a pending year or once
    /// nothing is left to draw from.
    pub fn run_years(&mut self, years: u32) -> Result<BatchStop, EngineError> {
        for _ in 0..years {
            match self.advance_year()? {
                YearOutcome::Pending(_) => return Ok(BatchStop::AwaitingTransfer),
                YearOutcome::Committed(row) => {
                    if row.total <= 0.0 && row.expense > 0.0 {
                        return Ok(BatchStop::Depleted);
                    }
                }
            }
        }
        Ok(BatchStop::Completed)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        match &self.run {
            None => EngineSnapshot::not_started(),
            Some(run) => EngineSnapshot {
                started: true,
                years_completed: run.years_completed(),
                next_expense: Some(run.next_expense()),
                balances: Some(run.balances.clone()),
                total: Some(run.balances.total()),
                history: run.history.rows().to_vec(),
                state: run.state.clone(),
            },
        }
    }
}

fn validate_config(config: &SimulationConfig) -> Result<(), EngineError> {
    for bucket in &config.buckets {
        if !bucket.allocation_percent.is_finite() || bucket.allocation_percent < 0.0 {
            return Err(EngineError::Configuration(format!(
                "allocation for {} must be >= 0",
                bucket.name
            )));
        }
        if !bucket.avg_return_percent.is_finite()
            || !bucket.volatility_percent.is_finite()
            || bucket.volatility_percent < 0.0
        {
            return Err(EngineError::Configuration(format!(
                "return parameters for {} must be finite with volatility >= 0",
                bucket.name
            )));
        }
    }

    let allocation = config.allocation_total();
    if allocation.round() != 100.0 {
        return Err(EngineError::Configuration(format!(
            "allocations sum to {allocation}, expected 100"
        )));
    }

    if !config.starting_corpus.is_finite() || config.starting_corpus < 0.0 {
        return Err(EngineError::Configuration(
            "starting corpus must be >= 0".to_string(),
        ));
    }
    if !config.first_year_expense.is_finite() || config.first_year_expense < 0.0 {
        return Err(EngineError::Configuration(
            "first-year expense must be >= 0".to_string(),
        ));
    }
    if !config.inflation_rate.is_finite() || config.inflation_rate <= -1.0 {
        return Err(EngineError::Configuration(
            "inflation rate must be > -100%".to_string(),
        ));
    }
    Ok(())
}
