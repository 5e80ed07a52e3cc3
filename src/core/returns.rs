use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::EngineError;

const PIVOT_TOLERANCE: f64 = 1e-12;
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Supplies uniform samples in `[0, 1)`.
pub trait RandomSource {
    fn next_uniform(&mut self) -> f64;
}

pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for StdRandom {
    fn next_uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
}

fn nonzero_uniform(source: &mut dyn RandomSource) -> f64 {
    loop {
        let u = source.next_uniform();
        if u != 0.0 {
            return u;
        }
    }
}

/// Box-Muller, one variate per pair of uniforms.
pub fn standard_normal(source: &mut dyn RandomSource) -> f64 {
    let u1 = nonzero_uniform(source);
    let u2 = nonzero_uniform(source);
    let r = (-2.0 * u1.ln()).sqrt();
    r * (2.0 * PI * u2).cos()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationMatrix {
    rows: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn identity(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { rows }
    }

    pub fn dimension(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Lower-triangular `L` with `L * L^T` equal to this matrix. Zero pivots
    /// (semi-definite input) leave the rest of their column at zero.
    pub fn cholesky(&self) -> Result<CholeskyFactor, EngineError> {
        let n = self.rows.len();
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != n {
                return Err(EngineError::Decomposition(format!(
                    "row {i} has {} entries, expected {n}",
                    row.len()
                )));
            }
        }
        for i in 0..n {
            for j in 0..i {
                if (self.rows[i][j] - self.rows[j][i]).abs() > SYMMETRY_TOLERANCE {
                    return Err(EngineError::Decomposition(format!(
                        "entries ({i}, {j}) and ({j}, {i}) differ"
                    )));
                }
            }
        }

        let mut l = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let mut sum = self.rows[i][j];
                for k in 0..j {
                    sum -= l[i * n + k] * l[j * n + k];
                }
                if i == j {
                    if sum < -PIVOT_TOLERANCE || sum.is_nan() {
                        return Err(EngineError::Decomposition(format!(
                            "negative pivot {sum} at index {i}"
                        )));
                    }
                    l[i * n + j] = sum.max(0.0).sqrt();
                } else {
                    let pivot = l[j * n + j];
                    l[i * n + j] = if pivot > 0.0 { sum / pivot } else { 0.0 };
                }
            }
        }

        Ok(CholeskyFactor { n, values: l })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CholeskyFactor {
    n: usize,
    values: Vec<f64>,
}

impl CholeskyFactor {
    pub fn dimension(&self) -> usize {
        self.n
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n + col]
    }

    pub fn apply(&self, independent: &[f64]) -> Vec<f64> {
        (0..self.n)
            .map(|i| {
                (0..=i)
                    .map(|k| self.values[i * self.n + k] * independent[k])
                    .sum()
            })
            .collect()
    }
}

pub struct CorrelatedReturnGenerator {
    source: Box<dyn RandomSource + Send>,
}

impl CorrelatedReturnGenerator {
    pub fn new(source: impl RandomSource + Send + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRandom::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRandom::seeded(seed))
    }

    /// One return percentage per bucket. The matrix is factored before any
    /// randomness is drawn, so a failed call consumes nothing.
    pub fn sample(
        &mut self,
        avg_returns: &[f64],
        volatilities: &[f64],
        correlation: &CorrelationMatrix,
    ) -> Result<Vec<f64>, EngineError> {
        let n = avg_returns.len();
        if volatilities.len() != n || correlation.dimension() != n {
            return Err(EngineError::Decomposition(format!(
                "matrix dimension {} does not match {n} buckets",
                correlation.dimension()
            )));
        }
        let factor = correlation.cholesky()?;

        let independent: Vec<f64> = (0..n)
            .map(|_| standard_normal(self.source.as_mut()))
            .collect();
        let correlated = factor.apply(&independent);

        Ok(avg_returns
            .iter()
            .zip(volatilities)
            .zip(correlated)
            .map(|((avg, vol), z)| avg + z * vol)
            .collect())
    }
}

/// Replays a fixed cycle of uniforms.
#[cfg(test)]
pub(crate) struct ScriptedSource {
    values: Vec<f64>,
    pos: usize,
}

#[cfg(test)]
impl ScriptedSource {
    pub(crate) fn new(values: Vec<f64>) -> Self {
        Self { values, pos: 0 }
    }
}

#[cfg(test)]
impl RandomSource for ScriptedSource {
    fn next_uniform(&mut self) -> f64 {
        let v = self.values[self.pos % self.values.len()];
        self.pos += 1;
        v
    }
}
