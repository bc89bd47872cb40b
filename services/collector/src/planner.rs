//! Fallback query planner.
//!
//! Some indicators are published under one of several mutually exclusive
//! (unit, category) parameterizations depending on the dataflow revision.
//! The planner tries them unit-major, category-minor and stops at the first
//! attempt that yields records. A failing attempt never stops the loop.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use shared::FlatRecord;
use thiserror::Error;

use crate::cube::CubeError;
use crate::transport::TransportError;

/// One (unit, category) pair. `None` is the "no value" sentinel for an
/// indicator without that axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub unit: Option<String>,
    pub category: Option<String>,
}

impl Display for Combination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unit={} category={}",
            self.unit.as_deref().unwrap_or("-"),
            self.category.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPlan {
    units: Vec<Option<String>>,
    categories: Vec<Option<String>>,
}

impl FallbackPlan {
    /// Empty candidate lists collapse to a single sentinel.
    pub fn new(units: &[&str], categories: &[&str]) -> Self {
        fn axis(values: &[&str]) -> Vec<Option<String>> {
            if values.is_empty() {
                vec![None]
            } else {
                values.iter().map(|v| Some(v.to_string())).collect()
            }
        }
        Self {
            units: axis(units),
            categories: axis(categories),
        }
    }

    /// Candidates in attempt order: unit varies slower than category.
    pub fn combinations(&self) -> impl Iterator<Item = Combination> + '_ {
        self.units.iter().flat_map(move |unit| {
            self.categories.iter().map(move |category| Combination {
                unit: unit.clone(),
                category: category.clone(),
            })
        })
    }
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected response structure: {0}")]
    Structure(#[from] CubeError),

    #[error("attempt exceeded {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

/// Result of one fallback attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Vec<FlatRecord>),
    /// The response was valid but carried no usable observation.
    Empty,
    Failed(AttemptError),
}

impl From<Vec<FlatRecord>> for AttemptOutcome {
    fn from(records: Vec<FlatRecord>) -> Self {
        if records.is_empty() {
            Self::Empty
        } else {
            Self::Success(records)
        }
    }
}

/// Result of a whole plan. `NoData` and `Unavailable` both give callers an
/// empty record set but mean different things operationally.
#[derive(Debug)]
pub enum PlanOutcome {
    Found {
        combination: Combination,
        records: Vec<FlatRecord>,
        attempts: usize,
    },
    /// At least one attempt got a valid, empty response.
    NoData { attempts: usize, failed: usize },
    /// Every attempt failed.
    Unavailable { attempts: usize, last_error: String },
}

impl PlanOutcome {
    pub fn into_records(self) -> Vec<FlatRecord> {
        match self {
            Self::Found { records, .. } => records,
            _ => Vec::new(),
        }
    }

    pub fn log(&self, indicator: &str) {
        match self {
            Self::Found {
                combination,
                records,
                attempts,
            } => tracing::info!(
                indicator,
                %combination,
                attempts,
                rows = records.len(),
                "fallback combination matched"
            ),
            Self::NoData { attempts, failed } => tracing::warn!(
                indicator,
                attempts,
                failed,
                "no published data for any fallback combination"
            ),
            Self::Unavailable {
                attempts,
                last_error,
            } => tracing::error!(
                indicator,
                attempts,
                error = %last_error,
                "all fallback combinations failed"
            ),
        }
    }
}

/// Run `attempt` for each combination until one succeeds. Each attempt is
/// bounded by `timeout`.
pub async fn run_plan<F, Fut>(plan: &FallbackPlan, timeout: Duration, mut attempt: F) -> PlanOutcome
where
    F: FnMut(Combination) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut attempts = 0;
    let mut failed = 0;
    let mut last_error = None;

    for combination in plan.combinations() {
        attempts += 1;
        let outcome = match tokio::time::timeout(timeout, attempt(combination.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => AttemptOutcome::Failed(AttemptError::TimedOut {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            AttemptOutcome::Success(records) => {
                return PlanOutcome::Found {
                    combination,
                    records,
                    attempts,
                }
            }
            AttemptOutcome::Empty => {
                tracing::debug!(%combination, "attempt returned no records");
            }
            AttemptOutcome::Failed(err) => {
                tracing::debug!(%combination, error = %err, "attempt failed");
                failed += 1;
                last_error = Some(err.to_string());
            }
        }
    }

    match last_error {
        Some(last_error) if failed == attempts => PlanOutcome::Unavailable {
            attempts,
            last_error,
        },
        _ => PlanOutcome::NoData { attempts, failed },
    }
}
