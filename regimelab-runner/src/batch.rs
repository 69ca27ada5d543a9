//! Batch runner: independent backtests over rayon, merged after completion.
//!
//! Each job owns its config and bars and gets its own engine, so workers
//! share nothing. A job that fails is recorded with its error; its siblings
//! still run.

use std::collections::HashSet;

use anyhow::{bail, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use regimelab_core::domain::Bar;

use crate::config::BacktestConfig;
use crate::runner::{run_single, BacktestResult};

/// One unit of batch work.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub config: BacktestConfig,
    pub bars: Vec<Bar>,
    /// One stream per configured secondary timeframe.
    pub secondary: Vec<Vec<Bar>>,
}

impl BatchJob {
    pub fn new(config: BacktestConfig, bars: Vec<Bar>) -> Self {
        Self {
            config,
            bars,
            secondary: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, secondary: Vec<Vec<Bar>>) -> Self {
        self.secondary = secondary;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// How one job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Completed { result: Box<BacktestResult> },
    Failed {
        error: String,
        /// Bar index of a fatal data error, when the engine got that far.
        aborted_at: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub name: String,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn result(&self) -> Option<&BacktestResult> {
        match &self.status {
            JobStatus::Completed { result } => Some(result),
            JobStatus::Failed { .. } => None,
        }
    }
}

/// Merged view of a batch, in job order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// blake3 over every job's name and run id (or error), in job order.
    pub batch_id: String,
    pub outcomes: Vec<JobOutcome>,
    pub total_trades: usize,
    pub total_pnl: f64,
    /// Name of the completed job with the highest Sharpe ratio.
    pub best: Option<String>,
}

impl BatchSummary {
    fn reduce(outcomes: Vec<JobOutcome>) -> Self {
        let completed: Vec<&BacktestResult> =
            outcomes.iter().filter_map(JobOutcome::result).collect();
        let total_trades = completed.iter().map(|r| r.metrics.trade_count).sum();
        let total_pnl = completed.iter().map(|r| r.net_pnl()).sum();
        // First job wins ties, so the pick doesn't depend on worker timing.
        let best = completed
            .iter()
            .fold(None::<&BacktestResult>, |best, r| match best {
                Some(b) if b.metrics.sharpe >= r.metrics.sharpe => Some(b),
                _ => Some(r),
            })
            .map(|r| r.name.clone());

        let mut hasher = blake3::Hasher::new();
        for outcome in &outcomes {
            hasher.update(outcome.name.as_bytes());
            hasher.update(&[0]);
            match &outcome.status {
                JobStatus::Completed { result } => {
                    hasher.update(result.fingerprint.run_id.as_bytes())
                }
                JobStatus::Failed { error, .. } => hasher.update(error.as_bytes()),
            };
            hasher.update(&[0]);
        }
        Self {
            batch_id: hasher.finalize().to_hex().to_string(),
            outcomes,
            total_trades,
            total_pnl,
            best,
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = &BacktestResult> {
        self.outcomes.iter().filter_map(JobOutcome::result)
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.result().is_none())
    }

    pub fn get(&self, name: &str) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    pub fn best(&self) -> Option<&BacktestResult> {
        self.best.as_deref().and_then(|name| self.get(name)).and_then(JobOutcome::result)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Run every job, in parallel when `parallel` is set, then reduce.
///
/// Job names must be unique; they key the summary.
pub fn run_batch(jobs: &[BatchJob], parallel: bool) -> Result<BatchSummary> {
    let mut seen = HashSet::new();
    for job in jobs {
        if !seen.insert(job.name()) {
            bail!("duplicate batch job name '{}'", job.name());
        }
    }

    info!(jobs = jobs.len(), parallel, "batch started");
    let outcomes: Vec<JobOutcome> = if parallel {
        jobs.par_iter().map(run_job).collect()
    } else {
        jobs.iter().map(run_job).collect()
    };

    let summary = BatchSummary::reduce(outcomes);
    info!(
        completed = summary.completed().count(),
        failed = summary.failures().count(),
        total_trades = summary.total_trades,
        total_pnl = summary.total_pnl,
        best = ?summary.best,
        "batch complete"
    );
    Ok(summary)
}

fn run_job(job: &BatchJob) -> JobOutcome {
    let status = match run_single(&job.config, &job.bars, &job.secondary) {
        Ok(result) => JobStatus::Completed {
            result: Box::new(result),
        },
        Err(err) => {
            warn!(job = job.name(), error = %err, "batch job failed");
            JobStatus::Failed {
                aborted_at: err.aborted_at(),
                error: err.to_string(),
            }
        }
    };
    JobOutcome {
        name: job.name().to_string(),
        status,
    }
}
