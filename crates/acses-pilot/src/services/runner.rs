//! Sequential, resumable batch orchestrator.
//!
//! For every sample in dataset order the runner renders the prompt, works out
//! which run indices still lack a successful ledger record, and issues one
//! paced call per outstanding run. Successes and ordinary failures are
//! appended to the ledger; a quota-class failure trips a global breaker that
//! halts the whole batch without recording the triggering attempt.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::executor::RemoteCallExecutor;
use super::ledger::{CompletionIndex, LedgerError, ResultLedger};
use crate::constants::{DEFAULT_N_RUNS, DEFAULT_PASSES, PROGRESS_LOG_INTERVAL};
use crate::pipeline::{
    AttemptOutcome, CodebookLookup, LedgerRecord, PromptTemplate, RunMetadata, Sample,
    build_prompt,
};

#[derive(Debug, Clone, Builder)]
pub struct RunConfig {
    #[builder(default = DEFAULT_N_RUNS)]
    pub n_runs: u32,
    /// Sweeps over the dataset within one invocation; later sweeps only
    /// revisit runs that failed earlier.
    #[builder(default = DEFAULT_PASSES)]
    pub passes: u32,
    /// Governor delay slept after every non-quota attempt.
    pub pacing: Duration,
    #[builder(into)]
    pub dataset_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    QuotaExhausted,
    Interrupted,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExhausted => f.write_str("quota exhausted"),
            Self::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub ledger_path: PathBuf,
    pub model_name: String,
    pub samples_total: usize,
    pub samples_skipped: usize,
    /// Matched samples reached by the sweep, including ones already complete.
    pub samples_processed: usize,
    pub attempts: usize,
    pub new_successes: usize,
    pub new_failures: usize,
    pub append_failures: usize,
    /// Records in the ledger after the run (historical plus new).
    pub total_records: usize,
    /// Completed `(sample, run)` pairs over non-skipped samples.
    pub completed_runs: usize,
    /// `non-skipped samples * n_runs`.
    pub expected_runs: usize,
    pub success_rate: f64,
    pub halt: Option<HaltReason>,
}

impl RunReport {
    pub fn new_records(&self) -> usize {
        self.new_successes + self.new_failures
    }

    pub fn is_complete(&self) -> bool {
        self.halt.is_none() && self.completed_runs >= self.expected_runs
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to load result ledger: {0}")]
    Ledger(#[from] LedgerError),
}

struct Planned<'a> {
    sample: &'a Sample,
    prompt: String,
}

pub struct PilotRunner {
    executor: RemoteCallExecutor,
    ledger: ResultLedger,
    config: RunConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PilotRunner {
    pub fn new(executor: RemoteCallExecutor, ledger: ResultLedger, config: RunConfig) -> Self {
        Self {
            executor,
            ledger,
            config,
            shutdown: None,
        }
    }

    /// Stop cleanly once the channel flips to `true`.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub async fn run<C>(
        &self,
        samples: &[Sample],
        codebook: &C,
        template: &PromptTemplate,
    ) -> Result<RunReport, RunError>
    where
        C: CodebookLookup + ?Sized,
    {
        debug_assert!(self.config.n_runs > 0);
        let n_runs = self.config.n_runs.max(1);
        let passes = self.config.passes.max(1);
        let model = self.executor.model_name().to_string();

        let snapshot = self.ledger.load().await?;
        let historical = snapshot.records.len();
        let mut completed = snapshot.completed;
        info!(
            event = "ledger_loaded",
            path = %self.ledger.path().display(),
            records = historical,
            completed_pairs = completed.len(),
            skipped_lines = snapshot.skipped_lines,
            "resuming from ledger"
        );

        let mut planned = Vec::with_capacity(samples.len());
        for sample in samples {
            match build_prompt(template, sample, codebook) {
                Some(prompt) => planned.push(Planned { sample, prompt }),
                None => warn!(
                    event = "sample_skipped",
                    sample_id = %sample.id,
                    code = %sample.code,
                    "no codebook entry for code; skipping sample"
                ),
            }
        }
        let skipped = samples.len() - planned.len();
        let expected_runs = planned.len() * n_runs as usize;

        let mut report = RunReport {
            ledger_path: self.ledger.path().to_path_buf(),
            model_name: model.clone(),
            samples_total: samples.len(),
            samples_skipped: skipped,
            samples_processed: 0,
            attempts: 0,
            new_successes: 0,
            new_failures: 0,
            append_failures: 0,
            total_records: historical,
            completed_runs: 0,
            expected_runs,
            success_rate: 0.0,
            halt: None,
        };

        let outstanding: usize = planned
            .iter()
            .map(|plan| completed.remaining_runs(&plan.sample.id, n_runs).len())
            .sum();
        if outstanding == 0 {
            info!(
                event = "run_already_complete",
                samples = planned.len(),
                n_runs,
                "all runs already completed; nothing to do"
            );
            report.samples_processed = planned.len();
            return self.finish(report, &completed, &planned, n_runs).await;
        }

        info!(
            event = "run_start",
            model = %model,
            dataset = %self.config.dataset_name,
            samples = planned.len(),
            skipped,
            n_runs,
            outstanding,
            pacing_ms = self.config.pacing.as_millis() as u64,
            "starting pilot run"
        );

        let mut shutdown = self.shutdown.clone();
        let mut processed = HashSet::new();

        'passes: for pass in 1..=passes {
            let mut failures_this_pass = 0usize;
            for (position, plan) in planned.iter().enumerate() {
                let remaining = completed.remaining_runs(&plan.sample.id, n_runs);
                let first_visit = processed.insert(position);
                if remaining.is_empty() {
                    continue;
                }
                if first_visit && processed.len() % PROGRESS_LOG_INTERVAL == 0 {
                    info!(
                        event = "run_progress",
                        processed = processed.len(),
                        total = planned.len(),
                        successes = report.new_successes,
                        failures = report.new_failures,
                        "progress"
                    );
                }

                for run in remaining {
                    if is_shutdown(shutdown.as_ref()) {
                        report.halt = Some(HaltReason::Interrupted);
                        break 'passes;
                    }

                    debug!(sample_id = %plan.sample.id, run, pass, "attempting run");
                    let started = Instant::now();
                    let result = tokio::select! {
                        result = self.executor.execute(&plan.prompt) => result,
                        _ = wait_for_shutdown(shutdown.as_mut()) => {
                            warn!(
                                event = "run_interrupted",
                                sample_id = %plan.sample.id,
                                run,
                                "interrupted during remote call; attempt not recorded"
                            );
                            report.halt = Some(HaltReason::Interrupted);
                            break 'passes;
                        }
                    };
                    let elapsed = started.elapsed().as_secs_f64();
                    report.attempts += 1;

                    let metadata = RunMetadata::for_attempt(
                        plan.sample,
                        run,
                        &model,
                        &self.config.dataset_name,
                        elapsed,
                    );
                    let outcome = match result {
                        Ok(payload) => AttemptOutcome::Success { metadata, payload },
                        Err(err) if err.is_quota() => {
                            error!(
                                event = "quota_exhausted",
                                sample_id = %plan.sample.id,
                                run,
                                error = %err,
                                "quota exhausted; halting batch"
                            );
                            report.halt = Some(HaltReason::QuotaExhausted);
                            break 'passes;
                        }
                        Err(err) => AttemptOutcome::Failure {
                            metadata,
                            kind: err.failure_kind(),
                            message: err.to_string(),
                        },
                    };

                    let success = outcome.is_success();
                    if success {
                        report.new_successes += 1;
                    } else {
                        report.new_failures += 1;
                        failures_this_pass += 1;
                    }
                    match self.ledger.append(&LedgerRecord::from(&outcome)).await {
                        Ok(()) => {
                            report.total_records += 1;
                            if success {
                                completed.insert(plan.sample.id.clone(), run);
                            }
                        }
                        Err(err) => {
                            report.append_failures += 1;
                            error!(
                                event = "ledger_append_failed",
                                sample_id = %plan.sample.id,
                                run,
                                error = %err,
                                "failed to persist attempt; run stays outstanding"
                            );
                        }
                    }

                    match &outcome {
                        AttemptOutcome::Success { .. } => debug!(
                            sample_id = %plan.sample.id,
                            run,
                            elapsed_s = elapsed,
                            "run recorded"
                        ),
                        AttemptOutcome::Failure { kind, message, .. } => warn!(
                            event = "run_failed",
                            sample_id = %plan.sample.id,
                            run,
                            error_type = kind.as_str(),
                            error = %message,
                            "run failed; will retry on a later pass or invocation"
                        ),
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.pacing) => {}
                        _ = wait_for_shutdown(shutdown.as_mut()) => {
                            report.halt = Some(HaltReason::Interrupted);
                            break 'passes;
                        }
                    }
                }
            }

            if failures_this_pass == 0 {
                break;
            }
            if pass < passes {
                info!(
                    event = "pass_complete",
                    pass,
                    failures = failures_this_pass,
                    "revisiting failed runs"
                );
            }
        }

        report.samples_processed = processed.len();
        self.finish(report, &completed, &planned, n_runs).await
    }

    async fn finish(
        &self,
        mut report: RunReport,
        completed: &CompletionIndex,
        planned: &[Planned<'_>],
        n_runs: u32,
    ) -> Result<RunReport, RunError> {
        report.completed_runs = planned
            .iter()
            .map(|plan| n_runs as usize - completed.remaining_runs(&plan.sample.id, n_runs).len())
            .sum();
        report.success_rate = match self.ledger.success_rate().await {
            Ok(rate) => rate,
            Err(err) => {
                warn!(error = %err, "failed to compute ledger success rate");
                0.0
            }
        };
        info!(
            event = "run_finished",
            halt = ?report.halt,
            attempts = report.attempts,
            new_successes = report.new_successes,
            new_failures = report.new_failures,
            completed = report.completed_runs,
            expected = report.expected_runs,
            "pilot run finished"
        );
        Ok(report)
    }
}

fn is_shutdown(rx: Option<&watch::Receiver<bool>>) -> bool {
    rx.is_some_and(|rx| *rx.borrow())
}

/// Resolves once shutdown is requested; never resolves without a channel or
/// after the sender is gone.
async fn wait_for_shutdown(rx: Option<&mut watch::Receiver<bool>>) {
    if let Some(rx) = rx {
        if rx.wait_for(|stop| *stop).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}
