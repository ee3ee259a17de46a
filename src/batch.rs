//! Multi-FASTA runs
//!
//! A sequence file holding several records becomes one job per record. Each
//! job gets its own controller (and so its own gateway), and a semaphore
//! bounds how many are in flight at once.

use crate::consts::cli::{EXIT_RUNTIME, STDOUT_SENTINEL};
use crate::error::ClientError;
use crate::gateway::ServiceGateway;
use crate::job::{JobHandle, JobRequest};
use crate::lifecycle::{BatchReport, JobLifecycleController, OutputTarget};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Splits FASTA text into records, each keeping its `>` header line.
///
/// Text before the first header counts as a record of its own, so plain
/// sequence input yields a single record. Blank lines are dropped.
pub fn split_fasta(text: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.starts_with('>') && !current.is_empty() {
            records.push(std::mem::take(&mut current));
        }
        if line.trim().is_empty() {
            continue;
        }
        current.push_str(line.trim_end());
        current.push('\n');
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

/// One request per record, each with `option` replaced by that record.
pub fn expand_requests(request: &JobRequest, option: &str, records: &[String]) -> Vec<JobRequest> {
    records
        .iter()
        .map(|record| {
            let mut job = request.clone();
            job.params.set(option, record.clone());
            job
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub max_jobs: usize,
    /// Submit and report handles without waiting for results.
    pub submit_only: bool,
}

/// What happened to the job built from record `index` (1-based).
#[derive(Debug)]
pub struct JobOutcome {
    pub index: usize,
    pub result: Result<(JobHandle, Option<BatchReport>), ClientError>,
}

impl JobOutcome {
    fn not_submitted(index: usize) -> Self {
        JobOutcome {
            index,
            result: Err(ClientError::NotSubmitted { index }),
        }
    }
}

/// Output base for the job built from record `index`.
fn record_target(target: &OutputTarget, index: usize) -> OutputTarget {
    let base = match target.base.as_deref() {
        Some(STDOUT_SENTINEL) => Some(STDOUT_SENTINEL.to_string()),
        Some(base) => Some(format!("{}.{}", base, index)),
        None => None,
    };
    OutputTarget {
        base,
        format: target.format.clone(),
    }
}

/// Runs every request, at most `settings.max_jobs` at a time.
///
/// `make_controller` is called once per job with the record index. Outcomes
/// come back in request order. Once `cancel` fires no further record is
/// submitted; those records come back as [`ClientError::NotSubmitted`].
pub async fn run_batch<G, F>(
    requests: Vec<JobRequest>,
    target: &OutputTarget,
    settings: BatchSettings,
    cancel: CancellationToken,
    make_controller: Arc<F>,
) -> Result<Vec<JobOutcome>, ClientError>
where
    G: ServiceGateway + 'static,
    F: Fn(usize) -> Result<JobLifecycleController<G>, ClientError> + Send + Sync + 'static,
{
    let total = requests.len();
    let semaphore = Arc::new(Semaphore::new(settings.max_jobs.max(1)));
    info!(
        "Running {} jobs, {} at a time",
        total,
        settings.max_jobs.max(1)
    );

    let mut handles: Vec<(usize, Option<JoinHandle<JobOutcome>>)> = Vec::with_capacity(total);
    for (offset, request) in requests.into_iter().enumerate() {
        let index = offset + 1;
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => Some(
                permit.map_err(|e| ClientError::Io(std::io::Error::other(e)))?,
            ),
        };
        let Some(permit) = permit else {
            debug!("Record {} skipped, batch cancelled", index);
            handles.push((index, None));
            continue;
        };
        let make_controller = make_controller.clone();
        let target = record_target(target, index);
        let cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            if cancel.is_cancelled() {
                return JobOutcome::not_submitted(index);
            }
            let result = match (*make_controller)(index) {
                Ok(controller) => {
                    run_one(controller, &request, &target, settings.submit_only).await
                }
                Err(e) => Err(e),
            };
            drop(permit);
            debug!("Job {}/{} done", index, total);
            JobOutcome { index, result }
        });
        handles.push((index, Some(handle)));
    }

    let mut outcomes = Vec::with_capacity(total);
    for (index, handle) in handles {
        let outcome = match handle {
            Some(handle) => handle.await.unwrap_or_else(|e| JobOutcome {
                index,
                result: Err(ClientError::Io(std::io::Error::other(e))),
            }),
            None => JobOutcome::not_submitted(index),
        };
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Prints submit-only handles, logs the rest, and picks the exit code:
/// [`EXIT_RUNTIME`] if any record failed, 0 otherwise.
///
/// A record whose results were only partly retrieved still counts as done,
/// the same as a single job.
pub fn summarise(outcomes: &[JobOutcome]) -> u8 {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.result {
            Ok((handle, None)) => println!("{}", handle),
            Ok((handle, Some(report))) => report.log(handle),
            Err(e) => {
                failed += 1;
                warn!("Record {}: {}", outcome.index, e);
            }
        }
    }
    if failed > 0 {
        warn!("{} of {} records failed", failed, outcomes.len());
        return EXIT_RUNTIME;
    }
    0
}

async fn run_one<G: ServiceGateway>(
    mut controller: JobLifecycleController<G>,
    request: &JobRequest,
    target: &OutputTarget,
    submit_only: bool,
) -> Result<(JobHandle, Option<BatchReport>), ClientError> {
    if submit_only {
        let handle = controller.submit(request).await?;
        return Ok((handle, None));
    }
    let (handle, report) = controller.run(request, target).await?;
    Ok((handle, Some(report)))
}
