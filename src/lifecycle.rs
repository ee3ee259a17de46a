//! Job Lifecycle
//!
//! Drives one remote job from submission to persisted results:
//! - Submission through a [`ServiceGateway`]
//! - Status polling with capped exponential backoff, bounded by an optional
//!   timeout and a cancellation token
//! - Result type enumeration and retrieval through a [`ResultWriter`]

use crate::consts::poll::{INITIAL_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS};
use crate::error::ClientError;
use crate::events::{Event, EventSink};
use crate::gateway::ServiceGateway;
use crate::gateway::error::GatewayError;
use crate::job::{JobHandle, JobRequest, JobStatus, ResultTypeDescriptor};
use crate::writer::{ResultWriter, WrittenTo};
use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What `fetch_all_results` does when one result type cannot be retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Report the failure and carry on with the remaining types.
    #[default]
    Continue,
    /// Stop at the first failure.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Overall limit on waiting for a terminal status.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(INITIAL_POLL_INTERVAL_MS),
            max_interval: Duration::from_millis(MAX_POLL_INTERVAL_MS),
            timeout: None,
        }
    }
}

/// Wait between status checks: doubles after every non-terminal status, up to a ceiling.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    current: Duration,
    max: Duration,
}

impl PollBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(Duration::from_millis(1));
        Self {
            current: initial.clamp(Duration::from_millis(1), max),
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn increase(&mut self) {
        self.current = self
            .current
            .checked_mul(2)
            .map_or(self.max, |next| next.min(self.max));
    }
}

impl From<&PollConfig> for PollBackoff {
    fn from(config: &PollConfig) -> Self {
        Self::new(config.initial_interval, config.max_interval)
    }
}

/// Where retrieved results go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputTarget {
    /// File name base; the job id when absent, `-` for stdout.
    pub base: Option<String>,
    /// Retrieve only this result type.
    pub format: Option<String>,
}

/// Outcome of retrieving several result types.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<(String, WrittenTo)>,
    pub failed: Vec<(String, ClientError)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Debug line when complete, otherwise a warning naming the types that failed.
    pub fn log(&self, handle: &JobHandle) {
        if self.is_complete() {
            debug!("All {} results of {} retrieved", self.written.len(), handle);
            return;
        }
        warn!(
            "Retrieved {} of {} result types for {}; failed: {}",
            self.written.len(),
            self.written.len() + self.failed.len(),
            handle,
            self.failed
                .iter()
                .map(|(type_id, _)| type_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

#[derive(Debug, Default)]
struct Tracked {
    /// `None` until the first status is observed (the SUBMITTED state).
    status: Option<JobStatus>,
    result_types: Option<Vec<ResultTypeDescriptor>>,
}

pub struct JobLifecycleController<G: ServiceGateway> {
    gateway: G,
    writer: ResultWriter,
    poll: PollConfig,
    policy: FetchPolicy,
    events: EventSink,
    cancel: CancellationToken,
    jobs: HashMap<JobHandle, Tracked>,
}

impl<G: ServiceGateway> JobLifecycleController<G> {
    pub fn new(gateway: G, writer: ResultWriter) -> Self {
        Self {
            gateway,
            writer,
            poll: PollConfig::default(),
            policy: FetchPolicy::default(),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
            jobs: HashMap::new(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Last status observed for a handle, if any.
    pub fn known_status(&self, handle: &JobHandle) -> Option<JobStatus> {
        self.jobs.get(handle).and_then(|t| t.status)
    }

    pub async fn submit(&mut self, request: &JobRequest) -> Result<JobHandle, ClientError> {
        debug!(
            "Submitting job {:?} with {} parameters",
            request.title,
            request.params.len()
        );
        let handle = self
            .gateway
            .submit(request.email.as_deref(), &request.title, &request.params)
            .await?;
        self.jobs.insert(handle.clone(), Tracked::default());
        self.events.emit(Event::Submitted {
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// A single status query.
    pub async fn status(&mut self, handle: &JobHandle) -> Result<JobStatus, ClientError> {
        if let Some(status) = self.settled_status(handle)? {
            return Ok(status);
        }
        self.query_status(handle).await
    }

    /// Polls until the job leaves PENDING/RUNNING and returns that terminal status.
    pub async fn poll_until_terminal(
        &mut self,
        handle: &JobHandle,
    ) -> Result<JobStatus, ClientError> {
        if let Some(status) = self.settled_status(handle)? {
            return Ok(status);
        }

        let cancel = self.cancel.clone();
        let timeout = self.poll.timeout;
        // a deadline past what Instant can represent is no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut backoff = PollBackoff::from(&self.poll);
        loop {
            let status =
                interruptible(&cancel, deadline, timeout, handle, self.query_status(handle))
                    .await??;
            if status.is_terminal() {
                return Ok(status);
            }

            let wait = backoff.current();
            debug!("{} is {}, checking again in {:?}", handle, status, wait);
            interruptible(&cancel, deadline, timeout, handle, tokio::time::sleep(wait)).await?;
            backoff.increase();
        }
    }

    /// Result types of a finished job, in the order the service lists them.
    pub async fn list_result_types(
        &mut self,
        handle: &JobHandle,
    ) -> Result<Vec<ResultTypeDescriptor>, ClientError> {
        if let Some(types) = self.jobs.get(handle).and_then(|t| t.result_types.clone()) {
            return Ok(types);
        }

        let status = self.poll_until_terminal(handle).await?;
        if !status.has_results() {
            return Err(ClientError::usage(format!(
                "job {} ended with status {} and has no results",
                handle, status
            )));
        }

        let types = self.gateway.result_types(handle).await?;
        self.jobs.entry(handle.clone()).or_default().result_types = Some(types.clone());
        Ok(types)
    }

    pub async fn fetch_result(
        &mut self,
        handle: &JobHandle,
        type_id: &str,
    ) -> Result<Vec<u8>, ClientError> {
        let descriptor = self.descriptor(handle, type_id).await?;
        Ok(self
            .gateway
            .fetch_result(handle, &descriptor.identifier)
            .await?)
    }

    /// Waits for the job and fails with `JobFailed` unless it finished.
    pub async fn await_results(&mut self, handle: &JobHandle) -> Result<(), ClientError> {
        let status = self.poll_until_terminal(handle).await?;
        if !status.has_results() {
            return Err(ClientError::JobFailed {
                handle: handle.clone(),
                status,
            });
        }
        Ok(())
    }

    pub async fn fetch_one_result(
        &mut self,
        handle: &JobHandle,
        type_id: &str,
        out_base: &str,
    ) -> Result<WrittenTo, ClientError> {
        let descriptor = self.descriptor(handle, type_id).await?;
        self.fetch_and_write(handle, &descriptor, out_base).await
    }

    /// Retrieves every result type; see [`FetchPolicy`] for failure handling.
    pub async fn fetch_all_results(
        &mut self,
        handle: &JobHandle,
        out_base: &str,
    ) -> Result<BatchReport, ClientError> {
        let types = self.list_result_types(handle).await?;
        info!(
            "Retrieving {} result types for {} ({:?} on failure)",
            types.len(),
            handle,
            self.policy
        );

        let mut report = BatchReport::default();
        for descriptor in &types {
            match self.fetch_and_write(handle, descriptor, out_base).await {
                Ok(written) => report.written.push((descriptor.identifier.clone(), written)),
                Err(e) if self.policy == FetchPolicy::FailFast => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to retrieve {} for {}: {}",
                        descriptor.identifier, handle, e
                    );
                    self.events.emit(Event::ResultFailed {
                        handle: handle.clone(),
                        type_id: descriptor.identifier.clone(),
                        message: e.to_string(),
                    });
                    report.failed.push((descriptor.identifier.clone(), e));
                }
            }
        }
        Ok(report)
    }

    /// Retrieves results of a finished job into `target`.
    pub async fn retrieve(
        &mut self,
        handle: &JobHandle,
        target: &OutputTarget,
    ) -> Result<BatchReport, ClientError> {
        let base = target
            .base
            .clone()
            .unwrap_or_else(|| handle.as_str().to_string());
        match &target.format {
            Some(format) => {
                let written = self.fetch_one_result(handle, format, &base).await?;
                Ok(BatchReport {
                    written: vec![(format.clone(), written)],
                    failed: Vec::new(),
                })
            }
            None => self.fetch_all_results(handle, &base).await,
        }
    }

    /// Submit, wait and retrieve: the synchronous mode of the CLI.
    pub async fn run(
        &mut self,
        request: &JobRequest,
        target: &OutputTarget,
    ) -> Result<(JobHandle, BatchReport), ClientError> {
        let handle = self.submit(request).await?;
        self.await_results(&handle).await?;
        let report = self.retrieve(&handle, target).await?;
        Ok((handle, report))
    }

    async fn descriptor(
        &mut self,
        handle: &JobHandle,
        type_id: &str,
    ) -> Result<ResultTypeDescriptor, ClientError> {
        self.list_result_types(handle)
            .await?
            .into_iter()
            .find(|d| d.identifier == type_id)
            .ok_or_else(|| ClientError::NotFound {
                handle: handle.clone(),
                type_id: type_id.to_string(),
            })
    }

    async fn fetch_and_write(
        &mut self,
        handle: &JobHandle,
        descriptor: &ResultTypeDescriptor,
        out_base: &str,
    ) -> Result<WrittenTo, ClientError> {
        let bytes = self.fetch_result(handle, &descriptor.identifier).await?;
        let written = self.writer.write(&bytes, descriptor, out_base)?;
        self.events.emit(Event::ResultWritten {
            handle: handle.clone(),
            type_id: descriptor.identifier.clone(),
            path: written.path().map(|p| p.to_path_buf()),
        });
        Ok(written)
    }

    async fn query_status(&mut self, handle: &JobHandle) -> Result<JobStatus, ClientError> {
        let raw = self.gateway.status(handle).await?;
        let status = raw
            .parse::<JobStatus>()
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        self.jobs.entry(handle.clone()).or_default().status = Some(status);
        self.events.emit(Event::Status {
            handle: handle.clone(),
            status,
        });
        Ok(status)
    }

    /// Cached FINISHED, a usage error for the other terminal states, `None` otherwise.
    fn settled_status(&self, handle: &JobHandle) -> Result<Option<JobStatus>, ClientError> {
        match self.known_status(handle) {
            Some(JobStatus::Finished) => Ok(Some(JobStatus::Finished)),
            Some(status) if status.is_terminal() => Err(ClientError::usage(format!(
                "job {} already ended with status {}; it cannot be polled or fetched",
                handle, status
            ))),
            _ => Ok(None),
        }
    }
}

/// Runs `fut` unless cancellation or the deadline comes first.
async fn interruptible<T>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    handle: &JobHandle,
    fut: impl Future<Output = T>,
) -> Result<T, ClientError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled {
            handle: handle.clone(),
            reason: "cancelled".to_string(),
        }),
        _ = until(deadline) => Err(ClientError::Cancelled {
            handle: handle.clone(),
            reason: format!("no terminal status within {:?}", timeout.unwrap_or_default()),
        }),
        value = fut => Ok(value),
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::ParamSet;
    use crate::writer::tests::Captured;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Default)]
    pub(crate) struct Script {
        pub job_id: String,
        /// Status strings returned in order; the last one repeats.
        pub statuses: VecDeque<String>,
        pub types: Vec<ResultTypeDescriptor>,
        /// Type id to payload; `None` makes the fetch fail.
        pub results: HashMap<String, Option<Vec<u8>>>,
        pub status_calls: Vec<Instant>,
        pub type_calls: usize,
        pub fetch_calls: Vec<String>,
        pub submitted: Vec<JobRequest>,
    }

    /// In-memory gateway replaying a script; clones share the script.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedGateway(pub Arc<Mutex<Script>>);

    impl ScriptedGateway {
        pub(crate) fn new(job_id: &str, statuses: &[&str]) -> Self {
            let script = Script {
                job_id: job_id.to_string(),
                statuses: statuses.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            };
            Self(Arc::new(Mutex::new(script)))
        }

        pub(crate) fn with_result(
            self,
            descriptor: ResultTypeDescriptor,
            payload: Option<&[u8]>,
        ) -> Self {
            {
                let mut script = self.0.lock().unwrap();
                script
                    .results
                    .insert(descriptor.identifier.clone(), payload.map(<[u8]>::to_vec));
                script.types.push(descriptor);
            }
            self
        }

        pub(crate) fn script(&self) -> std::sync::MutexGuard<'_, Script> {
            self.0.lock().unwrap()
        }
    }

    fn server_error(message: &str) -> GatewayError {
        GatewayError::Http {
            status: 500,
            message: message.to_string(),
        }
    }

    #[async_trait::async_trait]
    impl ServiceGateway for ScriptedGateway {
        async fn submit(
            &self,
            email: Option<&str>,
            title: &str,
            params: &ParamSet,
        ) -> Result<JobHandle, GatewayError> {
            let mut script = self.script();
            script.submitted.push(JobRequest {
                email: email.map(str::to_string),
                title: title.to_string(),
                params: params.clone(),
            });
            Ok(JobHandle::new(script.job_id.clone()))
        }

        async fn status(&self, _handle: &JobHandle) -> Result<String, GatewayError> {
            let mut script = self.script();
            script.status_calls.push(Instant::now());
            let status = if script.statuses.len() > 1 {
                script.statuses.pop_front()
            } else {
                script.statuses.front().cloned()
            };
            status.ok_or_else(|| server_error("no status scripted"))
        }

        async fn result_types(
            &self,
            _handle: &JobHandle,
        ) -> Result<Vec<ResultTypeDescriptor>, GatewayError> {
            let mut script = self.script();
            script.type_calls += 1;
            Ok(script.types.clone())
        }

        async fn fetch_result(
            &self,
            _handle: &JobHandle,
            type_id: &str,
        ) -> Result<Vec<u8>, GatewayError> {
            let mut script = self.script();
            script.fetch_calls.push(type_id.to_string());
            match script.results.get(type_id) {
                Some(Some(bytes)) => Ok(bytes.clone()),
                _ => Err(server_error("result unavailable")),
            }
        }
    }

    fn text_out() -> ResultTypeDescriptor {
        ResultTypeDescriptor::new("out", "text/plain", "txt")
    }

    fn request() -> JobRequest {
        let mut params = ParamSet::new();
        params.set("program", "blastp");
        params.set("sequence", "MKTAYIAKQR");
        JobRequest::new(Some("someone@example.org".into()), None, params)
    }

    fn controller(
        gateway: ScriptedGateway,
        dir: &std::path::Path,
    ) -> JobLifecycleController<ScriptedGateway> {
        JobLifecycleController::new(gateway, ResultWriter::in_dir(dir))
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let mut backoff = PollBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let mut seen = vec![backoff.current()];
        for _ in 0..10 {
            backoff.increase();
            seen.push(backoff.current());
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|d| *d <= Duration::from_secs(60)));
        assert_eq!(seen[..4], [1, 2, 4, 8].map(Duration::from_secs));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_initial_clamped_to_ceiling() {
        let backoff = PollBackoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.current(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_writes_result_file() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("123", &["PENDING", "RUNNING", "FINISHED"])
            .with_result(text_out(), Some(b"hello"));
        let mut ctl = controller(gateway.clone(), dir.path());

        let handle = ctl.submit(&request()).await.unwrap();
        assert_eq!(handle.as_str(), "123");
        assert_eq!(ctl.poll_until_terminal(&handle).await.unwrap(), JobStatus::Finished);
        let report = ctl.fetch_all_results(&handle, "myjob").await.unwrap();

        assert!(report.is_complete());
        let written = std::fs::read(dir.path().join("myjob.out.txt")).unwrap();
        assert_eq!(written, b"hello");
        assert_eq!(gateway.script().submitted[0].params.first("program"), Some("blastp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_never_returns_non_terminal() {
        let dir = tempdir().unwrap();
        for terminal in ["FINISHED", "ERROR", "FAILURE", "NOT_FOUND"] {
            let gateway = ScriptedGateway::new("j", &["PENDING", "RUNNING", "RUNNING", terminal]);
            let mut ctl = controller(gateway.clone(), dir.path());
            let status = ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap();
            assert!(status.is_terminal());
            assert_eq!(status.as_str(), terminal);
            assert_eq!(gateway.script().status_calls.len(), 4);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_intervals_grow_and_respect_ceiling() {
        let dir = tempdir().unwrap();
        let mut statuses = vec!["RUNNING"; 9];
        statuses.push("FINISHED");
        let gateway = ScriptedGateway::new("j", &statuses);
        let poll = PollConfig {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(20),
            timeout: None,
        };
        let mut ctl = controller(gateway.clone(), dir.path()).with_poll_config(poll);

        ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap();

        let calls = gateway.script().status_calls.clone();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 9);
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]), "gaps shrank: {:?}", gaps);
        assert!(gaps.iter().all(|g| *g <= Duration::from_secs(20)));
        assert_eq!(gaps[0], Duration::from_secs(1));
        assert_eq!(*gaps.last().unwrap(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_endless_job() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["RUNNING"]);
        let poll = PollConfig {
            timeout: Some(Duration::from_secs(10)),
            ..PollConfig::default()
        };
        let mut ctl = controller(gateway.clone(), dir.path()).with_poll_config(poll);

        let err = ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap_err();

        assert!(matches!(err, ClientError::Cancelled { .. }), "got {:?}", err);
        // polls at t = 0, 1, 3, 7; the next one would be at 15
        assert_eq!(gateway.script().status_calls.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["PENDING"]);
        let token = CancellationToken::new();
        let mut ctl = controller(gateway, dir.path()).with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            token.cancel();
        });
        let err = ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap_err();
        canceller.await.unwrap();

        match err {
            ClientError::Cancelled { reason, .. } => assert_eq!(reason, "cancelled"),
            other => panic!("Expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_result_types_polls_first_and_is_stable() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["RUNNING", "FINISHED"])
            .with_result(text_out(), Some(b"x"))
            .with_result(ResultTypeDescriptor::new("xml", "application/xml", "xml"), Some(b"<x/>"));
        let mut ctl = controller(gateway.clone(), dir.path());
        let handle = JobHandle::new("j");

        let first = ctl.list_result_types(&handle).await.unwrap();
        assert_eq!(gateway.script().status_calls.len(), 2);
        let second = ctl.list_result_types(&handle).await.unwrap();

        let ids = |types: &[ResultTypeDescriptor]| {
            types.iter().map(|t| t.identifier.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), vec!["out", "xml"]);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(gateway.script().status_calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_result_type_is_not_fetched() {
        let dir = tempdir().unwrap();
        let gateway =
            ScriptedGateway::new("j", &["FINISHED"]).with_result(text_out(), Some(b"x"));
        let mut ctl = controller(gateway.clone(), dir.path());

        let err = ctl
            .fetch_result(&JobHandle::new("j"), "visual-png")
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::NotFound { .. }));
        assert!(err.is_usage());
        assert!(gateway.script().fetch_calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_result_returns_gateway_bytes() {
        let dir = tempdir().unwrap();
        let payload: &[u8] = &[0, 159, 146, 150];
        let png = ResultTypeDescriptor::new("visual-png", "image/png", "png");
        let gateway = ScriptedGateway::new("j", &["FINISHED"]).with_result(png, Some(payload));
        let mut ctl = controller(gateway, dir.path());

        let bytes = ctl.fetch_result(&JobHandle::new("j"), "visual-png").await.unwrap();
        assert_eq!(bytes, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["FINISHED"])
            .with_result(ResultTypeDescriptor::new("xml", "application/xml", "xml"), None)
            .with_result(text_out(), Some(b"hello"));
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let mut ctl = controller(gateway.clone(), dir.path()).with_events(EventSink::new(tx));

        let report = ctl.fetch_all_results(&JobHandle::new("j"), "job").await.unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "xml");
        assert!(matches!(report.failed[0].1, ClientError::Transport(_)));
        assert_eq!(std::fs::read(dir.path().join("job.out.txt")).unwrap(), b"hello");
        assert!(!dir.path().join("job.xml.xml").exists());
        assert_eq!(gateway.script().fetch_calls, vec!["xml", "out"]);

        drop(ctl);
        let mut failures = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, Event::ResultFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_at_first_failure() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["FINISHED"])
            .with_result(ResultTypeDescriptor::new("xml", "application/xml", "xml"), None)
            .with_result(text_out(), Some(b"hello"));
        let mut ctl =
            controller(gateway.clone(), dir.path()).with_fetch_policy(FetchPolicy::FailFast);

        let err = ctl.fetch_all_results(&JobHandle::new("j"), "job").await.unwrap_err();

        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(gateway.script().fetch_calls, vec!["xml"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_has_no_results_and_cannot_be_polled_again() {
        let dir = tempdir().unwrap();
        let gateway =
            ScriptedGateway::new("j", &["RUNNING", "ERROR"]).with_result(text_out(), Some(b"x"));
        let mut ctl = controller(gateway.clone(), dir.path());
        let handle = JobHandle::new("j");

        let err = ctl.fetch_all_results(&handle, "job").await.unwrap_err();
        assert!(matches!(err, ClientError::Usage(_)), "got {:?}", err);
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("ERROR"));
        assert_eq!(gateway.script().type_calls, 0);

        let err = ctl.poll_until_terminal(&handle).await.unwrap_err();
        assert!(err.is_usage());
        let err = ctl.fetch_one_result(&handle, "out", "job").await.unwrap_err();
        assert!(err.is_usage());
        assert_eq!(gateway.script().status_calls.len(), 2);
        assert!(gateway.script().fetch_calls.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_status_is_a_transport_error() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["SLEEPING"]);
        let mut ctl = controller(gateway, dir.path());

        let err = ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(GatewayError::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_format_to_stdout() {
        let dir = tempdir().unwrap();
        let captured = Captured::default();
        let writer = ResultWriter::in_dir(dir.path()).with_stdout(Box::new(captured.clone()));
        let xml = ResultTypeDescriptor::new("xml", "application/xml", "xml");
        let gateway = ScriptedGateway::new("job-9", &["PENDING", "FINISHED"])
            .with_result(text_out(), Some(b"alignment"))
            .with_result(xml, Some(b"<x/>"));
        let mut ctl = JobLifecycleController::new(gateway.clone(), writer);
        let target = OutputTarget {
            base: Some("-".to_string()),
            format: Some("out".to_string()),
        };

        let (handle, report) = ctl.run(&request(), &target).await.unwrap();

        assert_eq!(handle.as_str(), "job-9");
        assert_eq!(report.written, vec![("out".to_string(), WrittenTo::Stdout)]);
        assert_eq!(captured.contents(), b"alignment");
        assert_eq!(gateway.script().fetch_calls, vec!["out"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieve_defaults_base_to_job_id() {
        let dir = tempdir().unwrap();
        let gateway =
            ScriptedGateway::new("job-7", &["FINISHED"]).with_result(text_out(), Some(b"ok"));
        let mut ctl = controller(gateway, dir.path());

        ctl.retrieve(&JobHandle::new("job-7"), &OutputTarget::default())
            .await
            .unwrap();

        assert!(dir.path().join("job-7.out.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_surfaces_terminal_failure() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["FAILURE"]);
        let mut ctl = controller(gateway, dir.path());

        let err = ctl.run(&request(), &OutputTarget::default()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::JobFailed {
                status: JobStatus::Failure,
                ..
            }
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_results_reports_failed_job() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["RUNNING", "NOT_FOUND"]);
        let mut ctl = controller(gateway, dir.path());

        let err = ctl.await_results(&JobHandle::new("j")).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::JobFailed {
                status: JobStatus::NotFound,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["RUNNING", "FINISHED"]);
        let poll = PollConfig {
            timeout: Some(Duration::from_secs(u64::MAX)),
            ..PollConfig::default()
        };
        let mut ctl = controller(gateway.clone(), dir.path()).with_poll_config(poll);

        let status = ctl.poll_until_terminal(&JobHandle::new("j")).await.unwrap();

        assert_eq!(status, JobStatus::Finished);
        assert_eq!(gateway.script().status_calls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_a_single_query() {
        let dir = tempdir().unwrap();
        let gateway = ScriptedGateway::new("j", &["RUNNING", "FINISHED"]);
        let mut ctl = controller(gateway.clone(), dir.path());
        let handle = JobHandle::new("j");

        assert_eq!(ctl.status(&handle).await.unwrap(), JobStatus::Running);
        assert_eq!(gateway.script().status_calls.len(), 1);
        assert_eq!(ctl.known_status(&handle), Some(JobStatus::Running));

        assert_eq!(ctl.status(&handle).await.unwrap(), JobStatus::Finished);
        // FINISHED is settled, so it is answered from what was already seen
        assert_eq!(ctl.status(&handle).await.unwrap(), JobStatus::Finished);
        assert_eq!(gateway.script().status_calls.len(), 2);
    }
}
