//! Shared test fixtures: a scripted job-control provider, a buffering
//! result sink, and a monitor wired to a temp workdir.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use jobsentry::config::MonitorConfig;
use jobsentry::monitor::Monitor;
use jobsentry::provider::{JobProvider, JobSpec, ProviderError};
use jobsentry::sink::{CheckResult, ResultSink, Severity};

/// One scripted reply to a status query.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Text(String),
    NotFound,
    Fail,
}

/// Scripted provider. Status replies are queued per job id; the last reply
/// is sticky, so repeated cycles observe an unchanged status. Every
/// mutating call is recorded for assertions.
#[derive(Default)]
pub struct MockProvider {
    status: Mutex<HashMap<String, VecDeque<StatusReply>>>,
    submit_ids: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_cancel: AtomicBool,
    pub fail_purge: AtomicBool,
}

impl MockProvider {
    pub fn push_status(&self, job_id: &str, reply: StatusReply) {
        self.status
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a status stanza in the provider's bracket format.
    pub fn push_state(&self, job_id: &str, state: &str, exit_code: Option<i32>) {
        let mut text = format!("******  JobID=[{}]\n\tStatus        = [{}]\n", job_id, state);
        if let Some(code) = exit_code {
            text.push_str(&format!("\tExitCode      = [{}]\n", code));
        }
        self.push_status(job_id, StatusReply::Text(text));
    }

    pub fn push_submit_id(&self, job_id: &str) {
        self.submit_ids
            .lock()
            .unwrap()
            .push_back(job_id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_status(&self, job_id: &str) -> StatusReply {
        let mut status = self.status.lock().unwrap();
        match status.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue.front().unwrap().clone(),
            _ => StatusReply::Fail,
        }
    }
}

#[async_trait]
impl JobProvider for MockProvider {
    async fn submit(&self, target: &str, spec: &JobSpec) -> Result<String, ProviderError> {
        self.record_call(format!("submit {} {}", target, spec.descriptor));
        self.submit_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ProviderError::CommandFailed {
                action: "submit",
                code: Some(1),
                detail: "no scripted submit id".to_string(),
            })
    }

    async fn status(&self, job_id: &str) -> Result<String, ProviderError> {
        self.record_call(format!("status {}", job_id));
        match self.next_status(job_id) {
            StatusReply::Text(text) => Ok(text),
            StatusReply::NotFound => Err(ProviderError::NotFound(job_id.to_string())),
            StatusReply::Fail => Err(ProviderError::CommandFailed {
                action: "status",
                code: Some(1),
                detail: "scripted failure".to_string(),
            }),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        self.record_call(format!("cancel {}", job_id));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(ProviderError::CommandFailed {
                action: "cancel",
                code: Some(1),
                detail: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn purge(&self, job_id: &str) -> Result<(), ProviderError> {
        self.record_call(format!("purge {}", job_id));
        if self.fail_purge.load(Ordering::SeqCst) {
            return Err(ProviderError::CommandFailed {
                action: "purge",
                code: Some(1),
                detail: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn logging_info(&self, job_id: &str) -> Result<String, ProviderError> {
        self.record_call(format!("logging {}", job_id));
        Ok(format!("logging info for {}", job_id))
    }

    async fn fetch_output(&self, job_id: &str) -> Result<String, ProviderError> {
        self.record_call(format!("output {}", job_id));
        Ok("hello from the worker node".to_string())
    }
}

/// Sink buffering every published result.
#[derive(Default)]
pub struct MemorySink {
    published: Mutex<Vec<(String, String, Severity, String)>>,
}

impl MemorySink {
    /// All (target, check, severity, summary) tuples in publish order.
    pub fn all(&self) -> Vec<(String, String, Severity, String)> {
        self.published.lock().unwrap().clone()
    }

    /// Results published for one (target, check) pair.
    pub fn for_check(&self, target: &str, check: &str) -> Vec<(Severity, String)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, c, _, _)| t == target && c == check)
            .map(|(_, _, sev, summary)| (*sev, summary.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

impl ResultSink for MemorySink {
    fn publish(&self, target: &str, check_name: &str, result: &CheckResult) {
        self.published.lock().unwrap().push((
            target.to_string(),
            check_name.to_string(),
            result.severity,
            result.summary.clone(),
        ));
    }
}

/// A monitor over a temp workdir with scripted provider and buffering sink.
pub struct TestRig {
    pub dir: TempDir,
    pub provider: Arc<MockProvider>,
    pub sink: Arc<MemorySink>,
    pub monitor: Monitor,
}

impl TestRig {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut MonitorConfig)) -> Self {
        let dir = TempDir::new().expect("temp workdir");
        let mut config = MonitorConfig::new(dir.path());
        tweak(&mut config);
        let provider = Arc::new(MockProvider::default());
        let sink = Arc::new(MemorySink::default());
        let monitor = Monitor::new(config, provider.clone(), sink.clone())
            .expect("monitor over temp workdir");
        Self {
            dir,
            provider,
            sink,
            monitor,
        }
    }
}
