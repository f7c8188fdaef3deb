use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::state::CanonicalState;

const RECORD_FILE: &str = "activejob.map";
const FIELD_COUNT: usize = 6;

/// Bookkeeping record for the one active job tracked per target.
///
/// Persisted as a single line of six pipe-delimited fields:
/// `submitTimestamp|target|serviceDescriptor|jobID|state|lastTransitionTimestamp`.
/// Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub submitted_at: i64,
    pub target: String,
    pub service: String,
    pub job_id: String,
    pub state: CanonicalState,
    pub last_transition_at: i64,
}

impl JobRecord {
    /// Record for a freshly submitted job.
    pub fn submitted(
        target: impl Into<String>,
        service: impl Into<String>,
        job_id: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            submitted_at: now,
            target: target.into(),
            service: service.into(),
            job_id: job_id.into(),
            state: CanonicalState::Registered,
            last_transition_at: now,
        }
    }

    /// Time spent in the current state.
    pub fn residency(&self, now: i64) -> Duration {
        Duration::from_secs((now - self.last_transition_at).max(0) as u64)
    }

    /// Time since submission.
    pub fn age(&self, now: i64) -> Duration {
        Duration::from_secs((now - self.submitted_at).max(0) as u64)
    }

    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.submitted_at,
            self.target,
            self.service,
            self.job_id,
            self.state,
            self.last_transition_at
        )
    }

    /// Parse one record line. Wrong field count, an empty field, or a
    /// non-numeric timestamp is a data-integrity error, not something to
    /// silently trust.
    pub fn decode(target: &str, line: &str) -> Result<JobRecord> {
        let fields: Vec<&str> = line.trim_end_matches('\n').split('|').collect();
        if fields.len() != FIELD_COUNT {
            return Err(MonitorError::corrupt(
                target,
                format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
            ));
        }
        if fields.iter().any(|f| f.is_empty()) {
            return Err(MonitorError::corrupt(target, "empty mandatory field"));
        }
        let submitted_at = fields[0]
            .parse()
            .map_err(|_| MonitorError::corrupt(target, "bad submit timestamp"))?;
        let last_transition_at = fields[5]
            .parse()
            .map_err(|_| MonitorError::corrupt(target, "bad transition timestamp"))?;
        Ok(JobRecord {
            submitted_at,
            target: fields[1].to_string(),
            service: fields[2].to_string(),
            job_id: fields[3].to_string(),
            state: CanonicalState::from_token(fields[4]),
            last_transition_at,
        })
    }
}

/// Durable one-record-per-target store, laid out as
/// `<root>/<target>/activejob.map`.
///
/// Saves are atomic (temp file + rename), so a reader never observes a
/// partial write. All operations serialize on one store-level lock; record
/// I/O is microseconds-scale next to the remote calls it brackets.
#[derive(Debug)]
pub struct RecordStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, target: &str) -> PathBuf {
        self.root.join(target).join(RECORD_FILE)
    }

    /// Load the active record for a target. `Ok(None)` means no active job.
    pub fn load(&self, target: &str) -> Result<Option<JobRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.record_path(target);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let line = text.lines().next().unwrap_or("");
        JobRecord::decode(target, line).map(Some)
    }

    /// Atomically replace the record for `record.target`.
    pub fn save(&self, record: &JobRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.record_path(&record.target);
        let dir = path.parent().expect("record path has a parent");
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{}.tmp", RECORD_FILE));
        fs::write(&tmp, record.encode())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Delete the record for a target. Deleting a missing record is fine.
    pub fn delete(&self, target: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.record_path(target)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All targets with a bookkeeping directory, sorted.
    pub fn targets(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut targets = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                targets.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        targets.sort();
        Ok(targets)
    }
}
