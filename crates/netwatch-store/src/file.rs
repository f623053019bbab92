//! JSON-file-per-record store.
//!
//! Records are written as pretty JSON in a directory tree:
//! ```text
//! {root}/
//!   port_scan/
//!     2024/
//!       01/
//!         15/
//!           {scan_id}.json
//!   network_scan/...
//!   ping/...
//!   jobs/
//!     {job_id}.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use netwatch_core::types::{JobId, PortScanResult, ScheduledJob};

use crate::{JobStore, RecordKind, Result, ResultQuery, ResultStore, ScanRecord, StoreError};

const JOBS_DIR: &str = "jobs";

/// File-system backed result and job store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a new store rooted at the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, record: &ScanRecord) -> PathBuf {
        let date = record.timestamp().format("%Y/%m/%d");
        self.root
            .join(record.kind().as_str())
            .join(format!("{}/{}.json", date, record.id()))
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join(JOBS_DIR).join(format!("{id}.json"))
    }

    fn write_job(&self, job: &ScheduledJob) -> Result<()> {
        let path = self.job_path(job.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(job)?)?;
        Ok(())
    }

    fn read_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let dir = self.root.join(JOBS_DIR);
        let mut jobs = Vec::new();
        if !dir.is_dir() {
            return Ok(jobs);
        }
        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let job: ScheduledJob = serde_json::from_str(&fs::read_to_string(&path)?)?;
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

impl ResultStore for JsonFileStore {
    fn save(&self, record: &ScanRecord) -> Result<()> {
        let path = self.record_path(record);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(record)?)?;

        tracing::debug!(
            scan_id = %record.id(),
            kind = record.kind().as_str(),
            path = %path.display(),
            "Scan result saved"
        );
        Ok(())
    }

    fn find(&self, query: &ResultQuery) -> Result<Vec<ScanRecord>> {
        let mut results = Vec::new();
        let kinds: Vec<RecordKind> = match query.kind {
            Some(kind) => vec![kind],
            None => RecordKind::ALL.to_vec(),
        };
        for kind in kinds {
            collect_records_recursive(&self.root.join(kind.as_str()), query, &mut results)?;
        }
        results.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        Ok(results)
    }

    fn delete_all(&self, kind: RecordKind) -> Result<usize> {
        let dir = self.root.join(kind.as_str());
        if !dir.is_dir() {
            return Ok(0);
        }
        let count = count_json_recursive(&dir)?;
        fs::remove_dir_all(&dir)?;
        Ok(count)
    }
}

impl JobStore for JsonFileStore {
    fn save(&self, job: &ScheduledJob) -> Result<()> {
        self.write_job(job)
    }

    fn update_on_tick(
        &self,
        id: JobId,
        last_run_at: DateTime<Utc>,
        entry: &PortScanResult,
    ) -> Result<()> {
        let mut job = self.get(id)?;
        job.last_run_at = Some(last_run_at);
        job.history.push(entry.clone());
        self.write_job(&job)
    }

    fn get(&self, id: JobId) -> Result<ScheduledJob> {
        let path = self.job_path(id);
        if !path.is_file() {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    fn find_by_host(&self, host: &str) -> Result<Vec<ScheduledJob>> {
        Ok(self
            .read_jobs()?
            .into_iter()
            .filter(|j| j.target.host == host)
            .collect())
    }

    fn delete_all(&self) -> Result<usize> {
        let dir = self.root.join(JOBS_DIR);
        if !dir.is_dir() {
            return Ok(0);
        }
        let count = count_json_recursive(&dir)?;
        fs::remove_dir_all(&dir)?;
        Ok(count)
    }
}

/// Recursively collect records matching a query.
fn collect_records_recursive(
    dir: &Path,
    query: &ResultQuery,
    results: &mut Vec<ScanRecord>,
) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_records_recursive(&path, query, results)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let record: ScanRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if query.matches(&record) {
                results.push(record);
            }
        }
    }

    Ok(())
}

fn count_json_recursive(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            count += count_json_recursive(&path)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netwatch_core::types::{NetworkScanResult, ScanId, ScanTarget, SweepTarget};

    fn sweep(prefix: &str, hosts: &[&str]) -> ScanRecord {
        let now = Utc::now();
        ScanRecord::NetworkScan(NetworkScanResult {
            id: ScanId::new(),
            target: SweepTarget::new(prefix, 1, 10),
            active_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            started_at: now,
            finished_at: now,
        })
    }

    fn port_scan(host: &str, open: Vec<u16>) -> PortScanResult {
        let now = Utc::now();
        PortScanResult {
            id: ScanId::new(),
            target: ScanTarget::new(host, 1, 1024),
            open_ports: open,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn save_and_find_by_subnet() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let record = sweep("10.0.0.", &["10.0.0.2", "10.0.0.4"]);
        ResultStore::save(&store, &record).unwrap();
        ResultStore::save(&store, &sweep("192.168.1.", &[])).unwrap();

        let found = store.find_by_subnet("10.0").unwrap();
        assert_eq!(found, vec![record]);
    }

    #[test]
    fn find_by_host_filters_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let scan = ScanRecord::PortScan(port_scan("10.0.0.9", vec![22, 80]));
        ResultStore::save(&store, &scan).unwrap();

        let found = ResultStore::find_by_host(&store, RecordKind::PortScan, "10.0.0.9").unwrap();
        assert_eq!(found.len(), 1);
        assert!(ResultStore::find_by_host(&store, RecordKind::Ping, "10.0.0.9")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_all_removes_kind_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        ResultStore::save(&store, &sweep("10.0.0.", &[])).unwrap();
        ResultStore::save(&store, &sweep("10.0.1.", &[])).unwrap();

        assert_eq!(ResultStore::delete_all(&store, RecordKind::NetworkScan).unwrap(), 2);
        assert!(store.find(&ResultQuery::default()).unwrap().is_empty());
        assert_eq!(ResultStore::delete_all(&store, RecordKind::NetworkScan).unwrap(), 0);
    }

    #[test]
    fn job_history_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        let job = ScheduledJob::new(ScanTarget::new("10.0.0.9", 1, 1024), 15).unwrap();
        let id = job.id;
        JobStore::save(&store, &job).unwrap();

        let run = port_scan("10.0.0.9", vec![443]);
        store.update_on_tick(id, run.finished_at, &run).unwrap();

        let reopened = JsonFileStore::new(dir.path()).unwrap();
        let stored = reopened.get(id).unwrap();
        assert_eq!(stored.history, vec![run]);
        assert_eq!(JobStore::find_by_host(&reopened, "10.0.0.9").unwrap().len(), 1);

        assert_eq!(JobStore::delete_all(&reopened).unwrap(), 1);
        assert!(matches!(reopened.get(id), Err(StoreError::JobNotFound(_))));
    }
}
