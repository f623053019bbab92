//! In-process store used when no store directory is configured, and in tests.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use netwatch_core::types::{JobId, PortScanResult, ScheduledJob};

use crate::{JobStore, RecordKind, Result, ResultQuery, ResultStore, ScanRecord, StoreError};

/// Volatile result and job store. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<ScanRecord>>,
    jobs: RwLock<Vec<ScheduledJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results across all kinds.
    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }
}

impl ResultStore for MemoryStore {
    fn save(&self, record: &ScanRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.push(record.clone());
        Ok(())
    }

    fn find(&self, query: &ResultQuery) -> Result<Vec<ScanRecord>> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        let mut results: Vec<ScanRecord> = records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        results.sort_by_key(|r| std::cmp::Reverse(r.timestamp()));
        Ok(results)
    }

    fn delete_all(&self, kind: RecordKind) -> Result<usize> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let before = records.len();
        records.retain(|r| r.kind() != kind);
        Ok(before - records.len())
    }
}

impl JobStore for MemoryStore {
    fn save(&self, job: &ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        match jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => jobs.push(job.clone()),
        }
        Ok(())
    }

    fn update_on_tick(
        &self,
        id: JobId,
        last_run_at: DateTime<Utc>,
        entry: &PortScanResult,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.last_run_at = Some(last_run_at);
        job.history.push(entry.clone());
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<ScheduledJob> {
        let jobs = self.jobs.read().map_err(|_| StoreError::Poisoned)?;
        jobs.iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(StoreError::JobNotFound(id))
    }

    fn find_by_host(&self, host: &str) -> Result<Vec<ScheduledJob>> {
        let jobs = self.jobs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(jobs
            .iter()
            .filter(|j| j.target.host == host)
            .cloned()
            .collect())
    }

    fn delete_all(&self) -> Result<usize> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::Poisoned)?;
        let count = jobs.len();
        jobs.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use netwatch_core::types::{PingResult, ScanId, ScanTarget};

    fn ping(host: &str, minutes_ago: i64) -> ScanRecord {
        ScanRecord::Ping(PingResult {
            id: ScanId::new(),
            host: host.to_string(),
            alive: true,
            elapsed_ms: 3,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        })
    }

    fn port_scan(host: &str) -> PortScanResult {
        let now = Utc::now();
        PortScanResult {
            id: ScanId::new(),
            target: ScanTarget::new(host, 20, 25),
            open_ports: vec![22],
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn find_by_host_newest_first() {
        let store = MemoryStore::new();
        ResultStore::save(&store, &ping("10.0.0.1", 10)).unwrap();
        ResultStore::save(&store, &ping("10.0.0.1", 1)).unwrap();
        ResultStore::save(&store, &ping("10.0.0.2", 5)).unwrap();

        let found = ResultStore::find_by_host(&store, RecordKind::Ping, "10.0.0.1").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp() > found[1].timestamp());
    }

    #[test]
    fn delete_all_only_touches_one_kind() {
        let store = MemoryStore::new();
        ResultStore::save(&store, &ping("10.0.0.1", 0)).unwrap();
        ResultStore::save(&store, &ScanRecord::PortScan(port_scan("10.0.0.1"))).unwrap();

        let removed = ResultStore::delete_all(&store, RecordKind::Ping).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn update_on_tick_appends_history() {
        let store = MemoryStore::new();
        let job = ScheduledJob::new(ScanTarget::new("10.0.0.1", 20, 25), 5).unwrap();
        let id = job.id;
        JobStore::save(&store, &job).unwrap();

        let run = port_scan("10.0.0.1");
        store.update_on_tick(id, run.finished_at, &run).unwrap();
        store.update_on_tick(id, run.finished_at, &run).unwrap();

        let stored = store.get(id).unwrap();
        assert_eq!(stored.history.len(), 2);
        assert_eq!(stored.last_run_at, Some(run.finished_at));
    }

    #[test]
    fn update_on_tick_unknown_job() {
        let store = MemoryStore::new();
        let run = port_scan("10.0.0.1");
        let err = store
            .update_on_tick(JobId::new(), run.finished_at, &run)
            .unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }
}
