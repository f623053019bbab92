//! Progress bus: typed publish/subscribe for scan events.
//!
//! Publishing never waits on subscribers. Each subscriber has its own cursor
//! and sees events in publish order from the moment it subscribed; there is
//! no replay. A subscriber that falls more than `capacity` events behind
//! skips the oldest ones and keeps going.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};

use netwatch_core::events::{self, EventPayload, ScanEvent};
use netwatch_core::types::{JobId, ScanId};

/// Receives `(done, total)` after every resolved probe of one scan.
pub trait ProgressSink: Send + Sync {
    fn report(&self, done: u32, total: u32);
}

/// Discards progress.
impl ProgressSink for () {
    fn report(&self, _done: u32, _total: u32) {}
}

/// Fan-out channel shared by every scan, sweep, and scheduled job.
/// Clone is cheap.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ScanEvent>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Relay an event to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: ScanEvent) -> usize {
        // An error only means nobody is listening.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A progress sink that publishes events tagged with this scan (and job).
    pub fn reporter(&self, scan_id: ScanId, job_id: Option<JobId>) -> BusReporter {
        BusReporter {
            bus: self.clone(),
            scan_id,
            job_id,
            done: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One subscriber's independent view of the bus.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ScanEvent>,
}

impl Subscription {
    /// Next event, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event without waiting.
    pub fn try_recv(&mut self) -> Option<ScanEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ScanEvent> {
        BroadcastStream::new(self.rx).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Progress subscriber lagged, events dropped");
                None
            }
        })
    }

    /// Only the events of one scan run.
    pub fn for_scan(self, scan_id: ScanId) -> impl Stream<Item = ScanEvent> {
        self.into_stream()
            .filter(move |event| event.scan_id == Some(scan_id))
    }
}

/// Publishes progress for one scan run onto the bus.
#[derive(Debug, Clone)]
pub struct BusReporter {
    bus: ProgressBus,
    scan_id: ScanId,
    job_id: Option<JobId>,
    done: Arc<AtomicU32>,
}

impl BusReporter {
    pub fn scan_id(&self) -> ScanId {
        self.scan_id
    }

    /// Probes resolved so far, as last reported.
    pub fn done(&self) -> u32 {
        self.done.load(Ordering::Relaxed)
    }

    /// Publish any payload tagged with this run.
    pub fn emit(&self, payload: EventPayload) {
        self.bus
            .publish(ScanEvent::scan(self.scan_id, payload).with_job(self.job_id));
    }
}

impl ProgressSink for BusReporter {
    fn report(&self, done: u32, total: u32) {
        self.done.store(done, Ordering::Relaxed);
        self.emit(EventPayload::Progress {
            done,
            total,
            percent: events::percent(done, total),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percents(sub: &mut Subscription) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(event) = sub.try_recv() {
            if let EventPayload::Progress { percent, .. } = event.payload {
                out.push(percent);
            }
        }
        out
    }

    #[test]
    fn publish_without_subscribers_does_not_block() {
        let bus = ProgressBus::new(4);
        let reporter = bus.reporter(ScanId::new(), None);
        for done in 1..=100 {
            reporter.report(done, 100);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn late_subscriber_sees_only_later_events() {
        let bus = ProgressBus::new(64);
        let reporter = bus.reporter(ScanId::new(), None);

        reporter.report(4, 10);
        let mut late = bus.subscribe();
        for done in 7..=10 {
            reporter.report(done, 10);
        }

        assert_eq!(percents(&mut late), vec![70, 80, 90, 100]);
    }

    #[test]
    fn every_subscriber_sees_the_full_stream() {
        let bus = ProgressBus::new(64);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let reporter = bus.reporter(ScanId::new(), None);

        for done in 1..=4 {
            reporter.report(done, 4);
        }

        assert_eq!(percents(&mut a), vec![25, 50, 75, 100]);
        assert_eq!(percents(&mut b), vec![25, 50, 75, 100]);
    }

    #[test]
    fn dropped_subscriber_does_not_affect_others() {
        let bus = ProgressBus::new(64);
        let mut keep = bus.subscribe();
        let gone = bus.subscribe();
        let reporter = bus.reporter(ScanId::new(), None);

        reporter.report(1, 2);
        drop(gone);
        reporter.report(2, 2);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(percents(&mut keep), vec![50, 100]);
    }

    #[test]
    fn events_carry_scan_and_job_ids() {
        let bus = ProgressBus::new(8);
        let mut sub = bus.subscribe();
        let scan_id = ScanId::new();
        let job_id = JobId::new();

        bus.reporter(scan_id, Some(job_id)).report(1, 1);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.scan_id, Some(scan_id));
        assert_eq!(event.job_id, Some(job_id));
    }

    #[test]
    fn reporter_remembers_last_done() {
        let bus = ProgressBus::new(8);
        let reporter = bus.reporter(ScanId::new(), None);
        assert_eq!(reporter.done(), 0);

        reporter.report(3, 9);
        assert_eq!(reporter.clone().done(), 3);
    }

    fn done_values(events: impl IntoIterator<Item = ScanEvent>) -> Vec<u32> {
        events
            .into_iter()
            .filter_map(|event| match event.payload {
                EventPayload::Progress { done, .. } => Some(done),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn stalled_subscriber_never_blocks_publisher() {
        let bus = ProgressBus::new(4);
        let mut polled = bus.subscribe();
        let mut awaited = bus.subscribe();
        let reporter = bus.reporter(ScanId::new(), None);

        // Nobody reads while all 100 events go out.
        for done in 1..=100 {
            reporter.report(done, 100);
        }

        let mut seen = Vec::new();
        while let Some(event) = polled.try_recv() {
            seen.push(event);
        }
        assert_eq!(done_values(seen), vec![97, 98, 99, 100]);

        drop(reporter);
        drop(bus);
        let mut seen = Vec::new();
        while let Some(event) = awaited.recv().await {
            seen.push(event);
        }
        assert_eq!(done_values(seen), vec![97, 98, 99, 100]);
    }

    #[tokio::test]
    async fn lagging_stream_resumes_with_newest_events() {
        let bus = ProgressBus::new(4);
        let stream = bus.subscribe().into_stream();
        let reporter = bus.reporter(ScanId::new(), None);
        for done in 1..=10 {
            reporter.report(done, 10);
        }
        drop(reporter);
        drop(bus);

        let events: Vec<ScanEvent> = stream.collect().await;
        assert_eq!(done_values(events), vec![7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn stream_filters_by_scan() {
        let bus = ProgressBus::new(64);
        let mine = ScanId::new();
        let stream = bus.subscribe().for_scan(mine);
        tokio::pin!(stream);

        bus.reporter(ScanId::new(), None).report(1, 2);
        bus.reporter(mine, None).report(1, 2);

        let event = stream.next().await.unwrap();
        assert_eq!(event.scan_id, Some(mine));
    }
}
