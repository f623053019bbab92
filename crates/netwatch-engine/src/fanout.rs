//! Bounded concurrent probe dispatch shared by the port scanner and the sweeper.

use std::collections::BTreeSet;
use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::ProgressSink;
use crate::error::{Result, ScanError};

/// What a fan-out run produced.
#[derive(Debug)]
pub(crate) struct FanOut<K> {
    /// Keys whose probe came back reachable, in ascending key order.
    pub reachable: BTreeSet<K>,
    /// Probes that resolved, whatever their outcome.
    pub done: u32,
    pub cancelled: bool,
}

/// Probe every key with at most `limit` probes in flight.
///
/// Progress is reported from this single loop after each probe resolves, so
/// `done` only ever grows by one. Results are keyed, not appended, so the
/// reachable set does not depend on completion order.
///
/// On cancellation no new probe is dispatched and nothing more is reported;
/// probes already in flight are detached and left to finish or time out.
pub(crate) async fn probe_all<K, I, F, Fut>(
    keys: I,
    total: u32,
    limit: usize,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
    probe: F,
) -> Result<FanOut<K>>
where
    K: Ord + Copy + Send + 'static,
    I: IntoIterator<Item = K>,
    F: Fn(K) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let mut pending = keys.into_iter();
    let mut in_flight = JoinSet::new();
    let mut out = FanOut {
        reachable: BTreeSet::new(),
        done: 0,
        cancelled: false,
    };
    let limit = limit.max(1);

    loop {
        while in_flight.len() < limit && !cancel.is_cancelled() {
            let Some(key) = pending.next() else { break };
            let fut = probe(key);
            in_flight.spawn(async move { (key, fut.await) });
        }

        if in_flight.is_empty() {
            out.cancelled = cancel.is_cancelled() && out.done < total;
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                in_flight.detach_all();
                out.cancelled = true;
                break;
            }
            joined = in_flight.join_next() => match joined {
                Some(Ok((key, reachable))) => {
                    out.done += 1;
                    if reachable {
                        out.reachable.insert(key);
                    }
                    sink.report(out.done, total);
                }
                Some(Err(e)) => return Err(ScanError::ProbeTask(e.to_string())),
                None => {}
            },
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u32>>);

    impl ProgressSink for Recorder {
        fn report(&self, done: u32, _total: u32) {
            self.0.lock().unwrap().push(done);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn respects_limit_and_orders_by_key() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();

        let out = probe_all(1u16..=20, 20, 4, &cancel, &recorder, |key| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later keys finish first.
                tokio::time::sleep(Duration::from_millis(u64::from(100 - key))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                key % 3 == 0
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(!out.cancelled);
        assert_eq!(out.done, 20);
        assert_eq!(
            out.reachable.into_iter().collect::<Vec<_>>(),
            vec![3, 6, 9, 12, 15, 18]
        );
        assert_eq!(*recorder.0.lock().unwrap(), (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn pre_cancelled_dispatches_nothing() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = probe_all(1u8..=5, 5, 2, &cancel, &(), |_| {
            dispatched.fetch_add(1, Ordering::SeqCst);
            async { true }
        })
        .await
        .unwrap();

        assert!(out.cancelled);
        assert_eq!(out.done, 0);
        assert_eq!(dispatched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_probe_aborts_the_run() {
        let cancel = CancellationToken::new();
        let result = probe_all(1u8..=3, 3, 1, &cancel, &(), |key| async move {
            if key == 2 {
                panic!("probe exploded");
            }
            true
        })
        .await;

        assert!(matches!(result, Err(ScanError::ProbeTask(_))));
    }
}
