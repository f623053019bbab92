//! Subnet liveness sweep.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use netwatch_core::types::{NetworkScanResult, ScanId, SweepTarget};
use netwatch_core::ValidationError;

use crate::bus::ProgressSink;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::fanout;
use crate::probe::Prober;
use crate::scanner::ScanOutcome;

/// Host index to address, in ascending index order.
pub type SweepPlan = BTreeMap<u8, IpAddr>;

/// Liveness-probes every host index of a subnet prefix.
#[derive(Clone)]
pub struct SubnetSweeper {
    prober: Arc<dyn Prober>,
    fan_out: usize,
    timeout: Duration,
}

impl SubnetSweeper {
    pub fn new(prober: Arc<dyn Prober>, fan_out: usize, timeout: Duration) -> Self {
        Self {
            prober,
            fan_out: fan_out.max(1),
            timeout,
        }
    }

    pub fn from_config(prober: Arc<dyn Prober>, config: &EngineConfig) -> Self {
        Self::new(prober, config.effective_fan_out(), config.liveness_timeout())
    }

    /// Validate the target and build its address list. No probe is sent.
    pub fn prepare(&self, target: &SweepTarget) -> Result<SweepPlan> {
        target.validate()?;
        let mut plan = SweepPlan::new();
        for (index, address) in target.addresses() {
            let addr = address
                .parse::<IpAddr>()
                .map_err(|_| ValidationError::InvalidSubnetPrefix {
                    prefix: target.subnet_prefix.clone(),
                })?;
            plan.insert(index, addr);
        }
        Ok(plan)
    }

    /// Validate, then sweep every host index in the target range.
    pub async fn sweep(
        &self,
        target: SweepTarget,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome<NetworkScanResult>> {
        let plan = self.prepare(&target)?;
        self.sweep_planned(ScanId::new(), target, plan, sink, cancel)
            .await
    }

    /// Sweep an already validated plan.
    pub async fn sweep_planned(
        &self,
        id: ScanId,
        target: SweepTarget,
        plan: SweepPlan,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome<NetworkScanResult>> {
        let started_at = Utc::now();
        let total = plan.len() as u32;

        tracing::info!(scan_id = %id, target = %target, hosts = total, "Subnet sweep started");

        let prober = self.prober.clone();
        let timeout = self.timeout;
        let run = fanout::probe_all(
            plan.into_iter(),
            total,
            self.fan_out,
            cancel,
            sink,
            move |(index, addr)| {
                let prober = prober.clone();
                async move {
                    let outcome = prober.probe_host(addr, timeout).await;
                    if outcome.reachable {
                        tracing::debug!(addr = %addr, index, "Active host found");
                    }
                    outcome.reachable
                }
            },
        )
        .await?;

        let active_hosts = run
            .reachable
            .iter()
            .map(|(index, _)| target.address(*index))
            .collect();
        let result = NetworkScanResult {
            id,
            target,
            active_hosts,
            started_at,
            finished_at: Utc::now(),
        };

        if run.cancelled {
            tracing::info!(scan_id = %id, done = run.done, total, "Subnet sweep cancelled");
            Ok(ScanOutcome::Cancelled(result))
        } else {
            tracing::info!(
                scan_id = %id,
                target = %result.target,
                active = result.active_hosts.len(),
                duration_ms = (result.finished_at - started_at).num_milliseconds(),
                "Subnet sweep complete"
            );
            Ok(ScanOutcome::Completed(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use crate::probe::ProbeOutcome;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hosts in `alive` answer; each host's reply latency is looked up in `delays`.
    struct FixtureProber {
        alive: Vec<IpAddr>,
        delays: HashMap<IpAddr, Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FixtureProber {
        async fn probe_port(&self, _addr: IpAddr, _port: u16, _timeout: Duration) -> ProbeOutcome {
            unreachable!("sweeper never probes ports")
        }

        async fn probe_host(&self, addr: IpAddr, _timeout: Duration) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.get(&addr).copied().unwrap_or_default();
            tokio::time::sleep(delay).await;
            ProbeOutcome {
                reachable: self.alive.contains(&addr),
                elapsed: delay,
            }
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn active_hosts_in_index_order_regardless_of_timing() {
        let prober = Arc::new(FixtureProber {
            alive: vec![ip("10.0.0.4"), ip("10.0.0.2")],
            // .4 answers long before .2
            delays: HashMap::from([
                (ip("10.0.0.2"), Duration::from_millis(900)),
                (ip("10.0.0.4"), Duration::from_millis(10)),
            ]),
            calls: AtomicUsize::new(0),
        });
        let sweeper = SubnetSweeper::new(prober.clone(), 8, Duration::from_secs(1));

        let outcome = sweeper
            .sweep(
                SweepTarget::new("10.0.0.", 1, 5),
                &(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let result = outcome.completed().unwrap();
        assert_eq!(result.active_hosts, vec!["10.0.0.2", "10.0.0.4"]);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn invalid_range_fails_before_probing() {
        let prober = Arc::new(FixtureProber {
            alive: vec![],
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let sweeper = SubnetSweeper::new(prober.clone(), 8, Duration::from_secs(1));

        let err = sweeper
            .sweep(
                SweepTarget::new("10.0.0.", 9, 3),
                &(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::Validation(ValidationError::InvalidHostRange { lo: 9, hi: 3 })
        ));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn plan_uses_configured_range() {
        let prober = Arc::new(FixtureProber {
            alive: vec![],
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
        });
        let sweeper = SubnetSweeper::new(prober, 8, Duration::from_secs(1));

        let plan = sweeper
            .prepare(&SweepTarget::new("192.168.7.", 100, 130))
            .unwrap();
        assert_eq!(plan.len(), 31);
        assert_eq!(plan.get(&100), Some(&ip("192.168.7.100")));
        assert_eq!(plan.get(&130), Some(&ip("192.168.7.130")));
    }
}
