//! `simulate` command: boot a loopback cluster and run one scenario.

use std::sync::Arc;
use std::time::Instant;

use dsmc_dir::{DirConfig, Host, LoopbackNetwork};
use serde_json::json;
use tracing::{debug, info};

use crate::commands::scenarios::Scenario;
use crate::config::Config;
use crate::error::{DsmtError, Result};

/// Arguments for the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub scenario: Scenario,
    pub hosts: Option<u32>,
    pub rounds: Option<usize>,
    pub json: bool,
    pub verbose: bool,
}

/// In-process cluster of hosts over the loopback network.
pub struct Cluster {
    hosts: Vec<Arc<Host>>,
    max_rounds: usize,
    rounds_run: usize,
}

impl Cluster {
    pub fn new(num_hosts: u32, config: DirConfig, max_rounds: usize) -> Result<Self> {
        if num_hosts == 0 {
            return Err(DsmtError::Validation("a cluster needs at least one host".into()));
        }
        let hosts = LoopbackNetwork::build(num_hosts)
            .into_iter()
            .map(|endpoint| Host::new(endpoint, config.clone()).map(Arc::new))
            .collect::<dsmc_dir::Result<Vec<_>>>()?;
        Ok(Self {
            hosts,
            max_rounds,
            rounds_run: 0,
        })
    }

    pub fn len(&self) -> u32 {
        self.hosts.len() as u32
    }

    pub fn host(&self, id: u32) -> &Host {
        &self.hosts[id as usize]
    }

    pub fn rounds_run(&self) -> usize {
        self.rounds_run
    }

    /// Every host polls and makes progress once.
    pub fn round(&mut self) -> Result<usize> {
        let mut handled = 0;
        for host in &self.hosts {
            handled += host.do_network_work()?;
        }
        self.rounds_run += 1;
        Ok(handled)
    }

    pub fn run_rounds(&mut self, rounds: usize) -> Result<()> {
        for _ in 0..rounds {
            self.round()?;
        }
        Ok(())
    }

    pub fn is_quiescent(&self) -> bool {
        self.hosts.iter().all(|host| host.is_quiescent())
    }

    /// Run rounds until no host has work in flight.
    pub fn settle(&mut self) -> Result<()> {
        for _ in 0..self.max_rounds {
            let handled = self.round()?;
            if self.is_quiescent() {
                return Ok(());
            }
            debug!(handled, "cluster still busy");
        }
        Err(DsmtError::Stuck {
            scenario: String::from("settle"),
            rounds: self.max_rounds,
        })
    }

    /// Text report: directory dump and statistics per host.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for host in &self.hosts {
            out.push_str(&host.dump());
            out.push_str(&format!("  {}\n", host.stats().summary()));
        }
        out
    }

    pub fn report_json(&self) -> serde_json::Value {
        let hosts: Vec<serde_json::Value> = self
            .hosts
            .iter()
            .map(|host| {
                let (owned, cached) = host.tracked();
                json!({
                    "host": host.id(),
                    "tracked_owner": owned,
                    "tracked_requester": cached,
                    "events": host.logger().event_count(),
                    "metrics": host.stats().metrics(host.id()).to_json(),
                })
            })
            .collect();
        json!({ "hosts": hosts })
    }
}

/// Run the simulate command.
pub fn run_simulate(args: SimulateArgs, config: &Config) -> Result<()> {
    let hosts = args.hosts.unwrap_or(config.simulate.hosts);
    let max_rounds = args.rounds.unwrap_or(config.simulate.max_rounds);
    let json_output = args.json || config.simulate.json;
    let dir_config = config
        .directory
        .to_dir_config(args.verbose || config.verbose);
    dir_config
        .validate()
        .map_err(|e| DsmtError::Config(e.to_string()))?;

    info!(scenario = args.scenario.name(), hosts, "starting simulation");
    let start = Instant::now();
    let mut cluster = Cluster::new(hosts, dir_config, max_rounds)?;
    let value = args.scenario.run(&mut cluster).map_err(|e| match e {
        DsmtError::Stuck { rounds, .. } => DsmtError::Stuck {
            scenario: args.scenario.name().to_string(),
            rounds,
        },
        other => other,
    })?;
    let elapsed = start.elapsed();

    if json_output {
        let mut report = cluster.report_json();
        report["scenario"] = json!(args.scenario.name());
        report["rounds"] = json!(cluster.rounds_run());
        report["value"] = json!(value);
        report["elapsed_us"] = json!(elapsed.as_micros() as u64);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "scenario {} on {} hosts: counter = {} after {} rounds ({:.2}ms)",
            args.scenario.name(),
            hosts,
            value,
            cluster.rounds_run(),
            elapsed.as_secs_f64() * 1_000.0
        );
        print!("{}", cluster.report());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsmc_dir::ResolveMode;

    fn args(scenario: Scenario) -> SimulateArgs {
        SimulateArgs {
            scenario,
            hosts: Some(3),
            rounds: None,
            json: false,
            verbose: false,
        }
    }

    #[test]
    fn test_cluster_rejects_zero_hosts() {
        assert!(Cluster::new(0, DirConfig::default(), 10).is_err());
    }

    #[test]
    fn test_cluster_settles_after_fetch() {
        let mut cluster = Cluster::new(2, DirConfig::default(), 100).unwrap();
        let handle = cluster.host(0).allocate(5u64);
        cluster.host(1).fetch::<u64>(handle, ResolveMode::ReadOnly).unwrap();
        assert!(!cluster.is_quiescent());
        cluster.settle().unwrap();
        assert!(cluster.host(1).resolve(handle, ResolveMode::ReadOnly));
        assert!(cluster.rounds_run() > 0);
    }

    #[test]
    fn test_report_json_lists_hosts() {
        let cluster = Cluster::new(3, DirConfig::default(), 10).unwrap();
        let report = cluster.report_json();
        assert_eq!(report["hosts"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_run_simulate_each_scenario() {
        let config = Config::default();
        for scenario in Scenario::ALL {
            assert!(run_simulate(args(scenario), &config).is_ok());
        }
    }

    #[test]
    fn test_run_simulate_too_few_hosts() {
        let config = Config::default();
        let mut args = args(Scenario::Contended);
        args.hosts = Some(2);
        assert!(matches!(
            run_simulate(args, &config),
            Err(DsmtError::Validation(_))
        ));
    }
}
