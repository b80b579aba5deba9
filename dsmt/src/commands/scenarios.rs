//! Named coherence scenarios and the `scenarios` command.
//!
//! Every scenario allocates one counter on host 0, drives the cluster
//! through an access pattern, pulls the counter home and checks its value.

use clap::ValueEnum;
use dsmc_dir::{Handle, ResolveMode};
use tracing::{debug, info};

use crate::commands::simulate::Cluster;
use crate::error::{DsmtError, Result};

/// Access pattern to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Every remote host reads, then the last one writes
    ReadersThenWriter,
    /// A reader asks for an object a remote host is writing
    ForwardRead,
    /// Hosts take turns writing
    PingPong,
    /// A host holds its writable copy while another asks for it
    Contended,
}

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::ReadersThenWriter,
        Scenario::ForwardRead,
        Scenario::PingPong,
        Scenario::Contended,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::ReadersThenWriter => "readers-then-writer",
            Scenario::ForwardRead => "forward-read",
            Scenario::PingPong => "ping-pong",
            Scenario::Contended => "contended",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Scenario::ReadersThenWriter => {
                "hosts 1..N read, then host N-1 writes after every reader is invalidated"
            },
            Scenario::ForwardRead => "host 1 writes, host 2 reads, host 1 writes back",
            Scenario::PingPong => "every host in turn takes the writable copy three times",
            Scenario::Contended => {
                "host 1 holds the writable copy while host 2 asks, then lets go"
            },
        }
    }

    pub fn min_hosts(self) -> u32 {
        match self {
            Scenario::ReadersThenWriter | Scenario::PingPong => 2,
            Scenario::ForwardRead | Scenario::Contended => 3,
        }
    }

    /// Run against `cluster`, returning the counter's final value.
    pub fn run(self, cluster: &mut Cluster) -> Result<u64> {
        let hosts = cluster.len();
        if hosts < self.min_hosts() {
            return Err(DsmtError::Validation(format!(
                "scenario '{}' needs at least {} hosts, got {}",
                self.name(),
                self.min_hosts(),
                hosts
            )));
        }

        let (handle, expected) = match self {
            Scenario::ReadersThenWriter => self.readers_then_writer(cluster)?,
            Scenario::ForwardRead => self.forward_read(cluster)?,
            Scenario::PingPong => self.ping_pong(cluster)?,
            Scenario::Contended => self.contended(cluster)?,
        };

        cluster.host(0).fetch::<u64>(handle, ResolveMode::ReadWrite)?;
        cluster.settle()?;
        let value = cluster.host(0).peek::<u64>(handle).unwrap_or_default();
        if value != expected {
            return Err(self.failed(format!("counter is {}, expected {}", value, expected)));
        }
        info!(scenario = self.name(), value, "scenario finished");
        Ok(value)
    }

    fn readers_then_writer(self, cluster: &mut Cluster) -> Result<(Handle, u64)> {
        let handle = cluster.host(0).allocate(0u64);
        for reader in 1..cluster.len() {
            debug!(host = reader, %handle, "read");
            cluster.host(reader).fetch::<u64>(handle, ResolveMode::ReadOnly)?;
            cluster.settle()?;
        }
        let writer = cluster.len() - 1;
        cluster.host(writer).fetch::<u64>(handle, ResolveMode::ReadWrite)?;
        cluster.settle()?;
        self.increment(cluster, writer, handle)?;
        Ok((handle, 1))
    }

    fn forward_read(self, cluster: &mut Cluster) -> Result<(Handle, u64)> {
        let handle = cluster.host(0).allocate(41u64);
        cluster.host(1).fetch::<u64>(handle, ResolveMode::ReadWrite)?;
        cluster.settle()?;
        self.increment(cluster, 1, handle)?;

        cluster.host(2).fetch::<u64>(handle, ResolveMode::ReadOnly)?;
        cluster.settle()?;
        let seen = cluster.host(2).peek::<u64>(handle);
        if seen != Some(42) {
            return Err(self.failed(format!("host 2 read {:?}, expected 42", seen)));
        }
        Ok((handle, 42))
    }

    fn ping_pong(self, cluster: &mut Cluster) -> Result<(Handle, u64)> {
        let handle = cluster.host(0).allocate(0u64);
        let turns = cluster.len() * 3;
        for turn in 0..turns {
            let host = turn % cluster.len();
            cluster.host(host).fetch::<u64>(handle, ResolveMode::ReadWrite)?;
            cluster.settle()?;
            self.increment(cluster, host, handle)?;
        }
        Ok((handle, u64::from(turns)))
    }

    fn contended(self, cluster: &mut Cluster) -> Result<(Handle, u64)> {
        let handle = cluster.host(0).allocate(0u64);
        cluster.host(1).set_contended::<u64>(handle, ResolveMode::ReadWrite)?;
        cluster.settle()?;

        cluster.host(2).fetch::<u64>(handle, ResolveMode::ReadWrite)?;
        cluster.run_rounds(10)?;
        if cluster.host(2).resolve(handle, ResolveMode::ReadWrite) {
            return Err(self.failed("host 2 took the object from a contended holder".into()));
        }

        self.increment(cluster, 1, handle)?;
        cluster.host(1).clear_contended(handle)?;
        cluster.settle()?;
        self.increment(cluster, 2, handle)?;
        Ok((handle, 2))
    }

    fn increment(self, cluster: &Cluster, host: u32, handle: Handle) -> Result<()> {
        let done = cluster
            .host(host)
            .with_object(handle, ResolveMode::ReadWrite, |value: &mut u64| *value += 1)?;
        if done.is_none() {
            return Err(self.failed(format!("host {} has no writable copy of {}", host, handle)));
        }
        Ok(())
    }

    fn failed(self, message: String) -> DsmtError {
        DsmtError::CheckFailed {
            scenario: self.name().to_string(),
            message,
        }
    }
}

/// Run the `scenarios` command: list what `simulate` can run.
pub fn run_scenarios() -> Result<()> {
    for scenario in Scenario::ALL {
        println!(
            "{:<22} {} (min {} hosts)",
            scenario.name(),
            scenario.description(),
            scenario.min_hosts()
        );
    }
    Ok(())
}
