//! Test Utilities for the Directory Test Suite
//!
//! Builds whole clusters over the loopback network and provides STRICT
//! assertions on coherence state. A failed assertion here is a protocol
//! bug, never a flaky test.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use dsmc_dir::{DirConfig, Handle, Host, HostId, LoopbackNetwork, RemoteState, ResolveMode};

/// Rounds after which a cluster that has not gone quiet is considered stuck
pub const MAX_ROUNDS: usize = 1_000;

/// Wall-clock limit for threaded tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// ============================================================================
/// CLUSTER FIXTURE
/// ============================================================================

/// An in-process cluster, one `Host` per loopback endpoint.
pub struct ClusterFixture {
    pub hosts: Vec<Arc<Host>>,
}

impl ClusterFixture {
    /// Cluster with default configuration on every host
    ///
    /// **Bug this finds:** Initialization failures, endpoint wiring mistakes
    pub fn new(num_hosts: u32) -> Self {
        Self::with_config(num_hosts, DirConfig::default())
    }

    pub fn with_config(num_hosts: u32, config: DirConfig) -> Self {
        let hosts = LoopbackNetwork::build(num_hosts)
            .into_iter()
            .map(|endpoint| {
                Arc::new(
                    Host::new(endpoint, config.clone())
                        .expect("host initialization should succeed with valid config"),
                )
            })
            .collect();
        Self { hosts }
    }

    pub fn host(&self, id: u32) -> &Host {
        &self.hosts[id as usize]
    }

    /// One round: every host polls and makes progress once
    pub fn round(&self) -> usize {
        self.hosts
            .iter()
            .map(|host| {
                host.do_network_work()
                    .unwrap_or_else(|e| panic!("host {} network work failed: {}", host.id(), e))
            })
            .sum()
    }

    pub fn run_rounds(&self, rounds: usize) {
        for _ in 0..rounds {
            self.round();
        }
    }

    /// Run rounds until nothing is in flight anywhere
    ///
    /// **Bug this finds:** Lost messages, requests never answered, livelock
    pub fn run_until_quiet(&self) -> usize {
        for rounds in 1..=MAX_ROUNDS {
            self.round();
            if self.hosts.iter().all(|host| host.is_quiescent()) {
                return rounds;
            }
        }
        panic!(
            "cluster did not go quiet within {} rounds:\n{}",
            MAX_ROUNDS,
            self.dump()
        );
    }

    /// Fetch on `host` and run the cluster until quiet
    pub fn fetch_and_settle<T: dsmc_dir::Transferable>(
        &self,
        host: u32,
        handle: Handle,
        mode: ResolveMode,
    ) {
        self.host(host)
            .fetch::<T>(handle, mode)
            .unwrap_or_else(|e| panic!("host {} fetch of {} failed: {}", host, handle, e));
        self.run_until_quiet();
    }

    pub fn dump(&self) -> String {
        self.hosts.iter().map(|host| host.dump()).collect()
    }
}

/// ============================================================================
/// STRICT ASSERTION HELPERS
/// ============================================================================

/// Assert a host's requester-side state
///
/// **Bug this finds:** Wrong transitions, stuck pending states
#[track_caller]
pub fn assert_state(fixture: &ClusterFixture, host: u32, handle: Handle, expected: RemoteState) {
    let actual = fixture.host(host).requester_state(handle);
    assert_eq!(
        actual,
        expected,
        "host {} holds {} in state {}, expected {}\n{}",
        host,
        handle,
        actual,
        expected,
        fixture.dump()
    );
}

/// Assert single-writer / multiple-reader across the whole cluster
///
/// **Bug this finds:** Two writers, a writer coexisting with readers
/// **Tolerance:** ZERO - any overlap is a coherence violation
#[track_caller]
pub fn assert_single_writer(fixture: &ClusterFixture, handle: Handle) {
    let owner = fixture.host(handle.host().0);
    let mut writers = Vec::new();
    let mut readers = Vec::new();

    if owner.resolve(handle, ResolveMode::ReadWrite) {
        writers.push(owner.id());
    } else if owner.resolve(handle, ResolveMode::ReadOnly) {
        readers.push(owner.id());
    }
    for host in fixture.hosts.iter().filter(|host| host.id() != handle.host()) {
        match host.requester_state(handle) {
            RemoteState::HereRw => writers.push(host.id()),
            RemoteState::HereRo | RemoteState::Upgrade => readers.push(host.id()),
            _ => {},
        }
    }

    assert!(
        writers.len() <= 1,
        "{}: multiple writers {:?}\n{}",
        handle,
        writers,
        fixture.dump()
    );
    if !writers.is_empty() {
        let remote_readers: Vec<HostId> = readers
            .iter()
            .copied()
            .filter(|reader| *reader != handle.host())
            .collect();
        assert!(
            remote_readers.is_empty(),
            "{}: writer {:?} coexists with readers {:?}\n{}",
            handle,
            writers,
            remote_readers,
            fixture.dump()
        );
    }

    let snapshot = owner.owner_snapshot(handle);
    assert!(
        snapshot.rw_holder.is_none() || snapshot.ro_holders.is_empty(),
        "{}: owner records writer {:?} and readers {:?}",
        handle,
        snapshot.rw_holder,
        snapshot.ro_holders
    );
}

/// Assert the whole cluster is quiet
#[track_caller]
pub fn assert_quiescent(fixture: &ClusterFixture) {
    for host in &fixture.hosts {
        assert!(
            host.is_quiescent(),
            "host {} still has work in flight\n{}",
            host.id(),
            fixture.dump()
        );
    }
}

/// Spin `condition` with `step` until it holds or the timeout expires
///
/// **Bug this finds:** Deadlock, requests that are never served
#[track_caller]
pub fn wait_until(mut condition: impl FnMut() -> bool, mut step: impl FnMut(), context: &str) {
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < TEST_TIMEOUT,
            "{}: condition not reached within {:?}",
            context,
            TEST_TIMEOUT
        );
        step();
        std::thread::yield_now();
    }
}
