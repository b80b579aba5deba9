//! Directory Concurrency Tests - One Thread Per Host
//!
//! Every host is driven by its own thread, polling and making progress
//! while it competes for the same objects. Counters kept in shared objects
//! must come out exact.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::{assert_quiescent, assert_state, wait_until, ClusterFixture};
use dsmc_dir::{Handle, Host, RemoteState, ResolveMode};

const INCREMENTS_PER_HOST: u64 = 25;

/// Claim `handle` for writing, add one, let it go
fn increment(host: &Host, handle: Handle) {
    host.set_contended::<u64>(handle, ResolveMode::ReadWrite)
        .expect("set_contended should succeed");
    wait_until(
        || host.resolve(handle, ResolveMode::ReadWrite),
        || {
            host.do_network_work().expect("network work should succeed");
        },
        "write access never arrived",
    );
    let done = host
        .with_object(handle, ResolveMode::ReadWrite, |value: &mut u64| *value += 1)
        .expect("with_object should succeed");
    assert!(done.is_some(), "host {} lost a contended object", host.id());
    host.clear_contended(handle)
        .expect("clear_contended should succeed");
}

/// Every host increments the same counter concurrently
///
/// **Bug this finds:** Lost updates, two concurrent writers, deadlock
#[test]
fn test_concurrent_increments_are_exact() {
    let cluster = ClusterFixture::new(4);
    let h = cluster.host(0).allocate(0u64);
    let num_hosts = cluster.hosts.len();
    let finished = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(num_hosts));

    let workers: Vec<_> = cluster
        .hosts
        .iter()
        .cloned()
        .map(|host| {
            let finished = finished.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for _ in 0..INCREMENTS_PER_HOST {
                    increment(&host, h);
                }
                finished.fetch_add(1, Ordering::SeqCst);
                // Keep answering the others until everyone is done.
                while finished.load(Ordering::SeqCst) < num_hosts {
                    host.do_network_work().expect("network work should succeed");
                    thread::yield_now();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    cluster.run_until_quiet();
    cluster.fetch_and_settle::<u64>(0, h, ResolveMode::ReadWrite);
    assert_eq!(
        cluster.host(0).peek::<u64>(h),
        Some(INCREMENTS_PER_HOST * num_hosts as u64)
    );
    assert_quiescent(&cluster);
}

/// Threads on one host fetching at once share a single request
///
/// **Bug this finds:** Duplicate in-flight requests under a racing fetch
#[test]
fn test_concurrent_fetches_send_one_request() {
    let cluster = ClusterFixture::new(2);
    let h = cluster.host(0).allocate(String::from("shared"));
    let reader = cluster.hosts[1].clone();
    let start = Arc::new(Barrier::new(8));

    let fetchers: Vec<_> = (0..8)
        .map(|_| {
            let reader = reader.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                reader
                    .fetch::<String>(h, ResolveMode::ReadOnly)
                    .expect("fetch should succeed");
            })
        })
        .collect();
    for fetcher in fetchers {
        fetcher.join().expect("fetch thread panicked");
    }

    assert_eq!(reader.stats().summary().requests_sent, 1);
    assert_eq!(reader.requester_state(h), RemoteState::PendingRo);

    cluster.run_until_quiet();
    assert_state(&cluster, 1, h, RemoteState::HereRo);
    assert_eq!(reader.peek::<String>(h).as_deref(), Some("shared"));
}

/// Readers on every host poll concurrently while one object is read
#[test]
fn test_concurrent_readers_share_copies() {
    let cluster = ClusterFixture::new(5);
    let h = cluster.host(0).allocate(vec![1u8, 2, 3]);
    let num_hosts = cluster.hosts.len();
    let finished = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = cluster
        .hosts
        .iter()
        .cloned()
        .map(|host| {
            let finished = finished.clone();
            thread::spawn(move || {
                host.fetch::<Vec<u8>>(h, ResolveMode::ReadOnly)
                    .expect("fetch should succeed");
                wait_until(
                    || host.resolve(h, ResolveMode::ReadOnly),
                    || {
                        host.do_network_work().expect("network work should succeed");
                    },
                    "read access never arrived",
                );
                let sum = host
                    .with_object(h, ResolveMode::ReadOnly, |v: &mut Vec<u8>| {
                        v.iter().map(|b| *b as u32).sum::<u32>()
                    })
                    .expect("with_object should succeed");
                finished.fetch_add(1, Ordering::SeqCst);
                while finished.load(Ordering::SeqCst) < num_hosts {
                    host.do_network_work().expect("network work should succeed");
                    thread::yield_now();
                }
                sum
            })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.join().expect("reader thread panicked"), Some(6));
    }
    cluster.run_until_quiet();
    assert_eq!(cluster.host(0).owner_snapshot(h).ro_holders.len(), num_hosts - 1);
}
