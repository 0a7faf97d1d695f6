#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use toxide_core::{Network, Options, Tox};

/// Options for tests: no local discovery, so instances only link when told to.
pub fn quiet() -> Options {
    Options {
        local_discovery_enabled: false,
        ..Options::default()
    }
}

/// `count` instances on a fresh network, all bootstrapped to the first one.
pub fn linked(count: usize) -> anyhow::Result<(Network, Vec<Tox>)> {
    let net = Network::new();
    let mut toxes = Vec::with_capacity(count);
    for _ in 0..count {
        toxes.push(Tox::with_network(quiet(), &net)?);
    }
    let port = toxes[0].self_udp_port()?.expect("udp enabled");
    let dht = toxes[0].self_dht_id()?.to_string();
    for tox in toxes.iter_mut().skip(1) {
        tox.bootstrap("127.0.0.1", port, &dht)?;
    }
    Ok((net, toxes))
}

/// Iterate every instance in turn until `done` holds. Panics after `max` rounds.
pub fn run_until(toxes: &mut [Tox], max: usize, mut done: impl FnMut(&[Tox]) -> bool) {
    for _ in 0..max {
        for tox in toxes.iter_mut() {
            if tox.is_alive() {
                tox.iterate().expect("iterate");
            }
        }
        if done(toxes) {
            return;
        }
    }
    panic!("condition not reached after {max} rounds");
}

/// Iterate every live instance for a fixed number of rounds.
pub fn run(toxes: &mut [Tox], rounds: usize) {
    run_until(toxes, rounds + 1, {
        let mut left = rounds;
        move |_| {
            left = left.saturating_sub(1);
            left == 0
        }
    });
}

/// Make `a` and `b` friends without a request round-trip and wait until both
/// see the other connected. Returns (b's number at a, a's number at b).
pub fn befriend(toxes: &mut [Tox], a: usize, b: usize) -> anyhow::Result<(u32, u32)> {
    let key_a = toxes[a].self_public_key()?;
    let key_b = toxes[b].self_public_key()?;
    let b_at_a = toxes[a].friend_add_norequest(&key_b)?;
    let a_at_b = toxes[b].friend_add_norequest(&key_a)?;
    run_until(toxes, 50, |t| {
        t[a].friend_connection_status(b_at_a).unwrap().is_connected()
            && t[b].friend_connection_status(a_at_b).unwrap().is_connected()
    });
    Ok((b_at_a, a_at_b))
}

/// Shared event log for handlers.
pub fn log<T>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}
