//! Privileged tests creating real netdevsim devices; these also need the
//! netdevsim kernel module to be loaded.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::print_stderr
)]

mod common;

use tempnet_common::config::TempnetConfig;
use tempnet_core::namespace::network;
use tempnet_core::{Fixture, NetlinkSession};
use tempnet_link::netdevsim::{Netdevsim, has_netdevsim, lowest_available_id};

fn fixture() -> Option<Fixture> {
    if !common::privileged() {
        return None;
    }
    let config = TempnetConfig::default();
    if !has_netdevsim(&config) {
        eprintln!("skipping: netdevsim not available");
        return None;
    }
    Some(Fixture::with_config(config).expect("fixture"))
}

#[test]
fn ports_are_renamed_and_duplicate_id_fails() {
    let Some(fixture) = fixture() else {
        return;
    };
    let netns = network::new_transient(fixture.claim()).expect("netns");
    let id = lowest_available_id(fixture.config()).expect("id");
    let device = Netdevsim::new()
        .id(id)
        .ports(2)
        .in_namespace(netns.clone())
        .create(&fixture)
        .expect("netdevsim");
    assert_eq!(device.id, id);
    assert_eq!(device.ports.len(), 2);

    let session = NetlinkSession::open(fixture.claim(), Some(&netns)).expect("session");
    for port in &device.ports {
        assert!(port.name.starts_with("ndsi-"));
        assert_eq!(
            session.link_by_name(&port.name).expect("port").header.index,
            port.index
        );
    }

    let pending = fixture.pending();
    let err = Netdevsim::new()
        .id(id)
        .create(&fixture)
        .expect_err("ID is taken");
    assert!(err.to_string().contains(&format!("with ID {id}")), "{err}");
    assert_eq!(fixture.pending(), pending);

    fixture.teardown().expect("teardown");
    assert!(
        !fixture
            .config()
            .netdevsim_devices()
            .join(format!("netdevsim{id}"))
            .exists()
    );
}

#[test]
fn automatic_ids_do_not_collide() {
    let Some(fixture) = fixture() else {
        return;
    };
    let a = Netdevsim::new().create(&fixture).expect("first");
    let b = Netdevsim::new().create(&fixture).expect("second");
    assert_ne!(a.id, b.id);
    assert_eq!(a.ports.len(), 1);
}
