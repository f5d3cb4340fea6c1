//! Linking netdevsim ports to each other.
//!
//! The kernel (6.9+) identifies each port by a network namespace file
//! descriptor of the writing process together with the interface index in
//! that namespace.

use std::os::fd::AsRawFd;

use tempnet_common::error::Result;
use tempnet_common::types::NamespaceKind;
use tempnet_core::namespace::network;
use tempnet_core::{Fixture, NamespaceRef};

use super::write_sysfs;
use crate::descriptor::LinkDescriptor;
use crate::engine;

/// Links two netdevsim port interfaces with each other.
///
/// # Errors
///
/// Returns an error if either port cannot be resolved or the kernel rejects
/// the link.
pub fn link_peers(fixture: &Fixture, a: &LinkDescriptor, b: &LinkDescriptor) -> Result<()> {
    let (netns_a, index_a) = resolve(fixture, a)?;
    let (netns_b, index_b) = resolve(fixture, b)?;
    let request = format!(
        "{}:{index_a} {}:{index_b}",
        netns_a.as_raw_fd(),
        netns_b.as_raw_fd()
    );
    write_sysfs(
        &fixture.config().netdevsim_root().join("link_device"),
        &request,
    )?;
    tracing::debug!(a = %a.name, b = %b.name, "linked netdevsim ports");
    Ok(())
}

/// Unlinks a netdevsim port interface from its peer.
///
/// # Errors
///
/// Returns an error if the port cannot be resolved or the kernel rejects
/// the request.
pub fn unlink_peer(fixture: &Fixture, port: &LinkDescriptor) -> Result<()> {
    let (netns, index) = resolve(fixture, port)?;
    write_sysfs(
        &fixture.config().netdevsim_root().join("unlink_device"),
        &format!("{}:{index}", netns.as_raw_fd()),
    )?;
    tracing::debug!(port = %port.name, "unlinked netdevsim port");
    Ok(())
}

/// Returns an independently owned reference to the port's network namespace
/// together with its interface index there.
fn resolve(fixture: &Fixture, port: &LinkDescriptor) -> Result<(NamespaceRef, u32)> {
    let netns = match &port.namespace {
        Some(netns) => {
            netns.validate(NamespaceKind::Network)?;
            netns.duplicate()?
        }
        None => network::current(fixture.claim())?,
    };
    let index = if port.index == 0 {
        engine::index_in(fixture, Some(&netns), &port.name)?
    } else {
        port.index
    };
    Ok((netns, index))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempnet_common::config::TempnetConfig;
    use tempnet_common::error::TempnetError;

    use super::*;
    use crate::descriptor::LinkKind;

    fn port(index: u32) -> LinkDescriptor {
        let mut link = LinkDescriptor::new(LinkKind::Device);
        link.name = format!("ndsi-{index}");
        link.index = index;
        link
    }

    fn fixture_with_fake_bus() -> (tempfile::TempDir, Fixture) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = TempnetConfig {
            sysfs_root: dir.path().to_path_buf(),
            materialize_timeout: Duration::from_millis(20),
            ..TempnetConfig::default()
        };
        std::fs::create_dir_all(config.netdevsim_root()).expect("mkdir");
        (dir, Fixture::with_config(config).expect("fixture"))
    }

    fn fd_index_pair(s: &str) -> (i32, u32) {
        let (fd, index) = s.split_once(':').expect("fd:index");
        (fd.parse().expect("fd"), index.parse().expect("index"))
    }

    #[test]
    fn link_request_names_both_sides() {
        let (dir, fixture) = fixture_with_fake_bus();
        link_peers(&fixture, &port(3), &port(4)).expect("link");
        let written =
            std::fs::read_to_string(dir.path().join("bus/netdevsim/link_device")).expect("read");
        let (a, b) = written.split_once(' ').expect("two sides");
        let (fd_a, index_a) = fd_index_pair(a);
        let (fd_b, index_b) = fd_index_pair(b);
        assert_eq!((index_a, index_b), (3, 4));
        assert!(fd_a >= 0 && fd_b >= 0);
        assert_ne!(fd_a, fd_b);
    }

    #[test]
    fn unlink_request_names_one_side() {
        let (dir, fixture) = fixture_with_fake_bus();
        unlink_peer(&fixture, &port(9)).expect("unlink");
        let written = std::fs::read_to_string(dir.path().join("bus/netdevsim/unlink_device"))
            .expect("read");
        assert_eq!(fd_index_pair(&written).1, 9);
    }

    #[test]
    fn mount_namespace_reference_is_rejected() {
        let (_dir, fixture) = fixture_with_fake_bus();
        let mntns = NamespaceRef::open("/proc/thread-self/ns/mnt", NamespaceKind::Mount)
            .expect("open");
        let bad = port(1).in_namespace(mntns);
        let err = link_peers(&fixture, &bad, &port(2)).expect_err("invalid");
        assert!(matches!(err, TempnetError::InvalidNamespace { .. }));
    }

    #[test]
    fn unknown_port_name_is_an_error() {
        let (_dir, fixture) = fixture_with_fake_bus();
        let mut ghost = port(0);
        ghost.name = "ndsi-nonexist".into();
        assert!(unlink_peer(&fixture, &ghost).is_err());
    }
}
