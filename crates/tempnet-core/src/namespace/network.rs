//! Network namespaces.
//!
//! Transient network namespaces are either created detached (the calling
//! thread never observably leaves its namespace) or entered in place, with a
//! guard that switches back afterwards.

use nix::sched::{CloneFlags, unshare};
use tempnet_common::constants::DEFAULT_MAX_ATTEMPTS;
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;

use super::{NamespaceGuard, NamespaceRef, switch_into};
use crate::names::random_nsid;
use crate::netlink::NetlinkSession;
use crate::retry::retry_on_collision;
use crate::thread::ThreadClaim;

/// Opens a reference to the claimed thread's current network namespace.
///
/// # Errors
///
/// Returns an error if procfs cannot be read.
pub fn current(_claim: &ThreadClaim) -> Result<NamespaceRef> {
    NamespaceRef::thread_current(NamespaceKind::Network)
}

/// Returns the inode number of the claimed thread's network namespace.
///
/// # Errors
///
/// Returns an error if procfs cannot be read.
pub fn current_ino(claim: &ThreadClaim) -> Result<u64> {
    current(claim)?.ino()
}

/// Creates a new network namespace without leaving the current one.
///
/// The claimed thread briefly unshares into the new namespace to capture a
/// reference, then switches back before returning.
///
/// # Errors
///
/// Returns an error if the namespace cannot be created, or a
/// [`TempnetError::NamespaceSwitch`] if the thread cannot switch back; the
/// thread is tainted in the latter case.
pub fn new_transient(claim: &ThreadClaim) -> Result<NamespaceRef> {
    let original = current(claim)?;
    unshare(CloneFlags::CLONE_NEWNET).map_err(|e| TempnetError::NamespaceSwitch {
        message: format!("cannot create new network namespace: {e}"),
    })?;
    let created = NamespaceRef::thread_current(NamespaceKind::Network);
    if let Err(e) = switch_into(&original) {
        claim.taint("cannot switch back into original network namespace");
        return Err(e);
    }
    let created = created?;
    tracing::debug!(ino = created.ino().ok(), "created transient network namespace");
    Ok(created)
}

/// Creates a new network namespace and switches the claimed thread into it.
///
/// The returned guard switches back into the original network namespace
/// when restored or dropped.
///
/// # Errors
///
/// Returns an error if the namespace cannot be created.
pub fn enter_transient(claim: &ThreadClaim) -> Result<NamespaceGuard<'_>> {
    let original = current(claim)?;
    unshare(CloneFlags::CLONE_NEWNET).map_err(|e| TempnetError::NamespaceSwitch {
        message: format!("cannot create new network namespace: {e}"),
    })?;
    tracing::debug!(
        ino = current_ino(claim).ok(),
        "entered transient network namespace"
    );
    Ok(NamespaceGuard::returning_to(claim, original))
}

/// Runs `f` with the claimed thread switched into `netns`.
///
/// The original network namespace is restored before returning, also when
/// `f` panics.
///
/// # Errors
///
/// Returns an error if `netns` is not a network namespace reference, or if
/// switching in either direction fails.
pub fn run_in<R>(claim: &ThreadClaim, netns: &NamespaceRef, f: impl FnOnce() -> R) -> Result<R> {
    netns.validate(NamespaceKind::Network)?;
    let guard = NamespaceGuard::enter(claim, netns)?;
    let out = f();
    guard.restore()?;
    Ok(out)
}

/// Returns the nsid under which the claimed thread's network namespace
/// knows `netns`, assigning a random one first if there is none yet.
///
/// # Errors
///
/// Returns an error if `netns` is not a network namespace reference, if the
/// kernel rejects the requests, or a [`TempnetError::Exhausted`] if every
/// randomly picked nsid was taken.
pub fn ns_id(claim: &ThreadClaim, netns: &NamespaceRef) -> Result<i32> {
    netns.validate(NamespaceKind::Network)?;
    let session = NetlinkSession::open(claim, None)?;
    retry_on_collision(DEFAULT_MAX_ATTEMPTS, "netnsid", |attempt| {
        if let Some(id) = session.ns_id(netns)? {
            return Ok(id);
        }
        let id = random_nsid();
        tracing::debug!(id, attempt, "assigning nsid");
        session.set_ns_id(netns, id)?;
        Ok(id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_root() -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[test]
    fn current_matches_procfs() {
        let claim = ThreadClaim::acquire().expect("claim");
        let ino = current_ino(&claim).expect("ino");
        assert_eq!(
            ino,
            super::super::ino_of_path("/proc/thread-self/ns/net").expect("ino")
        );
    }

    #[test]
    fn run_in_rejects_mount_namespace() {
        let claim = ThreadClaim::acquire().expect("claim");
        let mntns = NamespaceRef::thread_current(NamespaceKind::Mount).expect("open");
        let err = run_in(&claim, &mntns, || ()).expect_err("should reject");
        assert!(matches!(err, TempnetError::InvalidNamespace { .. }));
    }

    #[test]
    fn ns_id_rejects_mount_namespace() {
        let claim = ThreadClaim::acquire().expect("claim");
        let mntns = NamespaceRef::thread_current(NamespaceKind::Mount).expect("open");
        let err = ns_id(&claim, &mntns).expect_err("should reject");
        assert!(matches!(err, TempnetError::InvalidNamespace { .. }));
    }

    #[test]
    fn ns_id_is_assigned_once_and_kept() {
        if !is_root() {
            return;
        }
        let claim = ThreadClaim::acquire().expect("claim");
        let netns = new_transient(&claim).expect("new netns");
        let id = ns_id(&claim, &netns).expect("assign");
        assert!(id >= 0);
        assert_eq!(ns_id(&claim, &netns.duplicate().expect("dup")).expect("again"), id);
    }

    #[test]
    fn detached_creation_leaves_caller_in_place() {
        if !is_root() {
            return;
        }
        let claim = ThreadClaim::acquire().expect("claim");
        let home = current_ino(&claim).expect("ino");
        let netns = new_transient(&claim).expect("new netns");
        assert_ne!(netns.ino().expect("ino"), home);
        assert_eq!(current_ino(&claim).expect("ino"), home);
        assert!(!claim.is_tainted());
    }

    #[test]
    fn enter_and_restore() {
        if !is_root() {
            return;
        }
        let claim = ThreadClaim::acquire().expect("claim");
        let home = current_ino(&claim).expect("ino");
        let guard = enter_transient(&claim).expect("enter");
        assert_ne!(current_ino(&claim).expect("ino"), home);
        guard.restore().expect("restore");
        assert_eq!(current_ino(&claim).expect("ino"), home);
    }

    #[test]
    fn run_in_executes_inside_and_returns() {
        if !is_root() {
            return;
        }
        let claim = ThreadClaim::acquire().expect("claim");
        let home = current_ino(&claim).expect("ino");
        let netns = new_transient(&claim).expect("new netns");
        let inside = run_in(&claim, &netns, || {
            super::super::ino_of_path("/proc/thread-self/ns/net")
        })
        .expect("run_in")
        .expect("ino");
        assert_eq!(inside, netns.ino().expect("ino"));
        assert_eq!(current_ino(&claim).expect("ino"), home);
    }
}
