//! Mount namespaces.
//!
//! Joining or creating a mount namespace requires the thread to stop sharing
//! its filesystem attributes (root, cwd, umask) with the rest of the process
//! first. That cannot be undone, so threads that enter mount namespaces stay
//! tainted for good: either the claimed thread itself ([`enter_transient`]),
//! or a disposable worker ([`new_transient`], [`run_in`]).

use std::path::{Path, PathBuf};

use nix::mount::{MsFlags, mount};
use nix::sched::{CloneFlags, unshare};
use tempnet_common::constants;
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;

use super::{NamespaceGuard, NamespaceRef, ino_of_path, switch_into};
use crate::fixture::Fixture;
use crate::thread::{DisposableWorker, ThreadClaim, run_disposable};

/// Opens a reference to the claimed thread's current mount namespace.
///
/// # Errors
///
/// Returns an error if procfs cannot be read.
pub fn current(_claim: &ThreadClaim) -> Result<NamespaceRef> {
    NamespaceRef::thread_current(NamespaceKind::Mount)
}

/// A mount namespace kept alive by an idle disposable worker.
#[derive(Debug, Clone)]
pub struct TransientMountNamespace {
    /// Reference to the mount namespace.
    pub namespace: NamespaceRef,
    /// Path to the worker's root directory as seen through procfs, giving
    /// access to the namespace's filesystem view.
    pub procfs_root: PathBuf,
}

/// Unshares filesystem attributes and the mount namespace of the calling
/// thread, then makes all mounts private so later changes cannot propagate
/// back.
fn unshare_private() -> Result<()> {
    unshare_mntns()?;
    make_private()
}

fn unshare_mntns() -> Result<()> {
    unshare(CloneFlags::CLONE_FS | CloneFlags::CLONE_NEWNS).map_err(|e| {
        TempnetError::NamespaceSwitch {
            message: format!("cannot create new mount namespace: {e}"),
        }
    })
}

fn make_private() -> Result<()> {
    mount(
        Some("none"),
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| TempnetError::NamespaceSwitch {
        message: format!("cannot change / mount propagation to private: {e}"),
    })
}

/// Creates a new mount namespace and switches the claimed thread into it.
///
/// The claimed thread is tainted permanently. The returned guard switches
/// back into the original mount namespace, but the thread keeps its
/// unshared filesystem attributes.
///
/// # Errors
///
/// Returns an error if the namespace cannot be created.
pub fn enter_transient(claim: &ThreadClaim) -> Result<NamespaceGuard<'_>> {
    enter_with(claim, make_private)
}

fn enter_with(
    claim: &ThreadClaim,
    prepare: impl FnOnce() -> Result<()>,
) -> Result<NamespaceGuard<'_>> {
    let original = current(claim)?;
    claim.taint("unshared filesystem attributes for a mount namespace");
    unshare_mntns()?;
    // from here on, failures switch back as well
    let guard = NamespaceGuard::returning_to(claim, original);
    prepare()?;
    tracing::debug!("entered transient mount namespace");
    Ok(guard)
}

/// Creates a new mount namespace without entering it.
///
/// A disposable worker thread creates the namespace and then idles to keep
/// it alive until the fixture tears down.
///
/// # Errors
///
/// Returns an error if the worker cannot be spawned or the namespace cannot
/// be created.
pub fn new_transient(fixture: &Fixture) -> Result<TransientMountNamespace> {
    let (worker, namespace) = DisposableWorker::spawn("tempnet-mntns", || {
        unshare_private()?;
        NamespaceRef::thread_current(NamespaceKind::Mount)
    })?;
    let procfs_root = PathBuf::from(format!("/proc/{}/root", worker.tid()));
    tracing::debug!(
        tid = worker.tid(),
        ino = namespace.ino().ok(),
        "created transient mount namespace"
    );
    fixture.defer("transient mount namespace idler", move || worker.release());
    Ok(TransientMountNamespace {
        namespace,
        procfs_root,
    })
}

/// Runs `f` inside `mntns` on a disposable worker thread.
///
/// Panics inside `f` are propagated to the caller.
///
/// # Errors
///
/// Returns an error if `mntns` is not a mount namespace reference or the
/// worker cannot switch into it.
pub fn run_in<R: Send>(mntns: &NamespaceRef, f: impl FnOnce() -> R + Send) -> Result<R> {
    mntns.validate(NamespaceKind::Mount)?;
    run_disposable("tempnet-mntns-exec", || {
        unshare(CloneFlags::CLONE_FS).map_err(|e| TempnetError::NamespaceSwitch {
            message: format!("cannot unshare file attributes of transient execution thread: {e}"),
        })?;
        switch_into(mntns)?;
        Ok(f())
    })
}

/// Mounts a fresh read-only sysfs instance on `/sys`.
///
/// A sysfs mount reflects the network namespace of the mounting thread, so
/// this is how network interfaces of the current network namespace become
/// visible in `/sys/class/net`.
///
/// # Errors
///
/// Returns an error if the claimed thread is still in the process's original
/// mount namespace, which would overmount the host's `/sys`, or if mounting
/// fails.
pub fn mount_sysfs_ro(claim: &ThreadClaim) -> Result<()> {
    let own = current(claim)?.ino()?;
    let process = ino_of_path(constants::PROCESS_MNTNS_PATH)?;
    if own == process {
        return Err(TempnetError::InvalidNamespace {
            message: "current mount namespace must not be the process's original mount namespace"
                .into(),
        });
    }
    let flags = MsFlags::MS_RDONLY
        | MsFlags::MS_NODEV
        | MsFlags::MS_NOEXEC
        | MsFlags::MS_NOSUID
        | MsFlags::MS_RELATIME;
    mount(Some("none"), Path::new("/sys"), Some("sysfs"), flags, None::<&str>).map_err(|e| {
        TempnetError::Io {
            path: PathBuf::from("/sys"),
            source: e.into(),
        }
    })?;
    tracing::debug!("mounted read-only sysfs");
    Ok(())
}
