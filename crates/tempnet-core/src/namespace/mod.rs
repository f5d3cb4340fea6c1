//! Namespace references and thread namespace switching.
//!
//! A [`NamespaceRef`] is an open file referring to a namespace, typically
//! obtained from `/proc/thread-self/ns/*`. Switching the calling thread into
//! another namespace goes through a [`NamespaceGuard`], which switches back
//! when restored or dropped.

pub mod mount;
pub mod network;

use std::fs::File;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use nix::sched::{CloneFlags, setns};
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;

use crate::thread::ThreadClaim;

mod ioctl {
    // NS_GET_NSTYPE, see ioctl_ns(2)
    nix::ioctl_none!(ns_get_nstype, 0xb7, 0x3);
}

/// Reference to a kernel namespace.
///
/// Clones share the same open file, which is closed when the last clone is
/// dropped. Use [`NamespaceRef::duplicate`] to obtain an independently owned
/// file descriptor.
#[derive(Debug, Clone)]
pub struct NamespaceRef {
    file: Arc<File>,
    kind: NamespaceKind,
}

impl NamespaceRef {
    /// Opens a namespace reference from a path such as `/proc/<pid>/ns/net`.
    ///
    /// The reference is not validated; see [`NamespaceRef::validate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be opened.
    pub fn open(path: impl AsRef<Path>, kind: NamespaceKind) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TempnetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            file: Arc::new(file),
            kind,
        })
    }

    /// Wraps an already open file descriptor, claiming it refers to a
    /// namespace of the given kind.
    #[must_use]
    pub fn from_owned_fd(fd: OwnedFd, kind: NamespaceKind) -> Self {
        Self {
            file: Arc::new(File::from(fd)),
            kind,
        }
    }

    /// Opens a reference to the calling thread's namespace of `kind`.
    pub(crate) fn thread_current(kind: NamespaceKind) -> Result<Self> {
        Self::open(kind.thread_path(), kind)
    }

    /// Returns the declared namespace kind.
    #[must_use]
    pub const fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Duplicates the underlying file descriptor into an independent
    /// reference owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if `dup(2)` fails.
    pub fn duplicate(&self) -> Result<Self> {
        let file = self.file.try_clone().map_err(|e| TempnetError::InvalidNamespace {
            message: format!("cannot duplicate {} namespace reference: {e}", self.kind),
        })?;
        Ok(Self {
            file: Arc::new(file),
            kind: self.kind,
        })
    }

    /// Returns the inode number identifying the referenced namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference cannot be stat'ed.
    pub fn ino(&self) -> Result<u64> {
        self.metadata().map(|m| m.ino())
    }

    /// Reports whether both references denote the same namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if either reference cannot be stat'ed.
    pub fn same_as(&self, other: &Self) -> Result<bool> {
        let (a, b) = (self.metadata()?, other.metadata()?);
        Ok(self.kind == other.kind && a.dev() == b.dev() && a.ino() == b.ino())
    }

    /// Checks that this reference is of the expected kind and that the
    /// kernel agrees the file refers to such a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the declared kind differs or the file is not a
    /// namespace reference of that kind.
    pub fn validate(&self, expected: NamespaceKind) -> Result<()> {
        if self.kind != expected {
            return Err(TempnetError::InvalidNamespace {
                message: format!(
                    "expected a {expected} namespace reference, got a {} namespace reference",
                    self.kind
                ),
            });
        }
        // SAFETY: the fd is owned by self.file and stays open for the call;
        // NS_GET_NSTYPE takes no argument and does not write to memory.
        let nstype = unsafe { ioctl::ns_get_nstype(self.file.as_raw_fd()) }.map_err(|e| {
            TempnetError::InvalidNamespace {
                message: format!(
                    "fd {} is not a namespace reference: {e}",
                    self.file.as_raw_fd()
                ),
            }
        })?;
        if nstype != expected.clone_flag() {
            return Err(TempnetError::InvalidNamespace {
                message: format!(
                    "fd {} does not refer to a {expected} namespace",
                    self.file.as_raw_fd()
                ),
            });
        }
        Ok(())
    }

    fn metadata(&self) -> Result<std::fs::Metadata> {
        self.file
            .metadata()
            .map_err(|e| TempnetError::InvalidNamespace {
                message: format!("cannot stat {} namespace reference: {e}", self.kind),
            })
    }
}

impl AsFd for NamespaceRef {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for NamespaceRef {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Returns the inode number of the namespace referenced by `path`.
///
/// # Errors
///
/// Returns an error if the path cannot be stat'ed.
pub fn ino_of_path(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    std::fs::metadata(path)
        .map(|m| m.ino())
        .map_err(|e| TempnetError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Switches the calling thread into `target`.
pub(crate) fn switch_into(target: &NamespaceRef) -> Result<()> {
    setns(
        target.as_fd(),
        CloneFlags::from_bits_truncate(target.kind().clone_flag()),
    )
    .map_err(|e| TempnetError::NamespaceSwitch {
        message: format!("cannot switch into {} namespace: {e}", target.kind()),
    })?;
    tracing::trace!(kind = %target.kind(), "switched namespace");
    Ok(())
}

/// Keeps track of the namespace a thread has to return to.
///
/// Restoring happens either explicitly through [`NamespaceGuard::restore`],
/// which reports failures, or implicitly on drop. A failed restore taints the
/// claimed thread; on drop it additionally fails the current test unless the
/// thread is already unwinding.
#[derive(Debug)]
#[must_use = "dropping the guard switches back immediately"]
pub struct NamespaceGuard<'c> {
    claim: &'c ThreadClaim,
    original: Option<NamespaceRef>,
}

impl<'c> NamespaceGuard<'c> {
    /// Switches the claimed thread into `target`, remembering where it came from.
    pub(crate) fn enter(claim: &'c ThreadClaim, target: &NamespaceRef) -> Result<Self> {
        let original = NamespaceRef::thread_current(target.kind())?;
        switch_into(target)?;
        Ok(Self {
            claim,
            original: Some(original),
        })
    }

    /// Creates a guard for a thread that already left `original` by other
    /// means, such as `unshare(2)`.
    pub(crate) fn returning_to(claim: &'c ThreadClaim, original: NamespaceRef) -> Self {
        Self {
            claim,
            original: Some(original),
        }
    }

    /// Switches back into the original namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if switching back fails; the thread is tainted then.
    pub fn restore(mut self) -> Result<()> {
        self.switch_back()
    }

    fn switch_back(&mut self) -> Result<()> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        switch_into(&original)
            .inspect_err(|_| self.claim.taint("cannot restore original namespace"))
    }
}

impl Drop for NamespaceGuard<'_> {
    #[allow(clippy::panic)]
    fn drop(&mut self) {
        if let Err(e) = self.switch_back() {
            tracing::error!(error = %e, "cannot restore original namespace");
            if !std::thread::panicking() {
                panic!("cannot restore original namespace, reason: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_reference_has_declared_kind_and_inode() {
        let netns = NamespaceRef::thread_current(NamespaceKind::Network).expect("open");
        assert_eq!(netns.kind(), NamespaceKind::Network);
        assert_eq!(
            netns.ino().expect("ino"),
            ino_of_path("/proc/thread-self/ns/net").expect("ino")
        );
        netns.validate(NamespaceKind::Network).expect("valid");
    }

    #[test]
    fn duplicates_refer_to_the_same_namespace() {
        let netns = NamespaceRef::thread_current(NamespaceKind::Network).expect("open");
        let dup = netns.duplicate().expect("dup");
        assert_ne!(dup.as_raw_fd(), netns.as_raw_fd());
        assert!(dup.same_as(&netns).expect("compare"));
    }

    #[test]
    fn clones_share_the_file() {
        let netns = NamespaceRef::thread_current(NamespaceKind::Network).expect("open");
        let clone = netns.clone();
        assert_eq!(clone.as_raw_fd(), netns.as_raw_fd());
    }

    #[test]
    fn wrong_declared_kind_is_rejected() {
        let mntns = NamespaceRef::thread_current(NamespaceKind::Mount).expect("open");
        let err = mntns
            .validate(NamespaceKind::Network)
            .expect_err("should reject");
        assert!(matches!(err, TempnetError::InvalidNamespace { .. }));
    }

    #[test]
    fn mislabeled_namespace_is_rejected_by_the_kernel() {
        let file = File::open(NamespaceKind::Mount.thread_path()).expect("open");
        let mislabeled = NamespaceRef::from_owned_fd(file.into(), NamespaceKind::Network);
        assert!(mislabeled.validate(NamespaceKind::Network).is_err());
    }

    #[test]
    fn regular_file_is_not_a_namespace() {
        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let bogus = NamespaceRef::open(tmp.path(), NamespaceKind::Network).expect("open");
        let err = bogus
            .validate(NamespaceKind::Network)
            .expect_err("should reject");
        assert!(err.to_string().contains("not a namespace reference"));
    }
}
