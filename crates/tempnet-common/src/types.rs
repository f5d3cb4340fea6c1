//! Domain primitive types used across the tempnet workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a kernel namespace that tempnet knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// Network namespace (`CLONE_NEWNET`).
    Network,
    /// Mount namespace (`CLONE_NEWNS`).
    Mount,
}

impl NamespaceKind {
    /// Returns the `clone(2)` flag value identifying this namespace type.
    #[must_use]
    pub const fn clone_flag(self) -> i32 {
        match self {
            Self::Network => libc::CLONE_NEWNET,
            Self::Mount => libc::CLONE_NEWNS,
        }
    }

    /// Returns the procfs reference to the calling thread's namespace of
    /// this kind.
    #[must_use]
    pub const fn thread_path(self) -> &'static str {
        match self {
            Self::Network => crate::constants::THREAD_NETNS_PATH,
            Self::Mount => crate::constants::THREAD_MNTNS_PATH,
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Mount => write!(f, "mount"),
        }
    }
}

/// Operational state of a network interface (RFC 2863).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperState {
    /// State cannot be determined.
    Unknown,
    /// Interface is not present.
    NotPresent,
    /// Interface is down.
    Down,
    /// A lower layer interface is down.
    LowerLayerDown,
    /// Interface is in testing mode.
    Testing,
    /// Interface is waiting for an external event.
    Dormant,
    /// Interface is up.
    Up,
}

impl OperState {
    /// Reports whether the interface counts as ready to pass traffic.
    ///
    /// Virtual interfaces frequently never leave `Unknown`, so `Unknown` is
    /// accepted as equivalent to `Up`.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Up | Self::Unknown)
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::NotPresent => "notpresent",
            Self::Down => "down",
            Self::LowerLayerDown => "lowerlayerdown",
            Self::Testing => "testing",
            Self::Dormant => "dormant",
            Self::Up => "up",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_counts_as_ready() {
        assert!(OperState::Up.is_ready());
        assert!(OperState::Unknown.is_ready());
        assert!(!OperState::Down.is_ready());
        assert!(!OperState::LowerLayerDown.is_ready());
    }

    #[test]
    fn namespace_kind_maps_to_clone_flags() {
        assert_eq!(NamespaceKind::Network.clone_flag(), libc::CLONE_NEWNET);
        assert_eq!(NamespaceKind::Mount.clone_flag(), libc::CLONE_NEWNS);
        assert_eq!(NamespaceKind::Mount.thread_path(), "/proc/thread-self/ns/mnt");
    }
}
