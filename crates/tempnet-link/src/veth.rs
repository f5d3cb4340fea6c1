//! Transient veth pairs.

use tempnet_common::constants::VETH_PREFIX;
use tempnet_common::error::{Result, TempnetError};
use tempnet_core::{Fixture, NamespaceRef};

use crate::descriptor::{LinkDescriptor, LinkKind, LinkTemplate};
use crate::engine;

/// Builder for a transient veth pair.
#[derive(Debug, Clone, Default)]
pub struct Veth {
    namespace: Option<NamespaceRef>,
    peer_namespace: Option<NamespaceRef>,
}

impl Veth {
    /// Creates a builder for a veth pair with both ends in the current
    /// network namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the first end into the given network namespace.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.namespace = Some(netns);
        self
    }

    /// Places the peer end into the given network namespace.
    #[must_use]
    pub fn peer_namespace(mut self, netns: NamespaceRef) -> Self {
        self.peer_namespace = Some(netns);
        self
    }

    /// Creates the pair and returns both ends, first end first.
    ///
    /// Removing either end removes the pair, so only one teardown is
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair cannot be created or the peer end
    /// cannot be found afterwards.
    pub fn create(self, fixture: &Fixture) -> Result<(LinkDescriptor, LinkDescriptor)> {
        let mut link = LinkDescriptor::new(LinkKind::Veth {
            peer_name: String::new(),
            peer_namespace: self.peer_namespace,
        });
        link.namespace = self.namespace;
        let first = engine::new_transient(fixture, &LinkTemplate::new(link), VETH_PREFIX)?;

        let LinkKind::Veth {
            peer_name,
            peer_namespace,
        } = &first.kind
        else {
            return Err(TempnetError::Config {
                message: format!("expected a veth end, got {}", first.describe_kind()),
            });
        };
        let mut peer = LinkDescriptor::new(LinkKind::Veth {
            peer_name: first.name.clone(),
            peer_namespace: first.namespace.clone(),
        });
        peer.name.clone_from(peer_name);
        peer.namespace.clone_from(peer_namespace);
        peer.index = engine::index_in(fixture, peer.namespace.as_ref(), &peer.name)?;
        tracing::debug!(first = %first.name, peer = %peer.name, "veth pair ready");
        Ok((first, peer))
    }
}
