//! Transient dummy network interfaces.

use tempnet_common::constants::DUMMY_PREFIX;
use tempnet_common::error::Result;
use tempnet_core::{Fixture, NamespaceRef};

use crate::descriptor::{LinkDescriptor, LinkKind, LinkTemplate};
use crate::{engine, up};

/// Builder for a transient dummy interface.
#[derive(Debug, Clone, Default)]
pub struct Dummy {
    namespace: Option<NamespaceRef>,
}

impl Dummy {
    /// Creates a builder for a dummy interface in the current network
    /// namespace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the interface in the given network namespace instead.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.namespace = Some(netns);
        self
    }

    /// Creates the dummy interface; it is removed at fixture teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be created.
    pub fn create(self, fixture: &Fixture) -> Result<LinkDescriptor> {
        let mut link = LinkDescriptor::new(LinkKind::Dummy);
        link.namespace = self.namespace;
        engine::new_transient(fixture, &LinkTemplate::new(link), DUMMY_PREFIX)
    }

    /// Creates the dummy interface and brings it up.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be created or brought up.
    pub fn create_up(self, fixture: &Fixture) -> Result<LinkDescriptor> {
        let link = self.create(fixture)?;
        up::ensure_up(fixture, &link, None)?;
        Ok(link)
    }
}
