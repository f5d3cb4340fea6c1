//! Transient MACVLAN network interfaces.

use netlink_packet_route::link::{LinkAttribute, LinkInfo, LinkMessage};
use tempnet_common::constants::MACVLAN_PREFIX;
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::OperState;
use tempnet_core::netlink::{link_name, link_oper_state};
use tempnet_core::{Fixture, NamespaceRef, NetlinkSession};

use crate::descriptor::{LinkDescriptor, LinkKind, LinkTemplate, MacvlanMode};
use crate::engine;

/// Builder for a transient MACVLAN interface.
#[derive(Debug, Clone)]
pub struct Macvlan {
    parent_index: u32,
    mode: MacvlanMode,
    namespace: Option<NamespaceRef>,
    link_namespace: Option<NamespaceRef>,
}

impl Macvlan {
    /// Creates a builder for a bridge-mode MACVLAN on top of `parent`.
    ///
    /// The parent's index is resolved in the current network namespace
    /// unless [`Macvlan::link_namespace`] says otherwise.
    #[must_use]
    pub const fn new(parent: &LinkDescriptor) -> Self {
        Self {
            parent_index: parent.index,
            mode: MacvlanMode::Bridge,
            namespace: None,
            link_namespace: None,
        }
    }

    /// Sets the forwarding mode.
    #[must_use]
    pub const fn mode(mut self, mode: MacvlanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Creates the interface in the given network namespace.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.namespace = Some(netns);
        self
    }

    /// Resolves the parent index in the given network namespace.
    #[must_use]
    pub fn link_namespace(mut self, netns: NamespaceRef) -> Self {
        self.link_namespace = Some(netns);
        self
    }

    /// Creates the MACVLAN interface; it is removed at fixture teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface cannot be created.
    pub fn create(self, fixture: &Fixture) -> Result<LinkDescriptor> {
        let mut link = LinkDescriptor::new(LinkKind::Macvlan {
            parent_index: self.parent_index,
            mode: self.mode,
        });
        link.namespace = self.namespace;
        let mut template = LinkTemplate::new(link);
        if let Some(netns) = self.link_namespace {
            template = template.with_link_namespace(netns);
        }
        engine::new_transient(fixture, &template, MACVLAN_PREFIX)
    }
}

/// Returns the first hardware interface in the current network namespace
/// that is operationally up, skipping loopback.
///
/// # Errors
///
/// Returns [`TempnetError::NotFound`] if there is none.
pub fn locate_hw_parent(fixture: &Fixture) -> Result<LinkDescriptor> {
    let session = NetlinkSession::open(fixture.claim(), None)?;
    let parent = session
        .links()?
        .into_iter()
        .find(is_hw_parent_candidate)
        .ok_or_else(|| TempnetError::NotFound {
            kind: "hardware network interface in up state",
            id: "any".into(),
        })?;
    let mut link = LinkDescriptor::new(LinkKind::Device);
    link.name = link_name(&parent).unwrap_or_default().to_string();
    link.index = parent.header.index;
    Ok(link)
}

fn is_hw_parent_candidate(link: &LinkMessage) -> bool {
    let has_kind = link.attributes.iter().any(|attr| match attr {
        LinkAttribute::LinkInfo(info) => info.iter().any(|i| matches!(i, LinkInfo::Kind(_))),
        _ => false,
    });
    !has_kind && link_name(link) != Some("lo") && link_oper_state(link) == OperState::Up
}

#[cfg(test)]
mod tests {
    use netlink_packet_route::link::{InfoKind, State};

    use super::*;

    fn message(name: &str, state: State, kind: Option<InfoKind>) -> LinkMessage {
        let mut msg = LinkMessage::default();
        msg.attributes.push(LinkAttribute::IfName(name.into()));
        msg.attributes.push(LinkAttribute::OperState(state));
        if let Some(kind) = kind {
            msg.attributes
                .push(LinkAttribute::LinkInfo(vec![LinkInfo::Kind(kind)]));
        }
        msg
    }

    #[test]
    fn only_up_hardware_interfaces_qualify() {
        assert!(is_hw_parent_candidate(&message("eth0", State::Up, None)));
        assert!(!is_hw_parent_candidate(&message("eth1", State::Down, None)));
        assert!(!is_hw_parent_candidate(&message("lo", State::Up, None)));
        assert!(!is_hw_parent_candidate(&message(
            "dumy-x",
            State::Up,
            Some(InfoKind::Dummy)
        )));
    }

    #[test]
    fn builder_defaults_to_bridge_mode() {
        let mut parent = LinkDescriptor::new(LinkKind::Device);
        parent.index = 7;
        let builder = Macvlan::new(&parent);
        assert_eq!(builder.parent_index, 7);
        assert_eq!(builder.mode, MacvlanMode::Bridge);
    }
}
