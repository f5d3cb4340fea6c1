//! Link descriptors: what to create, and what was created.

use std::os::fd::AsRawFd;

use netlink_packet_route::link::{
    InfoData, InfoKind, InfoMacVlan, InfoVeth, LinkAttribute, LinkInfo, LinkMessage, MacVlanMode,
};
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;
use tempnet_core::NamespaceRef;

/// Forwarding mode of a MACVLAN interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacvlanMode {
    /// No communication with other MACVLAN interfaces on the same parent.
    Private,
    /// Traffic to other MACVLAN interfaces goes through the adjacent switch.
    Vepa,
    /// MACVLAN interfaces on the same parent talk to each other directly.
    #[default]
    Bridge,
    /// A single MACVLAN interface takes over the parent.
    Passthrough,
    /// Only traffic from an allow-list of source MACs is accepted.
    Source,
}

impl From<MacvlanMode> for MacVlanMode {
    fn from(mode: MacvlanMode) -> Self {
        match mode {
            MacvlanMode::Private => Self::Private,
            MacvlanMode::Vepa => Self::Vepa,
            MacvlanMode::Bridge => Self::Bridge,
            MacvlanMode::Passthrough => Self::Passthrough,
            MacvlanMode::Source => Self::Source,
        }
    }
}

/// Kind of a network interface together with its kind-specific attributes.
#[derive(Debug, Clone)]
pub enum LinkKind {
    /// A dummy interface.
    Dummy,
    /// A MACVLAN interface on top of the parent with the given index.
    Macvlan {
        /// Index of the parent interface, resolved in the creating namespace.
        parent_index: u32,
        /// Forwarding mode.
        mode: MacvlanMode,
    },
    /// One end of a veth pair.
    Veth {
        /// Name of the other end.
        peer_name: String,
        /// Network namespace the other end lives in, if not the creating one.
        peer_namespace: Option<NamespaceRef>,
    },
    /// A (virtual) hardware interface, such as a netdevsim port.
    Device,
}

impl LinkKind {
    /// Returns the kernel's name for this kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::Macvlan { .. } => "macvlan",
            Self::Veth { .. } => "veth",
            Self::Device => "device",
        }
    }
}

/// Describes a network interface.
///
/// Before creation, `name` and `index` are filled in by the engine; after
/// creation they identify the interface inside `namespace`.
#[derive(Debug, Clone)]
pub struct LinkDescriptor {
    /// Interface name.
    pub name: String,
    /// Interface index; zero if not known.
    pub index: u32,
    /// Network namespace the interface lives in, or `None` for the current
    /// network namespace.
    pub namespace: Option<NamespaceRef>,
    /// Kind and kind-specific attributes.
    pub kind: LinkKind,
}

impl LinkDescriptor {
    /// Creates a descriptor of the given kind, not yet named.
    #[must_use]
    pub const fn new(kind: LinkKind) -> Self {
        Self {
            name: String::new(),
            index: 0,
            namespace: None,
            kind,
        }
    }

    /// Places the interface into the given network namespace.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.namespace = Some(netns);
        self
    }

    /// Returns a human-readable description of the kind, used in messages.
    #[must_use]
    pub fn describe_kind(&self) -> String {
        format!("network interface of type {:?}", self.kind.name())
    }

    /// Checks all namespace references carried by this descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`TempnetError::InvalidNamespace`] if any of them is not a
    /// network namespace reference.
    pub fn validate(&self) -> Result<()> {
        if let Some(netns) = &self.namespace {
            netns.validate(NamespaceKind::Network)?;
        }
        if let LinkKind::Veth {
            peer_namespace: Some(netns),
            ..
        } = &self.kind
        {
            netns.validate(NamespaceKind::Network)?;
        }
        Ok(())
    }

    /// Builds the RTNETLINK message creating this interface inside
    /// `destination`.
    ///
    /// The message borrows the raw descriptors of the namespace references;
    /// it must be sent while they are still open.
    pub(crate) fn to_message(&self, destination: Option<&NamespaceRef>) -> Result<LinkMessage> {
        let mut message = LinkMessage::default();
        message
            .attributes
            .push(LinkAttribute::IfName(self.name.clone()));
        if let Some(netns) = destination {
            message
                .attributes
                .push(LinkAttribute::NetNsFd(netns.as_raw_fd()));
        }
        let info = match &self.kind {
            LinkKind::Dummy => vec![LinkInfo::Kind(InfoKind::Dummy)],
            LinkKind::Macvlan { parent_index, mode } => {
                message.attributes.push(LinkAttribute::Link(*parent_index));
                vec![
                    LinkInfo::Kind(InfoKind::MacVlan),
                    LinkInfo::Data(InfoData::MacVlan(vec![InfoMacVlan::Mode((*mode).into())])),
                ]
            }
            LinkKind::Veth {
                peer_name,
                peer_namespace,
            } => {
                let mut peer = LinkMessage::default();
                peer.attributes
                    .push(LinkAttribute::IfName(peer_name.clone()));
                if let Some(netns) = peer_namespace {
                    peer.attributes
                        .push(LinkAttribute::NetNsFd(netns.as_raw_fd()));
                }
                vec![
                    LinkInfo::Kind(InfoKind::Veth),
                    LinkInfo::Data(InfoData::Veth(InfoVeth::Peer(peer))),
                ]
            }
            LinkKind::Device => {
                return Err(TempnetError::Config {
                    message: format!(
                        "cannot create {}: hardware interfaces have no link kind",
                        self.describe_kind()
                    ),
                });
            }
        };
        message.attributes.push(LinkAttribute::LinkInfo(info));
        Ok(message)
    }
}

/// A link descriptor to be created, optionally annotated with the network
/// namespace used to resolve cross references such as a parent interface
/// index.
///
/// The annotation only matters during creation and is not part of the
/// returned descriptor.
#[derive(Debug, Clone)]
pub struct LinkTemplate {
    link: LinkDescriptor,
    link_namespace: Option<NamespaceRef>,
}

impl LinkTemplate {
    /// Wraps a descriptor without a resolution namespace.
    #[must_use]
    pub const fn new(link: LinkDescriptor) -> Self {
        Self {
            link,
            link_namespace: None,
        }
    }

    /// Resolves cross references in the given network namespace instead of
    /// the current one.
    #[must_use]
    pub fn with_link_namespace(mut self, netns: NamespaceRef) -> Self {
        self.link_namespace = Some(netns);
        self
    }

    /// Places the created interface into the given network namespace.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.link.namespace = Some(netns);
        self
    }

    /// Returns the wrapped descriptor.
    #[must_use]
    pub const fn link(&self) -> &LinkDescriptor {
        &self.link
    }

    /// Returns the resolution namespace annotation.
    #[must_use]
    pub const fn link_namespace(&self) -> Option<&NamespaceRef> {
        self.link_namespace.as_ref()
    }

    /// Separates the descriptor from its resolution namespace annotation.
    #[must_use]
    pub fn into_parts(self) -> (LinkDescriptor, Option<NamespaceRef>) {
        (self.link, self.link_namespace)
    }
}

impl From<LinkDescriptor> for LinkTemplate {
    fn from(link: LinkDescriptor) -> Self {
        Self::new(link)
    }
}
