//! Creation of transient network interfaces.
//!
//! Three network namespaces are involved in creating an interface, and each
//! may differ from the others:
//!
//! - the namespace the calling thread is in;
//! - the namespace used to resolve cross references such as a MACVLAN
//!   parent index (the link namespace), as the kernel resolves those in the
//!   namespace of the netlink socket issuing the request;
//! - the namespace the new interface ends up in (the destination).
//!
//! The creation request thus goes through a session in the link namespace,
//! while lookups and teardown go through a session in the destination.

use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;
use tempnet_core::names::random_nifname;
use tempnet_core::namespace::network;
use tempnet_core::retry::retry_on_collision;
use tempnet_core::{Fixture, NamespaceRef, NetlinkSession};

use crate::descriptor::{LinkDescriptor, LinkKind, LinkTemplate};

/// Creates a transient network interface described by `template`, named
/// `prefix` followed by random characters, and registers its removal with
/// the fixture.
///
/// The template is left untouched; the returned descriptor carries the
/// assigned name and the index as seen in the destination namespace. For
/// veth pairs, the peer name is randomized as well and a single teardown
/// removes both ends.
///
/// # Errors
///
/// Returns an error if a namespace reference is not a network namespace
/// reference, if the kernel rejects the request for any reason other than a
/// name collision, if all attempts collide, or if the interface cannot be
/// found afterwards. Teardown is registered for any interface that was
/// created before the failure.
pub fn new_transient(
    fixture: &Fixture,
    template: &LinkTemplate,
    prefix: &str,
) -> Result<LinkDescriptor> {
    let (mut link, link_namespace) = template.clone().into_parts();
    if let Some(netns) = &link_namespace {
        netns.validate(NamespaceKind::Network)?;
    }
    link.validate()?;

    let claim = fixture.claim();
    // Without an explicit destination the interface would otherwise stay in
    // the link namespace.
    let destination = match (&link.namespace, &link_namespace) {
        (Some(netns), _) => Some(netns.clone()),
        (None, Some(_)) => Some(network::current(claim)?),
        (None, None) => None,
    };
    let creator = NetlinkSession::open(claim, link_namespace.as_ref())?;
    let resident = NetlinkSession::open(claim, destination.as_ref())?;

    let kind = link.describe_kind();
    retry_on_collision(fixture.config().max_attempts, &kind, |attempt| {
        link.name = random_nifname(prefix)?;
        if let LinkKind::Veth { peer_name, .. } = &mut link.kind {
            *peer_name = random_nifname(prefix)?;
        }
        tracing::debug!(name = %link.name, attempt, "creating transient network interface");
        creator
            .add_link(link.to_message(destination.as_ref())?)
            .map_err(|e| creation_error(&kind, &link.name, e))
    })?;
    creator.close();
    tracing::info!(name = %link.name, kind = link.kind.name(), "created transient network interface");

    let lookup = resident.link_by_name(&link.name);
    let index = lookup.as_ref().ok().map(|found| found.header.index);
    register_removal(fixture, resident, link.name.clone(), index);
    link.index = lookup?.header.index;
    Ok(link)
}

/// Wraps a failed creation request; collisions pass through unchanged so the
/// caller can retry.
fn creation_error(kind: &str, name: &str, e: TempnetError) -> TempnetError {
    if e.is_collision() {
        return e;
    }
    TempnetError::Create {
        kind: kind.to_string(),
        id: format!("{name:?}"),
        reason: e.to_string(),
    }
}

fn register_removal(
    fixture: &Fixture,
    session: NetlinkSession,
    name: String,
    index: Option<u32>,
) {
    fixture.defer(
        format!("transient network interface {name:?}"),
        move || {
            let index = match index {
                Some(index) => index,
                None => session.link_by_name(&name)?.header.index,
            };
            tracing::info!(name = %name, "removing transient network interface");
            let removed = session.delete_link(index);
            session.close();
            removed
        },
    );
}

/// Looks up `name` in `netns`, or in the current network namespace, and
/// returns the interface's index.
///
/// # Errors
///
/// Returns an error if the interface does not exist there.
pub fn index_in(fixture: &Fixture, netns: Option<&NamespaceRef>, name: &str) -> Result<u32> {
    let session = NetlinkSession::open(fixture.claim(), netns)?;
    Ok(session.link_by_name(name)?.header.index)
}
