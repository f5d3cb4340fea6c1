//! Bringing interfaces up and waiting for them to become operational.

use std::time::{Duration, Instant};

use tempnet_common::error::{Result, TempnetError};
use tempnet_core::netlink::link_oper_state;
use tempnet_core::{Fixture, NetlinkSession};

use crate::descriptor::LinkDescriptor;

/// Sets `link` administratively up and waits until it is operational.
///
/// An operational state of "unknown" counts as up: many virtual interfaces
/// never report anything else. Waits at most `within`, or the configured
/// default if `None`.
///
/// # Errors
///
/// Returns an error if the interface cannot be found or set up, or a
/// [`TempnetError::Timeout`] if it does not become operational in time.
pub fn ensure_up(fixture: &Fixture, link: &LinkDescriptor, within: Option<Duration>) -> Result<()> {
    let config = fixture.config();
    let within = within.unwrap_or(config.up_timeout);
    let session = NetlinkSession::open(fixture.claim(), link.namespace.as_ref())?;
    let index = if link.index == 0 {
        session.link_by_name(&link.name)?.header.index
    } else {
        link.index
    };
    session.set_up(index)?;

    let deadline = Instant::now() + within;
    loop {
        let state = link_oper_state(&session.link_by_index(index)?);
        if state.is_ready() {
            tracing::debug!(name = %link.name, %state, "interface is operational");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TempnetError::Timeout {
                what: format!("network interface {:?} to become operational, last state {state}", link.name),
                after: within,
            });
        }
        std::thread::sleep(config.up_probe);
    }
}
