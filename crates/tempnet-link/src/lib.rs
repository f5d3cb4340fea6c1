//! # tempnet-link
//!
//! Transient network interfaces for tests.
//!
//! Every interface created here is registered with a [`Fixture`] and removed
//! when the fixture tears down, no matter how the test ends. Creation takes
//! care of the network namespaces involved: where the calling thread is,
//! where cross references such as a MACVLAN parent are resolved, and where
//! the interface finally lives.
//!
//! - [`engine::new_transient`] creates any [`LinkDescriptor`] under a
//!   random, prefixed name.
//! - [`Dummy`], [`Macvlan`], and [`Veth`] build the common kinds.
//! - [`netdevsim::Netdevsim`] creates simulated hardware with multiple
//!   ports, and [`netdevsim::peer`] wires ports together.
//! - [`up::ensure_up`] waits for an interface to become operational.
//!
//! [`Fixture`]: tempnet_core::Fixture

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod descriptor;
pub mod dummy;
pub mod engine;
pub mod macvlan;
pub mod netdevsim;
pub mod up;
pub mod veth;

pub use descriptor::{LinkDescriptor, LinkKind, LinkTemplate, MacvlanMode};
pub use dummy::Dummy;
pub use macvlan::Macvlan;
pub use veth::Veth;
