//! # tempnet-core
//!
//! Low-level building blocks for transient Linux test fixtures.
//!
//! This crate provides:
//! - **Thread claims**: an exclusive, non-`Send` token for the OS thread whose
//!   namespace membership is about to change, and disposable worker threads
//!   for irreversible attribute changes.
//! - **Namespaces**: network and mount namespace references, detached
//!   creation, transient entering, and scoped execution.
//! - **Netlink sessions**: RTNETLINK connections bound to one network
//!   namespace.
//! - **Names**: collision-resistant interface names and lowest-free IDs,
//!   plus the bounded retry loop driven by name collisions.
//! - **Fixtures**: the teardown registry that removes everything created
//!   during a test.
//!
//! Namespace membership is a per-thread attribute on Linux, so every call
//! that switches namespaces takes a [`thread::ThreadClaim`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod fixture;
pub mod names;
pub mod namespace;
pub mod netlink;
pub mod retry;
pub mod thread;

pub use fixture::Fixture;
pub use namespace::NamespaceRef;
pub use netlink::NetlinkSession;
pub use thread::ThreadClaim;
