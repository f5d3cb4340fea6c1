//! Test fixture owning the teardown of every transient object it created.

use std::cell::RefCell;
use std::rc::Rc;

use tempnet_common::config::TempnetConfig;
use tempnet_common::error::{Result, TempnetError};

use crate::namespace::NamespaceRef;
use crate::netlink::NetlinkSession;
use crate::thread::ThreadClaim;

type TeardownAction = Box<dyn FnOnce() -> Result<()>>;

/// Claim on the current thread plus a registry of teardown actions.
///
/// Teardown actions run in reverse registration order, either explicitly via
/// [`Fixture::teardown`] or when the fixture is dropped. A fixture is bound
/// to the thread it was created on.
pub struct Fixture {
    claim: ThreadClaim,
    config: TempnetConfig,
    actions: RefCell<Vec<(String, TeardownAction)>>,
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("claim", &self.claim)
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Fixture {
    /// Creates a fixture with the configuration taken from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the current thread is already claimed or the
    /// environment holds invalid overrides.
    pub fn new() -> Result<Self> {
        Self::with_config(TempnetConfig::from_env()?)
    }

    /// Creates a fixture with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the current thread
    /// is already claimed.
    pub fn with_config(config: TempnetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            claim: ThreadClaim::acquire()?,
            config,
            actions: RefCell::new(Vec::new()),
        })
    }

    /// Returns the claim on the fixture's thread.
    #[must_use]
    pub const fn claim(&self) -> &ThreadClaim {
        &self.claim
    }

    /// Returns the fixture's configuration.
    #[must_use]
    pub const fn config(&self) -> &TempnetConfig {
        &self.config
    }

    /// Opens a netlink session scoped to `netns`, or to the current network
    /// namespace, that the fixture releases at teardown.
    ///
    /// The socket closes once teardown ran and all returned handles are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened.
    pub fn netlink_session(&self, netns: Option<&NamespaceRef>) -> Result<Rc<NetlinkSession>> {
        let session = Rc::new(NetlinkSession::open(&self.claim, netns)?);
        let held = Rc::clone(&session);
        self.defer("netlink session", move || {
            drop(held);
            Ok(())
        });
        Ok(session)
    }

    /// Registers an action to run at teardown.
    pub fn defer(&self, label: impl Into<String>, action: impl FnOnce() -> Result<()> + 'static) {
        let label = label.into();
        tracing::trace!(label = %label, "teardown registered");
        self.actions.borrow_mut().push((label, Box::new(action)));
    }

    /// Returns the number of teardown actions not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.actions.borrow().len()
    }

    /// Runs all pending teardown actions, most recent first.
    ///
    /// All actions run even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first failure as a [`TempnetError::Teardown`].
    pub fn teardown(&self) -> Result<()> {
        let mut first_failure = None;
        loop {
            // release the borrow before running, actions may register more
            let next = self.actions.borrow_mut().pop();
            let Some((label, action)) = next else {
                break;
            };
            tracing::debug!(label = %label, "tearing down");
            if let Err(e) = action() {
                tracing::error!(label = %label, error = %e, "teardown failed");
                if first_failure.is_none() {
                    first_failure = Some(TempnetError::Teardown {
                        label,
                        message: e.to_string(),
                    });
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

impl Drop for Fixture {
    #[allow(clippy::panic)]
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            if !std::thread::panicking() {
                panic!("{e}");
            }
        }
    }
}
