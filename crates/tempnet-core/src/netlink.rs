//! RTNETLINK sessions bound to one network namespace.
//!
//! A netlink socket is tied to the network namespace of the thread that
//! created it, so a session opened for another namespace briefly switches the
//! claimed thread there, creates its socket, and switches back. All later
//! requests go to that namespace regardless of where the caller is.
//!
//! Each session owns a private current-thread tokio runtime; requests block
//! the calling thread until the kernel answers.

use std::os::fd::AsRawFd;

use futures::{StreamExt, TryStreamExt};
use netlink_packet_core::{NLM_F_ACK, NLM_F_REQUEST, NetlinkMessage, NetlinkPayload};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::{LinkAttribute, LinkMessage, State};
use netlink_packet_route::nsid::{NsidAttribute, NsidMessage};
use rtnetlink::{Handle, LinkUnspec};
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::OperState;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::namespace::{self, NamespaceRef};

/// Nsid reported for a peer namespace that has none assigned yet.
const NSID_NOT_ASSIGNED: i32 = -1;
use crate::thread::ThreadClaim;

/// Request/response connection to the kernel's routing netlink family,
/// scoped to one network namespace.
pub struct NetlinkSession {
    runtime: Runtime,
    handle: Handle,
    connection: JoinHandle<()>,
}

impl std::fmt::Debug for NetlinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSession")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl NetlinkSession {
    /// Opens a session scoped to `netns`, or to the claimed thread's current
    /// network namespace if `netns` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if `netns` is not a network namespace reference, if
    /// switching namespaces fails, or if the netlink socket cannot be created.
    pub fn open(claim: &ThreadClaim, netns: Option<&NamespaceRef>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(|e| TempnetError::Netlink {
                operation: "open session".into(),
                message: format!("cannot build runtime: {e}"),
                errno: e.raw_os_error(),
            })?;

        let connect = || {
            let _entered = runtime.enter();
            rtnetlink::new_connection().map_err(|e| TempnetError::Netlink {
                operation: "open session".into(),
                message: e.to_string(),
                errno: e.raw_os_error(),
            })
        };
        let (connection, handle, _) = match netns {
            Some(netns) => namespace::network::run_in(claim, netns, connect)??,
            None => connect()?,
        };
        let connection = runtime.spawn(connection);
        tracing::trace!(scoped = netns.is_some(), "netlink session opened");
        Ok(Self {
            runtime,
            handle,
            connection,
        })
    }

    /// Closes the session and its socket.
    pub fn close(self) {
        drop(self);
    }

    /// Creates a link from a fully populated link message.
    ///
    /// # Errors
    ///
    /// Returns a [`TempnetError::Netlink`] carrying the kernel's errno on
    /// failure, such as `EEXIST` if the name is already taken.
    pub fn add_link(&self, message: LinkMessage) -> Result<()> {
        self.runtime
            .block_on(self.handle.link().add(message).execute())
            .map_err(|e| map_error("create link", e))
    }

    /// Looks up a link by name.
    ///
    /// # Errors
    ///
    /// Returns [`TempnetError::NotFound`] if no such link exists in the
    /// session's namespace.
    pub fn link_by_name(&self, name: &str) -> Result<LinkMessage> {
        let found = self.runtime.block_on(async {
            let mut links = self
                .handle
                .link()
                .get()
                .match_name(name.to_string())
                .execute();
            links.try_next().await
        });
        match found {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(link_not_found(name)),
            Err(e) => {
                let e = map_error("get link", e);
                if is_missing(&e) {
                    Err(link_not_found(name))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Looks up a link by index.
    ///
    /// # Errors
    ///
    /// Returns [`TempnetError::NotFound`] if no such link exists in the
    /// session's namespace.
    pub fn link_by_index(&self, index: u32) -> Result<LinkMessage> {
        let found = self.runtime.block_on(async {
            let mut links = self.handle.link().get().match_index(index).execute();
            links.try_next().await
        });
        match found {
            Ok(Some(link)) => Ok(link),
            Ok(None) => Err(link_not_found(index)),
            Err(e) => {
                let e = map_error("get link", e);
                if is_missing(&e) {
                    Err(link_not_found(index))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Lists all links of the session's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump fails.
    pub fn links(&self) -> Result<Vec<LinkMessage>> {
        self.runtime
            .block_on(self.handle.link().get().execute().try_collect::<Vec<_>>())
            .map_err(|e| map_error("list links", e))
    }

    /// Deletes the link with the given index.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be deleted.
    pub fn delete_link(&self, index: u32) -> Result<()> {
        self.runtime
            .block_on(self.handle.link().del(index).execute())
            .map_err(|e| map_error("delete link", e))
    }

    /// Renames the link with the given index.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be renamed; `EEXIST` signals a
    /// name collision.
    pub fn rename_link(&self, index: u32, name: &str) -> Result<()> {
        let mut message = LinkUnspec::new_with_index(index).build();
        message
            .attributes
            .push(LinkAttribute::IfName(name.to_string()));
        self.runtime
            .block_on(self.handle.link().set(message).execute())
            .map_err(|e| map_error("rename link", e))
    }

    /// Sets the administrative state of the link with the given index to up.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot be changed.
    pub fn set_up(&self, index: u32) -> Result<()> {
        self.runtime
            .block_on(
                self.handle
                    .link()
                    .set(LinkUnspec::new_with_index(index).up().build())
                    .execute(),
            )
            .map_err(|e| map_error("set link up", e))
    }
}

impl NetlinkSession {
    /// Returns the nsid under which the session's namespace knows `netns`,
    /// or `None` if none has been assigned yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub fn ns_id(&self, netns: &NamespaceRef) -> Result<Option<i32>> {
        let mut message = NsidMessage::default();
        message.attributes.push(NsidAttribute::Fd(nsid_fd(netns)?));
        let replies = self.request(
            RouteNetlinkMessage::GetNsId(message),
            NLM_F_REQUEST,
            "get nsid",
        )?;
        let id = replies.iter().find_map(|reply| match reply {
            RouteNetlinkMessage::NewNsId(nsid) => {
                nsid.attributes.iter().find_map(|attr| match attr {
                    NsidAttribute::Id(id) => Some(*id),
                    _ => None,
                })
            }
            _ => None,
        });
        Ok(id.filter(|&id| id != NSID_NOT_ASSIGNED))
    }

    /// Assigns `id` as the nsid of `netns` in the session's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails; `EEXIST` signals that the id
    /// is taken or `netns` already has one.
    pub fn set_ns_id(&self, netns: &NamespaceRef, id: i32) -> Result<()> {
        let mut message = NsidMessage::default();
        message.attributes.push(NsidAttribute::Fd(nsid_fd(netns)?));
        message.attributes.push(NsidAttribute::Id(id));
        self.request(
            RouteNetlinkMessage::NewNsId(message),
            NLM_F_REQUEST | NLM_F_ACK,
            "set nsid",
        )
        .map(drop)
    }

    /// Sends a raw request and collects its replies, turning error replies
    /// into errors.
    fn request(
        &self,
        message: RouteNetlinkMessage,
        flags: u16,
        operation: &str,
    ) -> Result<Vec<RouteNetlinkMessage>> {
        let mut request = NetlinkMessage::from(message);
        request.header.flags = flags;
        let mut handle = self.handle.clone();
        self.runtime.block_on(async {
            let mut responses = handle
                .request(request)
                .map_err(|e| map_error(operation, e))?;
            let mut replies = Vec::new();
            while let Some(response) = responses.next().await {
                match response.payload {
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    NetlinkPayload::Error(e) => {
                        // an acknowledgement carries error code zero
                        let errno = e.to_io().raw_os_error();
                        if errno.is_some_and(|n| n != 0) {
                            return Err(TempnetError::Netlink {
                                operation: operation.to_string(),
                                message: e.to_string(),
                                errno,
                            });
                        }
                    }
                    _ => {}
                }
            }
            Ok(replies)
        })
    }
}

fn nsid_fd(netns: &NamespaceRef) -> Result<u32> {
    u32::try_from(netns.as_raw_fd()).map_err(|_| TempnetError::InvalidNamespace {
        message: "namespace reference has no valid file descriptor".into(),
    })
}

impl Drop for NetlinkSession {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

/// Returns the interface name carried by a link message.
#[must_use]
pub fn link_name(message: &LinkMessage) -> Option<&str> {
    message.attributes.iter().find_map(|attr| match attr {
        LinkAttribute::IfName(name) => Some(name.as_str()),
        _ => None,
    })
}

/// Returns the operational state carried by a link message.
#[must_use]
pub fn link_oper_state(message: &LinkMessage) -> OperState {
    message
        .attributes
        .iter()
        .find_map(|attr| match attr {
            LinkAttribute::OperState(state) => Some(match state {
                State::NotPresent => OperState::NotPresent,
                State::Down => OperState::Down,
                State::LowerLayerDown => OperState::LowerLayerDown,
                State::Testing => OperState::Testing,
                State::Dormant => OperState::Dormant,
                State::Up => OperState::Up,
                _ => OperState::Unknown,
            }),
            _ => None,
        })
        .unwrap_or(OperState::Unknown)
}

fn link_not_found(id: impl ToString) -> TempnetError {
    TempnetError::NotFound {
        kind: "network interface",
        id: id.to_string(),
    }
}

fn is_missing(e: &TempnetError) -> bool {
    e.errno() == Some(libc::ENODEV)
}

fn map_error(operation: &str, e: rtnetlink::Error) -> TempnetError {
    let errno = match &e {
        rtnetlink::Error::NetlinkError(msg) => msg.to_io().raw_os_error(),
        _ => None,
    };
    TempnetError::Netlink {
        operation: operation.to_string(),
        message: e.to_string(),
        errno,
    }
}
