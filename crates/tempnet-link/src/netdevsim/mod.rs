//! Transient netdevsim devices.
//!
//! A netdevsim device is a simulated bus device created and deleted through
//! sysfs, exposing one network interface per port. Bus devices are not
//! namespaced, only their port interfaces are: these appear in the network
//! namespace of the thread writing the creation request and vanish together
//! with the device.

pub mod peer;
pub mod ports;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempnet_common::config::TempnetConfig;
use tempnet_common::constants::{NETDEVSIM_DEVICE_PREFIX, NETDEVSIM_PREFIX};
use tempnet_common::error::{Result, TempnetError};
use tempnet_common::types::NamespaceKind;
use tempnet_core::names::{lowest_unused, random_nifname};
use tempnet_core::namespace::network;
use tempnet_core::retry::retry_on_collision;
use tempnet_core::{Fixture, NamespaceRef, NetlinkSession};

use crate::descriptor::{LinkDescriptor, LinkKind};
use ports::{PortEntry, PortEnumerator, RtnlPortEnumerator, device_ports};

const KIND: &str = "netdevsim";

/// A created netdevsim device and its renamed port interfaces.
#[derive(Debug, Clone)]
pub struct NetdevsimDevice {
    /// Device ID on the netdevsim bus.
    pub id: u32,
    /// Port interfaces, port 0 first.
    pub ports: Vec<LinkDescriptor>,
}

/// Builder for a transient netdevsim device.
#[derive(Debug, Clone)]
pub struct Netdevsim {
    id: Option<u32>,
    ports: u32,
    queue_count: u32,
    max_vfs: u32,
    namespace: Option<NamespaceRef>,
}

impl Default for Netdevsim {
    fn default() -> Self {
        Self {
            id: None,
            ports: 1,
            queue_count: 1,
            max_vfs: 0,
            namespace: None,
        }
    }
}

impl Netdevsim {
    /// Creates a builder for a single-port device with the lowest free ID.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given device ID; creation fails if it is taken.
    #[must_use]
    pub const fn id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the number of ports.
    #[must_use]
    pub const fn ports(mut self, n: u32) -> Self {
        self.ports = n;
        self
    }

    /// Sets the number of RX and, separately, TX queues per port.
    #[must_use]
    pub const fn queue_count(mut self, n: u32) -> Self {
        self.queue_count = n;
        self
    }

    /// Sets the number of SR-IOV virtual functions.
    #[must_use]
    pub const fn max_vfs(mut self, n: u32) -> Self {
        self.max_vfs = n;
        self
    }

    /// Creates the port interfaces in the given network namespace.
    #[must_use]
    pub fn in_namespace(mut self, netns: NamespaceRef) -> Self {
        self.namespace = Some(netns);
        self
    }

    /// Creates the device, renames its ports using random names, and
    /// registers the device's removal with the fixture.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid settings, if the device cannot be created
    /// or does not materialize, or if its ports cannot be renamed. A device
    /// that was created is deleted again before the error is returned.
    pub fn create(&self, fixture: &Fixture) -> Result<NetdevsimDevice> {
        if self.queue_count == 0 {
            return Err(TempnetError::Config {
                message: "RX/TX queue count cannot be zero".into(),
            });
        }
        match &self.namespace {
            Some(netns) => {
                netns.validate(NamespaceKind::Network)?;
                network::run_in(fixture.claim(), netns, || self.create_here(fixture))?
            }
            None => self.create_here(fixture),
        }
    }

    fn create_here(&self, fixture: &Fixture) -> Result<NetdevsimDevice> {
        let session = NetlinkSession::open(fixture.claim(), None)?;
        self.create_with(
            fixture,
            &RtnlPortEnumerator::new(&session),
            |index, name| session.rename_link(index, name),
        )
    }

    fn create_with(
        &self,
        fixture: &Fixture,
        enumerator: &impl PortEnumerator,
        mut rename: impl FnMut(u32, &str) -> Result<()>,
    ) -> Result<NetdevsimDevice> {
        let config = fixture.config();
        let id = self.request_device(config, write_sysfs)?;
        let guard = DeviceGuard::new(config.netdevsim_root(), id);

        let devpath = config
            .netdevsim_devices()
            .join(format!("{NETDEVSIM_DEVICE_PREFIX}{id}"));
        wait_for_dir(
            &devpath,
            config.materialize_timeout,
            config.materialize_probe,
        )?;
        if self.max_vfs > 0 {
            write_sysfs(&devpath.join("sriov_numvfs"), &self.max_vfs.to_string()).map_err(|e| {
                TempnetError::Create {
                    kind: KIND.into(),
                    id: format!("with ID {id}"),
                    reason: format!("cannot set {} SR-IOV VFs: {e}", self.max_vfs),
                }
            })?;
        }

        let entries = enumerator.ports()?;
        let ports = device_ports(&entries, id, self.ports)?
            .iter()
            .map(|port| self.rename_port(port, config.max_attempts, &mut rename))
            .collect::<Result<Vec<_>>>()?;

        let id = guard.disarm();
        let root = config.netdevsim_root();
        fixture.defer(format!("transient netdevsim with ID {id}"), move || {
            tracing::info!(id, "removing transient netdevsim device");
            delete_device(&root, id)
        });
        tracing::info!(id, ports = ports.len(), "created transient netdevsim device");
        Ok(NetdevsimDevice { id, ports })
    }

    /// Writes the creation request and returns the ID of the new device.
    ///
    /// An automatically allocated ID is retried on collision; a caller-chosen
    /// one fails at once.
    fn request_device(
        &self,
        config: &TempnetConfig,
        mut write: impl FnMut(&Path, &str) -> Result<()>,
    ) -> Result<u32> {
        let control = config.netdevsim_root().join("new_device");
        retry_on_collision(config.max_attempts, KIND, |attempt| {
            let id = match self.id {
                Some(id) => id,
                None => lowest_available_id(config)?,
            };
            tracing::debug!(id, attempt, "creating transient netdevsim device");
            let request = format!("{id} {} {}", self.ports, self.queue_count);
            match write(&control, &request) {
                Ok(()) => Ok(id),
                Err(e) if self.id.is_none() && e.is_collision() => Err(e),
                Err(e) => Err(create_error(id, &e)),
            }
        })
    }

    fn rename_port(
        &self,
        port: &PortEntry,
        attempts: u32,
        rename: &mut impl FnMut(u32, &str) -> Result<()>,
    ) -> Result<LinkDescriptor> {
        let kind = format!("port network interface name for {}", port.device);
        let name = retry_on_collision(attempts, &kind, |_| {
            let name = random_nifname(NETDEVSIM_PREFIX)?;
            rename(port.index, &name)?;
            Ok(name)
        })?;
        let mut link = LinkDescriptor::new(LinkKind::Device);
        link.name = name;
        link.index = port.index;
        link.namespace.clone_from(&self.namespace);
        Ok(link)
    }
}

fn create_error(id: u32, e: &TempnetError) -> TempnetError {
    TempnetError::Create {
        kind: KIND.into(),
        id: format!("with ID {id}"),
        reason: e.to_string(),
    }
}

/// Deletes the device on drop unless disarmed.
struct DeviceGuard {
    root: PathBuf,
    id: Option<u32>,
}

impl DeviceGuard {
    const fn new(root: PathBuf, id: u32) -> Self {
        Self { root, id: Some(id) }
    }

    fn disarm(mut self) -> u32 {
        self.id.take().unwrap_or_default()
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            tracing::debug!(id, "removing netdevsim device after failed setup");
            if let Err(e) = delete_device(&self.root, id) {
                tracing::error!(id, error = %e, "cannot remove netdevsim device");
            }
        }
    }
}

fn delete_device(root: &Path, id: u32) -> Result<()> {
    write_sysfs(&root.join("del_device"), &id.to_string())
}

pub(crate) fn write_sysfs(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| TempnetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Reports whether the netdevsim bus is available.
#[must_use]
pub fn has_netdevsim(config: &TempnetConfig) -> bool {
    config.netdevsim_root().is_dir()
}

/// Returns the lowest netdevsim ID not currently in use.
///
/// The ID is not reserved; creating a device with it may still collide.
///
/// # Errors
///
/// Returns an error if the existing devices cannot be listed.
pub fn lowest_available_id(config: &TempnetConfig) -> Result<u32> {
    let dir = config.netdevsim_devices();
    let entries = std::fs::read_dir(&dir).map_err(|e| TempnetError::Io {
        path: dir.clone(),
        source: e,
    })?;
    let taken = entries.filter_map(|entry| {
        entry
            .ok()?
            .file_name()
            .to_str()?
            .strip_prefix(NETDEVSIM_DEVICE_PREFIX)?
            .parse::<u32>()
            .ok()
    });
    Ok(lowest_unused(taken))
}

fn wait_for_dir(path: &Path, within: Duration, probe: Duration) -> Result<()> {
    let deadline = Instant::now() + within;
    while !path.is_dir() {
        if Instant::now() >= deadline {
            return Err(TempnetError::Timeout {
                what: format!("{} to materialize", path.display()),
                after: within,
            });
        }
        std::thread::sleep(probe);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn exists() -> TempnetError {
        TempnetError::Io {
            path: PathBuf::from("/sys/bus/netdevsim/new_device"),
            source: std::io::Error::from_raw_os_error(libc::EEXIST),
        }
    }

    struct Listing(Vec<PortEntry>);

    impl PortEnumerator for Listing {
        fn ports(&self) -> Result<Vec<PortEntry>> {
            Ok(self.0.clone())
        }
    }

    fn port(id: u32, ordinal: u32) -> PortEntry {
        PortEntry {
            bus: "netdevsim".into(),
            device: format!("netdevsim{id}"),
            port: ordinal,
            name: format!("eni{id}np{ordinal}"),
            index: 100 + ordinal,
        }
    }

    fn fake_sysfs() -> (tempfile::TempDir, TempnetConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = TempnetConfig {
            sysfs_root: dir.path().to_path_buf(),
            materialize_timeout: Duration::from_millis(20),
            ..TempnetConfig::default()
        };
        std::fs::create_dir_all(config.netdevsim_devices()).expect("mkdir");
        (dir, config)
    }

    #[test]
    fn bus_presence_follows_sysfs() {
        let (_dir, config) = fake_sysfs();
        assert!(has_netdevsim(&config));
        let missing = TempnetConfig {
            sysfs_root: config.sysfs_root.join("nowhere"),
            ..config
        };
        assert!(!has_netdevsim(&missing));
    }

    #[test]
    fn lowest_id_skips_existing_devices() {
        let (_dir, config) = fake_sysfs();
        assert_eq!(lowest_available_id(&config).expect("id"), 0);
        for name in ["netdevsim0", "netdevsim1", "netdevsim3", "unrelated"] {
            std::fs::create_dir(config.netdevsim_devices().join(name)).expect("mkdir");
        }
        assert_eq!(lowest_available_id(&config).expect("id"), 2);
    }

    #[test]
    fn lowest_id_without_bus_is_an_error() {
        let config = TempnetConfig {
            sysfs_root: PathBuf::from("/nonexistent/sysfs"),
            ..TempnetConfig::default()
        };
        assert!(lowest_available_id(&config).is_err());
    }

    #[test]
    fn zero_queues_are_rejected() {
        let (_dir, config) = fake_sysfs();
        let fixture = Fixture::with_config(config).expect("fixture");
        let err = Netdevsim::new()
            .queue_count(0)
            .create(&fixture)
            .expect_err("zero queues");
        assert!(err.to_string().contains("queue count"));
    }

    #[test]
    fn device_that_never_materializes_is_deleted() {
        let (_dir, config) = fake_sysfs();
        let root = config.netdevsim_root();
        let fixture = Fixture::with_config(config).expect("fixture");
        let err = Netdevsim::new()
            .id(7)
            .ports(2)
            .create(&fixture)
            .expect_err("no device appears");
        assert!(matches!(err, TempnetError::Timeout { .. }), "{err}");
        assert_eq!(
            std::fs::read_to_string(root.join("new_device")).expect("read"),
            "7 2 1"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("del_device")).expect("read"),
            "7"
        );
        assert_eq!(fixture.pending(), 0);
    }

    #[test]
    fn failing_creation_names_the_id() {
        let (_dir, config) = fake_sysfs();
        // a directory in place of the control file makes the write fail
        std::fs::create_dir(config.netdevsim_root().join("new_device")).expect("mkdir");
        let fixture = Fixture::with_config(config).expect("fixture");
        let err = Netdevsim::new().id(5).create(&fixture).expect_err("fails");
        assert!(err.to_string().contains("with ID 5"), "{err}");
    }

    #[test]
    fn waiting_succeeds_once_the_directory_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        wait_for_dir(dir.path(), Duration::from_millis(10), Duration::from_millis(1))
            .expect("exists");
    }

    #[test]
    fn automatic_id_is_retried_on_collision() {
        let (_dir, config) = fake_sysfs();
        let requests = RefCell::new(Vec::new());
        let id = Netdevsim::new()
            .ports(2)
            .request_device(&config, |path, request| {
                assert!(path.ends_with("new_device"));
                requests.borrow_mut().push(request.to_string());
                if requests.borrow().len() < 3 {
                    Err(exists())
                } else {
                    Ok(())
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(id, 0);
        assert_eq!(requests.into_inner(), ["0 2 1", "0 2 1", "0 2 1"]);
    }

    #[test]
    fn chosen_id_fails_on_first_collision() {
        let (_dir, config) = fake_sysfs();
        let mut calls = 0;
        let err = Netdevsim::new()
            .id(9)
            .request_device(&config, |_, _| {
                calls += 1;
                Err(exists())
            })
            .expect_err("taken");
        assert_eq!(calls, 1);
        assert!(matches!(err, TempnetError::Create { .. }), "{err}");
        assert!(err.to_string().contains("with ID 9"), "{err}");
    }

    #[test]
    fn automatic_ids_run_out() {
        let (_dir, config) = fake_sysfs();
        let err = Netdevsim::new()
            .request_device(&config, |_, _| Err(exists()))
            .expect_err("exhausted");
        match err {
            TempnetError::Exhausted { kind, attempts } => {
                assert_eq!(kind, "netdevsim");
                assert_eq!(attempts, config.max_attempts);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn port_rename_is_retried_on_collision() {
        let mut tried = Vec::new();
        let link = Netdevsim::new()
            .rename_port(&port(3, 1), 10, &mut |index, name: &str| {
                assert_eq!(index, 101);
                tried.push(name.to_string());
                if tried.len() == 1 {
                    Err(TempnetError::Netlink {
                        operation: "rename link".into(),
                        message: "File exists (os error 17)".into(),
                        errno: Some(libc::EEXIST),
                    })
                } else {
                    Ok(())
                }
            })
            .expect("renamed");
        assert_eq!(tried.len(), 2);
        assert_eq!(link.name, tried[1]);
        assert!(link.name.starts_with("ndsi-"));
        assert_eq!(link.index, 101);
        assert!(matches!(link.kind, LinkKind::Device));
    }

    #[test]
    fn port_rename_failure_is_not_retried() {
        let mut calls = 0;
        let err = Netdevsim::new()
            .rename_port(&port(3, 0), 10, &mut |_, _: &str| {
                calls += 1;
                Err(TempnetError::Netlink {
                    operation: "rename link".into(),
                    message: "Device or resource busy (os error 16)".into(),
                    errno: Some(libc::EBUSY),
                })
            })
            .expect_err("busy");
        assert_eq!(calls, 1);
        assert_eq!(err.errno(), Some(libc::EBUSY));
    }

    #[test]
    fn incomplete_ports_delete_the_device() {
        let (_dir, config) = fake_sysfs();
        let root = config.netdevsim_root();
        std::fs::create_dir(config.netdevsim_devices().join("netdevsim4")).expect("mkdir");
        let fixture = Fixture::with_config(config).expect("fixture");
        let listing = Listing(vec![port(4, 0), port(4, 2)]);
        let err = Netdevsim::new()
            .id(4)
            .ports(2)
            .create_with(&fixture, &listing, |_, _| panic!("nothing to rename"))
            .expect_err("gap in ports");
        assert!(matches!(err, TempnetError::Create { .. }), "{err}");
        assert!(err.to_string().contains("with ID 4"), "{err}");
        assert_eq!(
            std::fs::read_to_string(root.join("del_device")).expect("read"),
            "4"
        );
        assert_eq!(fixture.pending(), 0);
    }

    #[test]
    fn complete_ports_are_renamed_and_registered() {
        let (_dir, config) = fake_sysfs();
        let root = config.netdevsim_root();
        std::fs::create_dir(config.netdevsim_devices().join("netdevsim6")).expect("mkdir");
        let fixture = Fixture::with_config(config).expect("fixture");
        let listing = Listing(vec![port(6, 1), port(6, 0), port(5, 0)]);
        let mut renamed = Vec::new();
        let device = Netdevsim::new()
            .id(6)
            .ports(2)
            .create_with(&fixture, &listing, |index, _| {
                renamed.push(index);
                Ok(())
            })
            .expect("created");
        assert_eq!(device.id, 6);
        assert_eq!(renamed, [100, 101]);
        assert_eq!(device.ports.len(), 2);
        assert!(!root.join("del_device").exists());
        assert_eq!(fixture.pending(), 1);
        fixture.teardown().expect("teardown");
        assert_eq!(
            std::fs::read_to_string(root.join("del_device")).expect("read"),
            "6"
        );
    }
}
