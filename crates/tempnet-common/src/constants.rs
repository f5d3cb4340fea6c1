//! System-wide constants and default paths.

/// Maximum length of a Linux network interface name (`IFNAMSIZ - 1`).
pub const MAX_NIFNAME_LEN: usize = 15;

/// Minimum number of random characters following a caller-supplied prefix.
pub const MIN_RANDOM_SUFFIX_LEN: usize = 4;

/// Bound on attempts for collision-prone random allocations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default sysfs mount point.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Procfs reference to the calling thread's network namespace.
pub const THREAD_NETNS_PATH: &str = "/proc/thread-self/ns/net";

/// Procfs reference to the calling thread's mount namespace.
pub const THREAD_MNTNS_PATH: &str = "/proc/thread-self/ns/mnt";

/// Procfs reference to the process's (main thread's) mount namespace.
pub const PROCESS_MNTNS_PATH: &str = "/proc/self/ns/mnt";

/// Name of the netdevsim bus below `<sysfs>/bus`.
pub const NETDEVSIM_BUS: &str = "netdevsim";

/// Prefix of netdevsim device directory names, followed by the numeric ID.
pub const NETDEVSIM_DEVICE_PREFIX: &str = "netdevsim";

/// Name prefix for transient dummy network interfaces.
pub const DUMMY_PREFIX: &str = "dumy-";

/// Name prefix for transient MACVLAN network interfaces.
pub const MACVLAN_PREFIX: &str = "mcvl-";

/// Name prefix for transient veth pair ends.
pub const VETH_PREFIX: &str = "veth-";

/// Name prefix for renamed netdevsim port network interfaces.
pub const NETDEVSIM_PREFIX: &str = "ndsi-";

/// Environment variable overriding the sysfs mount point.
pub const ENV_SYSFS_ROOT: &str = "TEMPNET_SYSFS_ROOT";

/// Environment variable overriding the retry bound.
pub const ENV_MAX_ATTEMPTS: &str = "TEMPNET_MAX_ATTEMPTS";
