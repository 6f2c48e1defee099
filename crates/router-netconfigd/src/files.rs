//! Well-known file locations and interface names.

/// Declared interfaces and bridges, relative to the config directory.
pub const INTERFACES_FILE: &str = "interfaces.json";

/// Declared port forwardings, relative to the config directory.
pub const PORT_FORWARDINGS_FILE: &str = "portforwardings.json";

/// DHCPv4 client lease, relative to the config directory.
pub const DHCP4_LEASE_FILE: &str = "dhcp4/wire/lease.json";

/// DHCPv6 client lease, relative to the config directory.
pub const DHCP6_LEASE_FILE: &str = "dhcp6/wire/lease.json";

/// Resolver configuration, relative to the root directory.
pub const RESOLV_CONF_FILE: &str = "tmp/resolv.conf";

/// Default config directory.
pub const DEFAULT_CONFIG_DIR: &str = "/perm";

/// Default root directory.
pub const DEFAULT_ROOT_DIR: &str = "/";

/// Default location of kernel parameters.
pub const DEFAULT_PROC_SYS_DIR: &str = "/proc/sys";

/// Interface the DHCPv4 lease is installed on.
pub const DEFAULT_UPLINK: &str = "uplink0";

/// Interface the DHCPv6 prefix is installed on and whose address is
/// published as the resolver.
pub const DEFAULT_LAN: &str = "lan0";

/// Uplink names probed in order when compiling uplink-scoped rules.
pub const DEFAULT_UPLINK_CANDIDATES: &[&str] = &["uplink0", "eth0", "ens3"];

/// Daemons that bind to addresses this daemon configures.
pub const DEFAULT_NOTIFY_PROCESSES: &[&str] = &["dyndns", "dnsd", "diagd", "backupd", "captured"];
