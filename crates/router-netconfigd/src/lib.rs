//! netconfigd - network configuration daemon for the router
//!
//! Reconciles the running system with the declared configuration under the
//! config directory: renames, spoofs and addresses interfaces, builds
//! bridges, installs DHCPv4 and DHCPv6 leases, sets forwarding sysctls and
//! replaces the nftables ruleset (NAT, port forwardings, MSS clamping and a
//! forwarded-traffic counter that survives the replacement).
//!
//! Kernel access goes through [`NetControl`] and [`PacketFilter`]; the
//! `ip`/`nft` backed implementations are [`IpControl`] and [`NftControl`].

mod bridge;
mod commands;
pub mod config_file;
pub mod files;
mod interfaces;
mod ip_control;
mod kernel;
mod lease;
mod netconfig;
pub mod nft;
mod sysctl;
mod types;

pub use bridge::ensure_bridges;
pub use commands::*;
pub use config_file::NetconfigdConfig;
pub use interfaces::{apply_interfaces, write_resolv_conf};
pub use ip_control::{parse_addresses, parse_links, IpControl};
pub use kernel::{Link, NetControl, OperState, Route, RouteProtocol, RouteScope};
pub use lease::{apply_dhcp4_lease, apply_dhcp6_lease, lan_address_for_prefix};
pub use netconfig::{ApplyError, NetConfig, NetConfigSettings, Stage, StageFailure};
pub use nft::{NftControl, PacketFilter};
pub use sysctl::{Sysctl, SysctlApplier};
pub use types::{BridgeDetails, InterfaceConfig, InterfaceDetails, PortForwarding, PortForwardings};
