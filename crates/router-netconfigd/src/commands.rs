//! Shell command builders for link, address and route operations

use router_cfgmgr_common::shell::{self, shellquote};
use router_types::{AddressFamily, IpPrefix, MacAddress};

use crate::kernel::{Route, RouteScope};

fn family_flag(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "-4",
        AddressFamily::V6 => "-6",
    }
}

/// Build list links command (JSON output)
pub fn build_show_links_cmd() -> String {
    format!("{} -j link show", shell::IP_CMD)
}

/// Build list addresses command (JSON output)
pub fn build_show_addresses_cmd(link: &str, family: AddressFamily) -> String {
    format!(
        "{} -j {} address show dev {}",
        shell::IP_CMD,
        family_flag(family),
        shellquote(link)
    )
}

/// Build create bridge command
pub fn build_add_bridge_cmd(name: &str) -> String {
    format!(
        "{} link add name {} type bridge",
        shell::IP_CMD,
        shellquote(name)
    )
}

/// Build rename link command
pub fn build_set_name_cmd(link: &str, new_name: &str) -> String {
    format!(
        "{} link set dev {} name {}",
        shell::IP_CMD,
        shellquote(link),
        shellquote(new_name)
    )
}

/// Build set hardware address command
pub fn build_set_hardware_addr_cmd(link: &str, mac: &MacAddress) -> String {
    format!(
        "{} link set dev {} address {}",
        shell::IP_CMD,
        shellquote(link),
        shellquote(&mac.to_string())
    )
}

/// Build enslave link command
pub fn build_set_master_cmd(link: &str, master: &str) -> String {
    format!(
        "{} link set dev {} master {}",
        shell::IP_CMD,
        shellquote(link),
        shellquote(master)
    )
}

/// Build set link up command
pub fn build_set_up_cmd(link: &str) -> String {
    format!("{} link set dev {} up", shell::IP_CMD, shellquote(link))
}

/// Build address command (`op` is `replace` or `del`)
pub fn build_address_cmd(op: &str, link: &str, address: &IpPrefix) -> String {
    format!(
        "{} {} address {} {} dev {}",
        shell::IP_CMD,
        family_flag(address.family()),
        op,
        shellquote(&address.to_string()),
        shellquote(link)
    )
}

/// Build replace route command
pub fn build_replace_route_cmd(route: &Route) -> String {
    let mut cmd = format!(
        "{} {} route replace {}",
        shell::IP_CMD,
        family_flag(route.destination.family()),
        shellquote(&route.destination.to_string())
    );
    if let Some(gateway) = route.gateway {
        cmd.push_str(&format!(" via {}", shellquote(&gateway.to_string())));
    }
    cmd.push_str(&format!(" dev {} proto {}", shellquote(&route.dev), route.protocol));
    if route.scope != RouteScope::Universe {
        cmd.push_str(&format!(" scope {}", route.scope));
    }
    if let Some(source) = route.source {
        cmd.push_str(&format!(" src {}", shellquote(&source.to_string())));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::RouteProtocol;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_link_cmds() {
        assert_eq!(build_show_links_cmd(), "/sbin/ip -j link show");
        assert_eq!(
            build_add_bridge_cmd("lan0"),
            r#"/sbin/ip link add name "lan0" type bridge"#
        );
        assert_eq!(
            build_set_name_cmd("eth0", "uplink0"),
            r#"/sbin/ip link set dev "eth0" name "uplink0""#
        );
        assert_eq!(
            build_set_hardware_addr_cmd("uplink0", &"02:73:53:00:ca:fe".parse().unwrap()),
            r#"/sbin/ip link set dev "uplink0" address "02:73:53:00:ca:fe""#
        );
        assert_eq!(
            build_set_master_cmd("eth1", "lan0"),
            r#"/sbin/ip link set dev "eth1" master "lan0""#
        );
        assert_eq!(build_set_up_cmd("lan0"), r#"/sbin/ip link set dev "lan0" up"#);
    }

    #[test]
    fn test_build_address_cmds() {
        let addr: IpPrefix = "192.168.42.1/24".parse().unwrap();
        assert_eq!(
            build_address_cmd("replace", "lan0", &addr),
            r#"/sbin/ip -4 address replace "192.168.42.1/24" dev "lan0""#
        );
        let addr6: IpPrefix = "2a02:168:4a00::1/64".parse().unwrap();
        assert_eq!(
            build_address_cmd("del", "lan0", &addr6),
            r#"/sbin/ip -6 address del "2a02:168:4a00::1/64" dev "lan0""#
        );
        assert_eq!(
            build_show_addresses_cmd("uplink0", AddressFamily::V4),
            r#"/sbin/ip -j -4 address show dev "uplink0""#
        );
    }

    #[test]
    fn test_build_route_cmds() {
        let gateway = "85.195.207.1".parse().unwrap();
        let client = "85.195.207.62".parse().unwrap();

        let host_route = Route {
            dev: "uplink0".to_string(),
            destination: IpPrefix::host(gateway),
            gateway: None,
            source: Some(client),
            scope: RouteScope::Link,
            protocol: RouteProtocol::Dhcp,
        };
        assert_eq!(
            build_replace_route_cmd(&host_route),
            r#"/sbin/ip -4 route replace "85.195.207.1/32" dev "uplink0" proto dhcp scope link src "85.195.207.62""#
        );

        let default_route = Route {
            dev: "uplink0".to_string(),
            destination: IpPrefix::default_route(AddressFamily::V4),
            gateway: Some(gateway),
            source: Some(client),
            scope: RouteScope::Universe,
            protocol: RouteProtocol::Dhcp,
        };
        assert_eq!(
            build_replace_route_cmd(&default_route),
            r#"/sbin/ip -4 route replace "0.0.0.0/0" via "85.195.207.1" dev "uplink0" proto dhcp src "85.195.207.62""#
        );
    }
}
