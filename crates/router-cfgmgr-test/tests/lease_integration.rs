//! DHCPv4 and DHCPv6 lease installation

use pretty_assertions::assert_eq;
use std::net::IpAddr;

use router_cfgmgr_common::CfgMgrError;
use router_cfgmgr_test::fixtures::lease_fixtures::{dhcp4, dhcp6};
use router_cfgmgr_test::{FakeNetControl, Mutation, TestEnv};
use router_netconfigd::files::DHCP6_LEASE_FILE;
use router_netconfigd::{apply_dhcp4_lease, apply_dhcp6_lease, Route, RouteProtocol, RouteScope};
use router_types::{AddressFamily, IpPrefix};

fn prefix(s: &str) -> IpPrefix {
    s.parse().unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn uplink() -> FakeNetControl {
    FakeNetControl::new().with_link("uplink0", "02:73:53:00:ca:fe")
}

#[tokio::test]
async fn test_missing_leases_are_not_errors() {
    let env = TestEnv::new().unwrap();
    let kernel = FakeNetControl::new();

    apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap();
    apply_dhcp6_lease(&kernel, &env.config_dir(), "lan0")
        .await
        .unwrap();

    assert!(kernel.mutations().is_empty());
}

#[tokio::test]
async fn test_dhcp4_lease_installs_address_and_routes() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp4_lease(&dhcp4("85.195.207.62", "255.255.255.128", "85.195.207.1"))
        .unwrap();
    let kernel = uplink();

    apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap();

    let source = Some(ip("85.195.207.62"));
    assert_eq!(
        kernel.mutations(),
        vec![
            Mutation::ReplaceAddress {
                link: "uplink0".to_string(),
                address: prefix("85.195.207.62/25"),
            },
            Mutation::ReplaceRoute(Route {
                dev: "uplink0".to_string(),
                destination: prefix("85.195.207.1/32"),
                gateway: None,
                source,
                scope: RouteScope::Link,
                protocol: RouteProtocol::Dhcp,
            }),
            Mutation::ReplaceRoute(Route {
                dev: "uplink0".to_string(),
                destination: IpPrefix::default_route(AddressFamily::V4),
                gateway: Some(ip("85.195.207.1")),
                source,
                scope: RouteScope::Universe,
                protocol: RouteProtocol::Dhcp,
            }),
        ]
    );
}

#[tokio::test]
async fn test_dhcp4_lease_keeps_ipv6_addresses() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp4_lease(&dhcp4("85.195.207.62", "255.255.255.128", "85.195.207.1"))
        .unwrap();
    let kernel = uplink();
    kernel.seed_address("uplink0", prefix("10.0.0.5/8"));
    kernel.seed_address("uplink0", prefix("fe80::1/64"));

    apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap();

    assert_eq!(
        kernel.state().link("uplink0").unwrap().addresses,
        vec![prefix("fe80::1/64"), prefix("85.195.207.62/25")]
    );
}

#[tokio::test]
async fn test_dhcp4_lease_without_mask() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp4_lease(&dhcp4("85.195.207.62", "", "85.195.207.1"))
        .unwrap();
    let kernel = uplink();

    let err = apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap_err();

    assert!(matches!(err, CfgMgrError::InvalidLease { .. }), "{:?}", err);
    assert_eq!(err.to_string(), "Invalid DHCP lease: no subnet mask present");
    assert!(kernel.mutations().is_empty());
}

#[tokio::test]
async fn test_dhcp4_lease_on_missing_link() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp4_lease(&dhcp4("85.195.207.62", "255.255.255.0", "85.195.207.1"))
        .unwrap();
    let kernel = FakeNetControl::new().with_link("eth0", "02:73:53:00:ca:fe");

    let err = apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap_err();
    assert!(
        matches!(err, CfgMgrError::LinkNotFound { ref link } if link == "uplink0"),
        "{:?}",
        err
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_dhcp4_route_failure_names_step() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp4_lease(&dhcp4("85.195.207.62", "255.255.255.0", "85.195.207.1"))
        .unwrap();
    let kernel = uplink();
    kernel.fail("replace_route", "uplink0");

    let err = apply_dhcp4_lease(&kernel, &env.config_dir(), "uplink0")
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("route(router)(uplink0): "), "{}", err);
}

#[tokio::test]
async fn test_dhcp6_prefixes_are_installed_on_lan() {
    let env = TestEnv::new().unwrap();
    env.write_dhcp6_lease(&dhcp6(&["2a02:168:4a00::/48", "2001:db8:0:1::/64"]))
        .unwrap();
    let kernel = FakeNetControl::new().with_link("lan0", "02:73:53:00:b0:0c");

    apply_dhcp6_lease(&kernel, &env.config_dir(), "lan0")
        .await
        .unwrap();

    assert_eq!(
        kernel.state().link("lan0").unwrap().addresses,
        vec![prefix("2a02:168:4a00::1/64"), prefix("2001:db8:0:1::1/64")]
    );
}

#[tokio::test]
async fn test_dhcp6_lease_with_encoded_network() {
    let env = TestEnv::new().unwrap();
    // 2a02:168:4a00::/48 as address plus base64 netmask bytes.
    env.write_raw(
        DHCP6_LEASE_FILE,
        r#"{"prefixes": [{"IP": "2a02:168:4a00::", "Mask": "////////AAAAAAAAAAAAAA=="}]}"#,
    )
    .unwrap();
    let kernel = FakeNetControl::new().with_link("lan0", "02:73:53:00:b0:0c");

    apply_dhcp6_lease(&kernel, &env.config_dir(), "lan0")
        .await
        .unwrap();

    assert_eq!(
        kernel.state().link("lan0").unwrap().addresses,
        vec![prefix("2a02:168:4a00::1/64")]
    );
}
