//! Interface reconciliation

use pretty_assertions::assert_eq;

use router_cfgmgr_test::fixtures::interface_fixtures::{bridge, interface, named_interface};
use router_cfgmgr_test::{FakeNetControl, Mutation, MutationVerifier, TestEnv};
use router_netconfigd::{apply_interfaces, InterfaceConfig};
use router_types::{IpPrefix, MacAddress};

const UPLINK_MAC: &str = "02:73:53:00:ca:fe";
const LAN_MAC: &str = "02:73:53:00:b0:0c";
const SPOOF_MAC: &str = "02:73:53:00:ca:ff";

fn prefix(s: &str) -> IpPrefix {
    s.parse().unwrap()
}

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

async fn apply(env: &TestEnv, kernel: &FakeNetControl) -> router_cfgmgr_common::CfgMgrResult<()> {
    apply_interfaces(kernel, &env.config_dir(), &env.root_dir(), "lan0").await
}

#[tokio::test]
async fn test_missing_interfaces_file_is_not_an_error() {
    let env = TestEnv::new().unwrap();
    let kernel = FakeNetControl::new().with_link("eth0", UPLINK_MAC);

    apply(&env, &kernel).await.unwrap();

    assert!(kernel.mutations().is_empty());
    assert_eq!(env.resolv_conf(), None);
}

#[tokio::test]
async fn test_rename_up_and_address() {
    let env = TestEnv::new().unwrap();
    env.write_interfaces(&InterfaceConfig {
        interfaces: vec![
            interface(UPLINK_MAC, "uplink0", None),
            interface(LAN_MAC, "lan0", Some("192.168.42.1/24")),
        ],
        bridges: vec![],
    })
    .unwrap();
    let kernel = FakeNetControl::new()
        .with_link("eth0", UPLINK_MAC)
        .with_link("eth1", LAN_MAC)
        .with_link("eth2", "02:73:53:00:00:01");

    apply(&env, &kernel).await.unwrap();

    assert_eq!(
        kernel.mutations(),
        vec![
            Mutation::SetName {
                from: "eth0".to_string(),
                to: "uplink0".to_string()
            },
            Mutation::SetUp("uplink0".to_string()),
            Mutation::SetName {
                from: "eth1".to_string(),
                to: "lan0".to_string()
            },
            Mutation::SetUp("lan0".to_string()),
            Mutation::ReplaceAddress {
                link: "lan0".to_string(),
                address: prefix("192.168.42.1/24")
            },
        ]
    );
    // Undeclared links are left alone.
    assert!(!kernel.state().link("eth2").unwrap().up);
    assert_eq!(env.resolv_conf().as_deref(), Some("nameserver 192.168.42.1\n"));
}

#[tokio::test]
async fn test_spoofed_link_is_found_again() {
    let env = TestEnv::new().unwrap();
    let mut uplink = interface(UPLINK_MAC, "uplink0", None);
    uplink.spoof_hardware_addr = Some(mac(SPOOF_MAC));
    env.write_interfaces(&InterfaceConfig {
        interfaces: vec![uplink],
        bridges: vec![],
    })
    .unwrap();
    let kernel = FakeNetControl::new().with_link("eth0", UPLINK_MAC);

    apply(&env, &kernel).await.unwrap();
    assert_eq!(kernel.state().link("uplink0").unwrap().mac, Some(mac(SPOOF_MAC)));
    let state = kernel.state();
    kernel.clear_mutations();
    // An up link refuses address changes on many drivers.
    kernel.fail("set_hardware_addr", "uplink0");

    apply(&env, &kernel).await.unwrap();

    assert_eq!(kernel.state(), state);
    let verifier = MutationVerifier::new(kernel.mutations());
    verifier
        .assert_count("renames", 0, |m| matches!(m, Mutation::SetName { .. }))
        .unwrap();
    verifier
        .assert_count("spoofs", 0, |m| matches!(m, Mutation::SetHardwareAddr { .. }))
        .unwrap();
}

#[tokio::test]
async fn test_link_matched_by_name() {
    let env = TestEnv::new().unwrap();
    env.write_interfaces(&InterfaceConfig {
        interfaces: vec![named_interface("lan0", "10.0.0.1/24")],
        bridges: vec![bridge("lan0", &[LAN_MAC])],
    })
    .unwrap();
    let kernel = FakeNetControl::new().with_link("eth1", LAN_MAC);

    apply(&env, &kernel).await.unwrap();

    let state = kernel.state();
    let lan = state.link("lan0").unwrap();
    assert!(lan.bridge);
    assert_eq!(lan.addresses, vec![prefix("10.0.0.1/24")]);
    assert_eq!(state.link("eth1").unwrap().master.as_deref(), Some("lan0"));
    assert_eq!(env.resolv_conf().as_deref(), Some("nameserver 10.0.0.1\n"));
}

#[tokio::test]
async fn test_address_failure_names_step() {
    let env = TestEnv::new().unwrap();
    env.write_interfaces(&InterfaceConfig {
        interfaces: vec![interface(LAN_MAC, "lan0", Some("192.168.42.1/24"))],
        bridges: vec![],
    })
    .unwrap();
    let kernel = FakeNetControl::new().with_link("eth1", LAN_MAC);
    kernel.fail("replace_address", "lan0");

    let err = apply(&env, &kernel).await.unwrap_err();

    assert!(err.to_string().starts_with("address(lan0): "), "{}", err);
    assert_eq!(env.resolv_conf(), None);
}

#[tokio::test]
async fn test_bridge_failure_is_fatal() {
    let env = TestEnv::new().unwrap();
    env.write_interfaces(&InterfaceConfig {
        interfaces: vec![interface(UPLINK_MAC, "uplink0", None)],
        bridges: vec![bridge("lan0", &[LAN_MAC])],
    })
    .unwrap();
    let kernel = FakeNetControl::new()
        .with_link("eth0", UPLINK_MAC)
        .with_link("eth1", LAN_MAC);
    kernel.fail("add_bridge", "lan0");

    assert!(apply(&env, &kernel).await.is_err());
    // Interfaces are not touched after a bridge failure.
    assert!(kernel.state().link("eth0").is_some());
}

#[tokio::test]
async fn test_malformed_interfaces_file() {
    let env = TestEnv::new().unwrap();
    env.write_raw("interfaces.json", r#"{"interfaces": [{"name": "lan0", "addr": "192.168.42.1"}]}"#)
        .unwrap();
    let kernel = FakeNetControl::new();

    let err = apply(&env, &kernel).await.unwrap_err();
    assert!(err.to_string().contains("interfaces.json"), "{}", err);
}
