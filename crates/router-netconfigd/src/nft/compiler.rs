//! Lowering of port forwardings and fixed policies into rules.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::AddressFamily;

use super::control::PacketFilter;
use super::expr::{
    ByteorderOp, CmpOp, Literal, MatchOrTransform, MetaKey, NatType, ObjectType, PayloadBase,
    Register, TcpOption,
};
use super::ruleset::{
    priority, Batch, ChainHook, ChainType, CounterObject, CounterSnapshot, Rule, Table,
};
use crate::types::{PortForwarding, PortForwardings};

/// IANA protocol number of TCP.
pub const IPPROTO_TCP: u8 = 6;
/// IANA protocol number of UDP.
pub const IPPROTO_UDP: u8 = 17;

/// Name of the forwarded-traffic counter in each filter table.
pub const FORWARD_COUNTER: &str = "fwded";

/// Offset of the destination port in TCP and UDP headers.
const DPORT_OFFSET: u32 = 2;
/// Offset of the flags byte in the TCP header.
const TCP_FLAGS_OFFSET: u32 = 13;
/// SYN bit within the TCP flags byte.
const TCP_FLAG_SYN: u8 = 0x02;

static PORT_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)(?:-([0-9]+))?$").expect("Invalid regex pattern"));

/// An inclusive port range. A single port has `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// First port.
    pub min: u16,
    /// Last port.
    pub max: u16,
}

impl PortRange {
    /// Returns true for a single port.
    pub fn is_single(&self) -> bool {
        self.min == self.max
    }
}

/// Parses `8080` or `8080-8090`.
///
/// # Errors
///
/// Rejects anything else, ports above 65535, and ranges whose end precedes
/// their start.
pub fn parse_port(p: &str) -> CfgMgrResult<PortRange> {
    let caps = PORT_RANGE_RE.captures(p).ok_or_else(|| {
        CfgMgrError::invalid_port(
            p,
            "expected port number (e.g. 8080) or port range (e.g. 8080-8090)",
        )
    })?;

    let parse = |s: &str| -> CfgMgrResult<u16> {
        s.parse()
            .map_err(|e| CfgMgrError::invalid_port(p, format!("{:?}: {}", s, e)))
    };
    let min = parse(&caps[1])?;
    let max = match caps.get(2) {
        Some(m) => parse(m.as_str())?,
        None => min,
    };
    if max < min {
        return Err(CfgMgrError::invalid_port(
            p,
            format!("range end {} is below range start {}", max, min),
        ));
    }
    Ok(PortRange { min, max })
}

/// Maps a protocol name to its number. An empty name means TCP.
pub fn parse_proto(proto: &str) -> CfgMgrResult<u8> {
    match proto {
        "" | "tcp" => Ok(IPPROTO_TCP),
        "udp" => Ok(IPPROTO_UDP),
        other => Err(CfgMgrError::invalid_config(
            "proto",
            format!("unknown proto {:?}, expected \"tcp\" or \"udp\"", other),
        )),
    }
}

fn match_ifname(key: MetaKey, ifname: &str) -> [MatchOrTransform; 2] {
    [
        MatchOrTransform::Meta {
            key,
            dreg: Register::R1,
        },
        MatchOrTransform::Cmp {
            op: CmpOp::Eq,
            sreg: Register::R1,
            data: Literal::IfName(ifname.to_string()),
        },
    ]
}

fn match_l4proto(proto: u8) -> [MatchOrTransform; 2] {
    [
        MatchOrTransform::Meta {
            key: MetaKey::L4Proto,
            dreg: Register::R1,
        },
        MatchOrTransform::Cmp {
            op: CmpOp::Eq,
            sreg: Register::R1,
            data: Literal::Proto(proto),
        },
    ]
}

/// Destination NAT of `ports` arriving on `ifname` to `dest:dports`.
pub fn port_forward_exprs(
    ifname: &str,
    proto: u8,
    ports: PortRange,
    dest: Ipv4Addr,
    dports: PortRange,
) -> Vec<MatchOrTransform> {
    let mut exprs = Vec::new();
    exprs.extend(match_ifname(MetaKey::IifName, ifname));
    exprs.extend(match_l4proto(proto));
    exprs.push(MatchOrTransform::Payload {
        dreg: Register::R1,
        base: PayloadBase::Transport,
        offset: DPORT_OFFSET,
        len: 2,
    });

    if ports.is_single() {
        exprs.push(MatchOrTransform::Cmp {
            op: CmpOp::Eq,
            sreg: Register::R1,
            data: Literal::Port(ports.min),
        });
    } else {
        exprs.push(MatchOrTransform::Cmp {
            op: CmpOp::Gte,
            sreg: Register::R1,
            data: Literal::Port(ports.min),
        });
        exprs.push(MatchOrTransform::Cmp {
            op: CmpOp::Lte,
            sreg: Register::R1,
            data: Literal::Port(ports.max),
        });
    }

    exprs.push(MatchOrTransform::Immediate {
        dreg: Register::R1,
        data: Literal::Ipv4(dest),
    });
    exprs.push(MatchOrTransform::Immediate {
        dreg: Register::R2,
        data: Literal::Port(dports.min),
    });
    let reg_proto_max = if dports.is_single() {
        None
    } else {
        exprs.push(MatchOrTransform::Immediate {
            dreg: Register::R3,
            data: Literal::Port(dports.max),
        });
        Some(Register::R3)
    };
    exprs.push(MatchOrTransform::Nat {
        nat_type: NatType::DestNat,
        family: AddressFamily::V4,
        reg_addr_min: Register::R1,
        reg_proto_min: Some(Register::R2),
        reg_proto_max,
    });
    exprs
}

/// Source NAT of everything leaving through `ifname`.
pub fn masquerade_exprs(ifname: &str) -> Vec<MatchOrTransform> {
    let mut exprs = match_ifname(MetaKey::OifName, ifname).to_vec();
    exprs.push(MatchOrTransform::Masquerade);
    exprs
}

/// Clamps the MSS option of TCP SYNs leaving through `ifname` to the route
/// MTU.
pub fn mss_clamp_exprs(ifname: &str) -> Vec<MatchOrTransform> {
    let mut exprs = Vec::new();
    exprs.extend(match_ifname(MetaKey::OifName, ifname));
    exprs.extend(match_l4proto(IPPROTO_TCP));
    exprs.extend([
        MatchOrTransform::Payload {
            dreg: Register::R1,
            base: PayloadBase::Transport,
            offset: TCP_FLAGS_OFFSET,
            len: 1,
        },
        MatchOrTransform::Bitwise {
            sreg: Register::R1,
            dreg: Register::R1,
            len: 1,
            mask: vec![TCP_FLAG_SYN],
            xor: vec![0x00],
        },
        MatchOrTransform::Cmp {
            op: CmpOp::Neq,
            sreg: Register::R1,
            data: Literal::Bytes(vec![0x00]),
        },
        MatchOrTransform::Meta {
            key: MetaKey::RtTcpMss,
            dreg: Register::R1,
        },
        MatchOrTransform::Byteorder {
            sreg: Register::R1,
            dreg: Register::R1,
            op: ByteorderOp::Hton,
            len: 2,
            size: 2,
        },
        MatchOrTransform::TcpOptionWrite {
            sreg: Register::R1,
            option: TcpOption::MaxSeg,
            offset: 2,
            len: 2,
        },
    ]);
    exprs
}

/// Counts packets by referencing the named counter.
pub fn counter_ref_exprs(name: &str) -> Vec<MatchOrTransform> {
    vec![MatchOrTransform::Objref {
        object_type: ObjectType::Counter,
        name: name.to_string(),
    }]
}

/// Compiles one declared forwarding into one rule per protocol.
pub fn forwarding_rules(
    nat: &Table,
    chain: &str,
    ifname: &str,
    fw: &PortForwarding,
) -> CfgMgrResult<Vec<Rule>> {
    let dest: Ipv4Addr = fw.dest_addr.parse().map_err(|_| {
        CfgMgrError::invalid_config(
            "dest_addr",
            format!("{:?} is not an IPv4 address", fw.dest_addr),
        )
    })?;
    let ports = parse_port(&fw.port)?;
    let dports = parse_port(&fw.dest_port)?;

    fw.proto
        .split(',')
        .map(|proto| {
            let proto = parse_proto(proto)?;
            Rule::new(
                nat,
                chain,
                port_forward_exprs(ifname, proto, ports, dest, dports),
            )
        })
        .collect()
}

/// Builds the complete ruleset.
///
/// Without an uplink, the uplink-scoped rules (masquerade, forwardings, MSS
/// clamping) are left out; tables, chains and counters are still created.
/// Counters start from the values in `prior`.
pub fn build_ruleset(
    uplink: Option<&str>,
    forwardings: &[PortForwarding],
    prior: &CounterSnapshot,
) -> CfgMgrResult<Batch> {
    let mut batch = Batch::new();

    let nat = batch.add_table(AddressFamily::V4, "nat");
    let prerouting = batch.add_chain(
        &nat,
        "prerouting",
        ChainHook::Prerouting,
        priority::FILTER,
        ChainType::Nat,
    );
    let postrouting = batch.add_chain(
        &nat,
        "postrouting",
        ChainHook::Postrouting,
        priority::NAT_SOURCE,
        ChainType::Nat,
    );

    match uplink {
        Some(ifname) => {
            batch.add_rule(Rule::new(&nat, &postrouting, masquerade_exprs(ifname))?);
            for fw in forwardings {
                for rule in forwarding_rules(&nat, &prerouting, ifname, fw)? {
                    batch.add_rule(rule);
                }
            }
        }
        None => warn!("No uplink interface, skipping masquerade, port forwardings and MSS clamping"),
    }

    for family in [AddressFamily::V4, AddressFamily::V6] {
        let filter = batch.add_table(family, "filter");
        let forward = batch.add_chain(
            &filter,
            "forward",
            ChainHook::Forward,
            priority::FILTER,
            ChainType::Filter,
        );

        if let Some(ifname) = uplink {
            batch.add_rule(Rule::new(&filter, &forward, mss_clamp_exprs(ifname))?);
        }

        batch.add_counter(CounterObject {
            table: filter.clone(),
            name: FORWARD_COUNTER.to_string(),
            value: prior.get(&filter, FORWARD_COUNTER),
        });
        batch.add_rule(Rule::new(
            &filter,
            &forward,
            counter_ref_exprs(FORWARD_COUNTER),
        )?);
    }

    Ok(batch)
}

/// Reads the counters that [`build_ruleset`] recreates. Counters that
/// cannot be read start from zero.
pub async fn read_counters(filter: &dyn PacketFilter) -> CounterSnapshot {
    let mut snapshot = CounterSnapshot::new();
    for family in [AddressFamily::V4, AddressFamily::V6] {
        let table = Table::new(family, "filter");
        match filter.counter(&table, FORWARD_COUNTER).await {
            Ok(Some(value)) => snapshot.insert(&table, FORWARD_COUNTER, value),
            Ok(None) => debug!("No counter {} in {} yet", FORWARD_COUNTER, table),
            Err(e) => warn!(
                "Could not carry counter values of {} {}: {}",
                table, FORWARD_COUNTER, e
            ),
        }
    }
    snapshot
}

/// Replaces the packet filter ruleset with one compiled from
/// `portforwardings.json` in `config_dir`.
///
/// Counter values are read before the flush so that they survive it. If
/// compilation fails nothing is committed.
#[instrument(skip(filter))]
pub async fn compile_firewall(
    filter: &dyn PacketFilter,
    config_dir: &Path,
    uplink: Option<&str>,
) -> CfgMgrResult<()> {
    let forwardings = PortForwardings::load(config_dir).await?;
    let prior = read_counters(filter).await;
    let batch = build_ruleset(uplink, &forwardings.forwardings, &prior)?;
    filter.commit(&batch).await?;
    info!(
        forwardings = forwardings.forwardings.len(),
        ops = batch.ops().len(),
        "Committed packet filter ruleset"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nft::ruleset::{BatchOp, CounterValue};
    use pretty_assertions::assert_eq;

    fn fw(proto: &str, port: &str, dest_port: &str) -> PortForwarding {
        PortForwarding {
            proto: proto.to_string(),
            port: port.to_string(),
            dest_addr: "192.168.42.2".to_string(),
            dest_port: dest_port.to_string(),
        }
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("8080").unwrap(), PortRange { min: 8080, max: 8080 });
        assert_eq!(parse_port("8080-8090").unwrap(), PortRange { min: 8080, max: 8090 });
        assert_eq!(parse_port("0").unwrap(), PortRange { min: 0, max: 0 });
    }

    #[test]
    fn test_parse_port_rejects_malformed() {
        for bad in ["", "abc", "80-", "-80", "80-90-100", " 80", "65536", "0x50", "80,90"] {
            let err = parse_port(bad).unwrap_err();
            assert!(
                matches!(err, CfgMgrError::InvalidPort { ref port, .. } if port == bad),
                "{:?} accepted or wrong error: {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_parse_port_rejects_inverted_range() {
        let err = parse_port("90-80").unwrap_err();
        assert!(err.to_string().contains("range end 80 is below range start 90"));
    }

    #[test]
    fn test_parse_proto() {
        assert_eq!(parse_proto("").unwrap(), IPPROTO_TCP);
        assert_eq!(parse_proto("tcp").unwrap(), IPPROTO_TCP);
        assert_eq!(parse_proto("udp").unwrap(), IPPROTO_UDP);
        assert!(parse_proto("sctp").is_err());
        assert!(parse_proto("TCP").is_err());
    }

    #[test]
    fn test_port_forward_single_port() {
        let exprs = port_forward_exprs(
            "uplink0",
            IPPROTO_TCP,
            parse_port("8080").unwrap(),
            Ipv4Addr::new(192, 168, 42, 2),
            parse_port("80").unwrap(),
        );
        assert_eq!(
            exprs,
            vec![
                MatchOrTransform::Meta { key: MetaKey::IifName, dreg: Register::R1 },
                MatchOrTransform::Cmp {
                    op: CmpOp::Eq,
                    sreg: Register::R1,
                    data: Literal::IfName("uplink0".to_string()),
                },
                MatchOrTransform::Meta { key: MetaKey::L4Proto, dreg: Register::R1 },
                MatchOrTransform::Cmp { op: CmpOp::Eq, sreg: Register::R1, data: Literal::Proto(6) },
                MatchOrTransform::Payload {
                    dreg: Register::R1,
                    base: PayloadBase::Transport,
                    offset: 2,
                    len: 2,
                },
                MatchOrTransform::Cmp { op: CmpOp::Eq, sreg: Register::R1, data: Literal::Port(8080) },
                MatchOrTransform::Immediate {
                    dreg: Register::R1,
                    data: Literal::Ipv4(Ipv4Addr::new(192, 168, 42, 2)),
                },
                MatchOrTransform::Immediate { dreg: Register::R2, data: Literal::Port(80) },
                MatchOrTransform::Nat {
                    nat_type: NatType::DestNat,
                    family: AddressFamily::V4,
                    reg_addr_min: Register::R1,
                    reg_proto_min: Some(Register::R2),
                    reg_proto_max: None,
                },
            ]
        );
    }

    #[test]
    fn test_port_forward_range() {
        let exprs = port_forward_exprs(
            "uplink0",
            IPPROTO_UDP,
            parse_port("8080-8090").unwrap(),
            Ipv4Addr::new(192, 168, 42, 2),
            parse_port("80-90").unwrap(),
        );
        assert_eq!(
            exprs[5..].to_vec(),
            vec![
                MatchOrTransform::Cmp { op: CmpOp::Gte, sreg: Register::R1, data: Literal::Port(8080) },
                MatchOrTransform::Cmp { op: CmpOp::Lte, sreg: Register::R1, data: Literal::Port(8090) },
                MatchOrTransform::Immediate {
                    dreg: Register::R1,
                    data: Literal::Ipv4(Ipv4Addr::new(192, 168, 42, 2)),
                },
                MatchOrTransform::Immediate { dreg: Register::R2, data: Literal::Port(80) },
                MatchOrTransform::Immediate { dreg: Register::R3, data: Literal::Port(90) },
                MatchOrTransform::Nat {
                    nat_type: NatType::DestNat,
                    family: AddressFamily::V4,
                    reg_addr_min: Register::R1,
                    reg_proto_min: Some(Register::R2),
                    reg_proto_max: Some(Register::R3),
                },
            ]
        );
        assert_eq!(
            exprs[3],
            MatchOrTransform::Cmp { op: CmpOp::Eq, sreg: Register::R1, data: Literal::Proto(17) }
        );
    }

    #[test]
    fn test_mss_clamp_exprs() {
        let exprs = mss_clamp_exprs("uplink0");
        assert_eq!(exprs.len(), 10);
        assert_eq!(
            exprs[4],
            MatchOrTransform::Payload {
                dreg: Register::R1,
                base: PayloadBase::Transport,
                offset: 13,
                len: 1,
            }
        );
        assert_eq!(
            exprs[9],
            MatchOrTransform::TcpOptionWrite {
                sreg: Register::R1,
                option: TcpOption::MaxSeg,
                offset: 2,
                len: 2,
            }
        );
    }

    #[test]
    fn test_combined_proto_expands() {
        let nat = Table::new(AddressFamily::V4, "nat");
        let rules = forwarding_rules(&nat, "prerouting", "uplink0", &fw("tcp,udp", "53", "53")).unwrap();
        let protos: Vec<&MatchOrTransform> = rules.iter().map(|r| &r.exprs[3]).collect();
        assert_eq!(
            protos,
            vec![
                &MatchOrTransform::Cmp { op: CmpOp::Eq, sreg: Register::R1, data: Literal::Proto(6) },
                &MatchOrTransform::Cmp { op: CmpOp::Eq, sreg: Register::R1, data: Literal::Proto(17) },
            ]
        );
    }

    #[test]
    fn test_forwarding_rejects_bad_input() {
        let nat = Table::new(AddressFamily::V4, "nat");
        assert!(forwarding_rules(&nat, "prerouting", "uplink0", &fw("icmp", "80", "80")).is_err());
        assert!(forwarding_rules(&nat, "prerouting", "uplink0", &fw("tcp", "abc", "80")).is_err());
        assert!(forwarding_rules(&nat, "prerouting", "uplink0", &fw("tcp", "80", "90-80")).is_err());

        let mut v6 = fw("tcp", "80", "80");
        v6.dest_addr = "2001:db8::2".to_string();
        assert!(forwarding_rules(&nat, "prerouting", "uplink0", &v6).is_err());
    }

    #[test]
    fn test_build_ruleset_layout() {
        let batch = build_ruleset(
            Some("uplink0"),
            &[fw("", "8080", "80"), fw("tcp,udp", "5000-5010", "5000-5010")],
            &CounterSnapshot::new(),
        )
        .unwrap();

        let tables: Vec<String> = batch.tables().map(|t| t.to_string()).collect();
        assert_eq!(tables, vec!["ip nat", "ip filter", "ip6 filter"]);

        let chains: Vec<(String, ChainHook, i32, ChainType)> = batch
            .chains()
            .map(|c| (format!("{} {}", c.table, c.name), c.hook, c.priority, c.chain_type))
            .collect();
        assert_eq!(
            chains,
            vec![
                ("ip nat prerouting".to_string(), ChainHook::Prerouting, 0, ChainType::Nat),
                ("ip nat postrouting".to_string(), ChainHook::Postrouting, 100, ChainType::Nat),
                ("ip filter forward".to_string(), ChainHook::Forward, 0, ChainType::Filter),
                ("ip6 filter forward".to_string(), ChainHook::Forward, 0, ChainType::Filter),
            ]
        );

        let nat = Table::new(AddressFamily::V4, "nat");
        assert_eq!(batch.rules_in(&nat, "prerouting").count(), 3);
        assert_eq!(
            batch.rules_in(&nat, "postrouting").next().map(|r| r.exprs.clone()),
            Some(masquerade_exprs("uplink0"))
        );

        for family in [AddressFamily::V4, AddressFamily::V6] {
            let filter = Table::new(family, "filter");
            let rules: Vec<&Rule> = batch.rules_in(&filter, "forward").collect();
            assert_eq!(rules.len(), 2);
            assert_eq!(rules[0].exprs, mss_clamp_exprs("uplink0"));
            assert_eq!(rules[1].exprs, counter_ref_exprs(FORWARD_COUNTER));
        }
    }

    #[test]
    fn test_build_ruleset_counter_precedes_reference() {
        let batch = build_ruleset(Some("uplink0"), &[], &CounterSnapshot::new()).unwrap();
        let counter_pos = batch
            .ops()
            .iter()
            .position(|op| matches!(op, BatchOp::AddCounter(_)))
            .unwrap();
        let ref_pos = batch
            .ops()
            .iter()
            .position(|op| matches!(op, BatchOp::AddRule(r) if r.exprs == counter_ref_exprs(FORWARD_COUNTER)))
            .unwrap();
        assert!(counter_pos < ref_pos);
    }

    #[test]
    fn test_build_ruleset_without_uplink() {
        let batch = build_ruleset(None, &[fw("tcp", "8080", "80")], &CounterSnapshot::new()).unwrap();
        assert_eq!(batch.tables().count(), 3);
        assert_eq!(batch.chains().count(), 4);
        assert_eq!(batch.counters().count(), 2);

        let rules: Vec<&MatchOrTransform> = batch
            .ops()
            .iter()
            .filter_map(|op| match op {
                BatchOp::AddRule(r) => Some(&r.exprs[0]),
                _ => None,
            })
            .collect();
        // Only the counter references remain.
        assert_eq!(rules.len(), 2);
        assert!(rules
            .iter()
            .all(|e| matches!(e, MatchOrTransform::Objref { .. })));
    }

    #[test]
    fn test_build_ruleset_seeds_counters() {
        let filter = Table::new(AddressFamily::V4, "filter");
        let mut prior = CounterSnapshot::new();
        prior.insert(&filter, FORWARD_COUNTER, CounterValue { packets: 42, bytes: 4200 });

        let batch = build_ruleset(Some("uplink0"), &[], &prior).unwrap();
        let values: Vec<(String, CounterValue)> = batch
            .counters()
            .map(|c| (c.table.to_string(), c.value))
            .collect();
        assert_eq!(
            values,
            vec![
                ("ip filter".to_string(), CounterValue { packets: 42, bytes: 4200 }),
                ("ip6 filter".to_string(), CounterValue::default()),
            ]
        );
    }

    #[test]
    fn test_build_ruleset_fails_whole_compile() {
        let result = build_ruleset(
            Some("uplink0"),
            &[fw("tcp", "8080", "80"), fw("tcp", "80-", "80")],
            &CounterSnapshot::new(),
        );
        assert!(matches!(result, Err(CfgMgrError::InvalidPort { .. })));
    }
}
