//! Rendering batches as `nft -f` scripts.
//!
//! `nft` has no syntax for raw register operations, so each rule is replayed
//! symbolically: loads bind a register to an expression, and the
//! instructions that consume registers print the expression they hold.

use std::fmt::Write as _;

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};

use super::expr::{
    CmpOp, Literal, MatchOrTransform, MetaKey, NatType, ObjectType, PayloadBase, Register, TcpOption,
};
use super::ruleset::{Batch, BatchOp, Chain, CounterObject, Rule};

/// What a register holds while a rule is replayed.
#[derive(Debug, Clone)]
enum Value {
    /// Result of a packet or route expression, e.g. `iifname`.
    Expr(String),
    /// A constant.
    Const(String),
}

impl Value {
    fn text(&self) -> &str {
        match self {
            Value::Expr(s) | Value::Const(s) => s,
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal(data: &Literal) -> String {
    match data {
        Literal::IfName(name) => quote(name),
        Literal::Proto(p) => p.to_string(),
        Literal::Port(p) => p.to_string(),
        Literal::Ipv4(addr) => addr.to_string(),
        Literal::Bytes(bytes) => hex(bytes),
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::from("0x");
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn meta(key: MetaKey) -> &'static str {
    match key {
        MetaKey::IifName => "iifname",
        MetaKey::OifName => "oifname",
        MetaKey::L4Proto => "meta l4proto",
        MetaKey::RtTcpMss => "rt mtu",
    }
}

fn payload_base(base: PayloadBase) -> &'static str {
    match base {
        PayloadBase::LinkLayer => "ll",
        PayloadBase::Network => "nh",
        PayloadBase::Transport => "th",
    }
}

fn cmp_op(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "",
        CmpOp::Neq => "!= ",
        CmpOp::Gte => ">= ",
        CmpOp::Lte => "<= ",
    }
}

fn tcp_option(option: TcpOption, offset: u32, len: u32) -> CfgMgrResult<&'static str> {
    match (option, offset, len) {
        (TcpOption::MaxSeg, 2, 2) => Ok("tcp option maxseg size"),
        _ => Err(CfgMgrError::netfilter(
            "render",
            format!(
                "no nft syntax for tcp option kind {} field {}+{}",
                option.kind(),
                offset,
                len
            ),
        )),
    }
}

struct Registers {
    values: [Option<Value>; Register::COUNT],
}

impl Registers {
    fn new() -> Self {
        Self {
            values: Default::default(),
        }
    }

    fn set(&mut self, reg: Register, value: Value) -> CfgMgrResult<()> {
        let slot = self
            .values
            .get_mut(usize::from(reg.number()))
            .ok_or_else(|| CfgMgrError::netfilter("render", format!("no such register {}", reg)))?;
        *slot = Some(value);
        Ok(())
    }

    fn get(&self, reg: Register) -> CfgMgrResult<&Value> {
        self.values
            .get(usize::from(reg.number()))
            .and_then(Option::as_ref)
            .ok_or_else(|| CfgMgrError::netfilter("render", format!("{} read before write", reg)))
    }
}

/// Renders the statement list of one rule.
pub fn render_rule(rule: &Rule) -> CfgMgrResult<String> {
    let mut regs = Registers::new();
    let mut statements: Vec<String> = Vec::new();

    for expr in &rule.exprs {
        match expr {
            MatchOrTransform::Meta { key, dreg } => {
                regs.set(*dreg, Value::Expr(meta(*key).to_string()))?;
            }
            MatchOrTransform::Payload {
                dreg,
                base,
                offset,
                len,
            } => {
                let raw = format!("@{},{},{}", payload_base(*base), offset * 8, len * 8);
                regs.set(*dreg, Value::Expr(raw))?;
            }
            MatchOrTransform::Bitwise {
                sreg,
                dreg,
                mask,
                xor,
                ..
            } => {
                let mut text = format!("{} & {}", regs.get(*sreg)?.text(), hex(mask));
                if xor.iter().any(|b| *b != 0) {
                    let _ = write!(text, " ^ {}", hex(xor));
                }
                regs.set(*dreg, Value::Expr(text))?;
            }
            MatchOrTransform::Byteorder { sreg, dreg, .. } => {
                // nft converts byte order implicitly from the expression type.
                let value = regs.get(*sreg)?.clone();
                regs.set(*dreg, value)?;
            }
            MatchOrTransform::Immediate { dreg, data } => {
                regs.set(*dreg, Value::Const(literal(data)))?;
            }
            MatchOrTransform::Cmp { op, sreg, data } => {
                let lhs = match regs.get(*sreg)? {
                    Value::Expr(e) => e.clone(),
                    Value::Const(c) => {
                        return Err(CfgMgrError::netfilter(
                            "render",
                            format!("comparison against constant {}", c),
                        ))
                    }
                };
                statements.push(format!("{} {}{}", lhs, cmp_op(*op), literal(data)));
            }
            MatchOrTransform::TcpOptionWrite {
                sreg,
                option,
                offset,
                len,
            } => {
                let field = tcp_option(*option, *offset, *len)?;
                statements.push(format!("{} set {}", field, regs.get(*sreg)?.text()));
            }
            MatchOrTransform::Nat {
                nat_type,
                reg_addr_min,
                reg_proto_min,
                reg_proto_max,
                ..
            } => {
                let verb = match nat_type {
                    NatType::DestNat => "dnat",
                    NatType::SourceNat => "snat",
                };
                let mut target = regs.get(*reg_addr_min)?.text().to_string();
                if let Some(min) = reg_proto_min {
                    let _ = write!(target, ":{}", regs.get(*min)?.text());
                    if let Some(max) = reg_proto_max {
                        let _ = write!(target, "-{}", regs.get(*max)?.text());
                    }
                }
                statements.push(format!("{} to {}", verb, target));
            }
            MatchOrTransform::Masquerade => statements.push("masquerade".to_string()),
            MatchOrTransform::Objref { object_type, name } => match object_type {
                ObjectType::Counter => statements.push(format!("counter name {}", quote(name))),
            },
        }
    }
    Ok(statements.join(" "))
}

fn render_chain(chain: &Chain) -> String {
    format!(
        "add chain {} {} {{ type {} hook {} priority {} ; }}",
        chain.table, chain.name, chain.chain_type, chain.hook, chain.priority
    )
}

fn render_counter(counter: &CounterObject) -> String {
    format!(
        "add counter {} {} {{ packets {} bytes {} }}",
        counter.table, counter.name, counter.value.packets, counter.value.bytes
    )
}

/// Renders a batch as one `nft -f` script, applied atomically by `nft`.
pub fn render_batch(batch: &Batch) -> CfgMgrResult<String> {
    let mut script = String::new();
    for op in batch.ops() {
        let line = match op {
            BatchOp::FlushRuleset => "flush ruleset".to_string(),
            BatchOp::AddTable(table) => format!("add table {}", table),
            BatchOp::AddChain(chain) => render_chain(chain),
            BatchOp::AddCounter(counter) => render_counter(counter),
            BatchOp::AddRule(rule) => {
                format!("add rule {} {} {}", rule.table, rule.chain, render_rule(rule)?)
            }
        };
        script.push_str(&line);
        script.push('\n');
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nft::compiler::{build_ruleset, parse_port, port_forward_exprs, IPPROTO_TCP};
    use crate::nft::ruleset::{CounterSnapshot, CounterValue, Table};
    use crate::types::PortForwarding;
    use pretty_assertions::assert_eq;
    use router_types::AddressFamily;
    use std::net::Ipv4Addr;

    fn nat() -> Table {
        Table::new(AddressFamily::V4, "nat")
    }

    #[test]
    fn test_render_port_forward_range() {
        let rule = Rule::new(
            &nat(),
            "prerouting",
            port_forward_exprs(
                "uplink0",
                IPPROTO_TCP,
                parse_port("8080-8090").unwrap(),
                Ipv4Addr::new(192, 168, 42, 2),
                parse_port("80-90").unwrap(),
            ),
        )
        .unwrap();
        assert_eq!(
            render_rule(&rule).unwrap(),
            r#"iifname "uplink0" meta l4proto 6 @th,16,16 >= 8080 @th,16,16 <= 8090 dnat to 192.168.42.2:80-90"#
        );
    }

    #[test]
    fn test_render_rejects_unset_register() {
        let rule = Rule {
            table: nat(),
            chain: "prerouting".to_string(),
            exprs: vec![MatchOrTransform::Cmp {
                op: CmpOp::Eq,
                sreg: Register::R2,
                data: Literal::Proto(6),
            }],
        };
        assert!(render_rule(&rule).is_err());
    }

    #[test]
    fn test_render_batch() {
        let filter = Table::new(AddressFamily::V4, "filter");
        let mut prior = CounterSnapshot::new();
        prior.insert(&filter, "fwded", CounterValue { packets: 7, bytes: 980 });

        let batch = build_ruleset(
            Some("uplink0"),
            &[PortForwarding {
                proto: "udp".to_string(),
                port: "53".to_string(),
                dest_addr: "192.168.42.2".to_string(),
                dest_port: "53".to_string(),
            }],
            &prior,
        )
        .unwrap();

        let expected = [
            "flush ruleset",
            "add table ip nat",
            "add chain ip nat prerouting { type nat hook prerouting priority 0 ; }",
            "add chain ip nat postrouting { type nat hook postrouting priority 100 ; }",
            r#"add rule ip nat postrouting oifname "uplink0" masquerade"#,
            r#"add rule ip nat prerouting iifname "uplink0" meta l4proto 17 @th,16,16 53 dnat to 192.168.42.2:53"#,
            "add table ip filter",
            "add chain ip filter forward { type filter hook forward priority 0 ; }",
            r#"add rule ip filter forward oifname "uplink0" meta l4proto 6 @th,104,8 & 0x02 != 0x00 tcp option maxseg size set rt mtu"#,
            "add counter ip filter fwded { packets 7 bytes 980 }",
            r#"add rule ip filter forward counter name "fwded""#,
            "add table ip6 filter",
            "add chain ip6 filter forward { type filter hook forward priority 0 ; }",
            r#"add rule ip6 filter forward oifname "uplink0" meta l4proto 6 @th,104,8 & 0x02 != 0x00 tcp option maxseg size set rt mtu"#,
            "add counter ip6 filter fwded { packets 0 bytes 0 }",
            r#"add rule ip6 filter forward counter name "fwded""#,
        ];
        let script = render_batch(&batch).unwrap();
        assert_eq!(script.lines().collect::<Vec<_>>(), expected);
    }
}
