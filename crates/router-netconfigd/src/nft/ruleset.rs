//! Tables, chains, rules and counters, and the transaction that installs
//! them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult};
use router_types::AddressFamily;

use super::expr::{MatchOrTransform, Register};

/// A packet filter table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    /// Address family the table applies to.
    pub family: AddressFamily,
    /// Table name.
    pub name: String,
}

impl Table {
    /// Creates a table handle.
    pub fn new(family: AddressFamily, name: impl Into<String>) -> Self {
        Self {
            family,
            name: name.into(),
        }
    }

    /// Returns the family keyword used by `nft` (`ip` or `ip6`).
    pub fn family_keyword(&self) -> &'static str {
        match self.family {
            AddressFamily::V4 => "ip",
            AddressFamily::V6 => "ip6",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.family_keyword(), self.name)
    }
}

/// Netfilter hook a base chain is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainHook {
    /// Before routing.
    Prerouting,
    /// After routing, on the way out.
    Postrouting,
    /// Routed packets not destined for this host.
    Forward,
}

impl fmt::Display for ChainHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainHook::Prerouting => "prerouting",
            ChainHook::Postrouting => "postrouting",
            ChainHook::Forward => "forward",
        })
    }
}

/// Base chain type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainType {
    /// Address translation.
    Nat,
    /// Filtering and mangling.
    Filter,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainType::Nat => "nat",
            ChainType::Filter => "filter",
        })
    }
}

/// Standard chain priorities.
pub mod priority {
    /// `NF_IP_PRI_FILTER`.
    pub const FILTER: i32 = 0;
    /// `NF_IP_PRI_NAT_SRC`.
    pub const NAT_SOURCE: i32 = 100;
}

/// A base chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    /// Owning table.
    pub table: Table,
    /// Chain name.
    pub name: String,
    /// Hook.
    pub hook: ChainHook,
    /// Priority within the hook; lower runs first.
    pub priority: i32,
    /// Chain type.
    pub chain_type: ChainType,
}

/// An ordered instruction list in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Owning table.
    pub table: Table,
    /// Owning chain name.
    pub chain: String,
    /// Instructions, executed in order.
    pub exprs: Vec<MatchOrTransform>,
}

impl Rule {
    /// Creates a rule, rejecting instruction lists that read a register
    /// before writing it.
    pub fn new(
        table: &Table,
        chain: impl Into<String>,
        exprs: Vec<MatchOrTransform>,
    ) -> CfgMgrResult<Self> {
        let rule = Self {
            table: table.clone(),
            chain: chain.into(),
            exprs,
        };
        rule.check_registers()?;
        Ok(rule)
    }

    /// Checks that every register read was written by an earlier
    /// instruction of this rule.
    pub fn check_registers(&self) -> CfgMgrResult<()> {
        let mut written: HashSet<Register> = HashSet::new();
        for (idx, expr) in self.exprs.iter().enumerate() {
            for reg in expr.reads() {
                if !written.contains(&reg) {
                    return Err(CfgMgrError::netfilter(
                        "check registers",
                        format!(
                            "{} {}: instruction {} ({:?}) reads {} before it is written",
                            self.table, self.chain, idx, expr, reg
                        ),
                    ));
                }
            }
            if let Some(reg) = expr.writes() {
                if usize::from(reg.number()) >= Register::COUNT {
                    return Err(CfgMgrError::netfilter(
                        "check registers",
                        format!("{} {}: no such register {}", self.table, self.chain, reg),
                    ));
                }
                written.insert(reg);
            }
        }
        Ok(())
    }
}

/// Packet and byte totals of a counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CounterValue {
    /// Packets counted.
    pub packets: u64,
    /// Bytes counted.
    pub bytes: u64,
}

/// A named counter object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterObject {
    /// Owning table.
    pub table: Table,
    /// Object name.
    pub name: String,
    /// Initial value.
    pub value: CounterValue,
}

/// Counter values read from the kernel before the ruleset is replaced, keyed
/// by table and object name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    values: HashMap<(Table, String), CounterValue>,
}

impl CounterSnapshot {
    /// Creates an empty snapshot; every counter starts at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value of a counter.
    pub fn insert(&mut self, table: &Table, name: &str, value: CounterValue) {
        self.values.insert((table.clone(), name.to_string()), value);
    }

    /// Returns the recorded value, or zero.
    pub fn get(&self, table: &Table, name: &str) -> CounterValue {
        self.values
            .get(&(table.clone(), name.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Returns the number of recorded counters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no counters were recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One step of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Remove every table.
    FlushRuleset,
    /// Create a table.
    AddTable(Table),
    /// Create a base chain.
    AddChain(Chain),
    /// Append a rule.
    AddRule(Rule),
    /// Create a counter object.
    AddCounter(CounterObject),
}

/// An ordered set of changes committed as one transaction. Every batch
/// starts by flushing the ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// Creates a batch that flushes the ruleset.
    pub fn new() -> Self {
        Self {
            ops: vec![BatchOp::FlushRuleset],
        }
    }

    /// Appends a table and returns it.
    pub fn add_table(&mut self, family: AddressFamily, name: &str) -> Table {
        let table = Table::new(family, name);
        self.ops.push(BatchOp::AddTable(table.clone()));
        table
    }

    /// Appends a base chain and returns its name.
    pub fn add_chain(
        &mut self,
        table: &Table,
        name: &str,
        hook: ChainHook,
        priority: i32,
        chain_type: ChainType,
    ) -> String {
        self.ops.push(BatchOp::AddChain(Chain {
            table: table.clone(),
            name: name.to_string(),
            hook,
            priority,
            chain_type,
        }));
        name.to_string()
    }

    /// Appends a rule.
    pub fn add_rule(&mut self, rule: Rule) {
        self.ops.push(BatchOp::AddRule(rule));
    }

    /// Appends a counter object.
    pub fn add_counter(&mut self, counter: CounterObject) {
        self.ops.push(BatchOp::AddCounter(counter));
    }

    /// Returns all steps in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Returns the tables created by this batch.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.ops.iter().filter_map(|op| match op {
            BatchOp::AddTable(t) => Some(t),
            _ => None,
        })
    }

    /// Returns the chains created by this batch.
    pub fn chains(&self) -> impl Iterator<Item = &Chain> {
        self.ops.iter().filter_map(|op| match op {
            BatchOp::AddChain(c) => Some(c),
            _ => None,
        })
    }

    /// Returns the counters created by this batch.
    pub fn counters(&self) -> impl Iterator<Item = &CounterObject> {
        self.ops.iter().filter_map(|op| match op {
            BatchOp::AddCounter(c) => Some(c),
            _ => None,
        })
    }

    /// Returns the rules appended to one chain, in order.
    pub fn rules_in<'a>(
        &'a self,
        table: &'a Table,
        chain: &'a str,
    ) -> impl Iterator<Item = &'a Rule> + 'a {
        self.ops.iter().filter_map(move |op| match op {
            BatchOp::AddRule(r) if &r.table == table && r.chain == chain => Some(r),
            _ => None,
        })
    }
}
