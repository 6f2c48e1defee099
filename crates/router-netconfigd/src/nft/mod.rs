//! Packet filter and NAT rules.
//!
//! - [`expr`]: register machine instructions
//! - [`ruleset`]: tables, chains, rules, counters and the batch transaction
//! - [`compiler`]: lowering of declared forwardings and fixed policies
//! - [`render`]: `nft -f` script generation
//! - [`control`]: the [`PacketFilter`] capability

pub mod compiler;
pub mod control;
pub mod expr;
pub mod render;
pub mod ruleset;

pub use compiler::{build_ruleset, compile_firewall, parse_port, PortRange, FORWARD_COUNTER};
pub use control::{NftControl, PacketFilter};
pub use expr::{MatchOrTransform, Register};
pub use ruleset::{Batch, BatchOp, CounterSnapshot, CounterValue, Rule, Table};
