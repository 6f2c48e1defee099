//! Match and transform instructions executed by the packet filter's register
//! machine.

use std::fmt;
use std::net::Ipv4Addr;

use router_types::AddressFamily;

/// A scratch register. Every rule starts with all registers unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u8);

impl Register {
    /// First general purpose register.
    pub const R1: Register = Register(1);
    /// Second general purpose register.
    pub const R2: Register = Register(2);
    /// Third general purpose register.
    pub const R3: Register = Register(3);

    /// Number of registers available to a rule.
    pub const COUNT: usize = 4;

    /// Returns the register number.
    pub const fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg {}", self.0)
    }
}

/// Packet or route metadata that can be loaded into a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    /// Input interface name.
    IifName,
    /// Output interface name.
    OifName,
    /// Layer 4 protocol number.
    L4Proto,
    /// TCP maximum segment size derived from the route MTU.
    RtTcpMss,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
}

/// Header a payload offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadBase {
    /// Link layer header.
    LinkLayer,
    /// Network header.
    Network,
    /// Transport header.
    Transport,
}

/// Byte order conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteorderOp {
    /// Host to network.
    Hton,
    /// Network to host.
    Ntoh,
}

/// NAT flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatType {
    /// Rewrite the source.
    SourceNat,
    /// Rewrite the destination.
    DestNat,
}

/// TCP option kinds the filter can rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpOption {
    /// Maximum segment size (kind 2).
    MaxSeg,
}

impl TcpOption {
    /// Option kind number.
    pub const fn kind(&self) -> u8 {
        match self {
            TcpOption::MaxSeg => 2,
        }
    }
}

/// Kinds of stateful objects a rule can reference by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Packet and byte counter.
    Counter,
}

/// Typed immediate value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    /// Interface name.
    IfName(String),
    /// IP protocol number.
    Proto(u8),
    /// Transport port.
    Port(u16),
    /// IPv4 address.
    Ipv4(Ipv4Addr),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// One instruction of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchOrTransform {
    /// Load metadata into `dreg`.
    Meta {
        /// What to load.
        key: MetaKey,
        /// Destination register.
        dreg: Register,
    },
    /// Compare `sreg` against a literal; the rule stops matching if false.
    Cmp {
        /// Operator.
        op: CmpOp,
        /// Register under test.
        sreg: Register,
        /// Value to compare against.
        data: Literal,
    },
    /// Load `len` bytes at `offset` from a header into `dreg`.
    Payload {
        /// Destination register.
        dreg: Register,
        /// Header.
        base: PayloadBase,
        /// Byte offset into the header.
        offset: u32,
        /// Number of bytes.
        len: u32,
    },
    /// `dreg = (sreg & mask) ^ xor`.
    Bitwise {
        /// Source register.
        sreg: Register,
        /// Destination register.
        dreg: Register,
        /// Operand length in bytes.
        len: u32,
        /// AND mask.
        mask: Vec<u8>,
        /// XOR value.
        xor: Vec<u8>,
    },
    /// Set `dreg` to a literal.
    Immediate {
        /// Destination register.
        dreg: Register,
        /// Value.
        data: Literal,
    },
    /// Convert the byte order of `sreg` into `dreg`.
    Byteorder {
        /// Source register.
        sreg: Register,
        /// Destination register.
        dreg: Register,
        /// Direction.
        op: ByteorderOp,
        /// Total length in bytes.
        len: u32,
        /// Element size in bytes.
        size: u32,
    },
    /// Overwrite a field of a TCP option with `sreg`.
    TcpOptionWrite {
        /// Source register.
        sreg: Register,
        /// Option to rewrite.
        option: TcpOption,
        /// Offset of the field within the option.
        offset: u32,
        /// Field length in bytes.
        len: u32,
    },
    /// Rewrite addresses and ports.
    Nat {
        /// Source or destination NAT.
        nat_type: NatType,
        /// Address family of `reg_addr_min`.
        family: AddressFamily,
        /// Register holding the new address.
        reg_addr_min: Register,
        /// Register holding the new port, or the start of a port range.
        reg_proto_min: Option<Register>,
        /// Register holding the end of a port range.
        reg_proto_max: Option<Register>,
    },
    /// Rewrite the source to the output interface's address.
    Masquerade,
    /// Reference a named stateful object.
    Objref {
        /// Object kind.
        object_type: ObjectType,
        /// Object name.
        name: String,
    },
}

impl MatchOrTransform {
    /// Registers this instruction reads.
    pub fn reads(&self) -> Vec<Register> {
        match self {
            MatchOrTransform::Cmp { sreg, .. }
            | MatchOrTransform::Bitwise { sreg, .. }
            | MatchOrTransform::Byteorder { sreg, .. }
            | MatchOrTransform::TcpOptionWrite { sreg, .. } => vec![*sreg],
            MatchOrTransform::Nat {
                reg_addr_min,
                reg_proto_min,
                reg_proto_max,
                ..
            } => std::iter::once(*reg_addr_min)
                .chain(*reg_proto_min)
                .chain(*reg_proto_max)
                .collect(),
            MatchOrTransform::Meta { .. }
            | MatchOrTransform::Payload { .. }
            | MatchOrTransform::Immediate { .. }
            | MatchOrTransform::Masquerade
            | MatchOrTransform::Objref { .. } => Vec::new(),
        }
    }

    /// Register this instruction writes, if any.
    pub fn writes(&self) -> Option<Register> {
        match self {
            MatchOrTransform::Meta { dreg, .. }
            | MatchOrTransform::Payload { dreg, .. }
            | MatchOrTransform::Bitwise { dreg, .. }
            | MatchOrTransform::Immediate { dreg, .. }
            | MatchOrTransform::Byteorder { dreg, .. } => Some(*dreg),
            _ => None,
        }
    }
}
