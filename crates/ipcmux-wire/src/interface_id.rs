use std::fmt;

/// Identifier of one logical endpoint multiplexed over a pipe.
///
/// The most significant bit records which side of the pipe minted the id,
/// so both peers can allocate without coordinating. `0` is the primary
/// interface of the pipe and `u32::MAX` is reserved as "invalid"; messages
/// carrying the invalid id belong to the pipe control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(u32);

impl InterfaceId {
    /// Bit set on ids minted by the side configured to set it.
    pub const NAMESPACE_MASK: u32 = 0x8000_0000;

    /// The primary interface of a pipe.
    pub const MASTER: InterfaceId = InterfaceId(0);

    /// Sentinel for "no interface".
    pub const INVALID: InterfaceId = InterfaceId(u32::MAX);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    pub const fn is_master(self) -> bool {
        self.0 == Self::MASTER.0
    }

    /// Whether the namespace bit is set.
    pub const fn has_namespace_bit(self) -> bool {
        self.is_valid() && self.0 & Self::NAMESPACE_MASK != 0
    }
}

impl Default for InterfaceId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{:#010x}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}
