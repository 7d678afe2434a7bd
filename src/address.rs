//! Chain port addressing
//!
//! Every packet in the chain carries a 4-bit port address describing where it
//! belongs relative to the current hop. Each hop downstream consumes one unit
//! of address and each hop upstream adds one back.

use std::fmt;
use thiserror::Error;

/// Error returned when a raw value does not fit the 4-bit address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("port address {0} is outside 0-15")]
    OutOfRange(u8),
}

/// Bounded port address (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PortAddress(u8);

impl PortAddress {
    /// This device, relative to the current hop
    pub const LOCAL: PortAddress = PortAddress(0);
    /// Reserved "broadcast/none" address, never forwarded upstream
    pub const TERMINATOR: PortAddress = PortAddress(0x0F);
    /// Highest address that still identifies a real device
    pub const MAX_ROUTABLE: PortAddress = PortAddress(14);

    pub fn new(value: u8) -> Result<Self, AddressError> {
        if value <= Self::TERMINATOR.0 {
            Ok(Self(value))
        } else {
            Err(AddressError::OutOfRange(value))
        }
    }

    /// Build an address from the low nibble of a byte (USB-MIDI cable field)
    #[inline]
    pub const fn from_nibble(byte: u8) -> Self {
        Self(byte & 0x0F)
    }

    #[inline]
    pub const fn value(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_local(self) -> bool {
        self.0 == Self::LOCAL.0
    }

    #[inline]
    pub const fn is_terminator(self) -> bool {
        self.0 == Self::TERMINATOR.0
    }

    /// Address as seen by the next device downstream.
    ///
    /// `None` for the local address, which has nothing left to consume. The
    /// terminator only bars upstream travel, so 15 goes down as 14.
    pub const fn downstream(self) -> Option<Self> {
        if self.is_local() {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }

    /// Address as seen by the next device upstream.
    ///
    /// `None` for the terminator and for 14, whose re-encoding would collide
    /// with the terminator.
    pub const fn upstream(self) -> Option<Self> {
        if self.0 >= Self::MAX_ROUTABLE.0 {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }
}

impl TryFrom<u8> for PortAddress {
    type Error = AddressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PortAddress> for u8 {
    fn from(value: PortAddress) -> Self {
        value.0
    }
}

impl fmt::Display for PortAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_terminator() {
            write!(f, "port:term")
        } else {
            write!(f, "port:{}", self.0)
        }
    }
}
