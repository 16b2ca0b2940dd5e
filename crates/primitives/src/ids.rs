//! Provides identifiers such as `TxIndex`.
use core::fmt;

/// The position of a transaction within its block.
///
/// The serialization order of a block is the order of `TxIndex`,
/// regardless of the order in which transactions actually executed.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(transparent)]
pub struct TxIndex(pub u32);

impl TxIndex {
    /// The first transaction of a block.
    pub const ZERO: Self = Self(0);

    /// Returns the index directly after this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// A numbered attempt at executing one transaction.
///
/// The first execution is incarnation zero;
/// every re-execution of the same [`TxIndex`] bumps it by one.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
#[repr(transparent)]
pub struct Incarnation(pub u32);

impl Incarnation {
    pub const ZERO: Self = Self(0);

    /// Returns the incarnation following this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

macro_rules! system_id {
    ($name:ident) => {
        impl $name {
            pub fn idx(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
        impl From<$name> for usize {
            fn from(value: $name) -> Self {
                value.0 as usize
            }
        }
        impl From<usize> for $name {
            fn from(value: usize) -> Self {
                debug_assert!(value <= u32::MAX as usize, "`{value}` does not fit in a {}", stringify!($name));
                Self(value as u32)
            }
        }
        impl nohash_hasher::IsEnabled for $name {}
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
system_id!(TxIndex);
system_id!(Incarnation);
