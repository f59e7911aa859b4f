//! Overflow policy flags.
use std::fmt;
use std::ops::{BitOr, BitOrAssign, Sub};

/// Determines what happens when a producer writes into a full ring buffer. Flags are combined
/// with `|`, e.g. `OverflowPolicy::PREVENT | OverflowPolicy::EXCEPTION` rejects the item and
/// reports the condition as [`crate::error::Error::Overflow`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OverflowPolicy(u8);

impl OverflowPolicy {
    /// Overwrite the oldest unread item without any notification.
    pub const NONE: OverflowPolicy = OverflowPolicy(0);
    /// Reject the incoming item when the buffer is full.
    pub const PREVENT: OverflowPolicy = OverflowPolicy(1);
    /// Emit a `tracing` warning for each overflow.
    pub const TRACE: OverflowPolicy = OverflowPolicy(1 << 1);
    /// Return an error from `write` for each overflow.
    pub const EXCEPTION: OverflowPolicy = OverflowPolicy(1 << 2);

    const ALL_BITS: u8 = Self::PREVENT.0 | Self::TRACE.0 | Self::EXCEPTION.0;

    /// Raw flag bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Construct policy from raw bits, unknown bits are discarded.
    #[inline]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    /// Check if all flags of `other` are set.
    #[inline]
    pub const fn contains(self, other: OverflowPolicy) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: OverflowPolicy) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OverflowPolicy {
    type Output = OverflowPolicy;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for OverflowPolicy {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl Sub for OverflowPolicy {
    type Output = OverflowPolicy;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Debug for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("NONE");
        }
        let names = [
            (Self::PREVENT, "PREVENT"),
            (Self::TRACE, "TRACE"),
            (Self::EXCEPTION, "EXCEPTION"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
