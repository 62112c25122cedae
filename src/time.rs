//! Timestamp representations used by the on-disk structures.

use bytemuck::{Pod, Zeroable};
use core::fmt::{Display, Formatter};

/// A 32-bit POSIX timestamp (signed seconds since epoch), as stored on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct UnixTimestamp32(pub(crate) u32);

impl UnixTimestamp32 {
    /// Returns the timestamp as signed seconds since epoch.
    pub fn seconds(self) -> i32 {
        self.0 as i32
    }

    /// Checks whether the timestamp carries a value at all.
    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl Display for UnixTimestamp32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{}", self.seconds()))
    }
}

/// A nanosecond-precision POSIX timestamp (signed nanoseconds since epoch).
///
/// All inode timestamps are normalised to this representation at decode time;
/// volumes without the extended inode tail simply carry whole seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnixTimestampNs(pub(crate) i64);

impl UnixTimestampNs {
    /// Returns the timestamp as signed nanoseconds since epoch.
    pub fn nanoseconds(self) -> i64 {
        self.0
    }

    /// Returns the whole-second part of the timestamp.
    pub fn seconds(self) -> i64 {
        self.0.div_euclid(1_000_000_000)
    }

    /// Returns the sub-second part of the timestamp, in nanoseconds.
    pub fn subsec_nanoseconds(self) -> u32 {
        self.0.rem_euclid(1_000_000_000) as u32
    }
}

impl From<UnixTimestamp32> for UnixTimestampNs {
    fn from(value: UnixTimestamp32) -> Self {
        Self(i64::from(value.seconds()) * 1_000_000_000)
    }
}

impl Display for UnixTimestampNs {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{}.{:09}", self.seconds(), self.subsec_nanoseconds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_widen_to_nanoseconds() {
        let ts = UnixTimestampNs::from(UnixTimestamp32(1_700_000_000));
        assert_eq!(ts.nanoseconds(), 1_700_000_000 * 1_000_000_000);
        assert_eq!(ts.seconds(), 1_700_000_000);
        assert_eq!(ts.subsec_nanoseconds(), 0);
    }

    #[test]
    fn negative_seconds_round_toward_minus_infinity() {
        let ts = UnixTimestampNs(-1_500_000_000);
        assert_eq!(ts.seconds(), -2);
        assert_eq!(ts.subsec_nanoseconds(), 500_000_000);
    }
}
