use std::fmt;

use serde::{Deserialize, Serialize};

/// Access mode carried on every protocol message.
///
/// On a request it says what the sender wants; on an object message it
/// says what the sender is delivering. The two upgrade variants only
/// appear on the wire:
///
/// - `UpgradeRw`: a host holding a read-only copy asks for write access,
///   and the owner grants it in place (no bytes travel).
/// - `UpgradeRo`: a writer hands its object back but keeps a read-only copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResolveMode {
    Invalid = 0,
    ReadOnly = 1,
    ReadWrite = 2,
    UpgradeRo = 3,
    UpgradeRw = 4,
}

impl ResolveMode {
    pub const ALL: [ResolveMode; 5] = [
        ResolveMode::Invalid,
        ResolveMode::ReadOnly,
        ResolveMode::ReadWrite,
        ResolveMode::UpgradeRo,
        ResolveMode::UpgradeRw,
    ];

    /// Collapse upgrade variants onto the access level they grant.
    pub fn normalized(self) -> ResolveMode {
        match self {
            ResolveMode::UpgradeRo => ResolveMode::ReadOnly,
            ResolveMode::UpgradeRw => ResolveMode::ReadWrite,
            other => other,
        }
    }

    /// Whether holding `self` is enough for an access of mode `wanted`.
    ///
    /// ```
    /// use dsmc_util::ResolveMode::*;
    ///
    /// assert!(ReadWrite.satisfies(ReadOnly));
    /// assert!(!ReadOnly.satisfies(ReadWrite));
    /// assert!(Invalid.satisfies(Invalid));
    /// ```
    pub fn satisfies(self, wanted: ResolveMode) -> bool {
        match (self.normalized(), wanted.normalized()) {
            (_, ResolveMode::Invalid) => true,
            (ResolveMode::ReadOnly | ResolveMode::ReadWrite, ResolveMode::ReadOnly) => true,
            (ResolveMode::ReadWrite, ResolveMode::ReadWrite) => true,
            _ => false,
        }
    }

    pub fn wants_write(self) -> bool {
        self.normalized() == ResolveMode::ReadWrite
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolveMode::Invalid => "INV",
            ResolveMode::ReadOnly => "RO",
            ResolveMode::ReadWrite => "RW",
            ResolveMode::UpgradeRo => "UP_RO",
            ResolveMode::UpgradeRw => "UP_RW",
        }
    }

    pub fn from_u8(raw: u8) -> Option<ResolveMode> {
        Self::ALL.get(raw as usize).copied()
    }
}

impl fmt::Display for ResolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ResolveMode::{self, *};
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    impl Arbitrary for ResolveMode {
        fn arbitrary(g: &mut Gen) -> Self {
            *g.choose(&ResolveMode::ALL).unwrap()
        }
    }

    #[test]
    fn test_normalized() {
        assert_eq!(UpgradeRo.normalized(), ReadOnly);
        assert_eq!(UpgradeRw.normalized(), ReadWrite);
        assert_eq!(ReadOnly.normalized(), ReadOnly);
        assert_eq!(Invalid.normalized(), Invalid);
    }

    #[test]
    fn test_satisfies_table() {
        assert!(ReadWrite.satisfies(ReadOnly));
        assert!(ReadWrite.satisfies(ReadWrite));
        assert!(ReadOnly.satisfies(ReadOnly));
        assert!(!ReadOnly.satisfies(ReadWrite));
        assert!(!Invalid.satisfies(ReadOnly));
        assert!(!Invalid.satisfies(UpgradeRw));
    }

    #[test]
    fn test_wants_write() {
        assert!(ReadWrite.wants_write());
        assert!(UpgradeRw.wants_write());
        assert!(!ReadOnly.wants_write());
        assert!(!UpgradeRo.wants_write());
        assert!(!Invalid.wants_write());
    }

    #[test]
    fn test_from_u8() {
        for mode in ResolveMode::ALL {
            assert_eq!(ResolveMode::from_u8(mode as u8), Some(mode));
        }
        assert_eq!(ResolveMode::from_u8(5), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(UpgradeRw.to_string(), "UP_RW");
        assert_eq!(Invalid.to_string(), "INV");
    }

    #[quickcheck]
    fn prop_satisfies_reflexive(mode: ResolveMode) -> bool {
        mode.satisfies(mode)
    }

    #[quickcheck]
    fn prop_everything_satisfies_invalid(mode: ResolveMode) -> bool {
        mode.satisfies(Invalid)
    }

    #[quickcheck]
    fn prop_read_write_satisfies_all(mode: ResolveMode) -> bool {
        ReadWrite.satisfies(mode)
    }

    #[quickcheck]
    fn prop_satisfies_transitive(a: ResolveMode, b: ResolveMode, c: ResolveMode) -> bool {
        !(a.satisfies(b) && b.satisfies(c)) || a.satisfies(c)
    }
}
