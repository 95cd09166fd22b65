//! Identity for runners and fibers.

use std::fmt;

/// A fresh identifier, opaque outside this crate.
///
/// Produced from the runner's [`crate::deps::RandomBytes`] dependency, so
/// ids are genuinely random in production and deterministic under a seeded
/// test double (see [`crate::deps::test`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u128);

impl Id {
    pub(crate) fn fresh(random_bytes: &dyn crate::deps::RandomBytes) -> Self {
        let bytes = random_bytes.next(16);
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&bytes[..16]);
        Id(u128::from_le_bytes(buf))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test::SeededRandom;

    #[test]
    fn deterministic_under_seeded_deps() {
        let a = Id::fresh(&SeededRandom::new(1));
        let b = Id::fresh(&SeededRandom::new(1));

        assert_eq!(a, b);
    }

    #[test]
    fn distinct_across_calls_from_same_generator() {
        let random = SeededRandom::new(1);

        let a = Id::fresh(&random);
        let b = Id::fresh(&random);

        assert_ne!(a, b);
    }
}
