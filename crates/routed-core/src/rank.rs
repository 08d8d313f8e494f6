//! Rank: identifier of a daemon within the current population.
//!
//! Wraps a u32 internally. Rank 0 is the root (head process) and
//! `u32::MAX` is reserved as the `INVALID` sentinel.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("Invalid rank format: expected a non-negative integer or \"INVALID\"")]
    InvalidFormat,
    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// Identifier of a daemon in the fleet.
///
/// # Examples
/// ```
/// use routed_core::Rank;
///
/// let rank: Rank = "7".parse().unwrap();
/// assert_eq!(rank.as_u32(), 7);
/// assert!(Rank::ROOT.is_root());
/// assert!(!Rank::INVALID.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(u32);

impl Rank {
    /// The root / head process.
    pub const ROOT: Rank = Rank(0);

    /// Distinguished sentinel for "no rank".
    pub const INVALID: Rank = Rank(u32::MAX);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Index form, for bitmaps and vectors.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl Display for Rank {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            Display::fmt(&self.0, f)
        } else {
            f.pad("INVALID")
        }
    }
}

impl FromStr for Rank {
    type Err = RankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("invalid") {
            return Ok(Self::INVALID);
        }
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(RankError::InvalidFormat);
        }
        Ok(Self(s.parse()?))
    }
}

impl From<u32> for Rank {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Rank::new(42).to_string(), "42");
        assert_eq!(Rank::ROOT.to_string(), "0");
        assert_eq!(Rank::INVALID.to_string(), "INVALID");
    }

    #[test]
    fn test_parse() {
        assert_eq!("12".parse::<Rank>().unwrap(), Rank::new(12));
        assert_eq!(" 3 ".parse::<Rank>().unwrap(), Rank::new(3));
        assert_eq!("invalid".parse::<Rank>().unwrap(), Rank::INVALID);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Rank>().is_err());
        assert!("-1".parse::<Rank>().is_err());
        assert!("abc".parse::<Rank>().is_err());
        assert!("99999999999".parse::<Rank>().is_err());
    }

    #[test]
    fn test_root_and_invalid() {
        assert!(Rank::ROOT.is_root());
        assert!(Rank::ROOT.is_valid());
        assert!(!Rank::new(1).is_root());
        assert!(!Rank::INVALID.is_valid());
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&Rank::new(5)).unwrap();
        assert_eq!(json, "5");
        let parsed: Rank = serde_json::from_str("5").unwrap();
        assert_eq!(parsed, Rank::new(5));
    }
}
