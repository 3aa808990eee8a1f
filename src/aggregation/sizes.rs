//! Per-depth row limits

use crate::aggregation::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of rows kept at each depth.
///
/// Depths past the end of the list use the last entry; an empty list is
/// unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sizes(Vec<usize>);

impl Sizes {
    pub fn new(sizes: Vec<usize>) -> Self {
        Self(sizes)
    }

    pub fn unlimited() -> Self {
        Self(Vec::new())
    }

    pub fn size(&self, depth: usize) -> usize {
        self.0
            .get(depth)
            .or_else(|| self.0.last())
            .copied()
            .unwrap_or(usize::MAX)
    }

    /// Tightest limit at every depth of either list.
    pub fn min(&self, other: &Sizes) -> Sizes {
        if self.0.is_empty() {
            return other.clone();
        }
        if other.0.is_empty() {
            return self.clone();
        }
        let len = self.0.len().max(other.0.len());
        Sizes((0..len).map(|d| self.size(d).min(other.size(d))).collect())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

impl FromStr for Sizes {
    type Err = AggregationError;

    /// Parse a comma separated list such as `1000000,100,10,1`.
    fn from_str(s: &str) -> AggregationResult<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<usize>().map_err(|_| {
                    AggregationError::InvalidFieldSpec(format!("Invalid result size '{}'", part))
                })
            })
            .collect::<AggregationResult<Vec<_>>>()
            .map(Sizes)
    }
}

impl fmt::Display for Sizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_repeats_last_entry() {
        let sizes: Sizes = "1000000,100,10".parse().unwrap();
        assert_eq!(sizes.size(0), 1_000_000);
        assert_eq!(sizes.size(2), 10);
        assert_eq!(sizes.size(7), 10);
        assert_eq!(Sizes::unlimited().size(3), usize::MAX);
    }

    #[test]
    fn test_min_combines_lists() {
        let defaults: Sizes = "1000000,100,10,1".parse().unwrap();
        let requested = Sizes::new(vec![50]);
        assert_eq!(defaults.min(&requested).as_slice(), &[50, 50, 10, 1]);
        assert_eq!(Sizes::unlimited().min(&requested), requested);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("10,x".parse::<Sizes>().is_err());
        assert_eq!(" 5 , 2 ".parse::<Sizes>().unwrap().to_string(), "5,2");
    }
}
