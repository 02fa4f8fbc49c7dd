//! File size tiers served by the benchmark file server.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ParseError;

/// One of the fixed file-size categories a benchmark run downloads.
///
/// The variants are declared in ascending size order, so the derived [`Ord`] matches the
/// canonical ordering used when running all tiers and when rendering reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SizeTier {
    /// A file of one byte.
    Nano,
    /// A file of about one kilobyte.
    Micro,
    /// A file of about one megabyte.
    Small,
    /// A file of about ten megabytes.
    Medium,
    /// A file of about one gigabyte.
    Large,
    /// A file of about ten gigabytes.
    XLarge,
    /// A file of about thirty gigabytes.
    XXLarge,
}

impl SizeTier {
    /// All tiers in canonical ascending-size order.
    pub const ALL: [SizeTier; 7] = [
        SizeTier::Nano,
        SizeTier::Micro,
        SizeTier::Small,
        SizeTier::Medium,
        SizeTier::Large,
        SizeTier::XLarge,
        SizeTier::XXLarge,
    ];

    /// Returns the canonical name, which is also the path of the file on the file server.
    pub fn as_str(self) -> &'static str {
        match self {
            SizeTier::Nano => "nano",
            SizeTier::Micro => "micro",
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
            SizeTier::XLarge => "xlarge",
            SizeTier::XXLarge => "xxlarge",
        }
    }

    /// Returns the human readable label including the approximate file size.
    pub fn label(self) -> &'static str {
        match self {
            SizeTier::Nano => "Nano(1B)",
            SizeTier::Micro => "Micro(1KB)",
            SizeTier::Small => "Small(1MB)",
            SizeTier::Medium => "Medium(10MB)",
            SizeTier::Large => "Large(1GB)",
            SizeTier::XLarge => "XLarge(10GB)",
            SizeTier::XXLarge => "XXLarge(30GB)",
        }
    }

    /// Returns the `task_size_level` label value the Dragonfly client reports for files of
    /// this tier.
    ///
    /// The client buckets task sizes into its own levels, so neighbouring tiers may share a
    /// code. Records are partitioned by tier before codes are matched.
    pub fn task_size_level(self) -> &'static str {
        match self {
            SizeTier::Nano | SizeTier::Micro => "1",
            SizeTier::Small => "2",
            SizeTier::Medium => "4",
            SizeTier::Large => "11",
            SizeTier::XLarge | SizeTier::XXLarge => "13",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeTier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SizeTier::ALL
            .into_iter()
            .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::UnknownTier(s.to_owned()))
    }
}

impl Serialize for SizeTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SizeTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_ascending() {
        let mut sorted = SizeTier::ALL;
        sorted.sort();
        assert_eq!(sorted, SizeTier::ALL);
        assert_eq!(SizeTier::ALL.first(), Some(&SizeTier::Nano));
        assert_eq!(SizeTier::ALL.last(), Some(&SizeTier::XXLarge));
    }

    #[test]
    fn parses_every_canonical_name() {
        for tier in SizeTier::ALL {
            assert_eq!(tier.as_str().parse::<SizeTier>(), Ok(tier));
        }
        assert_eq!("XLarge".parse::<SizeTier>(), Ok(SizeTier::XLarge));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(
            "huge".parse::<SizeTier>(),
            Err(ParseError::UnknownTier("huge".into()))
        );
        assert!("".parse::<SizeTier>().is_err());
    }

    #[test]
    fn task_size_levels() {
        let levels: Vec<_> = SizeTier::ALL.iter().map(|t| t.task_size_level()).collect();
        assert_eq!(levels, ["1", "1", "2", "4", "11", "13", "13"]);
    }

    #[test]
    fn serde_uses_canonical_name() {
        let json = serde_json::to_string(&SizeTier::Medium).unwrap();
        assert_eq!(json, r#""medium""#);

        let tier: SizeTier = serde_json::from_str(r#""xxlarge""#).unwrap();
        assert_eq!(tier, SizeTier::XXLarge);

        assert!(serde_json::from_str::<SizeTier>(r#""giant""#).is_err());
    }
}
