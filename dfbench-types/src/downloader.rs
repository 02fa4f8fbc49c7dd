//! Downloader modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ParseError;

/// How a client pod fetches the benchmark file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Downloader {
    /// Downloads directly with the `dfget` client binary.
    Dfget,
    /// Downloads with a generic HTTP client routed through the local Dragonfly proxy.
    Proxy,
}

impl Downloader {
    /// All downloaders in the order their reports are printed.
    pub const ALL: [Downloader; 2] = [Downloader::Dfget, Downloader::Proxy];

    /// Returns the name of the downloader, which doubles as the `tag` of download URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Downloader::Dfget => "dfget",
            Downloader::Proxy => "proxy",
        }
    }
}

impl fmt::Display for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Downloader {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dfget" => Ok(Downloader::Dfget),
            "proxy" => Ok(Downloader::Proxy),
            other => Err(ParseError::UnknownDownloader(other.to_owned())),
        }
    }
}

impl Serialize for Downloader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Downloader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
