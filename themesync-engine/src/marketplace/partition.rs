//! Sort orders under which gallery listings are fetched and persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One sort-ordered view of the gallery.
///
/// Each partition is persisted as its own metadata file named after
/// [`SortPartition::key`]. The numeric [`SortPartition::sort_code`] is only
/// meaningful to the gallery query protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortPartition {
    MostInstalled,
    ByName,
    PublishedDate,
    Publisher,
    ByRating,
    TrendingWeekly,
    UpdateDate,
}

impl SortPartition {
    /// Every partition, in index traversal order.
    pub const ALL: [SortPartition; 7] = [
        Self::MostInstalled,
        Self::ByName,
        Self::PublishedDate,
        Self::Publisher,
        Self::ByRating,
        Self::TrendingWeekly,
        Self::UpdateDate,
    ];

    /// Key used for the partition's metadata file name.
    pub fn key(self) -> &'static str {
        match self {
            Self::MostInstalled => "mostinstalled",
            Self::ByName => "byname",
            Self::PublishedDate => "publisheddate",
            Self::Publisher => "publisher",
            Self::ByRating => "byrating",
            Self::TrendingWeekly => "trendingweekly",
            Self::UpdateDate => "updatedate",
        }
    }

    /// `sortBy` code understood by the gallery.
    pub fn sort_code(self) -> u8 {
        match self {
            Self::MostInstalled => 4,
            Self::ByName => 2,
            Self::PublishedDate => 10,
            Self::Publisher => 3,
            Self::ByRating => 12,
            Self::TrendingWeekly => 8,
            Self::UpdateDate => 1,
        }
    }

    /// Metadata file name for this partition.
    pub fn file_name(self) -> String {
        format!("{}.json", self.key())
    }
}

impl fmt::Display for SortPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SortPartition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.key() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.key()).collect();
                format!("unknown sort order '{s}' (expected one of: {})", known.join(", "))
            })
    }
}
