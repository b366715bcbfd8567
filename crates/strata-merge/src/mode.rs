use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a merge treats missing values and genuine conflicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeMode {
    /// Reconcile two independent edits against their common ancestor.
    /// A missing `right` is an authoritative deletion; conflicts favour `right`.
    ThreeWay,
    /// Layer `left` onto `right` relative to `common`. A missing `right`
    /// means no remote information; conflicts favour `left`.
    Apply,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreeWay => f.write_str("three-way"),
            Self::Apply => f.write_str("apply"),
        }
    }
}

impl FromStr for MergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "three-way" | "threeway" | "3way" => Ok(Self::ThreeWay),
            "apply" | "2way" => Ok(Self::Apply),
            other => Err(format!("unknown merge mode: {other}")),
        }
    }
}
