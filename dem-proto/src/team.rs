use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Side a player is reported on. Resolved from the wire's `team_num` field:
/// 3 is CT, 2 is T, anything else (including absent) is unknown.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Team {
    #[serde(rename = "CT")]
    Ct,
    #[serde(rename = "T")]
    T,
    #[serde(rename = "UNK")]
    Unknown,
}

impl Team {
    pub fn from_team_num(team_num: Option<i64>) -> Self {
        match team_num {
            Some(3) => Team::Ct,
            Some(2) => Team::T,
            _ => Team::Unknown,
        }
    }
}

impl Display for Team {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Team::Ct => "CT",
            Team::T => "T",
            Team::Unknown => "UNK",
        })
    }
}
