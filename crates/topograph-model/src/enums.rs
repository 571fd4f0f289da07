//! Closed vocabularies of the projection.

use serde::{Deserialize, Serialize};

/// Lifecycle of a projection, stored on its main record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    New,
    #[serde(rename = "In Process")]
    InProcess,
    Complete,
    Error,
}

impl Status {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "New",
            Status::InProcess => "In Process",
            Status::Complete => "Complete",
            Status::Error => "Error",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge kinds of the schema (TMO) layer.
///
/// `TwoWayLink` serializes as `"two-way link"` - space and hyphen exactly as
/// stored; documents and queries depend on the literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    #[serde(rename = "p_id")]
    PId,
    #[serde(rename = "mo_link")]
    MoLink,
    #[serde(rename = "two-way link")]
    TwoWayLink,
    #[serde(rename = "point_tmo_constraint")]
    PointConstraint,
}

impl LinkKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::PId => "p_id",
            LinkKind::MoLink => "mo_link",
            LinkKind::TwoWayLink => "two-way link",
            LinkKind::PointConstraint => "point_tmo_constraint",
        }
    }
}

/// Edge kinds of the instance (MO) layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    #[serde(rename = "p_id")]
    PId,
    #[serde(rename = "mo_link")]
    MoLink,
    #[serde(rename = "two-way link")]
    TwoWayLink,
    #[serde(rename = "point_a")]
    PointA,
    #[serde(rename = "point_b")]
    PointB,
    #[serde(rename = "collapsed")]
    Collapsed,
    #[serde(rename = "geometry_line")]
    GeometryLine,
}

impl ConnectionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::PId => "p_id",
            ConnectionKind::MoLink => "mo_link",
            ConnectionKind::TwoWayLink => "two-way link",
            ConnectionKind::PointA => "point_a",
            ConnectionKind::PointB => "point_b",
            ConnectionKind::Collapsed => "collapsed",
            ConnectionKind::GeometryLine => "geometry_line",
        }
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a traced subgraph is reduced before returning to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SquashLevel {
    Full,
    Local,
    None,
    Graph,
    Straight,
}

/// Entity class of a change-stream message key (`<CLASS>:<op>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    #[serde(rename = "TMO")]
    Tmo,
    #[serde(rename = "TPRM")]
    Tprm,
    #[serde(rename = "MO")]
    Mo,
    #[serde(rename = "PRM")]
    Prm,
}

impl std::str::FromStr for EntityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TMO" => Ok(EntityClass::Tmo),
            "TPRM" => Ok(EntityClass::Tprm),
            "MO" => Ok(EntityClass::Mo),
            "PRM" => Ok(EntityClass::Prm),
            other => Err(format!("unknown entity class: {other}")),
        }
    }
}

/// Operation of a change-stream message key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

impl std::str::FromStr for ChangeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChangeOp::Created),
            "updated" => Ok(ChangeOp::Updated),
            "deleted" => Ok(ChangeOp::Deleted),
            other => Err(format!("unknown change op: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_way_link_string_is_exact() {
        let json = serde_json::to_string(&ConnectionKind::TwoWayLink).unwrap();
        assert_eq!(json, "\"two-way link\"");
        let back: ConnectionKind = serde_json::from_str("\"two-way link\"").unwrap();
        assert_eq!(back, ConnectionKind::TwoWayLink);
        assert_eq!(LinkKind::TwoWayLink.as_str(), "two-way link");
    }

    #[test]
    fn status_round_trip() {
        for status in [Status::New, Status::InProcess, Status::Complete, Status::Error] {
            let json = serde_json::to_string(&status).unwrap();
            let back: Status = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
        assert_eq!(
            serde_json::to_string(&Status::InProcess).unwrap(),
            "\"In Process\""
        );
    }

    #[test]
    fn change_key_parts_parse() {
        assert_eq!("MO".parse::<EntityClass>().unwrap(), EntityClass::Mo);
        assert_eq!("deleted".parse::<ChangeOp>().unwrap(), ChangeOp::Deleted);
        assert!("mo".parse::<EntityClass>().is_err());
    }
}
