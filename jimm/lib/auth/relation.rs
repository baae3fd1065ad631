use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::JimmError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A relation between an object and a target in the authorization graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Membership of a group.
    Member,

    /// Full control of the target resource.
    Administrator,

    /// Read access to the target resource.
    Reader,

    /// Write access to the target resource.
    Writer,

    /// Permission to consume an application offer.
    Consumer,

    /// Marks the controller hosting the target resource.
    Controller,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The model access relations, weakest first.
pub const MODEL_ACCESS_RELATIONS: [Relation; 3] =
    [Relation::Reader, Relation::Writer, Relation::Administrator];

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Relation {
    /// The relations that imply this one on the same target: the relation
    /// itself plus every stronger one.
    pub fn expanded(&self) -> &'static [Relation] {
        match self {
            Relation::Reader => &[Relation::Reader, Relation::Writer, Relation::Administrator],
            Relation::Writer => &[Relation::Writer, Relation::Administrator],
            Relation::Consumer => &[Relation::Consumer, Relation::Administrator],
            Relation::Administrator => &[Relation::Administrator],
            Relation::Member => &[Relation::Member],
            Relation::Controller => &[Relation::Controller],
        }
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Member => "member",
            Relation::Administrator => "administrator",
            Relation::Reader => "reader",
            Relation::Writer => "writer",
            Relation::Consumer => "consumer",
            Relation::Controller => "controller",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Relation {
    type Err = JimmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Relation::Member),
            "administrator" => Ok(Relation::Administrator),
            "reader" => Ok(Relation::Reader),
            "writer" => Ok(Relation::Writer),
            "consumer" => Ok(Relation::Consumer),
            "controller" => Ok(Relation::Controller),
            _ => Err(JimmError::BadRequest(format!(
                "unknown relation {:?}",
                s
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_round_trip() -> anyhow::Result<()> {
        for relation in [
            Relation::Member,
            Relation::Administrator,
            Relation::Reader,
            Relation::Writer,
            Relation::Consumer,
            Relation::Controller,
        ] {
            assert_eq!(relation.to_string().parse::<Relation>()?, relation);
        }
        assert!("owner".parse::<Relation>().is_err());
        Ok(())
    }

    #[test]
    fn test_expansion_includes_stronger_relations() {
        assert_eq!(
            Relation::Reader.expanded(),
            &[Relation::Reader, Relation::Writer, Relation::Administrator]
        );
        assert_eq!(
            Relation::Writer.expanded(),
            &[Relation::Writer, Relation::Administrator]
        );
        assert_eq!(Relation::Administrator.expanded(), &[Relation::Administrator]);
    }
}
