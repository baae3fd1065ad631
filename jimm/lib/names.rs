//! Typed references to the resources jimm manages.
//!
//! Authorization tuples and audit entries refer to heterogeneous objects
//! (users, groups, controllers, models, application offers, clouds) through
//! a single tagged form, `<kind>:<id>[#<relation>]`. Unknown kinds are
//! rejected at parse time.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::Relation;
use crate::{JimmError, JimmResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kind of resource a [`Tag`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A user identity.
    User,

    /// A named group of users.
    Group,

    /// A backing Juju controller.
    Controller,

    /// A model hosted on one of the controllers.
    Model,

    /// An application offer advertised from a model.
    ApplicationOffer,

    /// A cloud known to jimm.
    Cloud,
}

/// A typed reference to a single resource, optionally carrying a relation
/// sub-selector (used for group membership, `group:<id>#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The resource kind.
    pub kind: Kind,

    /// The resource identifier: a username, group id, uuid or cloud name.
    pub id: String,

    /// The optional relation sub-selector.
    pub relation: Option<Relation>,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// All resource kinds, in the order group-deletion cascades iterate them.
pub const ALL_KINDS: [Kind; 6] = [
    Kind::User,
    Kind::Group,
    Kind::Controller,
    Kind::Model,
    Kind::ApplicationOffer,
    Kind::Cloud,
];

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Kind {
    /// The string prefix used for this kind in the tagged form.
    pub fn prefix(&self) -> &'static str {
        match self {
            Kind::User => "user",
            Kind::Group => "group",
            Kind::Controller => "controller",
            Kind::Model => "model",
            Kind::ApplicationOffer => "applicationoffer",
            Kind::Cloud => "cloud",
        }
    }
}

impl Tag {
    /// Creates a tag for the named user.
    pub fn user(name: impl Into<String>) -> Self {
        Tag {
            kind: Kind::User,
            id: name.into(),
            relation: None,
        }
    }

    /// Creates a tag for the group with the given numeric id.
    pub fn group(id: i64) -> Self {
        Tag {
            kind: Kind::Group,
            id: id.to_string(),
            relation: None,
        }
    }

    /// Creates a tag for the controller with the given uuid.
    pub fn controller(uuid: impl Into<String>) -> Self {
        Tag {
            kind: Kind::Controller,
            id: uuid.into(),
            relation: None,
        }
    }

    /// Creates a tag for the model with the given uuid.
    pub fn model(uuid: impl Into<String>) -> Self {
        Tag {
            kind: Kind::Model,
            id: uuid.into(),
            relation: None,
        }
    }

    /// Creates a tag for the application offer with the given uuid.
    pub fn application_offer(uuid: impl Into<String>) -> Self {
        Tag {
            kind: Kind::ApplicationOffer,
            id: uuid.into(),
            relation: None,
        }
    }

    /// Creates a tag for the named cloud.
    pub fn cloud(name: impl Into<String>) -> Self {
        Tag {
            kind: Kind::Cloud,
            id: name.into(),
            relation: None,
        }
    }

    /// Creates a tag with only a kind, matching any resource of that kind
    /// in a tuple read pattern.
    pub fn blank(kind: Kind) -> Self {
        Tag {
            kind,
            id: String::new(),
            relation: None,
        }
    }

    /// Returns this tag with the given relation sub-selector attached.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    /// Returns true if the tag carries no identifier and so matches any
    /// resource of its kind.
    pub fn is_blank(&self) -> bool {
        self.id.is_empty()
    }

    /// Returns true if this tag refers to the members of a group.
    pub fn is_group_members(&self) -> bool {
        self.kind == Kind::Group && self.relation == Some(Relation::Member)
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.id)?;
        if let Some(relation) = &self.relation {
            write!(f, "#{}", relation)?;
        }
        Ok(())
    }
}

impl FromStr for Tag {
    type Err = JimmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| JimmError::BadRequest(format!("malformed tag {:?}", s)))?;
        let kind = match kind {
            "user" => Kind::User,
            "group" => Kind::Group,
            "controller" => Kind::Controller,
            "model" => Kind::Model,
            "applicationoffer" => Kind::ApplicationOffer,
            "cloud" => Kind::Cloud,
            _ => {
                return Err(JimmError::BadRequest(format!(
                    "unknown tag kind {:?}",
                    kind
                )))
            }
        };
        let (id, relation) = match rest.split_once('#') {
            Some((id, relation)) => (id, Some(relation.parse()?)),
            None => (rest, None),
        };
        Ok(Tag {
            kind,
            id: id.to_string(),
            relation,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true if the username belongs to jimm's identity namespace.
///
/// Users local to a backing controller carry no domain and must never be
/// propagated into the catalog or the authorization graph.
pub fn is_external_user(username: &str) -> bool {
    username.contains('@')
}

/// Checks that the username belongs to jimm's identity namespace.
pub fn require_external_user(username: &str) -> JimmResult<()> {
    if is_external_user(username) {
        Ok(())
    } else {
        Err(JimmError::BadRequest(format!(
            "user {:?} is local to a controller",
            username
        )))
    }
}

/// Formats the `<cloud>/<owner>/<name>` path of a cloud credential.
pub fn credential_path(cloud: &str, owner: &str, name: &str) -> String {
    format!("{}/{}/{}", cloud, owner, name)
}

/// Splits a `<cloud>/<owner>/<name>` credential path into its parts.
pub fn parse_credential_path(path: &str) -> JimmResult<(String, String, String)> {
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(cloud), Some(owner), Some(name), None)
            if !cloud.is_empty() && !owner.is_empty() && !name.is_empty() =>
        {
            Ok((cloud.to_string(), owner.to_string(), name.to_string()))
        }
        _ => Err(JimmError::BadRequest(format!(
            "malformed credential path {:?}",
            path
        ))),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() -> anyhow::Result<()> {
        let tags = [
            Tag::user("alice@external"),
            Tag::group(42),
            Tag::group(7).with_relation(Relation::Member),
            Tag::controller("deadbeef-1bad-500d-9000-4b1d0d06f00d"),
            Tag::model("00000001-0000-0000-0000-000000000001"),
            Tag::application_offer("00000002-0000-0000-0000-000000000002"),
            Tag::cloud("aws"),
        ];
        for tag in tags {
            let parsed: Tag = tag.to_string().parse()?;
            assert_eq!(parsed, tag);
        }
        Ok(())
    }

    #[test]
    fn test_tag_rejects_unknown_kind() {
        let err = "machine:0".parse::<Tag>().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadRequest);
        assert!("useralice".parse::<Tag>().is_err());
    }

    #[test]
    fn test_external_users() {
        assert!(is_external_user("alice@external"));
        assert!(!is_external_user("admin"));
        assert!(require_external_user("admin").is_err());
    }

    #[test]
    fn test_credential_path_round_trip() -> anyhow::Result<()> {
        let path = credential_path("aws", "alice@external", "default");
        let (cloud, owner, name) = parse_credential_path(&path)?;
        assert_eq!((cloud.as_str(), owner.as_str(), name.as_str()), ("aws", "alice@external", "default"));
        assert!(parse_credential_path("aws/alice").is_err());
        Ok(())
    }
}
