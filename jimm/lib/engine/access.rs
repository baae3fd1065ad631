//! Access levels and the checks every operation goes through.
//!
//! Access decisions consult the relation graph with the desired level
//! expanded into the union of itself and every stronger relation. Two
//! legacy rules are kept for compatibility: a model's owner is a full
//! administrator without any tuple, and jimm-wide administrators may do
//! anything.

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::auth::{Relation, RelationTuple};
use crate::db::Model;
use crate::names::Tag;
use crate::{JimmError, JimmResult};

use super::Jimm;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A model access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    /// Read-only access.
    Read,

    /// Read and write access.
    Write,

    /// Full control.
    Admin,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AccessLevel {
    /// The relation granting this level.
    pub fn relation(&self) -> Relation {
        match self {
            AccessLevel::Read => Relation::Reader,
            AccessLevel::Write => Relation::Writer,
            AccessLevel::Admin => Relation::Administrator,
        }
    }

    /// The level granted by the given relation, if it is an access
    /// relation.
    pub fn from_relation(relation: Relation) -> Option<Self> {
        match relation {
            Relation::Reader => Some(AccessLevel::Read),
            Relation::Writer => Some(AccessLevel::Write),
            Relation::Administrator => Some(AccessLevel::Admin),
            _ => None,
        }
    }

    /// The level one step below this one; `None` below `Read`.
    pub fn downgraded(&self) -> Option<Self> {
        match self {
            AccessLevel::Admin => Some(AccessLevel::Write),
            AccessLevel::Write => Some(AccessLevel::Read),
            AccessLevel::Read => None,
        }
    }
}

impl Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AccessLevel {
    type Err = JimmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessLevel::Read),
            "write" => Ok(AccessLevel::Write),
            "admin" => Ok(AccessLevel::Admin),
            _ => Err(JimmError::BadRequest(format!(
                "invalid access level {:?}",
                s
            ))),
        }
    }
}

impl Jimm {
    /// Whether the user is a jimm-wide administrator, either by the user
    /// record's flag or through the relation graph.
    pub async fn is_jimm_admin(&self, username: &str) -> JimmResult<bool> {
        if let Ok(user) = self.database.get_user(username).await {
            if user.jimm_admin {
                return Ok(true);
            }
        }
        let tuple = RelationTuple::new(
            Tag::user(username),
            Relation::Administrator,
            self.resource_tag(),
        );
        let (allowed, _) = self.checker.check(&tuple, false).await?;
        Ok(allowed)
    }

    /// Whether the user may act on the model at the desired level. The
    /// desired level is expanded to the union of itself and every stronger
    /// relation; the model owner passes without consulting the graph.
    pub async fn check_model_access(
        &self,
        username: &str,
        model: &Model,
        desired: AccessLevel,
    ) -> JimmResult<bool> {
        if model.owner == username {
            return Ok(true);
        }
        let Some(uuid) = &model.uuid else {
            return Ok(false);
        };
        let user = Tag::user(username);
        let target = Tag::model(uuid.clone());
        for relation in desired.relation().expanded() {
            let tuple = RelationTuple::new(user.clone(), *relation, target.clone());
            let (allowed, _) = self.checker.check(&tuple, false).await?;
            if allowed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The strongest access level the user holds on the model, if any.
    pub async fn user_model_access(
        &self,
        username: &str,
        model: &Model,
    ) -> JimmResult<Option<AccessLevel>> {
        if model.owner == username {
            return Ok(Some(AccessLevel::Admin));
        }
        let Some(uuid) = &model.uuid else {
            return Ok(None);
        };
        let relation = self
            .checker
            .strongest_relation(
                &Tag::user(username),
                &crate::auth::MODEL_ACCESS_RELATIONS,
                &Tag::model(uuid.clone()),
            )
            .await?;
        Ok(relation.and_then(AccessLevel::from_relation))
    }

    /// Whether the user may consume the given application offer: directly,
    /// through a group, or as an administrator of the offer.
    pub async fn check_offer_access(
        &self,
        username: &str,
        offer_uuid: &str,
    ) -> JimmResult<bool> {
        self.database.get_application_offer(offer_uuid).await?;
        let user = Tag::user(username);
        let target = Tag::application_offer(offer_uuid);
        for relation in Relation::Consumer.expanded() {
            let tuple = RelationTuple::new(user.clone(), *relation, target.clone());
            let (allowed, _) = self.checker.check(&tuple, false).await?;
            if allowed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Requires the user to administer the model: jimm admin, model owner
    /// or a holder of the administrator relation.
    pub(crate) async fn require_model_admin(
        &self,
        username: &str,
        model: &Model,
    ) -> JimmResult<()> {
        if self.is_jimm_admin(username).await?
            || self.check_model_access(username, model, AccessLevel::Admin).await?
        {
            Ok(())
        } else {
            Err(JimmError::Unauthorized("unauthorized".to_string()))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
