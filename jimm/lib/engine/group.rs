//! Group lifecycle. Groups are referenced from relation tuples by their
//! numeric id, so renames are name-only; deletion cascades through the
//! graph.

use crate::auth::{Relation, RelationTuple};
use crate::db::Group;
use crate::names::Tag;
use crate::JimmResult;

use super::Jimm;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Jimm {
    /// Creates a group. Jimm administrators only.
    pub async fn add_group(&self, username: &str, name: &str) -> JimmResult<Group> {
        self.require_jimm_admin(username).await?;
        let group = self.database.add_group(name).await?;
        self.audit(
            username,
            "add_group",
            true,
            serde_json::json!({"name": name}),
        )
        .await;
        Ok(group)
    }

    /// Renames a group. The numeric id is preserved, so every relation
    /// tuple referencing the group stays valid.
    pub async fn rename_group(
        &self,
        username: &str,
        name: &str,
        new_name: &str,
    ) -> JimmResult<Group> {
        self.require_jimm_admin(username).await?;
        let group = self.database.rename_group(name, new_name).await?;
        self.audit(
            username,
            "rename_group",
            true,
            serde_json::json!({"name": name, "new_name": new_name}),
        )
        .await;
        Ok(group)
    }

    /// Deletes a group and every relation tuple that mentions it, as
    /// object or as target, across all resource kinds.
    pub async fn remove_group(&self, username: &str, name: &str) -> JimmResult<()> {
        self.require_jimm_admin(username).await?;
        let group = self.database.remove_group(name).await?;
        self.checker.remove_group(group.id).await?;
        self.audit(
            username,
            "remove_group",
            true,
            serde_json::json!({"name": name}),
        )
        .await;
        Ok(())
    }

    /// Lists every group. Jimm administrators only.
    pub async fn list_groups(&self, username: &str) -> JimmResult<Vec<Group>> {
        self.require_jimm_admin(username).await?;
        self.database.list_groups().await
    }

    /// Adds a user to a group.
    pub async fn add_group_member(
        &self,
        username: &str,
        group_name: &str,
        member_username: &str,
    ) -> JimmResult<()> {
        self.require_jimm_admin(username).await?;
        let group = self.database.get_group(group_name).await?;
        self.database.upsert_user(member_username, None).await?;
        self.checker
            .store()
            .write(&[RelationTuple::new(
                Tag::user(member_username),
                Relation::Member,
                Tag::group(group.id).with_relation(Relation::Member),
            )])
            .await?;
        Ok(())
    }

    /// Removes a user from a group.
    pub async fn remove_group_member(
        &self,
        username: &str,
        group_name: &str,
        member_username: &str,
    ) -> JimmResult<()> {
        self.require_jimm_admin(username).await?;
        let group = self.database.get_group(group_name).await?;
        self.checker
            .store()
            .delete(&[RelationTuple::new(
                Tag::user(member_username),
                Relation::Member,
                Tag::group(group.id).with_relation(Relation::Member),
            )])
            .await?;
        Ok(())
    }
}
