//! Engine tests for model placement and the model lifecycle operations.

mod common;

use common::{seed_fleet, setup, setup_seeded, FakeModel};
use jimm::auth::{Relation, RelationTuple};
use jimm::engine::{AccessLevel, ModelCreateArgs};
use jimm::names::Tag;
use jimm::ErrorCode;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_add_model_places_on_fleet() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;
    assert_eq!(info.owner, "bob@external");
    assert_eq!(info.name, "m");

    // The catalog row matches the controller's answer.
    let model = env
        .jimm
        .database()
        .get_model_by_owner_name("bob@external", "m")
        .await?;
    assert_eq!(model.uuid.as_deref(), Some(info.uuid.as_str()));
    assert_eq!(model.life, "alive");
    let hosted_on = env.fake.lock().models[&info.uuid].controller.clone();
    assert_eq!(model.controller_name, hosted_on);

    // Jimm granted itself admin access on the new model.
    assert!(env.fake.lock().jimm_admin_models.contains(&info.uuid));

    // The owner is materialized as an explicit administrator.
    let (allowed, _) = env
        .jimm
        .checker()
        .check(
            &RelationTuple::new(
                Tag::user("bob@external"),
                Relation::Administrator,
                Tag::model(info.uuid.clone()),
            ),
            false,
        )
        .await?;
    assert!(allowed);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_add_model_random_tie_break() -> anyhow::Result<()> {
    // Both controllers serve region r at priority 10; across seeds both
    // must be chosen, and the same seed always chooses the same one.
    let mut chosen = std::collections::HashSet::new();
    for seed in 0..12 {
        let env = setup_seeded(seed, false).await?;
        seed_fleet(&env).await?;
        let info = env
            .jimm
            .add_model(
                "bob@external",
                &ModelCreateArgs::builder()
                    .name("m".to_string())
                    .cloud("dummy".to_string())
                    .build(),
            )
            .await?;
        let model = env
            .jimm
            .database()
            .get_model_by_owner_name("bob@external", "m")
            .await?;
        assert_eq!(model.owner, "bob@external");
        assert_eq!(model.name, "m");
        assert_eq!(
            model.controller_name,
            env.fake.lock().models[&info.uuid].controller
        );
        chosen.insert(model.controller_name);
    }
    assert!(chosen.contains("c1"), "c1 never chosen: {:?}", chosen);
    assert!(chosen.contains("c2"), "c2 never chosen: {:?}", chosen);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_add_model_name_in_use_aborts() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    // Prefer c1 so the duplicate is hit deterministically.
    let db = env.jimm.database();
    let c2 = db.get_controller("c2").await?;
    let region = db.get_cloud_region("dummy", "r").await?;
    db.set_region_priority(c2.id, region.id, 5).await?;

    // The model exists on the controller but not in the catalog,
    // left around by some earlier failed create.
    env.fake.put_model(FakeModel::new(
        "00000001-0000-0000-0000-00000000dead",
        "m",
        "bob@external",
        "c1",
    ));

    let err = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    // The skeleton row was released again.
    let missing = db
        .get_model_by_owner_name("bob@external", "m")
        .await
        .unwrap_err();
    assert_eq!(missing.code(), ErrorCode::NotFound);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_add_model_fails_over_unreachable_candidate() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let db = env.jimm.database();
    let c2 = db.get_controller("c2").await?;
    let region = db.get_cloud_region("dummy", "r").await?;
    db.set_region_priority(c2.id, region.id, 5).await?;
    env.fake.lock().dial_failures.insert("c1".to_string());

    env.jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;
    let model = db.get_model_by_owner_name("bob@external", "m").await?;
    assert_eq!(model.controller_name, "c2");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_add_model_requires_admin_for_foreign_owner() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let err = env
        .jimm
        .add_model(
            "alice@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .owner("bob@external".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    // A jimm administrator may create models for somebody else, using a
    // credential owned by the model owner.
    env.jimm
        .add_model(
            "admin@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .owner("bob@external".to_string())
                .cloud("dummy".to_string())
                .credential("dummy/bob@external/cred".to_string())
                .build(),
        )
        .await?;
    let model = env
        .jimm
        .database()
        .get_model_by_owner_name("bob@external", "m")
        .await?;
    assert_eq!(model.owner, "bob@external");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_grant_then_revoke_downgrades_one_level() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;

    env.jimm
        .grant_model_access("bob@external", &info.uuid, "alice@external", AccessLevel::Write)
        .await?;
    let (allowed, _) = env
        .jimm
        .checker()
        .check(
            &RelationTuple::new(
                Tag::user("alice@external"),
                Relation::Writer,
                Tag::model(info.uuid.clone()),
            ),
            false,
        )
        .await?;
    assert!(allowed);
    assert!(env.fake.lock().grants.iter().any(|(m, u, a)| {
        m == &info.uuid && u == "alice@external" && a == "write"
    }));

    env.jimm
        .revoke_model_access("bob@external", &info.uuid, "alice@external", AccessLevel::Write)
        .await?;
    let model = env
        .jimm
        .database()
        .get_model_by_owner_name("bob@external", "m")
        .await?;
    assert_eq!(
        env.jimm
            .database()
            .user_model_access(model.id, "alice@external")
            .await?,
        Some("read".to_string())
    );

    // Two successive revokes of admin leave read.
    env.jimm
        .grant_model_access("bob@external", &info.uuid, "eve@external", AccessLevel::Admin)
        .await?;
    env.jimm
        .revoke_model_access("bob@external", &info.uuid, "eve@external", AccessLevel::Admin)
        .await?;
    env.jimm
        .revoke_model_access("bob@external", &info.uuid, "eve@external", AccessLevel::Admin)
        .await?;
    assert_eq!(
        env.jimm
            .database()
            .user_model_access(model.id, "eve@external")
            .await?,
        Some("read".to_string())
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_model_info_filters_users_for_non_admins() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;
    env.jimm
        .grant_model_access("bob@external", &info.uuid, "alice@external", AccessLevel::Read)
        .await?;

    // The owner sees every user entry.
    let owner_view = env.jimm.model_info("bob@external", &info.uuid).await?;
    assert_eq!(owner_view.users.len(), 2);

    // A reader only sees their own entry.
    let reader_view = env.jimm.model_info("alice@external", &info.uuid).await?;
    assert_eq!(reader_view.users.len(), 1);
    assert_eq!(reader_view.users[0].username, "alice@external");

    // Readers do not see machine information.
    let err = env
        .jimm
        .model_machines("alice@external", &info.uuid)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    // No access at all is unauthorized.
    let err = env
        .jimm
        .model_info("eve@external", &info.uuid)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_destroy_model_marks_dying() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;

    let err = env
        .jimm
        .destroy_model("alice@external", &info.uuid, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    env.jimm
        .destroy_model("bob@external", &info.uuid, None, Some(false))
        .await?;
    let model = env.jimm.database().get_model_by_uuid(&info.uuid).await?;
    assert_eq!(model.expect("model still cataloged").life, "dying");
    assert_eq!(env.fake.lock().models[&info.uuid].life, "dying");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_dispatcher_forwards_and_rewrites() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;

    // A controller-local user on the upstream model must not leak out.
    env.fake
        .lock()
        .models
        .get_mut(&info.uuid)
        .expect("model on fleet")
        .users
        .push(jimm::api::ModelUserInfo {
            username: "admin".to_string(),
            display_name: String::new(),
            access: "admin".to_string(),
            last_connection: None,
        });

    let dispatcher = jimm::dispatch::Dispatcher::new(env.jimm.clone());
    let proxied = dispatcher
        .proxied_model_info("bob@external", &info.uuid)
        .await?;
    assert!(proxied.users.iter().all(|u| u.username.contains('@')));

    // Unauthorized users are rejected before any forwarding.
    let err = dispatcher
        .proxied_model_info("eve@external", &info.uuid)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_unknown_model_is_not_found() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let err = env
        .jimm
        .model_info("bob@external", "00000001-0000-0000-0000-00000000beef")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    Ok(())
}
