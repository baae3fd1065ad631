//! Engine tests for controller administration: registration, import,
//! migration and access queries.

mod common;

use common::{seed_fleet, setup, FakeModel};
use jimm::api::{CloudSpec, CloudUserInfo, ControllerModelSummary, MachineDelta};
use jimm::auth::{Relation, RelationTuple};
use jimm::db::AuditFilter;
use jimm::engine::AddControllerArgs;
use jimm::names::Tag;
use jimm::ErrorCode;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn fake_controller_inventory(env: &common::TestEnv) {
    let mut state = env.fake.lock();
    state.controller_summary = Some(ControllerModelSummary {
        uuid: "00000010-0000-0000-0000-000000000003".to_string(),
        cloud: "dummy".to_string(),
        cloud_region: "r".to_string(),
        agent_version: "3.2.1".to_string(),
    });
    state.clouds = vec![
        CloudSpec {
            name: "dummy".to_string(),
            provider_type: "dummy".to_string(),
            regions: vec!["r".to_string()],
        },
        CloudSpec {
            name: "aws".to_string(),
            provider_type: "ec2".to_string(),
            regions: vec!["us-east-1".to_string()],
        },
    ];
    state.cloud_users.insert(
        "aws".to_string(),
        vec![
            CloudUserInfo {
                username: "charlie@external".to_string(),
                display_name: "Charlie".to_string(),
                access: "admin".to_string(),
            },
            // Local to the controller; must not be propagated.
            CloudUserInfo {
                username: "admin".to_string(),
                display_name: String::new(),
                access: "admin".to_string(),
            },
        ],
    );
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_add_controller_imports_clouds() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;
    fake_controller_inventory(&env);

    let args = AddControllerArgs::builder()
        .name("c3".to_string())
        .admin_user("admin".to_string())
        .admin_password("hunter2".to_string())
        .build();

    // Only jimm administrators may register controllers.
    let err = env
        .jimm
        .add_controller("bob@external", &args)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let controller = env.jimm.add_controller("admin@external", &args).await?;
    assert_eq!(controller.uuid, "00000010-0000-0000-0000-000000000003");
    assert_eq!(controller.agent_version, "3.2.1");

    let db = env.jimm.database();

    // The deployed region carries the high placement priority.
    let candidates = db.placement_candidates("dummy", Some("r")).await?;
    let c3 = candidates
        .iter()
        .find(|c| c.controller_name == "c3")
        .expect("c3 should be a placement candidate");
    assert_eq!(c3.priority, 10);

    // The previously unknown cloud was imported with its regions.
    let aws = db.get_cloud("aws").await?;
    assert_eq!(aws.provider_type, "ec2");
    db.get_cloud_region("aws", "us-east-1").await?;

    // Everyone may add models on the controller's own cloud; external
    // cloud users are propagated, controller-local ones are not.
    let dummy_access = db.cloud_access_entries("dummy").await?;
    assert!(dummy_access
        .iter()
        .any(|e| e.username == "everyone@external" && e.access == "add-model"));
    let aws_access = db.cloud_access_entries("aws").await?;
    assert!(aws_access.iter().any(|e| e.username == "charlie@external"));
    assert!(!aws_access.iter().any(|e| e.username == "admin"));

    // Cloud administrators land in the relation graph.
    let (allowed, _) = env
        .jimm
        .checker()
        .check(
            &RelationTuple::new(
                Tag::user("charlie@external"),
                Relation::Administrator,
                Tag::cloud("aws"),
            ),
            false,
        )
        .await?;
    assert!(allowed);

    // Registering the same name again is refused.
    let err = env
        .jimm
        .add_controller("admin@external", &args)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    // The registration is audited.
    let entries = db
        .audit_entries(&AuditFilter::builder().action("add_controller".to_string()).build())
        .await?;
    assert!(entries.iter().any(|e| e.success));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_add_controller_stores_credentials_off_catalog() -> anyhow::Result<()> {
    let env = common::setup_seeded(42, true).await?;
    seed_fleet(&env).await?;
    fake_controller_inventory(&env);

    let controller = env
        .jimm
        .add_controller(
            "admin@external",
            &AddControllerArgs::builder()
                .name("c3".to_string())
                .admin_user("admin".to_string())
                .admin_password("hunter2".to_string())
                .build(),
        )
        .await?;

    assert!(controller.credentials_in_store);
    assert!(controller.admin_user.is_empty());
    assert!(controller.admin_password.is_empty());

    // The cache can still dial it, pulling the credentials from the
    // secret store.
    env.jimm.cache().open(&controller).await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_import_model_attaches_to_owner() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    // A credential for alice so the import can inherit one.
    env.jimm
        .database()
        .upsert_credential(
            &jimm::db::NewCredential::builder()
                .cloud("dummy".to_string())
                .owner("alice@external".to_string())
                .name("cred1".to_string())
                .valid(true)
                .build(),
        )
        .await?;

    let uuid = "00000001-0000-0000-0000-00000000c0de";
    let mut fake_model = FakeModel::new(uuid, "imported", "someone@external", "c1");
    fake_model.machines = vec![MachineDelta {
        model_uuid: uuid.to_string(),
        machine_id: "0".to_string(),
        display_name: "machine-0".to_string(),
        instance_id: "i-0123".to_string(),
        status: "running".to_string(),
        message: String::new(),
        units: 2,
    }];
    env.fake.put_model(fake_model);

    let model = env
        .jimm
        .import_model("admin@external", "c1", uuid, Some("alice@external"))
        .await?;
    assert_eq!(model.owner, "alice@external");
    assert_eq!(model.controller_name, "c1");

    // The machine projection was seeded from the initial watcher round.
    let machines = env.jimm.database().machines(model.id).await?;
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].machine_id, "0");
    assert_eq!(machines[0].unit_count, 2);

    // Only the new owner has access.
    let (allowed, _) = env
        .jimm
        .checker()
        .check(
            &RelationTuple::new(
                Tag::user("alice@external"),
                Relation::Administrator,
                Tag::model(uuid),
            ),
            false,
        )
        .await?;
    assert!(allowed);
    let entries = env.jimm.database().model_access_entries(model.id).await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].username, "alice@external");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_import_model_rejects_local_owner() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let uuid = "00000001-0000-0000-0000-00000000c0de";
    env.fake.put_model(FakeModel::new(uuid, "imported", "localowner", "c1"));

    let err = env
        .jimm
        .import_model("admin@external", "c1", uuid, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_update_migrated_model_reassigns_controller() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let info = env
        .jimm
        .add_model(
            "bob@external",
            &jimm::engine::ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .build(),
        )
        .await?;
    let before = env
        .jimm
        .database()
        .get_model_by_uuid(&info.uuid)
        .await?
        .expect("model exists");
    let target = if before.controller_name == "c1" { "c2" } else { "c1" };

    env.jimm
        .update_migrated_model("admin@external", &info.uuid, target)
        .await?;
    let after = env
        .jimm
        .database()
        .get_model_by_uuid(&info.uuid)
        .await?
        .expect("model exists");
    assert_eq!(after.controller_name, target);

    // A model jimm does not know is ModelNotFound.
    let err = env
        .jimm
        .update_migrated_model(
            "admin@external",
            "00000001-0000-0000-0000-00000000beef",
            target,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModelNotFound);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_earliest_controller_version() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let db = env.jimm.database();
    db.controller_seen("c1", Some("3.4.0")).await?;
    db.controller_seen("c2", Some("3.2.5")).await?;

    let earliest = env.jimm.earliest_controller_version().await?;
    assert_eq!(earliest, Some(semver::Version::new(3, 2, 5)));
    Ok(())
}
