//! Engine tests for the credential propagator.

mod common;

use std::collections::HashMap;

use common::{seed_fleet, setup, setup_seeded};
use jimm::engine::{CredentialUpdateFlags, ModelCreateArgs, UpdateCredentialArgs};
use jimm::ErrorCode;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn update_args(attributes: HashMap<String, String>) -> UpdateCredentialArgs {
    UpdateCredentialArgs::builder()
        .cloud("dummy".to_string())
        .owner("bob@external".to_string())
        .name("cred".to_string())
        .auth_type("userpass".to_string())
        .attributes(attributes)
        .build()
}

fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_update_credential_pushes_to_holding_controllers() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    // Attach the credential to both controllers.
    let db = env.jimm.database();
    let credential = db.get_credential("dummy", "bob@external", "cred").await?;
    for name in ["c1", "c2"] {
        let controller = db.get_controller(name).await?;
        db.add_credential_controller(credential.id, controller.id)
            .await?;
    }

    env.jimm
        .update_credential(
            "bob@external",
            &update_args(attrs(&[("username", "bob"), ("password", "hunter2")])),
            CredentialUpdateFlags::default(),
        )
        .await?;

    // Both controllers hold the new attributes; the catalog row carries
    // them too since no secret store is configured.
    let pushed = env.fake.lock().credentials["dummy/bob@external/cred"].clone();
    assert_eq!(pushed.attributes.get("username").map(String::as_str), Some("bob"));
    let stored = db.get_credential("dummy", "bob@external", "cred").await?;
    assert_eq!(
        stored.attribute_map().get("password").map(String::as_str),
        Some("hunter2")
    );
    assert!(!stored.attributes_in_store);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_update_credential_is_idempotent() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;
    let db = env.jimm.database();
    let credential = db.get_credential("dummy", "bob@external", "cred").await?;
    let controller = db.get_controller("c1").await?;
    db.add_credential_controller(credential.id, controller.id)
        .await?;

    let args = update_args(attrs(&[("username", "bob")]));
    env.jimm
        .update_credential("bob@external", &args, CredentialUpdateFlags::default())
        .await?;
    let first_row = db.get_credential("dummy", "bob@external", "cred").await?;
    let first_pushed = env.fake.lock().credentials["dummy/bob@external/cred"].clone();

    env.jimm
        .update_credential("bob@external", &args, CredentialUpdateFlags::default())
        .await?;
    let second_row = db.get_credential("dummy", "bob@external", "cred").await?;
    let second_pushed = env.fake.lock().credentials["dummy/bob@external/cred"].clone();

    assert_eq!(first_row.id, second_row.id);
    assert_eq!(first_row.attribute_map(), second_row.attribute_map());
    assert_eq!(first_pushed.attributes, second_pushed.attributes);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_update_credential_stores_attributes_off_catalog() -> anyhow::Result<()> {
    let env = setup_seeded(42, true).await?;
    seed_fleet(&env).await?;

    env.jimm
        .update_credential(
            "bob@external",
            &update_args(attrs(&[("secret-key", "s3cret")])),
            CredentialUpdateFlags::default(),
        )
        .await?;

    let stored = env
        .jimm
        .database()
        .get_credential("dummy", "bob@external", "cred")
        .await?;
    assert!(stored.attributes_in_store);
    // The catalog never sees the attribute values.
    assert!(stored.attribute_map().is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_check_failure_blocks_update() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;
    let db = env.jimm.database();
    let credential = db.get_credential("dummy", "bob@external", "cred").await?;
    let controller = db.get_controller("c1").await?;
    db.add_credential_controller(credential.id, controller.id)
        .await?;

    {
        let mut state = env.fake.lock();
        state.supports_check = true;
        state.check_results = vec![jimm::api::UpdateCredentialModelResult {
            model_uuid: "00000001-0000-0000-0000-000000000001".to_string(),
            model_name: "m".to_string(),
            errors: vec!["invalid credential".to_string()],
        }];
    }

    let err = env
        .jimm
        .update_credential(
            "bob@external",
            &update_args(attrs(&[("username", "bob")])),
            CredentialUpdateFlags::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);

    // Nothing was pushed.
    assert!(env.fake.lock().credentials.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_check_deadline_maps_to_timed_out() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;
    let db = env.jimm.database();
    let credential = db.get_credential("dummy", "bob@external", "cred").await?;
    let controller = db.get_controller("c1").await?;
    db.add_credential_controller(credential.id, controller.id)
        .await?;

    {
        let mut state = env.fake.lock();
        state.supports_check = true;
        state.check_hang = true;
    }

    let err = env
        .jimm
        .update_credential(
            "bob@external",
            &update_args(attrs(&[("username", "bob")])),
            CredentialUpdateFlags::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TimedOut);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_revoke_refused_while_credential_in_use() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    env.jimm
        .add_model(
            "bob@external",
            &ModelCreateArgs::builder()
                .name("m".to_string())
                .cloud("dummy".to_string())
                .credential("dummy/bob@external/cred".to_string())
                .build(),
        )
        .await?;

    let err = env
        .jimm
        .revoke_credential(
            "bob@external",
            "dummy",
            "bob@external",
            "cred",
            CredentialUpdateFlags::default(),
        )
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("credential is in use on at least one model"),
        "unexpected error: {}",
        err
    );

    // The catalog is untouched.
    let credential = env
        .jimm
        .database()
        .get_credential("dummy", "bob@external", "cred")
        .await?;
    assert!(!credential.revoked);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_revoke_propagates_to_holding_controllers() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;
    let db = env.jimm.database();
    let credential = db.get_credential("dummy", "bob@external", "cred").await?;
    let controller = db.get_controller("c1").await?;
    db.add_credential_controller(credential.id, controller.id)
        .await?;

    env.jimm
        .revoke_credential(
            "bob@external",
            "dummy",
            "bob@external",
            "cred",
            CredentialUpdateFlags::default(),
        )
        .await?;

    let revoked = db.get_credential("dummy", "bob@external", "cred").await?;
    assert!(revoked.revoked);
    assert_eq!(
        env.fake.lock().revoked_credentials,
        vec!["dummy/bob@external/cred".to_string()]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_change_model_credential() -> anyhow::Result<()> {
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

    let db = env.jimm.database();
    db.upsert_credential(
        &jimm::db::NewCredential::builder()
            .cloud("dummy".to_string())
            .owner("bob@external".to_string())
            .name("cred2".to_string())
            .valid(true)
            .build(),
    )
    .await?;

    // A credential belonging to somebody else is refused.
    db.upsert_credential(
        &jimm::db::NewCredential::builder()
            .cloud("dummy".to_string())
            .owner("alice@external".to_string())
            .name("other".to_string())
            .valid(true)
            .build(),
    )
    .await?;
    let err = env
        .jimm
        .change_model_credential("bob@external", &info.uuid, "dummy/alice@external/other")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    env.jimm
        .change_model_credential("bob@external", &info.uuid, "dummy/bob@external/cred2")
        .await?;
    let model = db
        .get_model_by_uuid(&info.uuid)
        .await?
        .expect("model exists");
    assert_eq!(model.credential_name, "cred2");
    // The new credential was pushed to the hosting controller first.
    assert!(env
        .fake
        .lock()
        .credentials
        .contains_key("dummy/bob@external/cred2"));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_credential_operations_require_owner_or_admin() -> anyhow::Result<()> {
    let env = setup().await?;
    seed_fleet(&env).await?;

    let err = env
        .jimm
        .update_credential(
            "alice@external",
            &update_args(HashMap::new()),
            CredentialUpdateFlags::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    // A jimm administrator may update anybody's credential.
    env.jimm
        .update_credential(
            "admin@external",
            &update_args(attrs(&[("username", "bob")])),
            CredentialUpdateFlags::default(),
        )
        .await?;
    Ok(())
}
