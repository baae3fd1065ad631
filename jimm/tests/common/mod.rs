#![allow(dead_code)]

//! A fake Juju controller fleet for engine tests: one shared state backs
//! every dialed connection, keyed by the controller the cache dialed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use jimm::api::{
    ApiError, ApiErrorCode, ApiResult, CloudInfo, CloudSpec, CloudUserInfo, ConnectionCache,
    ControllerApi, ControllerModelSummary, Dialer, MachineDelta, ModelCreateRequest, ModelDelta,
    ModelInfo, ModelStatusInfo, ModelSummary, ModelUserInfo, TaggedCredential,
    UpdateCredentialModelResult,
};
use jimm::auth::{AccessChecker, SqliteTupleStore};
use jimm::db::{Database, NewController, NewCredential};
use jimm::engine::Jimm;
use jimm::secrets::MemorySecretStore;
use jimm::utils::{RandSource, SystemClock};
use jimm::JimmError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A model living on the fake fleet.
#[derive(Debug, Clone)]
pub struct FakeModel {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub cloud: String,
    pub region: String,
    pub life: String,
    pub controller: String,
    pub users: Vec<ModelUserInfo>,
    pub machines: Vec<MachineDelta>,
}

/// The mutable state shared by every fake connection.
#[derive(Debug, Default)]
pub struct FakeState {
    pub models: HashMap<String, FakeModel>,
    pub next_model: u64,
    pub credentials: HashMap<String, TaggedCredential>,
    pub revoked_credentials: Vec<String>,
    pub grants: Vec<(String, String, String)>,
    pub revokes: Vec<(String, String, String)>,
    pub jimm_admin_models: Vec<String>,
    pub dial_failures: HashSet<String>,
    pub upgrading: HashSet<String>,
    pub supports_check: bool,
    pub check_results: Vec<UpdateCredentialModelResult>,
    pub check_hang: bool,
    pub update_credential_calls: usize,
    pub clouds: Vec<CloudSpec>,
    pub cloud_users: HashMap<String, Vec<CloudUserInfo>>,
    pub controller_summary: Option<ControllerModelSummary>,
    pub summaries: VecDeque<Vec<ModelSummary>>,
}

/// The fake fleet: a [`Dialer`] handing out connections into the shared
/// state.
#[derive(Debug, Clone, Default)]
pub struct FakeJuju {
    pub state: Arc<Mutex<FakeState>>,
}

struct FakeApi {
    state: Arc<Mutex<FakeState>>,
    controller: String,
}

/// An engine wired to an in-memory catalog and the fake fleet.
pub struct TestEnv {
    pub jimm: Arc<Jimm>,
    pub fake: FakeJuju,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeJuju {
    pub fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    /// Places a model directly into the fake fleet.
    pub fn put_model(&self, model: FakeModel) {
        self.lock().models.insert(model.uuid.clone(), model);
    }
}

impl FakeModel {
    pub fn new(uuid: &str, name: &str, owner: &str, controller: &str) -> Self {
        FakeModel {
            uuid: uuid.to_string(),
            name: name.to_string(),
            owner: owner.to_string(),
            cloud: "dummy".to_string(),
            region: "r".to_string(),
            life: "alive".to_string(),
            controller: controller.to_string(),
            users: vec![ModelUserInfo {
                username: owner.to_string(),
                display_name: String::new(),
                access: "admin".to_string(),
                last_connection: None,
            }],
            machines: Vec::new(),
        }
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            cloud: self.cloud.clone(),
            cloud_region: self.region.clone(),
            life: self.life.clone(),
            status: Default::default(),
            users: self.users.clone(),
            agent_version: None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Dialer for FakeJuju {
    async fn dial(
        &self,
        controller: &jimm::db::Controller,
        _admin_user: &str,
        _admin_password: &str,
    ) -> Result<Box<dyn ControllerApi>, JimmError> {
        if self.lock().dial_failures.contains(&controller.name) {
            return Err(JimmError::ConnectionFailed(format!(
                "controller {} refused the connection",
                controller.name
            )));
        }
        Ok(Box::new(FakeApi {
            state: Arc::clone(&self.state),
            controller: controller.name.clone(),
        }))
    }
}

#[async_trait]
impl ControllerApi for FakeApi {
    async fn login(&self) -> ApiResult<()> {
        Ok(())
    }

    async fn controller_model_summary(&self) -> ApiResult<ControllerModelSummary> {
        self.state
            .lock()
            .unwrap()
            .controller_summary
            .clone()
            .ok_or_else(|| ApiError::coded(ApiErrorCode::NotFound, "no controller model"))
    }

    async fn clouds(&self) -> ApiResult<Vec<CloudSpec>> {
        Ok(self.state.lock().unwrap().clouds.clone())
    }

    async fn cloud_info(&self, cloud: &str) -> ApiResult<CloudInfo> {
        let state = self.state.lock().unwrap();
        let spec = state
            .clouds
            .iter()
            .find(|c| c.name == cloud)
            .cloned()
            .ok_or_else(|| ApiError::coded(ApiErrorCode::NotFound, format!("cloud {}", cloud)))?;
        Ok(CloudInfo {
            cloud: spec,
            users: state.cloud_users.get(cloud).cloned().unwrap_or_default(),
        })
    }

    async fn model_info(&self, model_uuid: &str) -> ApiResult<ModelInfo> {
        self.state
            .lock()
            .unwrap()
            .models
            .get(model_uuid)
            .map(FakeModel::info)
            .ok_or_else(|| {
                ApiError::coded(ApiErrorCode::NotFound, format!("model {}", model_uuid))
            })
    }

    async fn create_model(&self, args: &ModelCreateRequest) -> ApiResult<ModelInfo> {
        let mut state = self.state.lock().unwrap();
        if state.upgrading.contains(&self.controller) {
            return Err(ApiError::coded(
                ApiErrorCode::UpgradeInProgress,
                "upgrade in progress",
            ));
        }
        let duplicate = state.models.values().any(|m| {
            m.controller == self.controller && m.owner == args.owner && m.name == args.name
        });
        if duplicate {
            return Err(ApiError::coded(
                ApiErrorCode::AlreadyExists,
                format!("model {} exists", args.name),
            ));
        }
        state.next_model += 1;
        let uuid = format!("00000001-0000-0000-0000-{:012x}", state.next_model);
        let model = FakeModel {
            uuid: uuid.clone(),
            name: args.name.clone(),
            owner: args.owner.clone(),
            cloud: args.cloud.clone(),
            region: args.region.clone(),
            life: "alive".to_string(),
            controller: self.controller.clone(),
            users: vec![ModelUserInfo {
                username: args.owner.clone(),
                display_name: String::new(),
                access: "admin".to_string(),
                last_connection: None,
            }],
            machines: Vec::new(),
        };
        let info = model.info();
        state.models.insert(uuid, model);
        Ok(info)
    }

    async fn destroy_model(
        &self,
        model_uuid: &str,
        _destroy_storage: Option<bool>,
        _force: Option<bool>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.models.get_mut(model_uuid) {
            Some(model) => {
                model.life = "dying".to_string();
                Ok(())
            }
            None => Err(ApiError::coded(
                ApiErrorCode::NotFound,
                format!("model {}", model_uuid),
            )),
        }
    }

    async fn model_status(&self, model_uuid: &str) -> ApiResult<ModelStatusInfo> {
        let state = self.state.lock().unwrap();
        let model = state.models.get(model_uuid).ok_or_else(|| {
            ApiError::coded(ApiErrorCode::NotFound, format!("model {}", model_uuid))
        })?;
        Ok(ModelStatusInfo {
            uuid: model.uuid.clone(),
            life: model.life.clone(),
            hosted_machine_count: model.machines.len() as i64,
            application_count: 0,
        })
    }

    async fn grant_model_access(
        &self,
        model_uuid: &str,
        username: &str,
        access: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.grants.push((
            model_uuid.to_string(),
            username.to_string(),
            access.to_string(),
        ));
        if let Some(model) = state.models.get_mut(model_uuid) {
            model.users.push(ModelUserInfo {
                username: username.to_string(),
                display_name: String::new(),
                access: access.to_string(),
                last_connection: None,
            });
        }
        Ok(())
    }

    async fn revoke_model_access(
        &self,
        model_uuid: &str,
        username: &str,
        access: &str,
    ) -> ApiResult<()> {
        self.state.lock().unwrap().revokes.push((
            model_uuid.to_string(),
            username.to_string(),
            access.to_string(),
        ));
        Ok(())
    }

    async fn grant_jimm_model_admin(&self, model_uuid: &str) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .jimm_admin_models
            .push(model_uuid.to_string());
        Ok(())
    }

    async fn update_credential(
        &self,
        credential: &TaggedCredential,
    ) -> ApiResult<Vec<UpdateCredentialModelResult>> {
        let mut state = self.state.lock().unwrap();
        state.update_credential_calls += 1;
        state
            .credentials
            .insert(credential.path.clone(), credential.clone());
        Ok(Vec::new())
    }

    fn supports_check_credential_models(&self) -> bool {
        self.state.lock().unwrap().supports_check
    }

    async fn check_credential_models(
        &self,
        _credential: &TaggedCredential,
    ) -> ApiResult<Vec<UpdateCredentialModelResult>> {
        let hang = self.state.lock().unwrap().check_hang;
        if hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(self.state.lock().unwrap().check_results.clone())
    }

    async fn revoke_credential(&self, credential_path: &str) -> ApiResult<()> {
        self.state
            .lock()
            .unwrap()
            .revoked_credentials
            .push(credential_path.to_string());
        Ok(())
    }

    async fn change_model_credential(
        &self,
        _model_uuid: &str,
        _credential_path: &str,
    ) -> ApiResult<()> {
        Ok(())
    }

    async fn watch_all(&self, model_uuid: &str) -> ApiResult<String> {
        Ok(format!("w:{}", model_uuid))
    }

    async fn model_watcher_next(&self, watcher_id: &str) -> ApiResult<Vec<ModelDelta>> {
        let uuid = watcher_id.trim_start_matches("w:");
        let state = self.state.lock().unwrap();
        Ok(state
            .models
            .get(uuid)
            .map(|m| {
                m.machines
                    .iter()
                    .cloned()
                    .map(ModelDelta::Machine)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn model_watcher_stop(&self, _watcher_id: &str) -> ApiResult<()> {
        Ok(())
    }

    fn supports_model_summary_watcher(&self) -> bool {
        true
    }

    async fn watch_all_model_summaries(&self) -> ApiResult<String> {
        Ok("summaries".to_string())
    }

    async fn model_summary_watcher_next(
        &self,
        _watcher_id: &str,
    ) -> ApiResult<Vec<ModelSummary>> {
        let batch = self.state.lock().unwrap().summaries.pop_front();
        match batch {
            Some(batch) => Ok(batch),
            None => {
                // Nothing new; behave like a quiet upstream watcher.
                tokio::time::sleep(Duration::from_millis(25)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn model_summary_watcher_stop(&self, _watcher_id: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds an engine over an in-memory catalog and the fake fleet, with a
/// deterministic randomizer.
pub async fn setup_seeded(seed: u64, with_secret_store: bool) -> anyhow::Result<TestEnv> {
    let database = Database::new_in_memory().await?;
    let checker = AccessChecker::new(Arc::new(SqliteTupleStore::new(database.pool().clone())));
    let fake = FakeJuju::default();
    let secret_store: Option<Arc<dyn jimm::secrets::SecretStore>> = if with_secret_store {
        Some(Arc::new(MemorySecretStore::default()))
    } else {
        None
    };
    let cache = ConnectionCache::new(Arc::new(fake.clone()), secret_store.clone())
        .with_timeouts(Duration::from_millis(250), Duration::from_millis(10));
    let jimm = Jimm::new(
        database,
        checker,
        cache,
        secret_store,
        Arc::new(SystemClock),
        RandSource::seeded(seed),
    )
    .with_fanout_timeout(Duration::from_secs(2));
    Ok(TestEnv {
        jimm: Arc::new(jimm),
        fake,
    })
}

/// [`setup_seeded`] with a fixed seed and no secret store.
pub async fn setup() -> anyhow::Result<TestEnv> {
    setup_seeded(42, false).await
}

/// Seeds the catalog with the test fleet: cloud `dummy` with region `r`,
/// controllers `c1` and `c2` both serving it at equal priority, users
/// `alice@external`, `bob@external` and the administrator
/// `admin@external`, and bob's valid credential `dummy/bob@external/cred`.
pub async fn seed_fleet(env: &TestEnv) -> anyhow::Result<()> {
    let db = env.jimm.database();
    db.add_cloud("dummy", "dummy").await?;
    let region = db.add_cloud_region("dummy", "r").await?;

    db.upsert_user("alice@external", None).await?;
    db.upsert_user("bob@external", None).await?;
    db.upsert_user("admin@external", None).await?;
    db.set_user_jimm_admin("admin@external", true).await?;

    let c1 = db
        .add_controller(
            &NewController::builder()
                .name("c1".to_string())
                .uuid("00000010-0000-0000-0000-000000000001".to_string())
                .build(),
        )
        .await?;
    let c2 = db
        .add_controller(
            &NewController::builder()
                .name("c2".to_string())
                .uuid("00000010-0000-0000-0000-000000000002".to_string())
                .build(),
        )
        .await?;
    db.set_region_priority(c1.id, region.id, 10).await?;
    db.set_region_priority(c2.id, region.id, 10).await?;

    db.upsert_credential(
        &NewCredential::builder()
            .cloud("dummy".to_string())
            .owner("bob@external".to_string())
            .name("cred".to_string())
            .auth_type("userpass".to_string())
            .valid(true)
            .build(),
    )
    .await?;
    Ok(())
}
