//! The login flow: macaroon discharge verification, lazy user creation and
//! session token minting.
//!
//! A connecting client presents a bakery macaroon. The discharge is
//! verified against the configured identity service; a missing or expired
//! discharge produces a fresh macaroon carrying a single third-party caveat
//! addressed at the identity service. Once verified, the user's access to
//! each resource named by the session is computed and embedded in a
//! short-lived signed token for downstream use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::names::{require_external_user, Kind, Tag};
use crate::utils::Clock;
use crate::{JimmError, JimmResult};

use super::{AccessChecker, Relation, RelationTuple, MODEL_ACCESS_RELATIONS};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A bakery macaroon, carried opaquely between the client and the identity
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macaroon {
    /// The location of the service that minted the macaroon.
    pub location: String,

    /// The macaroon identifier.
    pub identifier: String,

    /// The caveats that must be discharged.
    pub caveats: Vec<Caveat>,
}

/// A single macaroon caveat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    /// The third-party location that can discharge the caveat, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,

    /// The caveat condition.
    pub condition: String,

    /// The public key of the third party, when the caveat is addressed at
    /// one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub public_key: Option<String>,
}

/// Verifies discharged login macaroons against the identity service.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Returns the verified external username, or `None` when the
    /// presented macaroons carry no valid discharge and a fresh one is
    /// required.
    async fn verify(&self, macaroons: &[Macaroon]) -> JimmResult<Option<String>>;
}

/// The production [`IdentityVerifier`]: talks to the macaroon discharge
/// endpoint of the identity service.
#[derive(Debug)]
pub struct DischargeClient {
    client: ClientWithMiddleware,
    url: String,
}

/// The progress of a client session through the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No verified identity.
    Unauthenticated,

    /// Identity verified, no token minted yet.
    Authenticated,

    /// A session token has been issued.
    TokenIssued,

    /// Additional permissions are being checked and the token re-signed.
    Refreshing,
}

/// A client session.
#[derive(Debug)]
pub struct Session {
    /// Where the session is in the login flow.
    pub state: SessionState,

    /// The verified username, once authenticated.
    pub username: Option<String>,

    /// The `{resource -> access}` claims embedded in the current token.
    pub claims: HashMap<String, String>,
}

/// The outcome of a login attempt.
#[derive(Debug)]
pub enum LoginResult {
    /// The client must obtain a discharge for the returned macaroon and
    /// retry.
    DischargeRequired(Macaroon),

    /// The client is logged in; the token carries its access claims.
    LoggedIn(SessionToken),
}

/// A signed session token.
#[derive(Debug, Clone)]
pub struct SessionToken {
    /// The encoded token.
    pub token: String,

    /// The claims that were signed into it.
    pub claims: TokenClaims,
}

/// The claims signed into a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The authenticated username.
    pub sub: String,

    /// Expiry, seconds since the epoch.
    pub exp: i64,

    /// Access level per resource tag.
    pub access: HashMap<String, String>,
}

/// Authenticates sessions and mints their tokens.
pub struct Authenticator {
    verifier: Arc<dyn IdentityVerifier>,
    database: Database,
    checker: AccessChecker,
    clock: Arc<dyn Clock>,
    signing_secret: Vec<u8>,
    token_ttl: Duration,
    location: String,
    identity_url: String,
    identity_public_key: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DischargeClient {
    /// Creates a client for the identity service at the given base URL.
    pub fn new(url: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        DischargeClient {
            client,
            url: url.into(),
        }
    }
}

impl Session {
    /// Creates a new, unauthenticated session.
    pub fn new() -> Self {
        Session {
            state: SessionState::Unauthenticated,
            username: None,
            claims: HashMap::new(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

impl Authenticator {
    /// Creates an authenticator.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        database: Database,
        checker: AccessChecker,
        clock: Arc<dyn Clock>,
        signing_secret: impl Into<Vec<u8>>,
        token_ttl: Duration,
        location: impl Into<String>,
        identity_url: impl Into<String>,
        identity_public_key: impl Into<String>,
    ) -> Self {
        Authenticator {
            verifier,
            database,
            checker,
            clock,
            signing_secret: signing_secret.into(),
            token_ttl,
            location: location.into(),
            identity_url: identity_url.into(),
            identity_public_key: identity_public_key.into(),
        }
    }

    /// Runs the login flow for the session. `resources` names the models,
    /// controllers and clouds the session wants access claims for.
    pub async fn login(
        &self,
        session: &mut Session,
        macaroons: &[Macaroon],
        resources: &[Tag],
    ) -> JimmResult<LoginResult> {
        session.state = SessionState::Unauthenticated;
        session.username = None;
        session.claims.clear();

        let username = if macaroons.is_empty() {
            None
        } else {
            self.verifier.verify(macaroons).await?
        };
        let Some(username) = username else {
            return Ok(LoginResult::DischargeRequired(self.discharge_macaroon()));
        };
        require_external_user(&username)?;

        self.database.upsert_user(&username, None).await?;
        self.database.set_user_last_login(&username).await?;
        session.state = SessionState::Authenticated;
        session.username = Some(username.clone());

        let token = self.issue_token(session, resources).await?;
        Ok(LoginResult::LoggedIn(token))
    }

    /// Adds claims for additional resources to an authenticated session,
    /// re-checking access and re-signing the token.
    pub async fn request_access(
        &self,
        session: &mut Session,
        resources: &[Tag],
    ) -> JimmResult<SessionToken> {
        if session.username.is_none() {
            return Err(JimmError::Unauthorized("session not authenticated".into()));
        }
        session.state = SessionState::Refreshing;
        match self.issue_token(session, resources).await {
            Ok(token) => Ok(token),
            Err(e) => {
                session.state = SessionState::Unauthenticated;
                session.username = None;
                session.claims.clear();
                Err(e)
            }
        }
    }

    /// Decodes and validates a session token.
    pub fn verify_token(&self, token: &str) -> JimmResult<TokenClaims> {
        let data = jsonwebtoken::decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(&self.signing_secret),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }

    async fn issue_token(
        &self,
        session: &mut Session,
        resources: &[Tag],
    ) -> JimmResult<SessionToken> {
        let username = session
            .username
            .clone()
            .ok_or_else(|| JimmError::Unauthorized("session not authenticated".into()))?;

        for resource in resources {
            if let Some(level) = self.resource_access(&username, resource).await? {
                session.claims.insert(resource.to_string(), level);
            }
        }

        let claims = TokenClaims {
            sub: username,
            exp: (self.clock.now()
                + chrono::Duration::seconds(self.token_ttl.as_secs() as i64))
            .timestamp(),
            access: session.claims.clone(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.signing_secret),
        )?;
        session.state = SessionState::TokenIssued;
        Ok(SessionToken { token, claims })
    }

    /// Computes the access level the user holds on the resource, if any.
    async fn resource_access(
        &self,
        username: &str,
        resource: &Tag,
    ) -> JimmResult<Option<String>> {
        let user = Tag::user(username);
        match resource.kind {
            Kind::Model => {
                // The model owner is an implicit administrator.
                if let Some(model) = self.database.get_model_by_uuid(&resource.id).await? {
                    if model.owner == username {
                        return Ok(Some("admin".to_string()));
                    }
                }
                let relation = self
                    .checker
                    .strongest_relation(&user, &MODEL_ACCESS_RELATIONS, resource)
                    .await?;
                Ok(relation.map(|r| access_level_for(r).to_string()))
            }
            Kind::Controller | Kind::Cloud => {
                let tuple =
                    RelationTuple::new(user, Relation::Administrator, resource.clone());
                let (admin, _) = self.checker.check(&tuple, false).await?;
                Ok(Some(
                    if admin { "superuser" } else { "login" }.to_string(),
                ))
            }
            _ => Ok(None),
        }
    }

    /// Mints a fresh macaroon requiring discharge at the identity service.
    fn discharge_macaroon(&self) -> Macaroon {
        Macaroon {
            location: self.location.clone(),
            identifier: Uuid::new_v4().to_string(),
            caveats: vec![Caveat {
                location: Some(self.identity_url.clone()),
                condition: "is-authenticated-user".to_string(),
                public_key: Some(self.identity_public_key.clone()),
            }],
        }
    }
}

fn access_level_for(relation: Relation) -> &'static str {
    match relation {
        Relation::Reader => "read",
        Relation::Writer => "write",
        Relation::Administrator => "admin",
        Relation::Consumer => "consume",
        Relation::Member | Relation::Controller => "",
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl IdentityVerifier for DischargeClient {
    async fn verify(&self, macaroons: &[Macaroon]) -> JimmResult<Option<String>> {
        #[derive(Serialize)]
        struct VerifyRequest<'a> {
            macaroons: &'a [Macaroon],
        }

        #[derive(Deserialize)]
        struct VerifyResponse {
            username: String,
        }

        let response = self
            .client
            .post(format!("{}/v1/verify", self.url))
            .json(&VerifyRequest { macaroons })
            .send()
            .await
            .map_err(|e| JimmError::Identity(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(JimmError::Identity(format!(
                "verify returned {}",
                response.status()
            )));
        }
        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| JimmError::Identity(e.to_string()))?;
        Ok(Some(body.username))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
