//! `jimm` is a multi-tenant control plane that federates a fleet of Juju
//! controllers behind a single endpoint.
//!
//! # Overview
//!
//! Clients connect to JIMM as if it were a Juju controller; JIMM
//! authenticates them, resolves which backing controller hosts the requested
//! model, proxies the API traffic, and keeps a local catalog of controllers,
//! clouds, credentials, models, application offers, users and groups.
//!
//! # Architecture
//!
//! jimm consists of several key components:
//!
//! - **Catalog**: the relational record of the fleet (clouds, controllers,
//!   credentials, models, offers, users, groups)
//! - **Authorization**: a relationship-graph access checker over
//!   (object, relation, target) tuples, plus the macaroon login flow
//! - **Connections**: a reference-counted cache of live API connections to
//!   the backing controllers
//! - **Engine**: model placement, credential propagation and the admin
//!   operations that mutate both the catalog and the controllers
//! - **Watchers**: per-controller model summary loops feeding an in-process
//!   pub/sub hub
//!
//! # Modules
//!
//! - [`api`] - Controller capability trait and connection cache
//! - [`auth`] - Relation graph, login and session tokens
//! - [`config`] - Daemon configuration
//! - [`db`] - Catalog store
//! - [`dispatch`] - Model request dispatcher
//! - [`engine`] - The federation engine
//! - [`names`] - Typed resource tags
//! - [`pubsub`] - Model summary hub
//! - [`secrets`] - Secret store
//! - [`watcher`] - Model summary watchers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod names;
pub mod pubsub;
pub mod secrets;
pub mod utils;
pub mod watcher;

pub use error::*;
