//! aws-account-operator library crate
//!
//! This module exports the controllers, CRD definitions, the AWS boundary and
//! the operator configuration.

pub mod aws;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;

pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::runtime::controller::{Config as ControllerConfig, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use aws::AwsClientBuilder;
use config::OperatorSettings;
use controller::context::Context;
use controller::error::Error;
use controller::{account_validation, accountpool_validation};
use crd::{ACCOUNT_CR_NAMESPACE, Account, AccountPool};

/// Create the default watcher configuration for all controllers.
///
/// `any_semantic()` gives more reliable resource discovery in test environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Converts watch events to objects (Added/Modified only)
/// - Filters out status-only updates via generation predicate
///
/// Returns the reflector store (for cache lookups) and the filtered stream.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Log the result of one reconciliation.
///
/// ObjectNotFound errors are expected after deletion, when a queued request
/// fires for an object that is gone, and are logged at debug level.
fn log_result<K>(controller: &str, result: Result<(ObjectRef<K>, kube::runtime::controller::Action), ControllerError<Error, watcher::Error>>)
where
    K: Resource,
    K::DynamicType: std::fmt::Debug,
{
    match result {
        Ok((obj, _action)) => {
            debug!(controller, name = %obj.name, "Reconciled");
        }
        Err(e) => {
            let is_not_found = match &e {
                ControllerError::ObjectNotFound(_) => true,
                ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!(controller, "Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!(controller, "Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run the account validation and accountpool validation controllers.
///
/// Both controllers watch the operator namespace (`POD_NAMESPACE`, falling
/// back to `aws-account-operator`) and share one [`Context`]. Each runs at
/// most `max_concurrent_reconciles` reconciliations at a time.
///
/// If health_state is provided, metrics will be recorded for reconciliations.
pub async fn run_controllers(
    client: Client,
    aws: Arc<dyn AwsClientBuilder>,
    settings: OperatorSettings,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = settings
        .pod_namespace
        .clone()
        .unwrap_or_else(|| ACCOUNT_CR_NAMESPACE.to_string());
    let concurrency = settings.max_concurrent_reconciles;
    info!(
        namespace = %namespace,
        concurrency,
        dev_mode = settings.dev_mode,
        "Starting account validation controllers"
    );

    // Mark as ready once we start the controllers
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), aws, settings, health_state));
    let watcher_config = default_watcher_config();

    let accounts: Api<Account> = Api::namespaced(client.clone(), &namespace);
    let (account_reader, account_stream) = create_filtered_stream(accounts, watcher_config.clone());
    let account_controller = Controller::for_stream(account_stream, account_reader)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(
            account_validation::reconcile,
            account_validation::error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            log_result(account_validation::CONTROLLER_NAME, result);
        });

    let pools: Api<AccountPool> = Api::namespaced(client, &namespace);
    let (pool_reader, pool_stream) = create_filtered_stream(pools, watcher_config);
    let pool_controller = Controller::for_stream(pool_stream, pool_reader)
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(
            accountpool_validation::reconcile,
            accountpool_validation::error_policy,
            ctx,
        )
        .for_each(|result| async move {
            log_result(accountpool_validation::CONTROLLER_NAME, result);
        });

    futures::join!(account_controller, pool_controller);

    // This should never complete in normal operation
    error!("Controller streams ended unexpectedly");
}
