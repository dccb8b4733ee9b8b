//! Shared context for the controllers.
//!
//! The Context struct holds shared state that is passed to the reconcilers:
//! the account store, the AWS client source, the OU cache and the event
//! recorder.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::aws::AwsClientBuilder;
use crate::config::OperatorSettings;
use crate::controller::backoff::ErrorBackoff;
use crate::controller::ou_cache::OuCache;
use crate::controller::store::{AccountStore, KubeAccountStore};
use crate::crd::ACCOUNT_CR_NAMESPACE;
use crate::health::HealthState;

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "aws-account-operator";

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Account and ConfigMap access
    pub store: Arc<dyn AccountStore>,
    /// Source of AWS clients
    pub aws: Arc<dyn AwsClientBuilder>,
    /// OU name to id cache shared by all reconciliations
    pub ou_cache: Arc<OuCache>,
    /// Retry delays for failed reconciliations
    pub backoff: Arc<ErrorBackoff>,
    /// Process settings
    pub settings: OperatorSettings,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Kubernetes client for events, absent when running against a test store
    client: Option<Client>,
    /// Event reporter identity
    reporter: Reporter,
}

impl Context {
    /// Create a context backed by the Kubernetes API
    pub fn new(
        client: Client,
        aws: Arc<dyn AwsClientBuilder>,
        settings: OperatorSettings,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let namespace = settings
            .pod_namespace
            .clone()
            .unwrap_or_else(|| ACCOUNT_CR_NAMESPACE.to_string());
        let store = Arc::new(KubeAccountStore::new(client.clone(), &namespace));
        let mut ctx = Self::with_store(store, aws, settings, health_state);
        ctx.client = Some(client);
        ctx
    }

    /// Create a context over an arbitrary store. Events are only logged.
    pub fn with_store(
        store: Arc<dyn AccountStore>,
        aws: Arc<dyn AwsClientBuilder>,
        settings: OperatorSettings,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.into(),
            instance: settings.pod_name.clone(),
        };
        Self {
            store,
            aws,
            ou_cache: Arc::new(OuCache::default()),
            backoff: Arc::new(ErrorBackoff::default()),
            settings,
            health_state,
            client: None,
            reporter,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Option<Recorder> {
        self.client
            .as_ref()
            .map(|client| Recorder::new(client.clone(), self.reporter.clone()))
    }

    async fn publish<K>(&self, resource: &K, type_: EventType, reason: &str, action: &str, note: Option<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        let Some(recorder) = self.recorder() else {
            tracing::debug!(reason = %reason, action = %action, note = ?note, "Event (no recorder)");
            return;
        };
        let object_ref = resource.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(&self, resource: &K, reason: &str, action: &str, note: Option<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(&self, resource: &K, reason: &str, action: &str, note: Option<String>)
    where
        K: Resource<DynamicType = ()>,
    {
        self.publish(resource, EventType::Warning, reason, action, note)
            .await;
    }

    /// Record a corrective action in metrics
    pub fn record_action(&self, action: &str, dry_run: bool) {
        if let Some(ref health_state) = self.health_state {
            health_state.metrics.record_action(action, dry_run);
        }
    }
}
