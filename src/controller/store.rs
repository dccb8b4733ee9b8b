//! Account resource store.
//!
//! The reconcilers read and write Accounts and the operator ConfigMap only
//! through [`AccountStore`], so the validation flow can run against an
//! in-memory store in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::{OPERATOR_CONFIG_MAP, OperatorConfig};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::crd::{Account, AccountSpec, AccountStatus};

/// Persistence boundary for Accounts and operator configuration.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch an Account, `None` when it does not exist.
    async fn get_account(&self, name: &str) -> Result<Option<Account>>;

    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Persist `account.status`.
    async fn update_account_status(&self, account: &Account) -> Result<()>;

    /// Persist `account.spec`.
    async fn update_account_spec(&self, account: &Account) -> Result<()>;

    async fn delete_account(&self, name: &str) -> Result<()>;

    /// Snapshot of the operator ConfigMap, `None` when it does not exist.
    async fn operator_config(&self) -> Result<Option<OperatorConfig>>;
}

/// Set keys that disappeared from `desired` to null so a merge patch removes them.
fn null_removed_keys<V, W>(
    object: &mut Map<String, Value>,
    field: &str,
    current: &BTreeMap<String, V>,
    desired: &BTreeMap<String, W>,
) {
    if current.is_empty() {
        return;
    }
    if desired.is_empty() {
        object.insert(field.to_string(), Value::Null);
        return;
    }
    if let Some(Value::Object(entries)) = object.get_mut(field) {
        for key in current.keys().filter(|k| !desired.contains_key(*k)) {
            entries.insert(key.clone(), Value::Null);
        }
    }
}

fn to_object<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// JSON merge patch that turns `current` into `desired`, removing map entries
/// that are gone.
pub fn status_merge_patch(current: Option<&AccountStatus>, desired: &AccountStatus) -> Result<Value> {
    let mut status = to_object(desired)?;
    if let Some(current) = current {
        null_removed_keys(
            &mut status,
            "regionalServiceQuotas",
            &current.regional_service_quotas,
            &desired.regional_service_quotas,
        );
        null_removed_keys(
            &mut status,
            "optInRegions",
            &current.opt_in_regions,
            &desired.opt_in_regions,
        );
    }
    Ok(json!({ "status": status }))
}

/// JSON merge patch for the spec's regional service quotas.
pub fn spec_merge_patch(current: &AccountSpec, desired: &AccountSpec) -> Result<Value> {
    let mut spec = to_object(desired)?;
    null_removed_keys(
        &mut spec,
        "regionalServiceQuotas",
        &current.regional_service_quotas,
        &desired.regional_service_quotas,
    );
    Ok(json!({ "spec": spec }))
}

/// [`AccountStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeAccountStore {
    client: Client,
    namespace: String,
}

impl KubeAccountStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn accounts(&self) -> Api<Account> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl AccountStore for KubeAccountStore {
    async fn get_account(&self, name: &str) -> Result<Option<Account>> {
        Ok(self.accounts().get_opt(name).await?)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts().list(&ListParams::default()).await?.items)
    }

    async fn update_account_status(&self, account: &Account) -> Result<()> {
        let name = account.metadata.name.as_deref().unwrap_or_default();
        let api = self.accounts();
        let current = api.get_opt(name).await?;
        let desired = account.status.clone().unwrap_or_default();
        let patch = status_merge_patch(current.as_ref().and_then(|a| a.status.as_ref()), &desired)?;
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(account = %name, "Updated account status");
        Ok(())
    }

    async fn update_account_spec(&self, account: &Account) -> Result<()> {
        let name = account.metadata.name.as_deref().unwrap_or_default();
        let api = self.accounts();
        let current = api.get(name).await?;
        let patch = spec_merge_patch(&current.spec, &account.spec)?;
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(account = %name, "Updated account spec");
        Ok(())
    }

    async fn delete_account(&self, name: &str) -> Result<()> {
        self.accounts().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn operator_config(&self) -> Result<Option<OperatorConfig>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(api
            .get_opt(OPERATOR_CONFIG_MAP)
            .await?
            .map(|cm| OperatorConfig::from_config_map(&cm)))
    }
}
