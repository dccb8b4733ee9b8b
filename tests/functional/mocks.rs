//! In-memory stand-ins for AWS and the Kubernetes account store.
//!
//! `MockAws` keeps a tiny model of one organization (parents, OUs, tags,
//! region opt-in status and service quotas) and records every mutating call
//! so tests can assert that dry runs never change anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use aws_account_operator::aws::{
    AwsClient, AwsClientBuilder, AwsError, AwsResult, OrganizationalUnit, OrganizationalUnitPage,
    QuotaChangePage, QuotaChangeRequest, RegionOptStatus, Tag,
};
use aws_account_operator::config::{OperatorConfig, OperatorSettings};
use aws_account_operator::controller::context::Context;
use aws_account_operator::controller::error::Result;
use aws_account_operator::controller::store::AccountStore;
use aws_account_operator::crd::{Account, AccountSpec, AccountStatus, LegalEntity};

pub const ACCOUNT_ID: &str = "123456789012";
pub const POOL_OU: &str = "ou-pool";
pub const BASE_OU: &str = "ou-base";
pub const ROOT_ID: &str = "r-root";

fn service_error(operation: &'static str, code: &str) -> AwsError {
    AwsError::Service {
        operation,
        code: code.to_string(),
        message: "mock".to_string(),
    }
}

/// Observable model of the AWS side.
#[derive(Debug, Default)]
pub struct AwsState {
    /// child id -> parent ids
    pub parents: HashMap<String, Vec<String>>,
    /// parent id -> child OUs
    pub ous: HashMap<String, Vec<OrganizationalUnit>>,
    /// resource id -> tags
    pub tags: HashMap<String, Vec<Tag>>,
    /// region -> opt-in status
    pub regions: HashMap<String, RegionOptStatus>,
    /// Regions enabled in the account.
    pub enabled_regions: Vec<String>,
    /// quota code -> applied value
    pub applied_quotas: HashMap<String, f64>,
    pub quota_history: Vec<QuotaChangeRequest>,
    /// Regions AWS rejects with a ValidationException.
    pub unsupported_regions: Vec<String>,
    /// Error code returned by `list_tags_for_resource`.
    pub list_tags_error: Option<String>,
    /// Error code returned by `list_enabled_regions`.
    pub list_regions_error: Option<String>,
    /// operation name -> error code returned by that mutating call
    pub mutation_errors: HashMap<&'static str, String>,
    /// Mutating calls, in order.
    pub mutations: Vec<String>,
    /// Read calls, in order.
    pub reads: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockAws {
    pub state: Mutex<AwsState>,
}

impl MockAws {
    /// Account `ACCOUNT_ID` sitting in `parent`, which sits below the root.
    pub fn with_account_in(parent: &str) -> Self {
        let aws = Self::default();
        {
            let mut state = aws.state.lock();
            state
                .parents
                .insert(ACCOUNT_ID.to_string(), vec![parent.to_string()]);
            state
                .parents
                .insert(parent.to_string(), vec![ROOT_ID.to_string()]);
            state.parents.insert(ROOT_ID.to_string(), Vec::new());
        }
        aws
    }

    pub fn add_ou(&self, parent: &str, id: &str, name: &str) {
        let mut state = self.state.lock();
        state
            .ous
            .entry(parent.to_string())
            .or_default()
            .push(OrganizationalUnit {
                id: id.to_string(),
                name: name.to_string(),
            });
        state
            .parents
            .insert(id.to_string(), vec![parent.to_string()]);
    }

    pub fn set_tags(&self, resource: &str, tags: &[(&str, &str)]) {
        self.state.lock().tags.insert(
            resource.to_string(),
            tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect(),
        );
    }

    pub fn tags(&self, resource: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .tags
            .get(resource)
            .into_iter()
            .flatten()
            .map(|t| (t.key.clone(), t.value.clone()))
            .collect()
    }

    /// Make every `operation` call (`MoveAccount`, `TagResource`,
    /// `UntagResource`) fail with `code`. The attempt is still recorded.
    pub fn fail_mutation(&self, operation: &'static str, code: &str) {
        self.state
            .lock()
            .mutation_errors
            .insert(operation, code.to_string());
    }

    pub fn set_region(&self, region: &str, status: RegionOptStatus) {
        self.state.lock().regions.insert(region.to_string(), status);
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().mutations.clone()
    }

    pub fn reads(&self) -> Vec<String> {
        self.state.lock().reads.clone()
    }

    /// Number of recorded mutations whose name starts with `prefix`.
    pub fn mutation_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .mutations
            .iter()
            .filter(|m| m.starts_with(prefix))
            .count()
    }

    pub fn parent_of(&self, child: &str) -> Vec<String> {
        self.state
            .lock()
            .parents
            .get(child)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AwsClient for MockAws {
    async fn list_parents(&self, child_id: &str) -> AwsResult<Vec<String>> {
        let mut state = self.state.lock();
        state.reads.push(format!("ListParents:{child_id}"));
        state
            .parents
            .get(child_id)
            .cloned()
            .ok_or_else(|| service_error("ListParents", "ChildNotFoundException"))
    }

    async fn move_account(
        &self,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> AwsResult<()> {
        let mut state = self.state.lock();
        state.mutations.push(format!(
            "MoveAccount:{account_id}:{source_parent_id}:{destination_parent_id}"
        ));
        if let Some(code) = state.mutation_errors.get("MoveAccount") {
            return Err(service_error("MoveAccount", code));
        }
        state
            .parents
            .insert(account_id.to_string(), vec![destination_parent_id.to_string()]);
        Ok(())
    }

    async fn list_organizational_units_for_parent(
        &self,
        parent_id: &str,
        next_token: Option<String>,
    ) -> AwsResult<OrganizationalUnitPage> {
        let mut state = self.state.lock();
        state.reads.push(format!("ListOrganizationalUnitsForParent:{parent_id}"));
        let units = state.ous.get(parent_id).cloned().unwrap_or_default();
        // One unit per page to exercise pagination.
        let index: usize = next_token
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let page: Vec<OrganizationalUnit> = units.iter().skip(index).take(1).cloned().collect();
        let next_token = (index + 1 < units.len()).then(|| (index + 1).to_string());
        Ok(OrganizationalUnitPage {
            units: page,
            next_token,
        })
    }

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> AwsResult<OrganizationalUnit> {
        let exists = self
            .state
            .lock()
            .ous
            .get(parent_id)
            .is_some_and(|units| units.iter().any(|ou| ou.name == name));
        if exists {
            return Err(service_error(
                "CreateOrganizationalUnit",
                "DuplicateOrganizationalUnitException",
            ));
        }
        let id = format!("ou-{name}");
        self.state
            .lock()
            .mutations
            .push(format!("CreateOrganizationalUnit:{parent_id}:{name}"));
        self.add_ou(parent_id, &id, name);
        Ok(OrganizationalUnit {
            id,
            name: name.to_string(),
        })
    }

    async fn list_tags_for_resource(&self, resource_id: &str) -> AwsResult<Vec<Tag>> {
        let mut state = self.state.lock();
        state.reads.push(format!("ListTagsForResource:{resource_id}"));
        if let Some(code) = state.list_tags_error.clone() {
            return Err(service_error("ListTagsForResource", &code));
        }
        Ok(state.tags.get(resource_id).cloned().unwrap_or_default())
    }

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> AwsResult<()> {
        let mut state = self.state.lock();
        let keys: Vec<&str> = tags.iter().map(|t| t.key.as_str()).collect();
        state
            .mutations
            .push(format!("TagResource:{resource_id}:{}", keys.join(",")));
        if let Some(code) = state.mutation_errors.get("TagResource") {
            return Err(service_error("TagResource", code));
        }
        let current = state.tags.entry(resource_id.to_string()).or_default();
        for tag in tags {
            current.retain(|t| t.key != tag.key);
            current.push(tag.clone());
        }
        Ok(())
    }

    async fn untag_resource(&self, resource_id: &str, tag_keys: &[String]) -> AwsResult<()> {
        let mut state = self.state.lock();
        state
            .mutations
            .push(format!("UntagResource:{resource_id}:{}", tag_keys.join(",")));
        if let Some(code) = state.mutation_errors.get("UntagResource") {
            return Err(service_error("UntagResource", code));
        }
        if let Some(current) = state.tags.get_mut(resource_id) {
            current.retain(|t| !tag_keys.contains(&t.key));
        }
        Ok(())
    }

    async fn get_region_opt_status(
        &self,
        _account_id: &str,
        region: &str,
    ) -> AwsResult<Option<RegionOptStatus>> {
        let mut state = self.state.lock();
        state.reads.push(format!("GetRegionOptStatus:{region}"));
        if state.unsupported_regions.iter().any(|r| r == region) {
            return Err(service_error("GetRegionOptStatus", "ValidationException"));
        }
        Ok(state.regions.get(region).copied())
    }

    async fn enable_region(&self, _account_id: &str, region: &str) -> AwsResult<()> {
        let mut state = self.state.lock();
        state.mutations.push(format!("EnableRegion:{region}"));
        state
            .regions
            .insert(region.to_string(), RegionOptStatus::Enabling);
        Ok(())
    }

    async fn list_enabled_regions(&self, _account_id: &str) -> AwsResult<Vec<String>> {
        let mut state = self.state.lock();
        state.reads.push("ListRegions".to_string());
        if let Some(code) = state.list_regions_error.clone() {
            return Err(service_error("ListRegions", &code));
        }
        Ok(state.enabled_regions.clone())
    }

    async fn get_service_quota(
        &self,
        _service_code: &str,
        quota_code: &str,
    ) -> AwsResult<Option<f64>> {
        let mut state = self.state.lock();
        state.reads.push(format!("GetServiceQuota:{quota_code}"));
        Ok(state.applied_quotas.get(quota_code).copied())
    }

    async fn request_service_quota_increase(
        &self,
        service_code: &str,
        quota_code: &str,
        desired_value: f64,
    ) -> AwsResult<()> {
        let mut state = self.state.lock();
        state
            .mutations
            .push(format!("RequestServiceQuotaIncrease:{quota_code}:{desired_value}"));
        state.quota_history.push(QuotaChangeRequest {
            service_code: service_code.to_string(),
            quota_code: quota_code.to_string(),
            desired_value,
            status: "PENDING".to_string(),
        });
        Ok(())
    }

    async fn list_requested_service_quota_change_history(
        &self,
        service_code: &str,
        quota_code: &str,
        _next_token: Option<String>,
    ) -> AwsResult<QuotaChangePage> {
        let state = self.state.lock();
        Ok(QuotaChangePage {
            requests: state
                .quota_history
                .iter()
                .filter(|r| r.service_code == service_code && r.quota_code == quota_code)
                .cloned()
                .collect(),
            next_token: None,
        })
    }
}

/// Hands out the same `MockAws` for every client request.
pub struct MockAwsBuilder {
    pub aws: Arc<MockAws>,
    /// Fail every `client` call, simulating missing credentials.
    pub fail_setup: bool,
    /// `(account, role, region)` of every assume-role request.
    pub assumed: Mutex<Vec<(String, String, String)>>,
}

impl MockAwsBuilder {
    pub fn new(aws: Arc<MockAws>) -> Self {
        Self {
            aws,
            fail_setup: false,
            assumed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AwsClientBuilder for MockAwsBuilder {
    async fn client(&self, _region: &str) -> AwsResult<Arc<dyn AwsClient>> {
        if self.fail_setup {
            return Err(AwsError::Client("no credentials".to_string()));
        }
        Ok(self.aws.clone())
    }

    async fn assume_role_client(
        &self,
        aws_account_id: &str,
        role_name: &str,
        region: &str,
    ) -> AwsResult<Arc<dyn AwsClient>> {
        self.assumed.lock().push((
            aws_account_id.to_string(),
            role_name.to_string(),
            region.to_string(),
        ));
        Ok(self.aws.clone())
    }
}

/// Accounts and operator configuration held in memory.
#[derive(Default)]
pub struct MockAccountStore {
    pub accounts: Mutex<BTreeMap<String, Account>>,
    pub config: Mutex<Option<OperatorConfig>>,
    pub status_writes: Mutex<usize>,
    pub spec_writes: Mutex<usize>,
    pub deleted: Mutex<Vec<String>>,
}

impl MockAccountStore {
    pub fn with_config(config: OperatorConfig) -> Self {
        let store = Self::default();
        *store.config.lock() = Some(config);
        store
    }

    pub fn insert(&self, account: Account) {
        let name = account.metadata.name.clone().unwrap_or_default();
        self.accounts.lock().insert(name, account);
    }

    pub fn account(&self, name: &str) -> Option<Account> {
        self.accounts.lock().get(name).cloned()
    }

    pub fn status_writes(&self) -> usize {
        *self.status_writes.lock()
    }

    pub fn spec_writes(&self) -> usize {
        *self.spec_writes.lock()
    }
}

#[async_trait]
impl AccountStore for MockAccountStore {
    async fn get_account(&self, name: &str) -> Result<Option<Account>> {
        Ok(self.account(name))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.lock().values().cloned().collect())
    }

    async fn update_account_status(&self, account: &Account) -> Result<()> {
        let name = account.metadata.name.clone().unwrap_or_default();
        if let Some(stored) = self.accounts.lock().get_mut(&name) {
            stored.status = account.status.clone();
        }
        *self.status_writes.lock() += 1;
        Ok(())
    }

    async fn update_account_spec(&self, account: &Account) -> Result<()> {
        let name = account.metadata.name.clone().unwrap_or_default();
        if let Some(stored) = self.accounts.lock().get_mut(&name) {
            stored.spec = account.spec.clone();
        }
        *self.spec_writes.lock() += 1;
        Ok(())
    }

    async fn delete_account(&self, name: &str) -> Result<()> {
        self.accounts.lock().remove(name);
        self.deleted.lock().push(name.to_string());
        Ok(())
    }

    async fn operator_config(&self) -> Result<Option<OperatorConfig>> {
        Ok(self.config.lock().clone())
    }
}

/// Operator configuration with the pool and base OUs set, plus `pairs`.
pub fn config_data(pairs: &[(&str, &str)]) -> OperatorConfig {
    let mut data: BTreeMap<String, String> = BTreeMap::from([
        ("root".to_string(), POOL_OU.to_string()),
        ("base".to_string(), BASE_OU.to_string()),
    ]);
    for (key, value) in pairs {
        data.insert(key.to_string(), value.to_string());
    }
    OperatorConfig::from_data(&data)
}

/// A Ready, non-BYOC pool account with `ACCOUNT_ID`.
pub fn ready_account(name: &str) -> Account {
    let mut account = Account::new(
        name,
        AccountSpec {
            aws_account_id: ACCOUNT_ID.to_string(),
            ..Default::default()
        },
    );
    account.metadata.namespace = Some("aws-account-operator".to_string());
    account.status = Some(AccountStatus {
        state: "Ready".to_string(),
        ..Default::default()
    });
    account
}

pub fn with_legal_entity(mut account: Account, id: &str) -> Account {
    account.spec.legal_entity = LegalEntity {
        id: id.to_string(),
        name: format!("{id}-name"),
    };
    account
}

/// Everything a reconcile test needs.
pub struct Harness {
    pub aws: Arc<MockAws>,
    pub builder: Arc<MockAwsBuilder>,
    pub store: Arc<MockAccountStore>,
    pub ctx: Context,
}

impl Harness {
    pub fn new(aws: MockAws, config: OperatorConfig) -> Self {
        Self::with_settings(aws, config, OperatorSettings::default())
    }

    pub fn with_settings(aws: MockAws, config: OperatorConfig, settings: OperatorSettings) -> Self {
        let aws = Arc::new(aws);
        let builder = Arc::new(MockAwsBuilder::new(aws.clone()));
        let store = Arc::new(MockAccountStore::with_config(config));
        let ctx = Context::with_store(store.clone(), builder.clone(), settings, None);
        Self {
            aws,
            builder,
            store,
            ctx,
        }
    }
}
