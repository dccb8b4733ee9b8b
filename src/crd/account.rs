//! Account Custom Resource Definition.
//!
//! An Account represents one AWS account managed by the operator. The spec
//! carries identity and desired service quotas; the status mirrors what the
//! operator has observed in AWS (state, opt-in regions, quota requests).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Namespace where Account resources and the operator ConfigMap live.
pub const ACCOUNT_CR_NAMESPACE: &str = "aws-account-operator";

/// Annotation that, when set to `"true"`, stops the operator from touching
/// the Account.
pub const PAUSE_RECONCILIATION_ANNOTATION: &str = "aws.managed.openshift.io/pause-reconciliation";

/// Spec key in `regionalServiceQuotas` holding values applied to every region.
pub const DEFAULT_QUOTA_REGION: &str = "default";

/// Account is a custom resource describing a pool-managed AWS account.
///
/// Example:
/// ```yaml
/// apiVersion: aws.managed.openshift.io/v1alpha1
/// kind: Account
/// metadata:
///   name: osd-creds-mgmt-abc123
///   namespace: aws-account-operator
/// spec:
///   awsAccountID: "123456789012"
///   iamUserSecret: osd-creds-mgmt-abc123-secret
///   legalEntity:
///     id: ""
///     name: ""
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aws.managed.openshift.io",
    version = "v1alpha1",
    kind = "Account",
    plural = "accounts",
    status = "AccountStatus",
    namespaced,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Claimed", "type":"boolean", "jsonPath":".status.claimed"}"#,
    printcolumn = r#"{"name":"Claim", "type":"string", "jsonPath":".spec.claimLink"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AccountSpec {
    /// AWS account identifier. Empty until the account has been provisioned.
    #[serde(rename = "awsAccountID", default)]
    pub aws_account_id: String,

    /// Name of the Secret holding IAM user credentials.
    #[serde(default)]
    pub iam_user_secret: String,

    /// Customer-supplied (CCS) account.
    #[serde(default)]
    pub byoc: bool,

    /// Name of the AccountClaim bound to this account.
    #[serde(default)]
    pub claim_link: String,

    /// Namespace of the AccountClaim bound to this account.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claim_link_namespace: String,

    /// Tenant the account belongs to. Drives OU placement.
    #[serde(default)]
    pub legal_entity: LegalEntity,

    /// Account uses STS instead of IAM users.
    #[serde(rename = "manualSTSMode", default)]
    pub manual_sts_mode: bool,

    /// AccountPool this account was created for.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_pool: String,

    /// Desired service quotas, keyed by region. The `default` key applies to
    /// every region enabled in the account.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regional_service_quotas: RegionalServiceQuotas,
}

/// Legal entity (tenant) owning an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegalEntity {
    /// Legal entity identifier. Also the OU name accounts are placed in.
    #[serde(default)]
    pub id: String,

    /// Human readable name.
    #[serde(default)]
    pub name: String,
}

/// Region → quota code → quota value and request status.
pub type RegionalServiceQuotas = BTreeMap<String, AccountServiceQuota>;

/// Quota code → quota value and request status.
pub type AccountServiceQuota = BTreeMap<String, ServiceQuotaStatus>;

/// Desired value of one quota and the state of its increase request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQuotaStatus {
    pub value: i64,
    #[serde(default)]
    pub status: ServiceRequestStatus,
}

impl ServiceQuotaStatus {
    pub fn new(value: i64, status: ServiceRequestStatus) -> Self {
        Self { value, status }
    }
}

/// Lifecycle of a service quota increase request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ServiceRequestStatus {
    #[default]
    #[serde(rename = "TODO")]
    Todo,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "DENIED")]
    Denied,
}

impl std::fmt::Display for ServiceRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceRequestStatus::Todo => write!(f, "TODO"),
            ServiceRequestStatus::InProgress => write!(f, "IN_PROGRESS"),
            ServiceRequestStatus::Completed => write!(f, "COMPLETED"),
            ServiceRequestStatus::Denied => write!(f, "DENIED"),
        }
    }
}

/// Quota codes the operator knows how to request, with their service code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SupportedServiceQuota {
    RulesPerSecurityGroup,
    RunningStandardInstances,
    NlbPerRegion,
    Ec2VpcElasticIps,
    VpcNetworkAcl,
    GeneralPurposeSsd,
}

impl SupportedServiceQuota {
    pub const ALL: [SupportedServiceQuota; 6] = [
        SupportedServiceQuota::RulesPerSecurityGroup,
        SupportedServiceQuota::RunningStandardInstances,
        SupportedServiceQuota::NlbPerRegion,
        SupportedServiceQuota::Ec2VpcElasticIps,
        SupportedServiceQuota::VpcNetworkAcl,
        SupportedServiceQuota::GeneralPurposeSsd,
    ];

    /// AWS quota code (e.g. `L-1216C47A`).
    pub fn quota_code(&self) -> &'static str {
        match self {
            SupportedServiceQuota::RulesPerSecurityGroup => "L-0EA8095F",
            SupportedServiceQuota::RunningStandardInstances => "L-1216C47A",
            SupportedServiceQuota::NlbPerRegion => "L-69A177A2",
            SupportedServiceQuota::Ec2VpcElasticIps => "L-0263D0A3",
            SupportedServiceQuota::VpcNetworkAcl => "L-2AEEBF1A",
            SupportedServiceQuota::GeneralPurposeSsd => "L-7A658B76",
        }
    }

    /// AWS service code the quota belongs to.
    pub fn service_code(&self) -> &'static str {
        match self {
            SupportedServiceQuota::RunningStandardInstances
            | SupportedServiceQuota::Ec2VpcElasticIps
            | SupportedServiceQuota::GeneralPurposeSsd => "ec2",
            SupportedServiceQuota::NlbPerRegion => "elasticloadbalancing",
            SupportedServiceQuota::RulesPerSecurityGroup
            | SupportedServiceQuota::VpcNetworkAcl => "vpc",
        }
    }

    pub fn from_quota_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.quota_code() == code)
    }
}

/// Region → opt-in request status.
pub type OptInRegions = BTreeMap<String, OptInRegionStatus>;

/// Enablement state of one opt-in region.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OptInRegionStatus {
    #[serde(default)]
    pub region_code: String,
    #[serde(default)]
    pub status: OptInRequestStatus,
}

/// Lifecycle of an opt-in region enablement request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum OptInRequestStatus {
    #[default]
    #[serde(rename = "TODO")]
    Todo,
    #[serde(rename = "ENABLING")]
    Enabling,
    #[serde(rename = "ENABLED")]
    Enabled,
    /// AWS rejected the region. Terminal, the region is never requested again.
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
}

impl OptInRequestStatus {
    /// True while the request still needs polling.
    pub fn is_open(self) -> bool {
        matches!(self, OptInRequestStatus::Todo | OptInRequestStatus::Enabling)
    }
}

impl std::fmt::Display for OptInRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptInRequestStatus::Todo => write!(f, "TODO"),
            OptInRequestStatus::Enabling => write!(f, "ENABLING"),
            OptInRequestStatus::Enabled => write!(f, "ENABLED"),
            OptInRequestStatus::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

/// Observed state of an Account.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    #[serde(default)]
    pub claimed: bool,

    #[serde(rename = "supportCaseID", default, skip_serializing_if = "String::is_empty")]
    pub support_case_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AccountCondition>,

    /// Lifecycle state, see [`AccountState`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,

    #[serde(default)]
    pub reused: bool,

    /// Per-region quota snapshot and increase request state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub regional_service_quotas: RegionalServiceQuotas,

    /// Per-region opt-in enablement state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub opt_in_regions: OptInRegions,
}

/// Account lifecycle states stored in `status.state`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AccountState {
    Pending,
    Creating,
    Ready,
    Failed,
    PendingVerification,
    InitializingRegions,
    OptingInRegions,
    OptInRegionsEnabled,
    CreationFailed,
    ClientError,
    AuthorizationError,
    AuthenticationError,
    UnhandledError,
    InternalError,
}

impl AccountState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountState::Pending => "Pending",
            AccountState::Creating => "Creating",
            AccountState::Ready => "Ready",
            AccountState::Failed => "Failed",
            AccountState::PendingVerification => "PendingVerification",
            AccountState::InitializingRegions => "InitializingRegions",
            AccountState::OptingInRegions => "OptingInRegions",
            AccountState::OptInRegionsEnabled => "OptInRegionsEnabled",
            AccountState::CreationFailed => "AccountCreationFailed",
            AccountState::ClientError => "AccountClientError",
            AccountState::AuthorizationError => "AuthorizationError",
            AccountState::AuthenticationError => "AuthenticationError",
            AccountState::UnhandledError => "UnhandledError",
            AccountState::InternalError => "InternalError",
        }
    }

    /// States that all mean the account failed to provision.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AccountState::Failed
                | AccountState::CreationFailed
                | AccountState::ClientError
                | AccountState::AuthorizationError
                | AccountState::AuthenticationError
                | AccountState::UnhandledError
                | AccountState::InternalError
        )
    }
}

impl std::fmt::Display for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            AccountState::Pending,
            AccountState::Creating,
            AccountState::Ready,
            AccountState::Failed,
            AccountState::PendingVerification,
            AccountState::InitializingRegions,
            AccountState::OptingInRegions,
            AccountState::OptInRegionsEnabled,
            AccountState::CreationFailed,
            AccountState::ClientError,
            AccountState::AuthorizationError,
            AccountState::AuthenticationError,
            AccountState::UnhandledError,
            AccountState::InternalError,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
        .ok_or_else(|| format!("Unknown account state: {}", s))
    }
}

/// Condition describing one aspect of an Account at a point in time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountCondition {
    /// Type of condition (e.g. "Ready", "OptingInRegions").
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Last time the condition was probed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_probe_time: String,
    /// Last time the condition transitioned from one status to another.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_transition_time: String,
    /// Machine-readable reason for the last transition.
    #[serde(default)]
    pub reason: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl AccountCondition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        let now = jiff::Timestamp::now().to_string();
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            last_probe_time: now.clone(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}

impl Account {
    /// Parsed lifecycle state, if one is set and recognised.
    pub fn state(&self) -> Option<AccountState> {
        self.status
            .as_ref()
            .and_then(|s| s.state.parse::<AccountState>().ok())
    }

    pub fn is_byoc(&self) -> bool {
        self.spec.byoc
    }

    pub fn is_ready(&self) -> bool {
        self.state() == Some(AccountState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        self.state().is_some_and(|s| s.is_failure())
    }

    pub fn has_aws_account_id(&self) -> bool {
        !self.spec.aws_account_id.is_empty()
    }

    pub fn is_pending_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the manual pause annotation is set to the literal `"true"`.
    pub fn is_reconciliation_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(PAUSE_RECONCILIATION_ANNOTATION))
            .is_some_and(|v| v == "true")
    }

    /// Only failed accounts that never received an AWS account ID may be
    /// removed.
    pub fn is_cleanup_candidate(&self) -> bool {
        self.is_failed() && !self.has_aws_account_id()
    }

    /// Whether the account was created for an AccountPool.
    pub fn is_owned_by_account_pool(&self) -> bool {
        if !self.spec.account_pool.is_empty() {
            return true;
        }
        self.metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.kind == "AccountPool"))
    }

    pub fn opt_in_regions(&self) -> Option<&OptInRegions> {
        self.status.as_ref().map(|s| &s.opt_in_regions)
    }

    pub fn status_service_quotas(&self) -> Option<&RegionalServiceQuotas> {
        self.status.as_ref().map(|s| &s.regional_service_quotas)
    }

    /// True if any recorded opt-in region is still TODO or ENABLING.
    pub fn has_open_opt_in_region_requests(&self) -> bool {
        self.opt_in_regions()
            .is_some_and(|regions| regions.values().any(|r| r.status.is_open()))
    }

    /// Count and copy of the opt-in regions currently in `status`.
    pub fn opt_in_requests_by_status(&self, status: OptInRequestStatus) -> (usize, OptInRegions) {
        let selected: OptInRegions = self
            .opt_in_regions()
            .into_iter()
            .flatten()
            .filter(|(_, r)| r.status == status)
            .map(|(region, r)| (region.clone(), r.clone()))
            .collect();
        (selected.len(), selected)
    }

    /// True if any quota request is still TODO or IN_PROGRESS.
    pub fn has_open_quota_increase_requests(&self) -> bool {
        self.status_service_quotas().is_some_and(|regions| {
            regions.values().flat_map(|quotas| quotas.values()).any(|q| {
                matches!(
                    q.status,
                    ServiceRequestStatus::Todo | ServiceRequestStatus::InProgress
                )
            })
        })
    }

    /// Count and copy of the quota requests in any of `statuses`.
    pub fn quota_requests_by_status(
        &self,
        statuses: &[ServiceRequestStatus],
    ) -> (usize, RegionalServiceQuotas) {
        let mut selected = RegionalServiceQuotas::new();
        let mut count = 0;
        for (region, quotas) in self.status_service_quotas().into_iter().flatten() {
            for (code, quota) in quotas {
                if statuses.contains(&quota.status) {
                    selected
                        .entry(region.clone())
                        .or_default()
                        .insert(code.clone(), quota.clone());
                    count += 1;
                }
            }
        }
        (count, selected)
    }
}
