//! AWS collaborator boundary.
//!
//! The validation checks never talk to the AWS SDK directly. They go through
//! the [`AwsClient`] trait, a thin pass-through over the Organizations,
//! Account and Service Quotas APIs, and obtain clients from an
//! [`AwsClientBuilder`]. The production implementation lives in [`sdk`];
//! tests substitute in-memory fakes.
//!
//! Transient failures (throttling, 5xx, credentials not yet propagated) are
//! retried inside the SDK client with a bounded, capped exponential backoff.
//! Errors reaching callers have already exhausted those retries.

pub mod sdk;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use sdk::{SdkAwsClient, SdkAwsClientBuilder};

/// Error code returned when an OU with the same name already exists.
pub const DUPLICATE_OU_EXCEPTION: &str = "DuplicateOrganizationalUnitException";
/// Error code returned when an equivalent request was already submitted.
pub const RESOURCE_ALREADY_EXISTS_EXCEPTION: &str = "ResourceAlreadyExistsException";
/// Error code returned for requests AWS considers invalid (e.g. unsupported region).
pub const VALIDATION_EXCEPTION: &str = "ValidationException";

/// Role assumed inside pool-managed accounts.
pub const ACCOUNT_OPERATOR_IAM_ROLE: &str = "OrganizationAccountAccessRole";

/// Errors surfaced by the AWS boundary.
#[derive(Error, Debug, Clone)]
pub enum AwsError {
    /// The service answered with an error code.
    #[error("{operation} failed: {code}: {message}")]
    Service {
        operation: &'static str,
        code: String,
        message: String,
    },

    /// The request never produced a service response (network, timeout,
    /// credentials).
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The service answered but the response was missing required data.
    #[error("invalid response from {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },

    /// A client could not be constructed.
    #[error("unable to build AWS client: {0}")]
    Client(String),
}

impl AwsError {
    /// AWS error code, when the service returned one.
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Service { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code() == Some(code)
    }

    /// Whether retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AwsError::Transport { .. } | AwsError::Client(_) => true,
            AwsError::Service { code, .. } => matches!(
                code.as_str(),
                "TooManyRequestsException"
                    | "ThrottlingException"
                    | "ServiceException"
                    | "InternalServerException"
                    | "AccessDeniedException"
                    | "UnrecognizedClientException"
                    | "ConcurrentModificationException"
            ),
            AwsError::InvalidResponse { .. } => false,
        }
    }
}

pub type AwsResult<T> = std::result::Result<T, AwsError>;

/// Organizational unit name and identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrganizationalUnit {
    pub id: String,
    pub name: String,
}

/// One page of `ListOrganizationalUnitsForParent`.
#[derive(Clone, Debug, Default)]
pub struct OrganizationalUnitPage {
    pub units: Vec<OrganizationalUnit>,
    pub next_token: Option<String>,
}

/// Organizations resource tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Opt-in status of a region as reported by the Account API.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionOptStatus {
    Enabled,
    EnabledByDefault,
    Enabling,
    Disabled,
    Disabling,
}

impl RegionOptStatus {
    pub fn from_api(value: &str) -> Option<Self> {
        match value {
            "ENABLED" => Some(RegionOptStatus::Enabled),
            "ENABLED_BY_DEFAULT" => Some(RegionOptStatus::EnabledByDefault),
            "ENABLING" => Some(RegionOptStatus::Enabling),
            "DISABLED" => Some(RegionOptStatus::Disabled),
            "DISABLING" => Some(RegionOptStatus::Disabling),
            _ => None,
        }
    }
}

/// One entry of the service quota change history.
#[derive(Clone, Debug, PartialEq)]
pub struct QuotaChangeRequest {
    pub service_code: String,
    pub quota_code: String,
    pub desired_value: f64,
    /// Raw request status (PENDING, CASE_OPENED, APPROVED, DENIED, CASE_CLOSED, ...).
    pub status: String,
}

/// One page of the service quota change history.
#[derive(Clone, Debug, Default)]
pub struct QuotaChangePage {
    pub requests: Vec<QuotaChangeRequest>,
    pub next_token: Option<String>,
}

/// Narrow AWS API surface used by the account validation checks.
#[async_trait]
pub trait AwsClient: Send + Sync {
    /// Parent identifiers of an account or OU. AWS returns exactly one.
    async fn list_parents(&self, child_id: &str) -> AwsResult<Vec<String>>;

    async fn move_account(
        &self,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> AwsResult<()>;

    async fn list_organizational_units_for_parent(
        &self,
        parent_id: &str,
        next_token: Option<String>,
    ) -> AwsResult<OrganizationalUnitPage>;

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> AwsResult<OrganizationalUnit>;

    async fn list_tags_for_resource(&self, resource_id: &str) -> AwsResult<Vec<Tag>>;

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> AwsResult<()>;

    async fn untag_resource(&self, resource_id: &str, tag_keys: &[String]) -> AwsResult<()>;

    async fn get_region_opt_status(
        &self,
        account_id: &str,
        region: &str,
    ) -> AwsResult<Option<RegionOptStatus>>;

    async fn enable_region(&self, account_id: &str, region: &str) -> AwsResult<()>;

    /// Regions currently enabled (by default or via opt-in) in the account.
    async fn list_enabled_regions(&self, account_id: &str) -> AwsResult<Vec<String>>;

    /// Current applied value of a quota, if AWS reports one.
    async fn get_service_quota(&self, service_code: &str, quota_code: &str)
    -> AwsResult<Option<f64>>;

    async fn request_service_quota_increase(
        &self,
        service_code: &str,
        quota_code: &str,
        desired_value: f64,
    ) -> AwsResult<()>;

    async fn list_requested_service_quota_change_history(
        &self,
        service_code: &str,
        quota_code: &str,
        next_token: Option<String>,
    ) -> AwsResult<QuotaChangePage>;
}

/// Source of AWS clients.
#[async_trait]
pub trait AwsClientBuilder: Send + Sync {
    /// Client using the operator's own (organization management) credentials.
    async fn client(&self, region: &str) -> AwsResult<Arc<dyn AwsClient>>;

    /// Client acting inside `aws_account_id` by assuming `role_name` there.
    async fn assume_role_client(
        &self,
        aws_account_id: &str,
        role_name: &str,
        region: &str,
    ) -> AwsResult<Arc<dyn AwsClient>>;
}
