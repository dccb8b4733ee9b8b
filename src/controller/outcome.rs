//! Typed validation outcomes and their retry policies.
//!
//! Every check returns `Result<_, ValidationError>`. The orchestrator maps the
//! error kind to a [`RetryPolicy`] through [`retry_policy`], a single table,
//! instead of inspecting error identities after the fact.

use std::time::Duration;

use thiserror::Error;

/// Wait after an account move before checking placement again.
pub const MOVE_WAIT: Duration = Duration::from_secs(5 * 60);
/// Wait when the operator ConfigMap cannot be read.
pub const CONFIG_MAP_WAIT: Duration = Duration::from_secs(5 * 60);
/// Wait while asynchronous AWS work (region enablement, quota requests) completes.
pub const MEDIUM_WAIT: Duration = Duration::from_secs(10 * 60);
/// Wait after the first quota snapshot before submitting increase requests.
pub const QUOTA_SNAPSHOT_WAIT: Duration = Duration::from_secs(30);

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of validation failure kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    InvalidAccountOrigin,
    AccountMoveFailed,
    MissingTag,
    IncorrectOwnerTag,
    AccountTagFailed,
    MissingAwsAccount,
    OuLookupFailed,
    AwsConnectionFailed,
    QuotaSettingFailed,
    QuotaStatusPending,
    NotAllServiceQuotasApplied,
    AccountNotEligibleForCleanup,
    OptInRegionStatusPending,
    NotAllOptInRegionsEnabled,
    TooManyActiveRegionEnablementRequests,
}

impl ValidationErrorKind {
    pub const ALL: [ValidationErrorKind; 15] = [
        ValidationErrorKind::InvalidAccountOrigin,
        ValidationErrorKind::AccountMoveFailed,
        ValidationErrorKind::MissingTag,
        ValidationErrorKind::IncorrectOwnerTag,
        ValidationErrorKind::AccountTagFailed,
        ValidationErrorKind::MissingAwsAccount,
        ValidationErrorKind::OuLookupFailed,
        ValidationErrorKind::AwsConnectionFailed,
        ValidationErrorKind::QuotaSettingFailed,
        ValidationErrorKind::QuotaStatusPending,
        ValidationErrorKind::NotAllServiceQuotasApplied,
        ValidationErrorKind::AccountNotEligibleForCleanup,
        ValidationErrorKind::OptInRegionStatusPending,
        ValidationErrorKind::NotAllOptInRegionsEnabled,
        ValidationErrorKind::TooManyActiveRegionEnablementRequests,
    ];

    /// Stable label used in logs, events and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::InvalidAccountOrigin => "InvalidAccountOrigin",
            ValidationErrorKind::AccountMoveFailed => "AccountMoveFailed",
            ValidationErrorKind::MissingTag => "MissingTag",
            ValidationErrorKind::IncorrectOwnerTag => "IncorrectOwnerTag",
            ValidationErrorKind::AccountTagFailed => "AccountTagFailed",
            ValidationErrorKind::MissingAwsAccount => "MissingAWSAccount",
            ValidationErrorKind::OuLookupFailed => "OULookupFailed",
            ValidationErrorKind::AwsConnectionFailed => "AWSConnectionFailed",
            ValidationErrorKind::QuotaSettingFailed => "QuotaSettingFailed",
            ValidationErrorKind::QuotaStatusPending => "QuotaStatusPending",
            ValidationErrorKind::NotAllServiceQuotasApplied => "NotAllServicequotasApplied",
            ValidationErrorKind::AccountNotEligibleForCleanup => "AccountNotEligibleForCleanup",
            ValidationErrorKind::OptInRegionStatusPending => "OptInRegionStatusPending",
            ValidationErrorKind::NotAllOptInRegionsEnabled => "NotAllOptInRegionsEnabled",
            ValidationErrorKind::TooManyActiveRegionEnablementRequests => {
                "TooManyActiveAccountRegionEnablementRequests"
            }
        }
    }

    /// Whether the kind only reports asynchronous AWS work still running.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ValidationErrorKind::QuotaStatusPending
                | ValidationErrorKind::NotAllServiceQuotasApplied
                | ValidationErrorKind::OptInRegionStatusPending
                | ValidationErrorKind::NotAllOptInRegionsEnabled
        )
    }
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the orchestrator finishes a pass for a given outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Stop. Wait for the next watch event.
    NoRequeue,
    /// Requeue after a fixed delay without reporting an error.
    RequeueAfter(Duration),
    /// Return the error; the controller applies its backoff.
    RequeueWithError,
}

/// Retry policy for each validation error kind.
pub fn retry_policy(kind: ValidationErrorKind) -> RetryPolicy {
    use ValidationErrorKind::*;
    match kind {
        InvalidAccountOrigin | MissingAwsAccount | AccountNotEligibleForCleanup => {
            RetryPolicy::NoRequeue
        }
        AccountMoveFailed => RetryPolicy::RequeueAfter(MOVE_WAIT),
        MissingTag | IncorrectOwnerTag | AccountTagFailed | OuLookupFailed
        | AwsConnectionFailed | QuotaSettingFailed => RetryPolicy::RequeueWithError,
        OptInRegionStatusPending
        | NotAllOptInRegionsEnabled
        | TooManyActiveRegionEnablementRequests
        | NotAllServiceQuotasApplied => RetryPolicy::RequeueAfter(MEDIUM_WAIT),
        QuotaStatusPending => RetryPolicy::RequeueAfter(QUOTA_SNAPSHOT_WAIT),
    }
}

/// A classified validation failure with its underlying cause.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(kind: ValidationErrorKind, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        retry_policy(self.kind)
    }
}
