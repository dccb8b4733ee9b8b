//! Regional service quota reconciliation.
//!
//! The first pass records a snapshot of the wanted quotas for every region
//! enabled in the account. Later passes work through the snapshot, a bounded
//! number of requests at a time, until every quota is applied or denied.

use tracing::{debug, error, info, warn};

use crate::aws::{ACCOUNT_OPERATOR_IAM_ROLE, AwsClient, AwsClientBuilder, RESOURCE_ALREADY_EXISTS_EXCEPTION};
use crate::controller::error::Result;
use crate::controller::outcome::{ValidationError, ValidationErrorKind};
use crate::controller::store::AccountStore;
use crate::crd::{
    Account, AccountServiceQuota, DEFAULT_QUOTA_REGION, RegionalServiceQuotas, ServiceQuotaStatus,
    ServiceRequestStatus, SupportedServiceQuota,
};

/// Quota requests checked or submitted per pass.
pub const MAX_OPEN_QUOTA_REQUESTS: usize = 20;

/// Build the initial per-region quota status from the spec.
///
/// Every enabled region gets the `default` values, overridden by the values
/// given for that region. All entries start as TODO.
pub fn initial_quota_status(
    spec: &RegionalServiceQuotas,
    enabled_regions: &[String],
) -> std::result::Result<RegionalServiceQuotas, ValidationError> {
    let defaults = spec.get(DEFAULT_QUOTA_REGION).ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::QuotaSettingFailed,
            "could not find default key in regionalServiceQuotas",
        )
    })?;

    let todo = |quotas: &AccountServiceQuota| -> AccountServiceQuota {
        quotas
            .iter()
            .map(|(code, q)| (code.clone(), ServiceQuotaStatus::new(q.value, ServiceRequestStatus::Todo)))
            .collect()
    };

    Ok(enabled_regions
        .iter()
        .map(|region| {
            let mut quotas = todo(defaults);
            if let Some(overrides) = spec.get(region) {
                quotas.extend(todo(overrides));
            }
            (region.clone(), quotas)
        })
        .collect())
}

/// Requests to handle this pass: IN_PROGRESS first, then TODO, capped at
/// [`MAX_OPEN_QUOTA_REQUESTS`].
pub fn select_quota_requests(account: &Account) -> Vec<(String, String)> {
    let (_, in_progress) = account.quota_requests_by_status(&[ServiceRequestStatus::InProgress]);
    let (_, todo) = account.quota_requests_by_status(&[ServiceRequestStatus::Todo]);
    let flatten = |quotas: RegionalServiceQuotas| {
        quotas
            .into_iter()
            .flat_map(|(region, codes)| codes.into_keys().map(move |code| (region.clone(), code)))
            .collect::<Vec<_>>()
    };
    flatten(in_progress)
        .into_iter()
        .chain(flatten(todo))
        .take(MAX_OPEN_QUOTA_REQUESTS)
        .collect()
}

/// Map a Service Quotas request status onto ours. `None` for statuses that do
/// not settle anything.
fn request_status_from_history(status: &str) -> Option<ServiceRequestStatus> {
    match status {
        "PENDING" | "CASE_OPENED" => Some(ServiceRequestStatus::InProgress),
        "APPROVED" | "CASE_CLOSED" => Some(ServiceRequestStatus::Completed),
        "DENIED" => Some(ServiceRequestStatus::Denied),
        _ => None,
    }
}

/// Look for an earlier increase request for exactly this value.
async fn find_requested_change(
    aws: &dyn AwsClient,
    service_code: &str,
    quota_code: &str,
    desired: f64,
) -> Result<Option<ServiceRequestStatus>> {
    let mut next_token = None;
    loop {
        let page = aws
            .list_requested_service_quota_change_history(service_code, quota_code, next_token)
            .await?;
        let matched = page.requests.iter().find(|change| {
            change.service_code == service_code
                && change.quota_code == quota_code
                && change.desired_value == desired
        });
        if let Some(change) = matched {
            return Ok(request_status_from_history(&change.status));
        }
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => return Ok(None),
        }
    }
}

/// Drive a single quota request one step forward and return its new status.
pub async fn handle_quota_request(
    aws: &dyn AwsClient,
    quota: SupportedServiceQuota,
    current: &ServiceQuotaStatus,
) -> Result<ServiceRequestStatus> {
    let service_code = quota.service_code();
    let quota_code = quota.quota_code();
    let desired = current.value as f64;

    let applied = aws.get_service_quota(service_code, quota_code).await?;
    if applied.is_some_and(|value| value >= desired) {
        info!(quota_code = %quota_code, value = current.value, "Quota already applied");
        return Ok(ServiceRequestStatus::Completed);
    }

    if let Some(status) = find_requested_change(aws, service_code, quota_code, desired).await? {
        debug!(quota_code = %quota_code, status = %status, "Found quota increase request");
        return Ok(status);
    }

    match aws
        .request_service_quota_increase(service_code, quota_code, desired)
        .await
    {
        Ok(()) => {
            info!(quota_code = %quota_code, value = current.value, "Quota increase requested");
            Ok(ServiceRequestStatus::InProgress)
        }
        Err(e) if e.is_code(RESOURCE_ALREADY_EXISTS_EXCEPTION) => {
            info!(quota_code = %quota_code, "Quota increase already requested");
            Ok(ServiceRequestStatus::InProgress)
        }
        Err(e) => {
            warn!(quota_code = %quota_code, error = %e, "Failed requesting quota increase");
            Ok(current.status)
        }
    }
}

/// Work through the open quota requests of an account.
///
/// Each request is handled inside the account, in its region. A request that
/// fails is left as it was and retried on a later pass.
pub async fn process_quota_requests(aws: &dyn AwsClientBuilder, account: &mut Account) {
    let aws_account_id = account.spec.aws_account_id.clone();

    for (region, quota_code) in select_quota_requests(account) {
        let Some(quota) = SupportedServiceQuota::from_quota_code(&quota_code) else {
            error!(region = %region, quota_code = %quota_code, "Cannot find service code for quota code");
            continue;
        };
        let Some(current) = account
            .status_service_quotas()
            .and_then(|regions| regions.get(&region))
            .and_then(|quotas| quotas.get(&quota_code))
            .cloned()
        else {
            continue;
        };

        let client = match aws
            .assume_role_client(&aws_account_id, ACCOUNT_OPERATOR_IAM_ROLE, &region)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                error!(aws_account_id = %aws_account_id, region = %region, error = %e, "Could not impersonate AWS account");
                continue;
            }
        };

        let next = match handle_quota_request(client.as_ref(), quota, &current).await {
            Ok(next) => next,
            Err(e) => {
                warn!(region = %region, quota_code = %quota_code, error = %e, "Failed handling quota request");
                continue;
            }
        };

        if let Some(entry) = account
            .status
            .as_mut()
            .and_then(|s| s.regional_service_quotas.get_mut(&region))
            .and_then(|quotas| quotas.get_mut(&quota_code))
        {
            entry.status = next;
        }
    }
}

/// Reconcile the account's regional service quotas.
///
/// `setup` acts with the operator's own credentials and lists the regions
/// enabled in the account. An account reporting no enabled regions is a
/// [`ValidationErrorKind::QuotaSettingFailed`]. The first observation persists a snapshot and
/// ends with [`ValidationErrorKind::QuotaStatusPending`]; while requests stay
/// open the pass ends with [`ValidationErrorKind::NotAllServiceQuotasApplied`].
pub async fn validate_service_quotas(
    store: &dyn AccountStore,
    aws: &dyn AwsClientBuilder,
    setup: &dyn AwsClient,
    account: &mut Account,
    dev_mode: bool,
) -> Result<()> {
    if account.spec.regional_service_quotas.is_empty() {
        return Ok(());
    }
    let name = account.metadata.name.clone().unwrap_or_default();

    let initialised = account.status_service_quotas().is_some_and(|q| !q.is_empty());
    if !initialised {
        let enabled_regions = setup
            .list_enabled_regions(&account.spec.aws_account_id)
            .await
            .map_err(|e| {
                ValidationError::with_source(
                    ValidationErrorKind::QuotaSettingFailed,
                    "failed to retrieve regions enabled in the account",
                    e,
                )
            })?;
        if enabled_regions.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::QuotaSettingFailed,
                "no regions are enabled in the account",
            )
            .into());
        }
        let snapshot = initial_quota_status(&account.spec.regional_service_quotas, &enabled_regions)?;
        account
            .status
            .get_or_insert_with(Default::default)
            .regional_service_quotas = snapshot;
        store.update_account_status(account).await?;
        info!(account = %name, regions = enabled_regions.len(), "Recorded service quota snapshot");
        return Err(ValidationError::new(
            ValidationErrorKind::QuotaStatusPending,
            "service quota snapshot recorded, requests follow",
        )
        .into());
    }

    if account.has_open_quota_increase_requests() && !dev_mode {
        process_quota_requests(aws, account).await;
        store.update_account_status(account).await?;
    }

    let (open, _) =
        account.quota_requests_by_status(&[ServiceRequestStatus::Todo, ServiceRequestStatus::InProgress]);
    if open > 0 {
        debug!(account = %name, open, "Service quota requests still open");
        return Err(ValidationError::new(
            ValidationErrorKind::NotAllServiceQuotasApplied,
            format!("{open} service quota requests are not applied yet"),
        )
        .into());
    }
    Ok(())
}
