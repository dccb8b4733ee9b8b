//! Opt-in region enablement tracking.
//!
//! Region enablement is an asynchronous AWS side operation. A pass first
//! records every configured region that the account does not track yet as
//! TODO, then polls a bounded number of regions and submits enablement for
//! the ones still disabled.

use tracing::{debug, info, warn};

use crate::aws::{AwsClient, RESOURCE_ALREADY_EXISTS_EXCEPTION, RegionOptStatus, VALIDATION_EXCEPTION};
use crate::controller::error::Result;
use crate::controller::outcome::{ValidationError, ValidationErrorKind};
use crate::controller::status::{
    CONDITION_OPT_IN_REGIONS_ENABLED, CONDITION_OPTING_IN_REGIONS, is_condition_true, set_condition,
};
use crate::controller::store::AccountStore;
use crate::crd::{Account, AccountCondition, OptInRegionStatus, OptInRequestStatus};

/// Regions of one account polled or submitted per pass.
pub const MAX_OPT_IN_REGION_REQUESTS: usize = 6;

/// Accounts allowed to hold open enablement requests at the same time.
pub const MAX_ACCOUNT_REGION_ENABLEMENT: usize = 9;

/// Configured regions the account does not track yet.
pub fn missing_regions(account: &Account, regions: &[String]) -> Vec<String> {
    let tracked = account.opt_in_regions();
    regions
        .iter()
        .filter(|region| !tracked.is_some_and(|t| t.contains_key(region.as_str())))
        .cloned()
        .collect()
}

/// Number of accounts, other than `exclude`, with any region in TODO or ENABLING.
pub fn count_accounts_opting_in(accounts: &[Account], exclude: &str) -> usize {
    accounts
        .iter()
        .filter(|a| a.metadata.name.as_deref() != Some(exclude))
        .filter(|a| a.has_open_opt_in_region_requests())
        .count()
}

/// Record every configured region the account does not track yet as TODO.
///
/// Admission is checked only when regions are missing, so accounts that
/// already hold requests can keep polling while the cap is reached. Returns
/// the regions that were added.
pub async fn request_missing_regions(
    store: &dyn AccountStore,
    account: &mut Account,
    regions: &[String],
) -> Result<Vec<String>> {
    let missing = missing_regions(account, regions);
    if missing.is_empty() {
        return Ok(missing);
    }

    let name = account.metadata.name.clone().unwrap_or_default();
    let accounts = store.list_accounts().await?;
    let opting_in = count_accounts_opting_in(&accounts, &name);
    if opting_in >= MAX_ACCOUNT_REGION_ENABLEMENT {
        warn!(
            account = %name,
            opting_in,
            limit = MAX_ACCOUNT_REGION_ENABLEMENT,
            "Too many accounts are enabling regions, deferring"
        );
        return Err(ValidationError::new(
            ValidationErrorKind::TooManyActiveRegionEnablementRequests,
            format!("{opting_in} accounts are already enabling regions"),
        )
        .into());
    }

    let status = account.status.get_or_insert_with(Default::default);
    for region in &missing {
        status.opt_in_regions.insert(
            region.clone(),
            OptInRegionStatus {
                region_code: region.clone(),
                status: OptInRequestStatus::Todo,
            },
        );
    }
    // The quota snapshot covers the enabled regions, which are about to change.
    status.regional_service_quotas.clear();
    set_condition(
        &mut status.conditions,
        AccountCondition::new(
            CONDITION_OPTING_IN_REGIONS,
            true,
            "OptInRegionsRequested",
            &format!("Requested enablement of {}", missing.join(",")),
        ),
    );
    store.update_account_status(account).await?;
    info!(account = %name, regions = ?missing, "Recorded opt-in region requests");
    Ok(missing)
}

/// Regions to handle this pass: everything ENABLING, topped up with TODO
/// regions up to [`MAX_OPT_IN_REGION_REQUESTS`].
pub fn select_regions(account: &Account) -> Vec<String> {
    let (in_flight, enabling) = account.opt_in_requests_by_status(OptInRequestStatus::Enabling);
    let mut selected: Vec<String> = enabling.into_keys().collect();
    if in_flight < MAX_OPT_IN_REGION_REQUESTS {
        let (_, todo) = account.opt_in_requests_by_status(OptInRequestStatus::Todo);
        selected.extend(
            todo.into_keys()
                .take(MAX_OPT_IN_REGION_REQUESTS - in_flight),
        );
    }
    selected
}

/// What a poll decided for one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RegionPoll {
    /// AWS does not know the region.
    Unsupported,
    /// Leave the recorded status alone.
    Keep,
    Set(OptInRequestStatus),
}

async fn poll_region(aws: &dyn AwsClient, aws_account_id: &str, region: &str) -> RegionPoll {
    let opt_status = match aws.get_region_opt_status(aws_account_id, region).await {
        Ok(status) => status,
        Err(e) if e.is_code(VALIDATION_EXCEPTION) => {
            warn!(region = %region, error = %e, "Region is not supported, giving up on it");
            return RegionPoll::Unsupported;
        }
        Err(e) => {
            warn!(region = %region, error = %e, "Failed retrieving region opt-in status");
            return RegionPoll::Keep;
        }
    };

    match opt_status {
        Some(RegionOptStatus::Enabled | RegionOptStatus::EnabledByDefault) => {
            info!(region = %region, "Region enablement completed");
            RegionPoll::Set(OptInRequestStatus::Enabled)
        }
        Some(RegionOptStatus::Enabling) => {
            debug!(region = %region, "Region enablement in progress");
            RegionPoll::Set(OptInRequestStatus::Enabling)
        }
        Some(RegionOptStatus::Disabled | RegionOptStatus::Disabling) => {
            match aws.enable_region(aws_account_id, region).await {
                Ok(()) => {
                    info!(region = %region, "Region enablement requested");
                    RegionPoll::Set(OptInRequestStatus::Enabling)
                }
                Err(e) if e.is_code(RESOURCE_ALREADY_EXISTS_EXCEPTION) => {
                    info!(region = %region, "Region enablement already requested");
                    RegionPoll::Set(OptInRequestStatus::Enabling)
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Failed to request region enablement");
                    RegionPoll::Keep
                }
            }
        }
        None => {
            warn!(region = %region, "AWS returned no opt-in status for region");
            RegionPoll::Keep
        }
    }
}

/// Poll open enablement requests and submit new ones.
///
/// Ends with [`ValidationErrorKind::NotAllOptInRegionsEnabled`] while any
/// region is still open. Regions AWS rejects are kept as UNSUPPORTED so they
/// are not requested again. In dev mode nothing is sent to AWS and open requests
/// report [`ValidationErrorKind::OptInRegionStatusPending`].
pub async fn poll_opt_in_regions(
    store: &dyn AccountStore,
    aws: &dyn AwsClient,
    account: &mut Account,
    dev_mode: bool,
) -> Result<()> {
    let name = account.metadata.name.clone().unwrap_or_default();
    let mut changed = false;

    if account.has_open_opt_in_region_requests() {
        if dev_mode {
            return Err(ValidationError::new(
                ValidationErrorKind::OptInRegionStatusPending,
                "region enablement is not processed in dev mode",
            )
            .into());
        }

        let aws_account_id = account.spec.aws_account_id.clone();
        let selected = select_regions(account);
        debug!(account = %name, regions = ?selected, "Handling opt-in region requests");

        for region in selected {
            let next = match poll_region(aws, &aws_account_id, &region).await {
                RegionPoll::Unsupported => OptInRequestStatus::Unsupported,
                RegionPoll::Set(next) => next,
                RegionPoll::Keep => continue,
            };
            let status = account.status.get_or_insert_with(Default::default);
            if let Some(entry) = status.opt_in_regions.get_mut(&region) {
                changed |= entry.status != next;
                entry.status = next;
            }
        }

        if account.has_open_opt_in_region_requests() {
            store.update_account_status(account).await?;
            return Err(ValidationError::new(
                ValidationErrorKind::NotAllOptInRegionsEnabled,
                "not all opt-in regions are enabled yet",
            )
            .into());
        }
    }

    let status = account.status.get_or_insert_with(Default::default);
    if status.opt_in_regions.is_empty()
        || is_condition_true(&status.conditions, CONDITION_OPT_IN_REGIONS_ENABLED)
    {
        if changed {
            store.update_account_status(account).await?;
        }
        return Ok(());
    }
    set_condition(
        &mut status.conditions,
        AccountCondition::new(
            CONDITION_OPTING_IN_REGIONS,
            false,
            "OptInRegionsEnabled",
            "All opt-in regions are enabled",
        ),
    );
    set_condition(
        &mut status.conditions,
        AccountCondition::new(
            CONDITION_OPT_IN_REGIONS_ENABLED,
            true,
            "OptInRegionsEnabled",
            "All opt-in regions are enabled",
        ),
    );
    store.update_account_status(account).await?;
    info!(account = %name, "All opt-in regions enabled");
    Ok(())
}
