//! Reconciliation loop for Account validation.
//!
//! A pass runs a fixed sequence of checks against one Account: stale account
//! cleanup, origin, AWS account id presence, OU placement, owner and
//! compliance tags, opt-in regions and service quotas. The first classified
//! failure ends the pass and its kind decides how the pass is requeued.

use std::sync::Arc;
use std::time::Instant;

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::aws::AwsClient;
use crate::config::OperatorConfig;
use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::organization::{Placement, validate_account_ou};
use crate::controller::outcome::{CONFIG_MAP_WAIT, RetryPolicy, ValidationError, ValidationErrorKind};
use crate::controller::quotas::validate_service_quotas;
use crate::controller::regions::{poll_opt_in_regions, request_missing_regions};
use crate::controller::tags::{TagOutcome, validate_compliance_tags, validate_owner_tag};
use crate::crd::Account;

/// Controller name used in logs and metrics
pub const CONTROLLER_NAME: &str = "accountvalidation";

/// Reconcile an Account
///
/// Entry point for the kube-runtime controller. The Account is read again
/// from the store so every pass starts from the latest version.
pub async fn reconcile(obj: Arc<Account>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    let result = validate_account(&name, &ctx).await;
    if result.is_ok() {
        ctx.backoff.reset(&name);
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_reconcile(CONTROLLER_NAME, &name, start_time.elapsed().as_secs_f64());
        health_state.mark_reconciled();
    }
    result
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<Account>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(CONTROLLER_NAME, &name);
    }

    if error.is_not_found() {
        debug!(account = %name, "Account not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&name);
        warn!(account = %name, error = %error, delay_secs = delay.as_secs(), "Retryable error, will retry");
        Action::requeue(delay)
    } else {
        error!(account = %name, error = %error, "Non-retryable error");
        Action::requeue(error.requeue_after())
    }
}

/// Run one validation pass for the Account called `name`.
pub async fn validate_account(name: &str, ctx: &Context) -> Result<Action, Error> {
    let Some(mut account) = ctx.store.get_account(name).await? else {
        debug!(account = %name, "Account no longer exists");
        return Ok(Action::await_change());
    };

    if account.is_pending_deletion() {
        info!(account = %name, "Account is being deleted - not running any validations");
        return Ok(Action::await_change());
    }

    if account.is_reconciliation_paused() {
        info!(account = %name, "Reconciliation is paused for this account");
        return Ok(Action::await_change());
    }

    let config = match ctx.store.operator_config().await {
        Ok(Some(config)) => config,
        Ok(None) => {
            error!(account = %name, "Operator ConfigMap does not exist");
            return Ok(Action::requeue(CONFIG_MAP_WAIT));
        }
        Err(e) => {
            error!(account = %name, error = %e, "Could not retrieve the operator ConfigMap");
            return Ok(Action::requeue(CONFIG_MAP_WAIT));
        }
    };
    let flags = &config.flags;
    info!(
        account = %name,
        move_account = flags.move_account,
        tag_account = flags.tag_account,
        compliance_tags = flags.compliance_tags,
        delete_account = flags.delete_account,
        opt_in_regions = flags.opt_in_regions,
        "Loaded validation feature flags"
    );

    let setup = match ctx.aws.client(&ctx.settings.default_region).await {
        Ok(client) => Some(client),
        Err(e) => {
            error!(region = %ctx.settings.default_region, error = %e, "Could not retrieve AWS client");
            None
        }
    };

    match cleanup_eligibility(&account) {
        Ok(()) if flags.delete_account => {
            info!(account = %name, "Deleting failed account without an AWS account id");
            ctx.store.delete_account(name).await?;
            ctx.record_action("DeleteAccount", false);
            ctx.publish_normal_event(
                &account,
                "AccountDeleted",
                "Cleanup",
                Some("Failed account without an AWS account id was removed".to_string()),
            )
            .await;
            return Ok(Action::await_change());
        }
        Ok(()) => {
            info!(account = %name, "Account is eligible for cleanup, not deleting it (dry run)");
            ctx.record_action("DeleteAccount", true);
        }
        Err(e) => debug!(account = %name, reason = %e, "Skipping cleanup"),
    }

    let result = run_checks(ctx, &mut account, &config, setup.as_deref()).await;
    finish_pass(ctx, &account, result).await
}

/// Only failed accounts that never got an AWS account id can be removed.
pub fn cleanup_eligibility(account: &Account) -> Result<(), ValidationError> {
    if account.is_cleanup_candidate() {
        return Ok(());
    }
    Err(ValidationError::new(
        ValidationErrorKind::AccountNotEligibleForCleanup,
        "only failed accounts without an AWS account id are cleaned up",
    ))
}

/// Customer supplied accounts and accounts that are not Ready are never validated.
pub fn validate_account_origin(account: &Account) -> Result<(), ValidationError> {
    if account.is_byoc() {
        return Err(ValidationError::new(
            ValidationErrorKind::InvalidAccountOrigin,
            "account is a customer supplied account",
        ));
    }
    if !account.is_ready() {
        return Err(ValidationError::new(
            ValidationErrorKind::InvalidAccountOrigin,
            "account is not in a ready state",
        ));
    }
    Ok(())
}

pub fn validate_aws_account_id(account: &Account) -> Result<(), ValidationError> {
    if account.has_aws_account_id() {
        return Ok(());
    }
    Err(ValidationError::new(
        ValidationErrorKind::MissingAwsAccount,
        "account has no AWS account id",
    ))
}

/// Checks from the origin check onwards, in order. Returns on the first failure.
async fn run_checks(
    ctx: &Context,
    account: &mut Account,
    config: &OperatorConfig,
    setup: Option<&dyn AwsClient>,
) -> Result<(), Error> {
    let flags = &config.flags;

    validate_account_origin(account)?;
    validate_aws_account_id(account)?;

    let aws = setup.ok_or_else(|| {
        ValidationError::new(
            ValidationErrorKind::AwsConnectionFailed,
            format!("unable to connect to default region {}", ctx.settings.default_region),
        )
    })?;
    let aws_account_id = account.spec.aws_account_id.clone();

    match validate_account_ou(
        aws,
        &ctx.ou_cache,
        account,
        &config.root_ou,
        &config.base_ou,
        flags.move_account,
    )
    .await?
    {
        Placement::InPlace => {}
        Placement::Moved { from, target } => {
            ctx.record_action("MoveAccount", false);
            ctx.publish_normal_event(
                &*account,
                "AccountMoved",
                "MoveAccount",
                Some(format!("Moved AWS account {aws_account_id} from {from} to {target}")),
            )
            .await;
        }
        Placement::DryRun { .. } => ctx.record_action("MoveAccount", true),
    }

    let compliance = if flags.compliance_tags && !account.is_byoc() {
        config.compliance.desired()
    } else {
        Vec::new()
    };
    let tag_compliance: Vec<(&str, &str)> = compliance
        .iter()
        .copied()
        .filter(|(_, value)| !value.is_empty())
        .collect();

    match config.shard_name.as_deref() {
        None => info!("Configuration has no shard-name, account tagging is disabled"),
        Some("") => info!("Configuration has an empty shard-name, skipping owner tag validation"),
        Some(shard_name) => {
            let owner = validate_owner_tag(
                aws,
                &aws_account_id,
                shard_name,
                flags.tag_account,
                &tag_compliance,
            )
            .await
            .inspect_err(|e| {
                if matches!(
                    e.kind,
                    ValidationErrorKind::MissingTag | ValidationErrorKind::IncorrectOwnerTag
                ) {
                    error!(aws_account_id = %aws_account_id, error = %e, "Owner tag validation failed");
                }
            })?;
            report_tag_outcome(ctx, account, "OwnerTag", owner).await;

            if flags.compliance_tags && !account.is_byoc() {
                let outcome =
                    validate_compliance_tags(aws, &aws_account_id, &compliance, flags.tag_account).await?;
                report_tag_outcome(ctx, account, "ComplianceTags", outcome).await;
            }
        }
    }

    let regions = config.opt_in_region_list();
    if flags.opt_in_regions && !regions.is_empty() {
        let requested = request_missing_regions(ctx.store.as_ref(), account, &regions).await?;
        if !requested.is_empty() {
            ctx.record_action("OptInRegions", ctx.settings.dev_mode);
            ctx.publish_normal_event(
                &*account,
                "OptInRegionsRequested",
                "OptInRegions",
                Some(format!("Requested enablement of {}", requested.join(","))),
            )
            .await;
        }
        poll_opt_in_regions(ctx.store.as_ref(), aws, account, ctx.settings.dev_mode).await?;
    }

    validate_service_quotas(
        ctx.store.as_ref(),
        ctx.aws.as_ref(),
        aws,
        account,
        ctx.settings.dev_mode,
    )
    .await?;

    Ok(())
}

async fn report_tag_outcome(ctx: &Context, account: &Account, action: &str, outcome: TagOutcome) {
    match outcome {
        TagOutcome::Compliant => {}
        TagOutcome::DryRun => ctx.record_action(action, true),
        TagOutcome::Corrected => {
            ctx.record_action(action, false);
            ctx.publish_normal_event(
                account,
                "TagsCorrected",
                action,
                Some(format!("Corrected tags on AWS account {}", account.spec.aws_account_id)),
            )
            .await;
        }
    }
}

/// Map the outcome of the checks to the controller action.
async fn finish_pass(ctx: &Context, account: &Account, result: Result<(), Error>) -> Result<Action, Error> {
    let name = account.name_any();
    let validation = match result {
        Ok(()) => {
            debug!(account = %name, "Account validation passed");
            return Ok(Action::await_change());
        }
        Err(Error::Validation(validation)) => validation,
        Err(e) => {
            error!(account = %name, error = %e, "Account validation failed unexpectedly");
            return Err(e);
        }
    };

    let kind = validation.kind;
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_validation_failure(kind.as_str());
    }

    if kind.is_pending() {
        info!(account = %name, kind = %kind, message = %validation.message, "Waiting for AWS");
    } else {
        warn!(account = %name, kind = %kind, error = %validation, "Account validation failed");
        ctx.publish_warning_event(account, kind.as_str(), "Validate", Some(validation.to_string()))
            .await;
    }

    match validation.retry_policy() {
        RetryPolicy::NoRequeue => Ok(Action::await_change()),
        RetryPolicy::RequeueAfter(wait) => Ok(Action::requeue(wait)),
        RetryPolicy::RequeueWithError => Err(Error::Validation(validation)),
    }
}
