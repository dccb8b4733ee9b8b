//! Reconciliation loop for AccountPool validation.
//!
//! Keeps the service quota targets in the spec of every pooled Account in
//! line with the pool's entry in the operator ConfigMap.

use std::sync::Arc;
use std::time::Instant;

use kube::{ResourceExt, runtime::controller::Action};
use tracing::{debug, error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::outcome::CONFIG_MAP_WAIT;
use crate::crd::{Account, AccountPool, RegionalServiceQuotas};

/// Controller name used in logs and metrics
pub const CONTROLLER_NAME: &str = "accountpoolvalidation";

/// Reconcile an AccountPool
pub async fn reconcile(obj: Arc<AccountPool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();

    let result = validate_account_pool(&name, &ctx).await;
    if result.is_ok() {
        ctx.backoff.reset(&name);
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .record_reconcile(CONTROLLER_NAME, &name, start_time.elapsed().as_secs_f64());
    }
    result
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<AccountPool>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(CONTROLLER_NAME, &name);
    }

    if error.is_not_found() {
        debug!(pool = %name, "AccountPool not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&name);
        warn!(pool = %name, error = %error, delay_secs = delay.as_secs(), "Retryable error, will retry");
        Action::requeue(delay)
    } else {
        error!(pool = %name, error = %error, "Non-retryable error");
        Action::requeue(error.requeue_after())
    }
}

/// Whether two quota maps ask for the same values. Request statuses are ignored.
pub fn same_quota_values(a: &RegionalServiceQuotas, b: &RegionalServiceQuotas) -> bool {
    a.len() == b.len()
        && a.iter().all(|(region, quotas)| {
            b.get(region).is_some_and(|other| {
                quotas.len() == other.len()
                    && quotas
                        .iter()
                        .all(|(code, q)| other.get(code).is_some_and(|o| o.value == q.value))
            })
        })
}

/// Non-BYOC Accounts that belong to the pool called `pool_name`.
pub fn pool_accounts(accounts: Vec<Account>, pool_name: &str) -> Vec<Account> {
    accounts
        .into_iter()
        .filter(|a| a.is_owned_by_account_pool() && a.spec.account_pool == pool_name && !a.is_byoc())
        .collect()
}

/// Run one validation pass for the AccountPool called `pool_name`.
pub async fn validate_account_pool(pool_name: &str, ctx: &Context) -> Result<Action, Error> {
    let config = match ctx.store.operator_config().await {
        Ok(Some(config)) => config,
        Ok(None) => {
            error!(pool = %pool_name, "Operator ConfigMap does not exist");
            return Ok(Action::requeue(CONFIG_MAP_WAIT));
        }
        Err(e) => {
            error!(pool = %pool_name, error = %e, "Could not retrieve the operator ConfigMap");
            return Ok(Action::requeue(CONFIG_MAP_WAIT));
        }
    };
    let enabled = config.flags.accountpool_validation;
    info!(pool = %pool_name, enabled, "Is accountpool validation enabled?");

    let desired = config.pool_service_quotas(pool_name).inspect_err(|e| {
        error!(pool = %pool_name, error = %e, "Could not load pool service quotas");
    })?;

    let accounts = pool_accounts(ctx.store.list_accounts().await?, pool_name);
    for mut account in accounts {
        if same_quota_values(&account.spec.regional_service_quotas, &desired) {
            continue;
        }
        let name = account.name_any();

        if !enabled {
            info!(
                pool = %pool_name,
                account = %name,
                expected = ?desired,
                actual = ?account.spec.regional_service_quotas,
                "Account service quotas differ from pool (accountpool validation disabled)"
            );
            ctx.record_action("UpdateServiceQuotas", true);
            continue;
        }

        account.spec.regional_service_quotas = desired.clone();
        ctx.store.update_account_spec(&account).await?;
        info!(pool = %pool_name, account = %name, "Updated account service quotas");

        // Cleared so the next account validation pass records a fresh snapshot.
        if let Some(status) = account.status.as_mut() {
            status.regional_service_quotas.clear();
            ctx.store.update_account_status(&account).await?;
        }
        ctx.record_action("UpdateServiceQuotas", false);
        ctx.publish_normal_event(
            &account,
            "ServiceQuotasUpdated",
            "UpdateServiceQuotas",
            Some(format!("Service quotas updated from AccountPool {pool_name}")),
        )
        .await;
    }

    Ok(Action::await_change())
}
