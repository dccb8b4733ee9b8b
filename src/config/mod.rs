//! Operator configuration.
//!
//! Two sources feed the operator:
//! - the `aws-account-operator-configmap` ConfigMap, re-read on every
//!   reconciliation pass into an immutable [`OperatorConfig`] snapshot
//! - process environment, read once at startup into [`OperatorSettings`]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::crd::{RegionalServiceQuotas, ServiceQuotaStatus, ServiceRequestStatus};

/// Name of the operator ConfigMap.
pub const OPERATOR_CONFIG_MAP: &str = "aws-account-operator-configmap";

/// Region used when neither `OPERATOR_DEFAULT_REGION` nor `AWS_DEFAULT_REGION` is set.
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Default number of Accounts reconciled concurrently per controller.
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 2;

/// `FORCE_DEV_MODE` value that keeps production behaviour.
pub const DEV_MODE_PRODUCTION: &str = "production";

pub const FLAG_MOVE_ACCOUNT: &str = "feature.validation_move_account";
pub const FLAG_TAG_ACCOUNT: &str = "feature.validation_tag_account";
pub const FLAG_COMPLIANCE_TAGS: &str = "feature.compliance_tags";
pub const FLAG_DELETE_ACCOUNT: &str = "feature.validation_delete_account";
pub const FLAG_OPT_IN_REGIONS: &str = "feature.opt_in_regions";
pub const FLAG_ACCOUNTPOOL_VALIDATION: &str = "feature.accountpool_validation";

pub const KEY_ROOT_OU: &str = "root";
pub const KEY_BASE_OU: &str = "base";
pub const KEY_SHARD_NAME: &str = "shard-name";
pub const KEY_APP_CODE: &str = "app-code";
pub const KEY_SERVICE_PHASE: &str = "service-phase";
pub const KEY_COST_CENTER: &str = "cost-center";
pub const KEY_OPT_IN_REGIONS: &str = "opt-in-regions";
pub const KEY_ACCOUNT_POOL: &str = "accountpool";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid boolean value {value:?}")]
    InvalidBool { value: String },

    #[error("configuration key {0:?} is missing")]
    MissingKey(&'static str),

    #[error("failed to parse accountpool configuration: {0}")]
    InvalidAccountPool(#[from] serde_yaml::Error),

    #[error("account pool {0:?} not found in configuration")]
    PoolNotFound(String),

    #[error("invalid quota value {value:?} for {quota_code} in {region}")]
    InvalidQuotaValue {
        region: String,
        quota_code: String,
        value: String,
    },

    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Parse a boolean flag value (`1`, `t`, `TRUE`, `true`, `True` and the false
/// counterparts).
pub fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            value: value.to_string(),
        }),
    }
}

/// Split a comma separated region list, dropping blanks and duplicates while
/// keeping the configured order.
pub fn parse_region_list(value: &str) -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    for region in value.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if !regions.iter().any(|r| r == region) {
            regions.push(region.to_string());
        }
    }
    regions
}

/// Feature toggles. A flag that is absent or malformed is disabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub move_account: bool,
    pub tag_account: bool,
    pub compliance_tags: bool,
    pub delete_account: bool,
    pub opt_in_regions: bool,
    pub accountpool_validation: bool,
}

impl FeatureFlags {
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        Self {
            move_account: read_flag(data, FLAG_MOVE_ACCOUNT),
            tag_account: read_flag(data, FLAG_TAG_ACCOUNT),
            compliance_tags: read_flag(data, FLAG_COMPLIANCE_TAGS),
            delete_account: read_flag(data, FLAG_DELETE_ACCOUNT),
            opt_in_regions: read_flag(data, FLAG_OPT_IN_REGIONS),
            accountpool_validation: read_flag(data, FLAG_ACCOUNTPOOL_VALIDATION),
        }
    }
}

fn read_flag(data: &BTreeMap<String, String>, key: &str) -> bool {
    let raw = data.get(key).map(String::as_str).unwrap_or_default();
    match parse_bool(raw) {
        Ok(enabled) => enabled,
        Err(e) => {
            info!(flag = %key, error = %e, "Could not read feature flag, treating as disabled");
            false
        }
    }
}

/// Desired compliance tag values. An empty value is not enforced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComplianceTags {
    pub app_code: String,
    pub service_phase: String,
    pub cost_center: String,
}

impl ComplianceTags {
    /// Non-empty `(tag key, desired value)` pairs.
    pub fn desired(&self) -> Vec<(&'static str, &str)> {
        [
            (KEY_APP_CODE, self.app_code.as_str()),
            (KEY_SERVICE_PHASE, self.service_phase.as_str()),
            (KEY_COST_CENTER, self.cost_center.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect()
    }
}

/// Immutable snapshot of the operator ConfigMap for one reconciliation pass.
#[derive(Clone, Debug, Default)]
pub struct OperatorConfig {
    pub flags: FeatureFlags,
    /// OU unassigned pool accounts belong in (`root` key).
    pub root_ou: String,
    /// Parent OU of the per legal-entity OUs.
    pub base_ou: String,
    /// Shard identity expected in the `owner` tag. `None` when the key is absent.
    pub shard_name: Option<String>,
    pub compliance: ComplianceTags,
    /// Raw `opt-in-regions` value. `None` when the key is absent.
    pub opt_in_regions: Option<String>,
    /// Raw `accountpool` YAML document.
    pub account_pool: Option<String>,
}

impl OperatorConfig {
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let value = |key: &str| data.get(key).cloned().unwrap_or_default();
        Self {
            flags: FeatureFlags::from_data(data),
            root_ou: value(KEY_ROOT_OU),
            base_ou: value(KEY_BASE_OU),
            shard_name: data.get(KEY_SHARD_NAME).cloned(),
            compliance: ComplianceTags {
                app_code: value(KEY_APP_CODE),
                service_phase: value(KEY_SERVICE_PHASE),
                cost_center: value(KEY_COST_CENTER),
            },
            opt_in_regions: data.get(KEY_OPT_IN_REGIONS).cloned(),
            account_pool: data.get(KEY_ACCOUNT_POOL).cloned(),
        }
    }

    pub fn from_config_map(cm: &ConfigMap) -> Self {
        cm.data
            .as_ref()
            .map(Self::from_data)
            .unwrap_or_default()
    }

    /// Configured opt-in regions, empty when unset.
    pub fn opt_in_region_list(&self) -> Vec<String> {
        self.opt_in_regions
            .as_deref()
            .map(parse_region_list)
            .unwrap_or_default()
    }

    /// Service quotas configured for an AccountPool.
    pub fn pool_service_quotas(&self, pool_name: &str) -> Result<RegionalServiceQuotas, ConfigError> {
        let raw = self
            .account_pool
            .as_deref()
            .ok_or(ConfigError::MissingKey(KEY_ACCOUNT_POOL))?;
        let pools = parse_account_pools(raw)?;
        let pool = pools
            .get(pool_name)
            .ok_or_else(|| ConfigError::PoolNotFound(pool_name.to_string()))?;
        pool.regional_service_quotas()
    }
}

/// One entry of the `accountpool` ConfigMap document.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountPoolConfig {
    #[serde(default)]
    pub default: bool,
    /// Region → quota code → value.
    #[serde(default)]
    pub servicequotas: BTreeMap<String, BTreeMap<String, String>>,
}

impl AccountPoolConfig {
    pub fn regional_service_quotas(&self) -> Result<RegionalServiceQuotas, ConfigError> {
        let mut parsed = RegionalServiceQuotas::new();
        for (region, quotas) in &self.servicequotas {
            let entry = parsed.entry(region.clone()).or_default();
            for (code, raw) in quotas {
                let value = raw.trim().parse::<i64>().map_err(|_| ConfigError::InvalidQuotaValue {
                    region: region.clone(),
                    quota_code: code.clone(),
                    value: raw.clone(),
                })?;
                entry.insert(code.clone(), ServiceQuotaStatus::new(value, ServiceRequestStatus::Todo));
            }
        }
        Ok(parsed)
    }
}

/// Parse the `accountpool` YAML document (pool name → pool configuration).
pub fn parse_account_pools(raw: &str) -> Result<BTreeMap<String, AccountPoolConfig>, ConfigError> {
    Ok(serde_yaml::from_str(raw)?)
}

/// Process level settings from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorSettings {
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
    pub max_concurrent_reconciles: u16,
    pub default_region: String,
    /// Skip AWS side asynchronous workflows (region enablement, quota requests).
    pub dev_mode: bool,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: None,
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            default_region: DEFAULT_AWS_REGION.to_string(),
            dev_mode: false,
        }
    }
}

impl OperatorSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let max_concurrent_reconciles = match non_empty("MAX_CONCURRENT_RECONCILES") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidEnv {
                    name: "MAX_CONCURRENT_RECONCILES",
                    value: raw,
                })?,
            None => DEFAULT_MAX_CONCURRENT_RECONCILES,
        };

        let default_region = non_empty("OPERATOR_DEFAULT_REGION")
            .or_else(|| non_empty("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string());

        let dev_mode = non_empty("FORCE_DEV_MODE").is_some_and(|v| v != DEV_MODE_PRODUCTION);

        Ok(Self {
            pod_name: non_empty("POD_NAME"),
            pod_namespace: non_empty("POD_NAMESPACE"),
            max_concurrent_reconciles,
            default_region,
            dev_mode,
        })
    }
}
