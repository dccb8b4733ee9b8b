//! AccountPool Custom Resource Definition.
//!
//! An AccountPool keeps a number of unclaimed Accounts ready. The pool's
//! service quota targets come from the operator ConfigMap and are pushed into
//! each pooled Account's spec by the accountpool validation controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AccountPool is a custom resource describing a pool of Accounts.
///
/// Example:
/// ```yaml
/// apiVersion: aws.managed.openshift.io/v1alpha1
/// kind: AccountPool
/// metadata:
///   name: hs-zero-size-accountpool
///   namespace: aws-account-operator
/// spec:
///   poolSize: 0
///   default: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "aws.managed.openshift.io",
    version = "v1alpha1",
    kind = "AccountPool",
    plural = "accountpools",
    status = "AccountPoolStatus",
    namespaced,
    printcolumn = r#"{"name":"Pool Size", "type":"integer", "jsonPath":".status.poolSize"}"#,
    printcolumn = r#"{"name":"Unclaimed Accounts", "type":"integer", "jsonPath":".status.unclaimedAccounts"}"#,
    printcolumn = r#"{"name":"Claimed Accounts", "type":"integer", "jsonPath":".status.claimedAccounts"}"#,
    printcolumn = r#"{"name":"Available Accounts", "type":"integer", "jsonPath":".status.availableAccounts"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AccountPoolSpec {
    /// Desired number of unclaimed accounts.
    #[serde(default)]
    pub pool_size: i32,

    /// Pool used for claims that do not name one.
    #[serde(default)]
    pub default: bool,
}

/// Observed state of an AccountPool.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountPoolStatus {
    #[serde(default)]
    pub pool_size: i32,
    /// Approximate number of non-failed, unclaimed accounts.
    #[serde(default)]
    pub unclaimed_accounts: i32,
    #[serde(default)]
    pub claimed_accounts: i32,
    /// Never-claimed accounts that are Ready.
    #[serde(default)]
    pub available_accounts: i32,
    /// Accounts in the creation workflow.
    #[serde(default)]
    pub accounts_progressing: i32,
    #[serde(default)]
    pub aws_limit_delta: i32,
}
