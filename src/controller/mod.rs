//! Controller module for aws-account-operator.
//!
//! Contains the reconciliation loops, the account validation checks, error
//! handling and status management.
//!
//! This module supports two controllers:
//! - Account validation (account_validation + the check modules)
//! - AccountPool validation (accountpool_validation)

// Shared modules
pub mod backoff;
pub mod context;
pub mod error;
pub mod outcome;
pub mod status;
pub mod store;

// Account validation checks
pub mod organization;
pub mod ou_cache;
pub mod quotas;
pub mod regions;
pub mod tags;

// Controllers
pub mod account_validation;
pub mod accountpool_validation;
