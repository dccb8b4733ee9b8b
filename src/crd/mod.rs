//! Custom Resource Definitions (CRDs) for aws-account-operator.
//!
//! - `Account`: one pool-managed or customer-supplied AWS account
//! - `AccountPool`: a pool of unclaimed accounts sharing quota targets

mod account;
mod account_pool;

pub use account::*;
pub use account_pool::*;
