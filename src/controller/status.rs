//! Status management utilities.
//!
//! Helpers for maintaining the Account condition list.

use crate::crd::AccountCondition;

/// Condition set once every configured opt-in region is enabled.
pub const CONDITION_OPT_IN_REGIONS_ENABLED: &str = "OptInRegionsEnabled";
/// Condition set while region enablement requests are outstanding.
pub const CONDITION_OPTING_IN_REGIONS: &str = "OptingInRegions";

/// Add or update a condition.
///
/// The transition time of an existing condition is kept when its status did
/// not change, so only real transitions move it forward.
pub fn set_condition(conditions: &mut Vec<AccountCondition>, condition: AccountCondition) {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => {
            let last_transition_time = if existing.status == condition.status {
                std::mem::take(&mut existing.last_transition_time)
            } else {
                condition.last_transition_time.clone()
            };
            *existing = AccountCondition {
                last_transition_time,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[AccountCondition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason for a condition
pub fn get_condition_reason<'a>(
    conditions: &'a [AccountCondition],
    condition_type: &str,
) -> Option<&'a str> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .map(|c| c.reason.as_str())
}
