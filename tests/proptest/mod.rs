// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for aws-account-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use aws_account_operator::config::{parse_bool, parse_region_list};
use aws_account_operator::controller::accountpool_validation::same_quota_values;
use aws_account_operator::controller::backoff::{BACKOFF_MAX, ErrorBackoff};
use aws_account_operator::controller::outcome::{RetryPolicy, ValidationErrorKind, retry_policy};
use aws_account_operator::controller::quotas::initial_quota_status;
use aws_account_operator::crd::{
    AccountServiceQuota, RegionalServiceQuotas, ServiceQuotaStatus, ServiceRequestStatus,
};

/// Strategy for region-like names, including blanks and padding.
fn region_token() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{2}-[a-z]{4,9}-[1-3]",
        Just(String::new()),
        Just("  ".to_string()),
        "[a-z]{2}-[a-z]{4,9}-[1-3]".prop_map(|r| format!(" {r} ")),
    ]
}

/// Strategy for any validation error kind.
fn any_kind() -> impl Strategy<Value = ValidationErrorKind> {
    prop::sample::select(ValidationErrorKind::ALL.to_vec())
}

/// Strategy for any quota request status.
fn any_request_status() -> impl Strategy<Value = ServiceRequestStatus> {
    prop_oneof![
        Just(ServiceRequestStatus::Todo),
        Just(ServiceRequestStatus::InProgress),
        Just(ServiceRequestStatus::Completed),
        Just(ServiceRequestStatus::Denied),
    ]
}

/// Strategy for the quotas of one region.
fn quota_map() -> impl Strategy<Value = BTreeMap<&'static str, (i64, ServiceRequestStatus)>> {
    prop::collection::btree_map(
        prop::sample::select(vec!["L-1216C47A", "L-0EA8095F", "L-69A177A2"]),
        (1i64..10_000, any_request_status()),
        1..3,
    )
}

/// Strategy for small quota maps with a `default` entry.
fn quota_spec() -> impl Strategy<Value = RegionalServiceQuotas> {
    (
        quota_map(),
        prop::collection::btree_map(
            prop::sample::select(vec!["us-east-1", "eu-west-1", "ap-east-1"]),
            quota_map(),
            0..3,
        ),
    )
        .prop_map(|(defaults, regions)| {
            let convert = |m: BTreeMap<&str, (i64, ServiceRequestStatus)>| -> AccountServiceQuota {
                m.into_iter()
                    .map(|(code, (value, status))| {
                        (code.to_string(), ServiceQuotaStatus::new(value, status))
                    })
                    .collect()
            };
            let mut spec = RegionalServiceQuotas::new();
            spec.insert("default".to_string(), convert(defaults));
            for (region, quotas) in regions {
                spec.insert(region.to_string(), convert(quotas));
            }
            spec
        })
}

proptest! {
    /// Property: anything outside the accepted spellings is rejected.
    #[test]
    fn parse_bool_rejects_unknown(value in "[a-zA-Z0-9 ]{0,8}") {
        let accepted = ["1", "t", "T", "TRUE", "true", "True", "0", "f", "F", "FALSE", "false", "False"];
        prop_assert_eq!(parse_bool(&value).is_ok(), accepted.contains(&value.as_str()));
    }

    /// Property: parsed region lists are trimmed, non-empty and free of duplicates.
    #[test]
    fn region_list_is_clean(tokens in prop::collection::vec(region_token(), 0..12)) {
        let raw = tokens.join(",");
        let regions = parse_region_list(&raw);

        for region in &regions {
            prop_assert!(!region.is_empty());
            prop_assert_eq!(region.trim(), region.as_str());
        }
        let mut deduped = regions.clone();
        deduped.sort();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), regions.len());

        // Every non-blank token survives.
        for token in tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            prop_assert!(regions.iter().any(|r| r == token));
        }
    }

    /// Property: parsing is stable under re-joining its own output.
    #[test]
    fn region_list_round_trips(tokens in prop::collection::vec(region_token(), 0..12)) {
        let regions = parse_region_list(&tokens.join(","));
        prop_assert_eq!(parse_region_list(&regions.join(",")), regions);
    }

    /// Property: only terminal kinds stop requeueing, and fixed waits are bounded.
    #[test]
    fn retry_policy_is_total_and_bounded(kind in any_kind()) {
        match retry_policy(kind) {
            RetryPolicy::NoRequeue => prop_assert!(matches!(
                kind,
                ValidationErrorKind::InvalidAccountOrigin
                    | ValidationErrorKind::MissingAwsAccount
                    | ValidationErrorKind::AccountNotEligibleForCleanup
            )),
            RetryPolicy::RequeueAfter(wait) => {
                prop_assert!(wait >= Duration::from_secs(30));
                prop_assert!(wait <= Duration::from_secs(600));
            }
            RetryPolicy::RequeueWithError => prop_assert!(!kind.is_pending()),
        }
    }

    /// Property: pending kinds never surface as controller errors.
    #[test]
    fn pending_kinds_requeue_quietly(kind in any_kind()) {
        if kind.is_pending() {
            prop_assert!(matches!(retry_policy(kind), RetryPolicy::RequeueAfter(_)));
        }
    }

    /// Property: the backoff never exceeds its cap and never shrinks.
    #[test]
    fn backoff_is_monotonic_and_capped(failures in 1usize..40) {
        let backoff = ErrorBackoff::default();
        let mut previous = Duration::ZERO;
        for _ in 0..failures {
            let delay = backoff.next_delay("account");
            prop_assert!(delay >= previous);
            prop_assert!(delay <= BACKOFF_MAX);
            previous = delay;
        }
    }

    /// Property: the quota snapshot covers exactly the enabled regions, all TODO.
    #[test]
    fn quota_snapshot_covers_enabled_regions(
        spec in quota_spec(),
        enabled in prop::collection::btree_set(
            prop::sample::select(vec!["us-east-1", "eu-west-1", "ap-east-1", "af-south-1"]),
            0..4,
        ),
    ) {
        let enabled: Vec<String> = enabled.into_iter().map(str::to_string).collect();
        let snapshot = initial_quota_status(&spec, &enabled).unwrap();

        prop_assert_eq!(snapshot.len(), enabled.len());
        for region in &enabled {
            let quotas = &snapshot[region];
            for (code, quota) in quotas {
                prop_assert_eq!(quota.status, ServiceRequestStatus::Todo);
                let expected = spec
                    .get(region)
                    .and_then(|r| r.get(code))
                    .or_else(|| spec["default"].get(code))
                    .unwrap();
                prop_assert_eq!(quota.value, expected.value);
            }
            prop_assert!(spec["default"].keys().all(|code| quotas.contains_key(code)));
        }
    }

    /// Property: comparing pool quotas ignores request statuses.
    #[test]
    fn same_quota_values_ignores_status(spec in quota_spec(), status in any_request_status()) {
        let mut restated = spec.clone();
        for quota in restated.values_mut().flat_map(|q| q.values_mut()) {
            quota.status = status;
        }
        prop_assert!(same_quota_values(&spec, &restated));
        prop_assert!(same_quota_values(&restated, &spec));
    }
}
