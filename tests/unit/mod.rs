// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for aws-account-operator.
//!
//! These tests run without a Kubernetes cluster or AWS and test individual
//! components in isolation.

mod crd_tests {
    use aws_account_operator::crd::{
        Account, AccountCondition, AccountSpec, AccountState, AccountStatus, OptInRegionStatus,
        OptInRequestStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::CustomResourceExt;

    #[test]
    fn test_state_display() {
        assert_eq!(AccountState::Ready.to_string(), "Ready");
        assert_eq!(AccountState::Failed.to_string(), "Failed");
        assert_eq!("Ready".parse::<AccountState>().unwrap(), AccountState::Ready);
        assert!("NotAState".parse::<AccountState>().is_err());
    }

    #[test]
    fn test_condition_status_strings() {
        let condition = AccountCondition::new("OptInRegionsEnabled", true, "Done", "All enabled");
        assert_eq!(condition.r#type, "OptInRegionsEnabled");
        assert_eq!(condition.status, "True");
        assert_eq!(
            AccountCondition::new("OptingInRegions", false, "Done", "").status,
            "False"
        );
    }

    #[test]
    fn test_account_crd_identity() {
        let crd = Account::crd();
        assert_eq!(crd.spec.group, "aws.managed.openshift.io");
        assert_eq!(crd.spec.names.kind, "Account");
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_owned_by_account_pool_via_owner_reference() {
        let mut account = Account::new("a", AccountSpec::default());
        assert!(!account.is_owned_by_account_pool());

        account.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "aws.managed.openshift.io/v1alpha1".to_string(),
            kind: "AccountPool".to_string(),
            name: "hive".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        }]);
        assert!(account.is_owned_by_account_pool());
    }

    #[test]
    fn test_open_opt_in_requests() {
        let mut account = Account::new("a", AccountSpec::default());
        assert!(!account.has_open_opt_in_region_requests());

        let mut status = AccountStatus::default();
        status.opt_in_regions.insert(
            "af-south-1".to_string(),
            OptInRegionStatus {
                region_code: "af-south-1".to_string(),
                status: OptInRequestStatus::Enabled,
            },
        );
        account.status = Some(status);
        assert!(!account.has_open_opt_in_region_requests());

        if let Some(status) = account.status.as_mut() {
            status.opt_in_regions.insert(
                "ap-east-1".to_string(),
                OptInRegionStatus {
                    region_code: "ap-east-1".to_string(),
                    status: OptInRequestStatus::Todo,
                },
            );
        }
        assert!(account.has_open_opt_in_region_requests());
    }

    #[test]
    fn test_status_deserializes_from_cluster_json() {
        let json = serde_json::json!({
            "apiVersion": "aws.managed.openshift.io/v1alpha1",
            "kind": "Account",
            "metadata": { "name": "osd-creds-mgmt-abc", "namespace": "aws-account-operator" },
            "spec": {
                "awsAccountID": "123456789012",
                "iamUserSecret": "secret",
                "byoc": false,
                "claimLink": "",
                "legalEntity": { "id": "le-1", "name": "Legal" },
                "accountPool": "hs-zero-size-accountpool",
                "regionalServiceQuotas": {
                    "default": { "L-1216C47A": { "value": 750 } }
                }
            },
            "status": {
                "state": "Ready",
                "claimed": false,
                "optInRegions": {
                    "af-south-1": { "regionCode": "af-south-1", "status": "ENABLING" }
                }
            }
        });
        let account: Account = serde_json::from_value(json).unwrap();
        assert!(account.is_ready());
        assert_eq!(account.spec.legal_entity.id, "le-1");
        assert_eq!(
            account.spec.regional_service_quotas["default"]["L-1216C47A"].value,
            750
        );
        assert!(account.has_open_opt_in_region_requests());
    }
}

mod config_tests {
    use std::collections::BTreeMap;

    use aws_account_operator::config::{
        ConfigError, DEFAULT_AWS_REGION, DEFAULT_MAX_CONCURRENT_RECONCILES, OperatorConfig,
        OperatorSettings,
    };

    fn config(pairs: &[(&str, &str)]) -> OperatorConfig {
        let data: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_data(&data)
    }

    #[test]
    fn test_flags_default_to_disabled() {
        let cfg = config(&[("feature.validation_move_account", "yes please")]);
        assert!(!cfg.flags.move_account);
        assert!(!cfg.flags.tag_account);
        assert!(!cfg.flags.delete_account);
    }

    #[test]
    fn test_shard_name_presence_is_kept() {
        assert_eq!(config(&[]).shard_name, None);
        assert_eq!(config(&[("shard-name", "")]).shard_name, Some(String::new()));
    }

    #[test]
    fn test_opt_in_region_list() {
        let cfg = config(&[("opt-in-regions", " af-south-1, ,ap-east-1,af-south-1")]);
        assert_eq!(cfg.opt_in_region_list(), vec!["af-south-1", "ap-east-1"]);
        assert!(config(&[]).opt_in_region_list().is_empty());
    }

    #[test]
    fn test_pool_service_quotas() {
        let cfg = config(&[(
            "accountpool",
            "pool-a:\n  default: true\n  servicequotas:\n    default:\n      L-1216C47A: \"750\"\n    us-east-1:\n      L-1216C47A: \"1500\"\n",
        )]);
        let quotas = cfg.pool_service_quotas("pool-a").unwrap();
        assert_eq!(quotas["default"]["L-1216C47A"].value, 750);
        assert_eq!(quotas["us-east-1"]["L-1216C47A"].value, 1500);

        assert!(matches!(
            cfg.pool_service_quotas("pool-b"),
            Err(ConfigError::PoolNotFound(_))
        ));
        assert!(matches!(
            config(&[]).pool_service_quotas("pool-a"),
            Err(ConfigError::MissingKey(_))
        ));
    }

    #[test]
    fn test_pool_service_quota_value_must_be_numeric() {
        let cfg = config(&[(
            "accountpool",
            "pool-a:\n  servicequotas:\n    default:\n      L-1216C47A: lots\n",
        )]);
        assert!(matches!(
            cfg.pool_service_quotas("pool-a"),
            Err(ConfigError::InvalidQuotaValue { .. })
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = OperatorSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.default_region, DEFAULT_AWS_REGION);
        assert_eq!(
            settings.max_concurrent_reconciles,
            DEFAULT_MAX_CONCURRENT_RECONCILES
        );
        assert!(!settings.dev_mode);
    }

    #[test]
    fn test_settings_from_env_values() {
        let settings = OperatorSettings::from_lookup(|name| match name {
            "MAX_CONCURRENT_RECONCILES" => Some("8".to_string()),
            "AWS_DEFAULT_REGION" => Some("eu-west-1".to_string()),
            "FORCE_DEV_MODE" => Some("local".to_string()),
            "POD_NAMESPACE" => Some("aws-account-operator".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.max_concurrent_reconciles, 8);
        assert_eq!(settings.default_region, "eu-west-1");
        assert!(settings.dev_mode);
        assert_eq!(settings.pod_namespace.as_deref(), Some("aws-account-operator"));
    }

    #[test]
    fn test_settings_reject_bad_concurrency() {
        for bad in ["0", "many", "-1"] {
            let result = OperatorSettings::from_lookup(|name| {
                (name == "MAX_CONCURRENT_RECONCILES").then(|| bad.to_string())
            });
            assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })), "{bad}");
        }
    }

    #[test]
    fn test_production_is_not_dev_mode() {
        let settings = OperatorSettings::from_lookup(|name| {
            (name == "FORCE_DEV_MODE").then(|| "production".to_string())
        })
        .unwrap();
        assert!(!settings.dev_mode);
    }
}

mod status_tests {
    use aws_account_operator::controller::status::{
        get_condition_reason, is_condition_true, set_condition,
    };
    use aws_account_operator::crd::AccountCondition;

    #[test]
    fn test_set_condition_replaces_by_type() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            AccountCondition::new("OptingInRegions", true, "Requested", ""),
        );
        set_condition(
            &mut conditions,
            AccountCondition::new("OptingInRegions", false, "Enabled", ""),
        );
        assert_eq!(conditions.len(), 1);
        assert!(!is_condition_true(&conditions, "OptingInRegions"));
        assert_eq!(
            get_condition_reason(&conditions, "OptingInRegions"),
            Some("Enabled")
        );
    }
}

mod health_tests {
    use aws_account_operator::HealthState;

    #[tokio::test]
    async fn test_metrics_are_exported() {
        let state = HealthState::new();
        state
            .metrics
            .record_reconcile("accountvalidation", "osd-creds-mgmt-abc", 0.05);
        state.metrics.record_validation_failure("MissingTag");
        state.metrics.record_action("MoveAccount", true);

        let text = state.metrics.encode();
        assert!(text.contains("aws_account_operator_reconciliations_total"));
        assert!(text.contains("aws_account_operator_validation_failures_total"));
        assert!(text.contains("aws_account_operator_corrective_actions_total"));
    }

    #[tokio::test]
    async fn test_readiness_flag() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);
        state.set_ready(true).await;
        assert!(state.is_ready().await);
    }
}
