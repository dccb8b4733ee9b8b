//! [`AwsClient`] backed by the official AWS SDK crates.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{Region, SdkConfig};
use aws_sdk_account::types::RegionOptStatus as SdkRegionOptStatus;
use aws_sdk_organizations::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_servicequotas::config::Credentials;
use tracing::debug;

use super::{
    AwsClient, AwsClientBuilder, AwsError, AwsResult, OrganizationalUnit, OrganizationalUnitPage,
    QuotaChangePage, QuotaChangeRequest, RegionOptStatus, Tag,
};

const SDK_MAX_ATTEMPTS: u32 = 5;
const SDK_INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const SDK_MAX_BACKOFF: Duration = Duration::from_secs(30);
const ASSUME_ROLE_SESSION_NAME: &str = "awsAccountOperator";
const ASSUME_ROLE_DURATION_SECONDS: i32 = 3600;
const CREDENTIALS_PROVIDER_NAME: &str = "aws-account-operator-assume-role";

fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(service) => {
            let inner = service.err();
            AwsError::Service {
                operation,
                code: inner.code().unwrap_or("Unknown").to_string(),
                message: inner.message().unwrap_or_default().to_string(),
            }
        }
        _ => AwsError::Transport {
            operation,
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}

/// Organizations, Account and Service Quotas clients sharing one SDK config.
#[derive(Clone, Debug)]
pub struct SdkAwsClient {
    organizations: aws_sdk_organizations::Client,
    account: aws_sdk_account::Client,
    service_quotas: aws_sdk_servicequotas::Client,
}

impl SdkAwsClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            organizations: aws_sdk_organizations::Client::new(config),
            account: aws_sdk_account::Client::new(config),
            service_quotas: aws_sdk_servicequotas::Client::new(config),
        }
    }
}

#[async_trait]
impl AwsClient for SdkAwsClient {
    async fn list_parents(&self, child_id: &str) -> AwsResult<Vec<String>> {
        let out = self
            .organizations
            .list_parents()
            .child_id(child_id)
            .send()
            .await
            .map_err(|e| sdk_error("ListParents", e))?;
        Ok(out
            .parents()
            .iter()
            .filter_map(|p| p.id().map(str::to_string))
            .collect())
    }

    async fn move_account(
        &self,
        account_id: &str,
        source_parent_id: &str,
        destination_parent_id: &str,
    ) -> AwsResult<()> {
        self.organizations
            .move_account()
            .account_id(account_id)
            .source_parent_id(source_parent_id)
            .destination_parent_id(destination_parent_id)
            .send()
            .await
            .map_err(|e| sdk_error("MoveAccount", e))?;
        Ok(())
    }

    async fn list_organizational_units_for_parent(
        &self,
        parent_id: &str,
        next_token: Option<String>,
    ) -> AwsResult<OrganizationalUnitPage> {
        let out = self
            .organizations
            .list_organizational_units_for_parent()
            .parent_id(parent_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListOrganizationalUnitsForParent", e))?;
        let units = out
            .organizational_units()
            .iter()
            .filter_map(|ou| {
                Some(OrganizationalUnit {
                    id: ou.id()?.to_string(),
                    name: ou.name()?.to_string(),
                })
            })
            .collect();
        Ok(OrganizationalUnitPage {
            units,
            next_token: out.next_token().map(str::to_string),
        })
    }

    async fn create_organizational_unit(
        &self,
        parent_id: &str,
        name: &str,
    ) -> AwsResult<OrganizationalUnit> {
        let out = self
            .organizations
            .create_organizational_unit()
            .parent_id(parent_id)
            .name(name)
            .send()
            .await
            .map_err(|e| sdk_error("CreateOrganizationalUnit", e))?;
        let id = out
            .organizational_unit()
            .and_then(|ou| ou.id())
            .ok_or_else(|| AwsError::InvalidResponse {
                operation: "CreateOrganizationalUnit",
                message: "response did not include an OU id".to_string(),
            })?;
        Ok(OrganizationalUnit {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    async fn list_tags_for_resource(&self, resource_id: &str) -> AwsResult<Vec<Tag>> {
        let mut tags = Vec::new();
        let mut next_token = None;
        loop {
            let out = self
                .organizations
                .list_tags_for_resource()
                .resource_id(resource_id)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| sdk_error("ListTagsForResource", e))?;
            tags.extend(out.tags().iter().map(|t| Tag::new(t.key(), t.value())));
            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(tags)
    }

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> AwsResult<()> {
        let mut request = self.organizations.tag_resource().resource_id(resource_id);
        for tag in tags {
            let sdk_tag = aws_sdk_organizations::types::Tag::builder()
                .key(&tag.key)
                .value(&tag.value)
                .build()
                .map_err(|e| AwsError::Client(e.to_string()))?;
            request = request.tags(sdk_tag);
        }
        request
            .send()
            .await
            .map_err(|e| sdk_error("TagResource", e))?;
        Ok(())
    }

    async fn untag_resource(&self, resource_id: &str, tag_keys: &[String]) -> AwsResult<()> {
        self.organizations
            .untag_resource()
            .resource_id(resource_id)
            .set_tag_keys(Some(tag_keys.to_vec()))
            .send()
            .await
            .map_err(|e| sdk_error("UntagResource", e))?;
        Ok(())
    }

    async fn get_region_opt_status(
        &self,
        account_id: &str,
        region: &str,
    ) -> AwsResult<Option<RegionOptStatus>> {
        let out = self
            .account
            .get_region_opt_status()
            .account_id(account_id)
            .region_name(region)
            .send()
            .await
            .map_err(|e| sdk_error("GetRegionOptStatus", e))?;
        Ok(out
            .region_opt_status()
            .and_then(|s| RegionOptStatus::from_api(s.as_str())))
    }

    async fn enable_region(&self, account_id: &str, region: &str) -> AwsResult<()> {
        self.account
            .enable_region()
            .account_id(account_id)
            .region_name(region)
            .send()
            .await
            .map_err(|e| sdk_error("EnableRegion", e))?;
        Ok(())
    }

    async fn list_enabled_regions(&self, account_id: &str) -> AwsResult<Vec<String>> {
        let mut regions = Vec::new();
        let mut next_token = None;
        loop {
            let out = self
                .account
                .list_regions()
                .account_id(account_id)
                .region_opt_status_contains(SdkRegionOptStatus::Enabled)
                .region_opt_status_contains(SdkRegionOptStatus::EnabledByDefault)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| sdk_error("ListRegions", e))?;
            regions.extend(
                out.regions()
                    .iter()
                    .filter_map(|r| r.region_name().map(str::to_string)),
            );
            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(regions)
    }

    async fn get_service_quota(
        &self,
        service_code: &str,
        quota_code: &str,
    ) -> AwsResult<Option<f64>> {
        let out = self
            .service_quotas
            .get_service_quota()
            .service_code(service_code)
            .quota_code(quota_code)
            .send()
            .await
            .map_err(|e| sdk_error("GetServiceQuota", e))?;
        Ok(out.quota().and_then(|q| q.value()))
    }

    async fn request_service_quota_increase(
        &self,
        service_code: &str,
        quota_code: &str,
        desired_value: f64,
    ) -> AwsResult<()> {
        self.service_quotas
            .request_service_quota_increase()
            .service_code(service_code)
            .quota_code(quota_code)
            .desired_value(desired_value)
            .send()
            .await
            .map_err(|e| sdk_error("RequestServiceQuotaIncrease", e))?;
        Ok(())
    }

    async fn list_requested_service_quota_change_history(
        &self,
        service_code: &str,
        quota_code: &str,
        next_token: Option<String>,
    ) -> AwsResult<QuotaChangePage> {
        let out = self
            .service_quotas
            .list_requested_service_quota_change_history_by_quota()
            .service_code(service_code)
            .quota_code(quota_code)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| sdk_error("ListRequestedServiceQuotaChangeHistoryByQuota", e))?;
        let requests = out
            .requested_quotas()
            .iter()
            .filter_map(|change| {
                Some(QuotaChangeRequest {
                    service_code: change.service_code()?.to_string(),
                    quota_code: change.quota_code()?.to_string(),
                    desired_value: change.desired_value()?,
                    status: change.status()?.as_str().to_string(),
                })
            })
            .collect();
        Ok(QuotaChangePage {
            requests,
            next_token: out.next_token().map(str::to_string),
        })
    }
}

/// Builds SDK clients from the ambient credential chain, optionally assuming
/// a role inside a member account.
#[derive(Clone, Debug)]
pub struct SdkAwsClientBuilder {
    retry: RetryConfig,
}

impl Default for SdkAwsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SdkAwsClientBuilder {
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::standard()
                .with_max_attempts(SDK_MAX_ATTEMPTS)
                .with_initial_backoff(SDK_INITIAL_BACKOFF)
                .with_max_backoff(SDK_MAX_BACKOFF),
        }
    }

    async fn sdk_config(&self, region: &str, credentials: Option<Credentials>) -> SdkConfig {
        let mut loader = aws_config::from_env()
            .region(Region::new(region.to_string()))
            .retry_config(self.retry.clone());
        if let Some(creds) = credentials {
            loader = loader.credentials_provider(creds);
        }
        loader.load().await
    }
}

#[async_trait]
impl AwsClientBuilder for SdkAwsClientBuilder {
    async fn client(&self, region: &str) -> AwsResult<Arc<dyn AwsClient>> {
        let config = self.sdk_config(region, None).await;
        Ok(Arc::new(SdkAwsClient::new(&config)))
    }

    async fn assume_role_client(
        &self,
        aws_account_id: &str,
        role_name: &str,
        region: &str,
    ) -> AwsResult<Arc<dyn AwsClient>> {
        let setup = self.sdk_config(region, None).await;
        let sts = aws_sdk_sts::Client::new(&setup);
        let role_arn = format!("arn:aws:iam::{aws_account_id}:role/{role_name}");

        let out = sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(ASSUME_ROLE_SESSION_NAME)
            .duration_seconds(ASSUME_ROLE_DURATION_SECONDS)
            .send()
            .await
            .map_err(|e| sdk_error("AssumeRole", e))?;
        let creds = out.credentials().ok_or_else(|| AwsError::InvalidResponse {
            operation: "AssumeRole",
            message: "response did not include credentials".to_string(),
        })?;

        let expiry = SystemTime::try_from(*creds.expiration()).ok();
        let credentials = Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_string()),
            expiry,
            CREDENTIALS_PROVIDER_NAME,
        );

        debug!(role_arn = %role_arn, region = %region, "Assumed role in member account");

        let config = self.sdk_config(region, Some(credentials)).await;
        Ok(Arc::new(SdkAwsClient::new(&config)))
    }
}
