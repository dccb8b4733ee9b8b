//! Owner and compliance tag validation.

use std::collections::HashMap;

use tracing::{error, info};

use crate::aws::{AwsClient, AwsResult, Tag};
use crate::controller::outcome::{ValidationError, ValidationErrorKind};

/// Tag key holding the shard that owns the account.
pub const OWNER_TAG_KEY: &str = "owner";

/// Result of a tag check that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagOutcome {
    /// Tags already match.
    Compliant,
    /// Tags were rewritten.
    Corrected,
    /// Tags differ but tagging is disabled; the difference was logged.
    DryRun,
}

/// Apply the owner tag together with any compliance tags in one call.
pub async fn tag_account(
    aws: &dyn AwsClient,
    aws_account_id: &str,
    shard_name: &str,
    compliance_tags: &[(&str, &str)],
) -> AwsResult<()> {
    let mut tags = vec![Tag::new(OWNER_TAG_KEY, shard_name)];
    tags.extend(compliance_tags.iter().map(|(k, v)| Tag::new(*k, *v)));
    aws.tag_resource(aws_account_id, &tags).await
}

fn tag_failed(aws_account_id: &str, source: crate::aws::AwsError) -> ValidationError {
    error!(aws_account_id = %aws_account_id, error = %source, "Unable to tag AWS account");
    ValidationError::with_source(
        ValidationErrorKind::AccountTagFailed,
        format!("unable to tag AWS account {aws_account_id}"),
        source,
    )
}

/// Check the `owner` tag against the configured shard.
///
/// With tagging disabled, a wrong owner is only logged while a missing owner
/// is reported as [`ValidationErrorKind::MissingTag`].
pub async fn validate_owner_tag(
    aws: &dyn AwsClient,
    aws_account_id: &str,
    shard_name: &str,
    tag_enabled: bool,
    compliance_tags: &[(&str, &str)],
) -> Result<TagOutcome, ValidationError> {
    let tags = aws.list_tags_for_resource(aws_account_id).await.map_err(|e| {
        ValidationError::with_source(
            ValidationErrorKind::AwsConnectionFailed,
            format!("unable to list tags of AWS account {aws_account_id}"),
            e,
        )
    })?;

    match tags.iter().find(|t| t.key == OWNER_TAG_KEY) {
        Some(owner) if owner.value == shard_name => Ok(TagOutcome::Compliant),
        Some(owner) if !tag_enabled => {
            info!(
                aws_account_id = %aws_account_id,
                has = %owner.value,
                want = %shard_name,
                "Account is not tagged with the correct owner (dry run)"
            );
            Ok(TagOutcome::DryRun)
        }
        Some(_) => {
            aws.untag_resource(aws_account_id, &[OWNER_TAG_KEY.to_string()])
                .await
                .map_err(|e| tag_failed(aws_account_id, e))?;
            tag_account(aws, aws_account_id, shard_name, compliance_tags)
                .await
                .map_err(|e| tag_failed(aws_account_id, e))?;
            info!(aws_account_id = %aws_account_id, owner = %shard_name, "Corrected owner tag");
            Ok(TagOutcome::Corrected)
        }
        None if tag_enabled => {
            tag_account(aws, aws_account_id, shard_name, compliance_tags)
                .await
                .map_err(|e| tag_failed(aws_account_id, e))?;
            info!(aws_account_id = %aws_account_id, owner = %shard_name, "Applied owner tag");
            Ok(TagOutcome::Corrected)
        }
        None => Err(ValidationError::new(
            ValidationErrorKind::MissingTag,
            "account is not tagged with an owner",
        )),
    }
}

/// Check the compliance tags (`app-code`, `service-phase`, `cost-center`).
///
/// A dimension with an empty desired value is not enforced. Correction only
/// rewrites the compliance tags; other tags are left as they are.
pub async fn validate_compliance_tags(
    aws: &dyn AwsClient,
    aws_account_id: &str,
    desired: &[(&str, &str)],
    tag_enabled: bool,
) -> Result<TagOutcome, ValidationError> {
    let tags = aws.list_tags_for_resource(aws_account_id).await.map_err(|e| {
        ValidationError::with_source(
            ValidationErrorKind::AwsConnectionFailed,
            format!("unable to list tags of AWS account {aws_account_id}"),
            e,
        )
    })?;
    let current: HashMap<&str, &str> = tags
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();

    let mismatched: Vec<&str> = desired
        .iter()
        .filter(|(key, value)| !value.is_empty() && current.get(key) != Some(value))
        .map(|(key, _)| *key)
        .collect();

    if mismatched.is_empty() {
        return Ok(TagOutcome::Compliant);
    }

    if !tag_enabled {
        info!(
            aws_account_id = %aws_account_id,
            tags = ?mismatched,
            "Compliance tags do not match (dry run)"
        );
        return Ok(TagOutcome::DryRun);
    }

    let tags: Vec<Tag> = desired
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| Tag::new(*key, *value))
        .collect();
    aws.tag_resource(aws_account_id, &tags)
        .await
        .map_err(|e| tag_failed(aws_account_id, e))?;
    info!(aws_account_id = %aws_account_id, tags = ?mismatched, "Corrected compliance tags");
    Ok(TagOutcome::Corrected)
}
