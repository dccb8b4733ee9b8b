//! Organizational unit placement.
//!
//! An account belongs in the pool OU unless it carries a legal entity, in
//! which case it belongs in the OU named after that entity under the base OU.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::aws::{AwsClient, AwsError, DUPLICATE_OU_EXCEPTION};
use crate::controller::ou_cache::OuCache;
use crate::controller::outcome::{ValidationError, ValidationErrorKind};
use crate::crd::Account;

/// Upper bound on the parent chain walk. AWS Organizations allows five OU
/// levels below the root.
pub const MAX_PARENT_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum OrganizationError {
    #[error("more than one parent returned for {child}")]
    MultipleParents { child: String },

    #[error("{child} has no parent")]
    NoParent { child: String },

    #[error("parent chain of {child} is deeper than {depth} levels")]
    DepthExceeded { child: String, depth: usize },

    #[error("organizational unit {name:?} does not exist under {parent}")]
    OuNotFound { name: String, parent: String },

    #[error(transparent)]
    Aws(#[from] AwsError),
}

/// Result of an OU placement check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// The account already sits in the target OU.
    InPlace,
    /// The account was moved into `target`.
    Moved { from: String, target: String },
    /// A move into `target` was needed but moving is disabled.
    DryRun { from: String, target: String },
}

/// Walk the parents of `id` until `predicate` matches.
///
/// Returns the visited parent ids in order. The chain ends early, without
/// error, when a node has no parent (root reached without a match).
pub async fn parents_till_predicate<P>(
    aws: &dyn AwsClient,
    id: &str,
    predicate: P,
) -> Result<Vec<String>, OrganizationError>
where
    P: Fn(&str) -> bool,
{
    let mut parents = Vec::new();
    let mut child = id.to_string();

    for _ in 0..MAX_PARENT_DEPTH {
        let listed = aws.list_parents(&child).await?;
        let parent = match listed.as_slice() {
            [] => {
                info!(
                    aws_account_id = %id,
                    path = ?parents,
                    "Exhausted parent chain, target OU and account are in separate subtrees"
                );
                return Ok(parents);
            }
            [parent] => parent.clone(),
            _ => {
                warn!(child = %child, "More than one parent returned");
                return Err(OrganizationError::MultipleParents { child });
            }
        };
        parents.push(parent.clone());
        if predicate(&parent) {
            return Ok(parents);
        }
        child = parent;
    }

    Err(OrganizationError::DepthExceeded {
        child: id.to_string(),
        depth: MAX_PARENT_DEPTH,
    })
}

/// Whether the immediate parent of the account satisfies `is_target_ou`.
pub async fn is_account_in_correct_ou<P>(aws: &dyn AwsClient, aws_account_id: &str, is_target_ou: P) -> bool
where
    P: Fn(&str) -> bool,
{
    if aws_account_id.is_empty() {
        return false;
    }
    match parents_till_predicate(aws, aws_account_id, is_target_ou).await {
        Ok(parents) => parents.len() == 1,
        Err(e) => {
            warn!(aws_account_id = %aws_account_id, error = %e, "Could not list account parents");
            false
        }
    }
}

/// Move an account from its current parent into `target_ou`.
///
/// Nothing is mutated when `move_enabled` is false.
pub async fn move_account(
    aws: &dyn AwsClient,
    aws_account_id: &str,
    target_ou: &str,
    move_enabled: bool,
) -> Result<Placement, OrganizationError> {
    let parents = aws.list_parents(aws_account_id).await?;
    let current = match parents.as_slice() {
        [parent] => parent.clone(),
        [] => {
            return Err(OrganizationError::NoParent {
                child: aws_account_id.to_string(),
            });
        }
        _ => {
            return Err(OrganizationError::MultipleParents {
                child: aws_account_id.to_string(),
            });
        }
    };

    if !move_enabled {
        info!(
            aws_account_id = %aws_account_id,
            old_ou = %current,
            new_ou = %target_ou,
            "Not moving account to new OU (dry run)"
        );
        return Ok(Placement::DryRun {
            from: current,
            target: target_ou.to_string(),
        });
    }

    info!(
        aws_account_id = %aws_account_id,
        old_ou = %current,
        new_ou = %target_ou,
        "Moving account to new OU"
    );
    aws.move_account(aws_account_id, &current, target_ou).await?;
    Ok(Placement::Moved {
        from: current,
        target: target_ou.to_string(),
    })
}

/// Page through the OUs under `parent_id` looking for `name`, bypassing the cache.
pub async fn find_ou_id_from_name(
    aws: &dyn AwsClient,
    parent_id: &str,
    name: &str,
) -> Result<String, OrganizationError> {
    let mut next_token = None;
    loop {
        let page = aws
            .list_organizational_units_for_parent(parent_id, next_token)
            .await?;
        if let Some(ou) = page.units.into_iter().find(|ou| ou.name == name) {
            return Ok(ou.id);
        }
        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => {
                return Err(OrganizationError::OuNotFound {
                    name: name.to_string(),
                    parent: parent_id.to_string(),
                });
            }
        }
    }
}

/// Resolve an OU name to its id, consulting the cache first.
pub async fn get_ou_id_from_name(
    aws: &dyn AwsClient,
    cache: &OuCache,
    parent_id: &str,
    name: &str,
) -> Result<String, OrganizationError> {
    if let Some(id) = cache.get(name) {
        return Ok(id);
    }
    let id = find_ou_id_from_name(aws, parent_id, name).await?;
    cache.insert(name, &id);
    Ok(id)
}

/// Create the OU `name` under `base_id`, or find it if it already exists.
pub async fn create_or_find_ou(
    aws: &dyn AwsClient,
    cache: &OuCache,
    base_id: &str,
    name: &str,
) -> Result<String, OrganizationError> {
    let id = match aws.create_organizational_unit(base_id, name).await {
        Ok(ou) => {
            info!(ou = %name, ou_id = %ou.id, "Created organizational unit");
            ou.id
        }
        Err(e) if e.is_code(DUPLICATE_OU_EXCEPTION) => {
            info!(ou = %name, "Organizational unit already exists");
            find_ou_id_from_name(aws, base_id, name).await?
        }
        Err(e) => {
            error!(ou = %name, error = %e, "Unexpected error creating organizational unit");
            return Err(e.into());
        }
    };
    cache.insert(name, &id);
    Ok(id)
}

/// Make sure the account sits in the OU it belongs to.
pub async fn validate_account_ou(
    aws: &dyn AwsClient,
    cache: &OuCache,
    account: &Account,
    pool_ou: &str,
    base_ou: &str,
    move_enabled: bool,
) -> Result<Placement, ValidationError> {
    let legal_entity = account.spec.legal_entity.id.as_str();
    let mut correct_ou = pool_ou.to_string();

    if !legal_entity.is_empty() {
        correct_ou = match get_ou_id_from_name(aws, cache, base_ou, legal_entity).await {
            Ok(id) => id,
            Err(OrganizationError::OuNotFound { .. }) if move_enabled => {
                info!(ou = %legal_entity, "Legal entity OU does not exist, creating it");
                create_or_find_ou(aws, cache, base_ou, legal_entity)
                    .await
                    .map_err(|e| {
                        ValidationError::with_source(
                            ValidationErrorKind::OuLookupFailed,
                            format!("unable to create OU for legal entity {legal_entity}"),
                            e,
                        )
                    })?
            }
            Err(OrganizationError::OuNotFound { .. }) => {
                info!(
                    ou = %legal_entity,
                    "Legal entity OU does not exist, not creating it because account moving is disabled"
                );
                String::new()
            }
            Err(e) => {
                return Err(ValidationError::with_source(
                    ValidationErrorKind::OuLookupFailed,
                    format!("unexpected error looking up OU for legal entity {legal_entity}"),
                    e,
                ));
            }
        };
    }

    if correct_ou.is_empty() {
        return Err(ValidationError::new(
            ValidationErrorKind::OuLookupFailed,
            "correct OU resolved to an empty id",
        ));
    }

    let aws_account_id = account.spec.aws_account_id.as_str();
    if is_account_in_correct_ou(aws, aws_account_id, |ou| ou == correct_ou).await {
        info!(aws_account_id = %aws_account_id, ou = %correct_ou, "Account is already in the correct OU");
        return Ok(Placement::InPlace);
    }

    info!(aws_account_id = %aws_account_id, ou = %correct_ou, "Account is not in the correct OU");
    move_account(aws, aws_account_id, &correct_ou, move_enabled)
        .await
        .map_err(|e| {
            error!(aws_account_id = %aws_account_id, error = %e, "Could not move account");
            ValidationError::with_source(
                ValidationErrorKind::AccountMoveFailed,
                format!("unable to move account into {correct_ou}"),
                e,
            )
        })
}
