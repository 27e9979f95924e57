//! # Organizations Control Plane
//!
//! [`ControlPlane`] backed by the AWS Organizations API. Every trait method
//! issues exactly one request; retries belong to the caller.

use crate::model::{PolicyId, TargetId};
use crate::provider::{
    ControlPlane, ControlPlaneError, ControlPlaneErrorKind, Page, PolicyContent, PolicySummary,
};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_organizations::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_organizations::types::PolicyType;
use aws_sdk_organizations::Client as OrganizationsClient;
use tracing::{debug, info_span, warn, Instrument};

pub struct OrganizationsControlPlane {
    client: OrganizationsClient,
    policy_type: PolicyType,
}

impl std::fmt::Debug for OrganizationsControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrganizationsControlPlane")
            .field("policy_type", &self.policy_type.as_str())
            .finish_non_exhaustive()
    }
}

impl OrganizationsControlPlane {
    /// Client managing policies of `policy_type` (e.g. `BACKUP_POLICY`)
    #[must_use]
    pub fn new(sdk_config: &SdkConfig, policy_type: &str) -> Self {
        Self {
            client: OrganizationsClient::new(sdk_config),
            policy_type: PolicyType::from(policy_type),
        }
    }
}

/// Map an Organizations error code onto a [`ControlPlaneErrorKind`]
///
/// `None` means the request never produced a service response (timeout,
/// connection failure), which is worth retrying.
#[must_use]
pub fn classify_error_code(code: Option<&str>) -> ControlPlaneErrorKind {
    match code {
        None | Some("ServiceException") => ControlPlaneErrorKind::Transient,
        Some("TooManyRequestsException") => ControlPlaneErrorKind::Throttled,
        Some("DuplicatePolicyAttachmentException") => ControlPlaneErrorKind::DuplicateAttachment,
        Some("PolicyNotAttachedException") => ControlPlaneErrorKind::NotAttached,
        Some("PolicyNotFoundException") => ControlPlaneErrorKind::PolicyNotFound,
        Some("DuplicatePolicyException") => ControlPlaneErrorKind::DuplicatePolicy,
        Some("ConcurrentModificationException") => ControlPlaneErrorKind::ConcurrentModification,
        Some("PolicyInUseException") => ControlPlaneErrorKind::PolicyInUse,
        Some(
            "ConstraintViolationException"
            | "InvalidInputException"
            | "AccessDeniedException"
            | "MalformedPolicyDocumentException"
            | "PolicyTypeNotEnabledException"
            | "PolicyTypeNotAvailableForOrganizationException"
            | "TargetNotFoundException"
            | "AWSOrganizationsNotInUseException"
            | "UnsupportedAPIEndpointException",
        ) => ControlPlaneErrorKind::Rejected,
        Some(_) => ControlPlaneErrorKind::Unknown,
    }
}

fn map_sdk_error<E, R>(operation: &'static str, err: &SdkError<E, R>) -> ControlPlaneError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let kind = classify_error_code(err.code());
    let message = err
        .message()
        .map_or_else(|| DisplayErrorContext(err).to_string(), ToString::to_string);
    warn!(
        provider = "aws",
        operation = operation,
        error.code = err.code().unwrap_or("none"),
        error.kind = %kind,
        "Organizations request failed: {}",
        message
    );
    ControlPlaneError::new(kind, operation, message)
}

fn missing_field(operation: &'static str, field: &str) -> ControlPlaneError {
    ControlPlaneError::new(
        ControlPlaneErrorKind::Unknown,
        operation,
        format!("response is missing {field}"),
    )
}

#[async_trait]
impl ControlPlane for OrganizationsControlPlane {
    async fn list_policies(
        &self,
        next_token: Option<String>,
    ) -> Result<Page<PolicySummary>, ControlPlaneError> {
        let span = info_span!("aws.organizations.list_policies", policy_type = self.policy_type.as_str());
        async move {
            let output = self
                .client
                .list_policies()
                .filter(self.policy_type.clone())
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| map_sdk_error("ListPolicies", &e))?;

            let items = output
                .policies()
                .iter()
                .filter_map(|summary| match (summary.id(), summary.name()) {
                    (Some(id), Some(name)) => Some(PolicySummary {
                        id: id.to_string(),
                        name: name.to_string(),
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>();
            debug!(count = items.len(), "Listed policies page");

            Ok(Page {
                items,
                next_token: output
                    .next_token()
                    .filter(|token| !token.is_empty())
                    .map(ToString::to_string),
            })
        }
        .instrument(span)
        .await
    }

    async fn create_policy(&self, policy: &PolicyContent) -> Result<PolicyId, ControlPlaneError> {
        let span = info_span!("aws.organizations.create_policy", policy.name = %policy.name);
        async move {
            let output = self
                .client
                .create_policy()
                .name(&policy.name)
                .description(&policy.description)
                .content(&policy.content)
                .r#type(self.policy_type.clone())
                .send()
                .await
                .map_err(|e| map_sdk_error("CreatePolicy", &e))?;

            output
                .policy()
                .and_then(|created| created.policy_summary())
                .and_then(|summary| summary.id())
                .map(ToString::to_string)
                .ok_or_else(|| missing_field("CreatePolicy", "Policy.PolicySummary.Id"))
        }
        .instrument(span)
        .await
    }

    async fn update_policy(
        &self,
        policy_id: &str,
        policy: &PolicyContent,
    ) -> Result<(), ControlPlaneError> {
        let span = info_span!("aws.organizations.update_policy", policy.id = %policy_id);
        async move {
            self.client
                .update_policy()
                .policy_id(policy_id)
                .name(&policy.name)
                .description(&policy.description)
                .content(&policy.content)
                .send()
                .await
                .map_err(|e| map_sdk_error("UpdatePolicy", &e))?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<(), ControlPlaneError> {
        let span = info_span!("aws.organizations.delete_policy", policy.id = %policy_id);
        async move {
            self.client
                .delete_policy()
                .policy_id(policy_id)
                .send()
                .await
                .map_err(|e| map_sdk_error("DeletePolicy", &e))?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn attach_policy(
        &self,
        policy_id: &str,
        target_id: &str,
    ) -> Result<(), ControlPlaneError> {
        self.client
            .attach_policy()
            .policy_id(policy_id)
            .target_id(target_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("AttachPolicy", &e))?;
        Ok(())
    }

    async fn detach_policy(
        &self,
        policy_id: &str,
        target_id: &str,
    ) -> Result<(), ControlPlaneError> {
        self.client
            .detach_policy()
            .policy_id(policy_id)
            .target_id(target_id)
            .send()
            .await
            .map_err(|e| map_sdk_error("DetachPolicy", &e))?;
        Ok(())
    }

    async fn list_targets_for_policy(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> Result<Page<TargetId>, ControlPlaneError> {
        let output = self
            .client
            .list_targets_for_policy()
            .policy_id(policy_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| map_sdk_error("ListTargetsForPolicy", &e))?;

        Ok(Page {
            items: output
                .targets()
                .iter()
                .filter_map(|target| target.target_id().map(ToString::to_string))
                .collect(),
            next_token: output
                .next_token()
                .filter(|token| !token.is_empty())
                .map(ToString::to_string),
        })
    }
}
