//! # AWS Providers
//!
//! AWS SDK implementations of the provider traits:
//!
//! - [`OrganizationsControlPlane`]: policies and attachments in AWS Organizations
//! - [`S3ObjectStore`]: declared documents and uploaded bundles in S3
//! - [`SqsQueue`]: change events and bucket notifications in SQS
//!
//! Credentials come from the SDK's default chain (environment, profile, IRSA,
//! instance metadata).

pub mod organizations;
pub mod s3;
pub mod sqs;

pub use organizations::OrganizationsControlPlane;
pub use s3::S3ObjectStore;
pub use sqs::SqsQueue;

use aws_config::SdkConfig;
use tracing::info;

/// Load the shared SDK configuration
///
/// `region` overrides the region from the default provider chain.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = region {
        info!("Using AWS region: {}", region);
        builder = builder.region(aws_config::Region::new(region.to_string()));
    } else {
        info!("No AWS region configured, using the default provider chain");
    }
    builder.load().await
}
