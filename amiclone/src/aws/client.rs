//! The client module owns the client building capabilities.

use amiclone_config::AwsConfig;
use aws_config::default_provider::credentials::default_provider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::sts::AssumeRoleProviderBuilder;
use aws_config::SdkConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_smithy_types::retry::RetryConfig;
use aws_types::region::Region;

// Max request retry attempts for EC2 calls made through this config.  The snapshot poll loop
// layers its own tolerance for transient failures on top of this.
const MAX_RETRY_ATTEMPTS: u32 = 4;

/// Create an SDK config using the given regions and AWS configuration.
pub(crate) async fn build_client_config(
    region: &Region,
    sts_region: &Region,
    aws: &AwsConfig,
) -> SdkConfig {
    let maybe_regional_role = aws.region.get(region.as_ref()).and_then(|r| r.role.clone());
    let assume_roles = aws.role.iter().chain(maybe_regional_role.iter()).cloned();
    let provider = build_provider(
        sts_region,
        assume_roles,
        base_provider(&aws.profile).await,
    )
    .await;

    aws_config::from_env()
        .credentials_provider(provider)
        .region(region.clone())
        .retry_config(RetryConfig::standard().with_max_attempts(MAX_RETRY_ATTEMPTS))
        .load()
        .await
}

/// Chains credentials providers to assume the given roles in order.
/// The region given should be the one in which you want to talk to STS to get temporary
/// credentials, not the region in which you want to talk to a service endpoint like EC2.  This is
/// needed because you may be assuming a role in an opt-in region from an account that has not
/// opted-in to that region, and you need to get session credentials from an STS endpoint in a
/// region to which you have access in the base account.
async fn build_provider(
    sts_region: &Region,
    assume_roles: impl Iterator<Item = String>,
    base_provider: SharedCredentialsProvider,
) -> SharedCredentialsProvider {
    let mut provider = base_provider;
    for assume_role in assume_roles {
        provider = SharedCredentialsProvider::new(
            AssumeRoleProviderBuilder::new(assume_role)
                .region(sts_region.clone())
                .session_name("amiclone")
                .build(provider),
        )
    }
    provider
}

/// If the user specified a profile, use that, otherwise use the default credentials mechanisms.
async fn base_provider(maybe_profile: &Option<String>) -> SharedCredentialsProvider {
    if let Some(profile) = maybe_profile {
        SharedCredentialsProvider::new(
            ProfileFileCredentialsProvider::builder()
                .profile_name(profile)
                .build(),
        )
    } else {
        SharedCredentialsProvider::new(default_provider().await)
    }
}
