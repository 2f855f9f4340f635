//! The register module owns the last leg of the copy: deciding the enhanced networking settings,
//! registering the new image from the copied snapshot, and waiting for EC2 to finish assembling
//! it.

use super::ec2::{self, Ec2Ops, RegisterParams};
use super::source::SourceImage;
use aws_sdk_ec2::types::{BlockDeviceMapping, ImageState, VirtualizationType};
use log::info;
use snafu::{ensure, ResultExt};
use std::time::Duration;
use tokio::time::sleep;

// The only level of SR-IOV support EC2 knows.
const SRIOV: &str = "simple";

/// How the new image's enhanced networking support is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetworkingOverride {
    /// Enable ENA and SR-IOV regardless of what the source image advertises.
    On,
    /// Register without enhanced networking support.
    Off,
    /// Carry over whatever the source image advertises.
    Inherit,
}

/// Parses the enhanced networking setting from the command line.
pub(crate) fn parse_networking_override(
    input: &str,
) -> std::result::Result<NetworkingOverride, String> {
    match input {
        "on" => Ok(NetworkingOverride::On),
        "off" => Ok(NetworkingOverride::Off),
        "inherit" => Ok(NetworkingOverride::Inherit),
        _ => Err(format!(
            "unknown enhanced networking setting '{}'; expected on, off, or inherit",
            input
        )),
    }
}

/// The pair of attributes EC2 uses to express enhanced networking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnhancedNetworking {
    pub(crate) ena_support: bool,
    pub(crate) sriov_net_support: Option<String>,
}

impl EnhancedNetworking {
    fn enabled(&self) -> bool {
        self.ena_support || self.sriov_net_support.is_some()
    }
}

/// Applies the override to the source image's networking attributes.  Enhanced networking only
/// exists for hvm images, so asking for it on a paravirtual image is refused here instead of
/// being left for RegisterImage to reject after the snapshot copy has been paid for.
pub(crate) fn resolve_networking(
    source: &SourceImage,
    networking: NetworkingOverride,
) -> Result<EnhancedNetworking> {
    let resolved = match networking {
        NetworkingOverride::On => EnhancedNetworking {
            ena_support: true,
            sriov_net_support: Some(SRIOV.to_string()),
        },
        NetworkingOverride::Off => EnhancedNetworking {
            ena_support: false,
            sriov_net_support: None,
        },
        NetworkingOverride::Inherit => EnhancedNetworking {
            ena_support: source.ena_support,
            sriov_net_support: source.sriov_net_support.clone(),
        },
    };

    if resolved.enabled() {
        ensure!(
            source.virtualization_type == VirtualizationType::Hvm,
            error::UnsupportedNetworkingSnafu {
                image_id: &source.id,
                virtualization_type: source.virtualization_type.as_str(),
            }
        );
    }

    Ok(resolved)
}

/// Registers the new image from the copied snapshot, carrying over the source image's launch
/// attributes.
pub(crate) async fn register_image(
    ops: &dyn Ec2Ops,
    source: &SourceImage,
    name: &str,
    description: Option<&str>,
    mappings: Vec<BlockDeviceMapping>,
    networking: EnhancedNetworking,
) -> Result<String> {
    let params = RegisterParams {
        name: name.to_string(),
        description: description.map(|d| d.to_string()),
        architecture: source.architecture.clone(),
        virtualization_type: source.virtualization_type.clone(),
        kernel_id: source.kernel_id.clone(),
        ramdisk_id: source.ramdisk_id.clone(),
        root_device_name: source.root_device_name.clone(),
        block_device_mappings: mappings,
        ena_support: networking.ena_support,
        sriov_net_support: networking.sriov_net_support,
    };

    info!("Making register image call for '{}'", name);
    ops.register_image(&params)
        .await
        .context(error::RegisterImageSnafu { name })
}

/// Waits for the newly registered image to leave the pending state.  Registration itself already
/// succeeded; this confirms EC2 finished assembling the image.
pub(crate) async fn wait_for_image(
    ops: &dyn Ec2Ops,
    image_id: &str,
    poll_interval: Duration,
) -> Result<()> {
    let max_attempts: u32 = 90;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        ensure!(
            attempts <= max_attempts,
            error::MaxAttemptsSnafu {
                image_id,
                max_attempts,
            }
        );

        match ops.image_state(image_id).await {
            Ok(ImageState::Available) => {
                info!("Image {} is available", image_id);
                return Ok(());
            }
            // These states mean the image will never become available.
            Ok(
                state @ (ImageState::Invalid
                | ImageState::Deregistered
                | ImageState::Failed
                | ImageState::Error),
            ) => {
                return error::StateSnafu {
                    image_id,
                    state: state.as_str(),
                }
                .fail();
            }
            Ok(_) => {}
            // DescribeImages can lag RegisterImage; an image that isn't visible yet is still
            // pending, not gone.
            Err(ec2::Error::NotFound { .. }) | Err(ec2::Error::Missing { .. }) => {}
            Err(e) => return Err(e).context(error::DescribeImageSnafu { image_id }),
        }

        if attempts % 5 == 1 {
            info!(
                "Waiting for image {} to be available... (attempt {} of {})",
                image_id, attempts, max_attempts
            );
        }
        sleep(poll_interval).await;
    }
}

mod error {
    use crate::aws::copy::ec2;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to describe image {}: {}", image_id, source))]
        DescribeImage {
            image_id: String,
            source: ec2::Error,
        },

        #[snafu(display(
            "Image {} did not become available within {} attempts",
            image_id,
            max_attempts
        ))]
        MaxAttempts { image_id: String, max_attempts: u32 },

        #[snafu(display("Failed to register image '{}': {}", name, source))]
        RegisterImage { name: String, source: ec2::Error },

        #[snafu(display("Image {} went to '{}' state", image_id, state))]
        State { image_id: String, state: String },

        #[snafu(display(
            "Enhanced networking requires an hvm image, but {} is {}",
            image_id,
            virtualization_type
        ))]
        UnsupportedNetworking {
            image_id: String,
            virtualization_type: String,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
