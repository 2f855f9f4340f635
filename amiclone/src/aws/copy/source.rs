//! The source module owns resolution of the image being copied: fetching its metadata from EC2
//! and reducing it to the descriptor the rest of the process works from.

use super::ec2::Ec2Ops;
use aws_sdk_ec2::types::{ArchitectureValues, DeviceType, Image, VirtualizationType};
use log::{info, trace};
use snafu::{ensure, OptionExt, ResultExt};

/// Everything about the source image that copying and re-registration need.
#[derive(Debug, Clone)]
pub(crate) struct SourceImage {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) architecture: ArchitectureValues,
    pub(crate) virtualization_type: VirtualizationType,
    pub(crate) kernel_id: Option<String>,
    pub(crate) ramdisk_id: Option<String>,
    pub(crate) root_device_name: String,
    pub(crate) root_snapshot_id: String,
    pub(crate) root_volume_size: i32,
    pub(crate) root_snapshot_description: Option<String>,
    pub(crate) ena_support: bool,
    pub(crate) sriov_net_support: Option<String>,
}

/// Looks up the image in the source region and builds its descriptor, including the description
/// of the snapshot behind its root volume so the copy can carry the same text.
pub(crate) async fn resolve_source(ops: &dyn Ec2Ops, image_id: &str) -> Result<SourceImage> {
    info!("Describing source image {}", image_id);
    let image = ops
        .describe_image(image_id)
        .await
        .context(error::DescribeImageSnafu { image_id })?;
    trace!("Source image: {:?}", image);

    let mut source = source_from_image(&image)?;

    // The root snapshot's description isn't part of the image metadata; it takes a separate
    // describe call.
    let status = ops
        .describe_snapshot(&source.root_snapshot_id)
        .await
        .context(error::DescribeSnapshotSnafu {
            snapshot_id: &source.root_snapshot_id,
        })?;
    source.root_snapshot_description = status.description;

    Ok(source)
}

/// Reduces the EC2 image to our descriptor.  Images without a snapshot-backed root volume can't
/// be copied this way and are rejected here, before anything has been created.
pub(crate) fn source_from_image(image: &Image) -> Result<SourceImage> {
    let image_id = image.image_id().unwrap_or_default().to_string();

    ensure!(
        image.root_device_type() == Some(&DeviceType::Ebs),
        error::InstanceStoreImageSnafu {
            image_id: &image_id
        }
    );

    let root_device_name = image
        .root_device_name()
        .context(error::MissingImageFieldSnafu {
            image_id: &image_id,
            field: "root device name",
        })?
        .to_string();

    // The image may carry more mappings; the root volume's is the one we copy.
    let root_mapping = image
        .block_device_mappings()
        .unwrap_or_default()
        .iter()
        .find(|mapping| mapping.device_name() == Some(root_device_name.as_str()))
        .context(error::NoRootMappingSnafu {
            image_id: &image_id,
            device: &root_device_name,
        })?;

    let root_ebs = root_mapping.ebs().context(error::InstanceStoreImageSnafu {
        image_id: &image_id,
    })?;
    let root_snapshot_id = root_ebs
        .snapshot_id()
        .context(error::RootNotSnapshotSnafu {
            image_id: &image_id,
            device: &root_device_name,
        })?
        .to_string();
    let root_volume_size = root_ebs
        .volume_size()
        .context(error::MissingImageFieldSnafu {
            image_id: &image_id,
            field: "root volume size",
        })?;

    Ok(SourceImage {
        id: image_id.clone(),
        name: image.name().map(|s| s.to_string()),
        description: image.description().map(|s| s.to_string()),
        architecture: image
            .architecture()
            .context(error::MissingImageFieldSnafu {
                image_id: &image_id,
                field: "architecture",
            })?
            .clone(),
        virtualization_type: image
            .virtualization_type()
            .context(error::MissingImageFieldSnafu {
                image_id: &image_id,
                field: "virtualization type",
            })?
            .clone(),
        kernel_id: image.kernel_id().map(|s| s.to_string()),
        ramdisk_id: image.ramdisk_id().map(|s| s.to_string()),
        root_device_name,
        root_snapshot_id,
        root_volume_size,
        root_snapshot_description: None,
        ena_support: image.ena_support().unwrap_or_default(),
        sriov_net_support: image.sriov_net_support().map(|s| s.to_string()),
    })
}

mod error {
    use crate::aws::copy::ec2;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to describe source image {}: {}", image_id, source))]
        DescribeImage {
            image_id: String,
            source: ec2::Error,
        },

        #[snafu(display("Failed to describe root snapshot {}: {}", snapshot_id, source))]
        DescribeSnapshot {
            snapshot_id: String,
            source: ec2::Error,
        },

        #[snafu(display(
            "Image {} does not have an EBS-backed root volume and cannot be copied this way",
            image_id
        ))]
        InstanceStoreImage { image_id: String },

        #[snafu(display("Image {} did not include {}", image_id, field))]
        MissingImageField { image_id: String, field: String },

        #[snafu(display("Image {} has no mapping for its root device {}", image_id, device))]
        NoRootMapping { image_id: String, device: String },

        #[snafu(display(
            "Root device {} of image {} is not backed by a snapshot",
            device,
            image_id
        ))]
        RootNotSnapshot { image_id: String, device: String },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
