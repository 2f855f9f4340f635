//! The ec2 module owns our view of EC2: the handful of calls the copy process makes, behind a
//! trait so the process can be driven against scripted responses in tests, and the translation
//! of EC2's loosely-typed service errors into errors the caller can act on.

use async_trait::async_trait;
use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{
    ArchitectureValues, BlockDeviceMapping, Image, ImageState, SnapshotState, VirtualizationType,
};
use aws_sdk_ec2::Client as Ec2Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use snafu::{ensure, OptionExt};

/// The EC2 operations the copy process relies on.
#[async_trait]
pub(crate) trait Ec2Ops {
    /// Describes a single image by ID.
    async fn describe_image(&self, image_id: &str) -> Result<Image>;

    /// Returns the current state of an image.
    async fn image_state(&self, image_id: &str) -> Result<ImageState>;

    /// Returns the status of a single snapshot by ID.
    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotStatus>;

    /// Starts copying a snapshot into the client's region and returns the new snapshot's ID.
    async fn copy_snapshot(
        &self,
        snapshot_id: &str,
        source_region: &str,
        description: Option<&str>,
    ) -> Result<String>;

    /// Registers an AMI and returns its ID.
    async fn register_image(&self, params: &RegisterParams) -> Result<String>;

    /// Deletes a snapshot.
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;
}

/// What we keep from DescribeSnapshots: the state plus the fields that make progress and
/// failures reportable.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotStatus {
    pub(crate) state: SnapshotState,
    pub(crate) progress: Option<String>,
    pub(crate) state_message: Option<String>,
    pub(crate) description: Option<String>,
}

/// Parameters for a RegisterImage call, collected from the source image and the command line.
#[derive(Debug, Clone)]
pub(crate) struct RegisterParams {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) architecture: ArchitectureValues,
    pub(crate) virtualization_type: VirtualizationType,
    pub(crate) kernel_id: Option<String>,
    pub(crate) ramdisk_id: Option<String>,
    pub(crate) root_device_name: String,
    pub(crate) block_device_mappings: Vec<BlockDeviceMapping>,
    pub(crate) ena_support: bool,
    pub(crate) sriov_net_support: Option<String>,
}

/// `Ec2Ops` implementation backed by the real EC2 client.
pub(crate) struct Ec2Api {
    client: Ec2Client,
}

impl Ec2Api {
    pub(crate) fn new(client: Ec2Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Ec2Ops for Ec2Api {
    async fn describe_image(&self, image_id: &str) -> Result<Image> {
        let describe_response = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .map_err(|e| classify_error("describe image", e))?;

        let mut images = describe_response.images.unwrap_or_default();
        ensure!(
            !images.is_empty(),
            error::NotFoundSnafu {
                action: "describe image",
                message: format!("no image with ID {}", image_id),
            }
        );
        ensure!(images.len() == 1, error::MultipleImagesSnafu { id: image_id });
        Ok(images.remove(0))
    }

    async fn image_state(&self, image_id: &str) -> Result<ImageState> {
        let describe_response = self
            .client
            .describe_images()
            .image_ids(image_id)
            .send()
            .await
            .map_err(|e| classify_error("describe image", e))?;

        describe_response
            .images
            .unwrap_or_default()
            .into_iter()
            .find(|image| image.image_id() == Some(image_id))
            .and_then(|image| image.state)
            .context(error::MissingSnafu {
                action: "describe image",
                field: "state",
            })
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotStatus> {
        let describe_response = self
            .client
            .describe_snapshots()
            .snapshot_ids(snapshot_id)
            .send()
            .await
            .map_err(|e| classify_error("describe snapshot", e))?;

        let mut snapshots = describe_response.snapshots.unwrap_or_default();
        ensure!(
            !snapshots.is_empty(),
            error::NotFoundSnafu {
                action: "describe snapshot",
                message: format!("no snapshot with ID {}", snapshot_id),
            }
        );
        let snapshot = snapshots.remove(0);

        Ok(SnapshotStatus {
            state: snapshot.state.context(error::MissingSnafu {
                action: "describe snapshot",
                field: "state",
            })?,
            progress: snapshot.progress,
            state_message: snapshot.state_message,
            description: snapshot.description,
        })
    }

    async fn copy_snapshot(
        &self,
        snapshot_id: &str,
        source_region: &str,
        description: Option<&str>,
    ) -> Result<String> {
        let copy_response = self
            .client
            .copy_snapshot()
            .source_snapshot_id(snapshot_id)
            .source_region(source_region)
            .set_description(description.map(|d| d.to_string()))
            .send()
            .await
            .map_err(|e| classify_error("copy snapshot", e))?;

        copy_response.snapshot_id.context(error::MissingSnafu {
            action: "copy snapshot",
            field: "snapshot ID",
        })
    }

    async fn register_image(&self, params: &RegisterParams) -> Result<String> {
        let register_response = self
            .client
            .register_image()
            .name(&params.name)
            .set_description(params.description.clone())
            .architecture(params.architecture.clone())
            .virtualization_type(params.virtualization_type.as_str())
            .set_kernel_id(params.kernel_id.clone())
            .set_ramdisk_id(params.ramdisk_id.clone())
            .root_device_name(&params.root_device_name)
            .set_block_device_mappings(Some(params.block_device_mappings.clone()))
            .ena_support(params.ena_support)
            .set_sriov_net_support(params.sriov_net_support.clone())
            .send()
            .await
            .map_err(|e| classify_error("register image", e))?;

        register_response.image_id.context(error::MissingSnafu {
            action: "register image",
            field: "image ID",
        })
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_snapshot()
            .snapshot_id(snapshot_id)
            .send()
            .await
            .map_err(|e| classify_error("delete snapshot", e))?;
        Ok(())
    }
}

/// Folds an SDK error into our taxonomy.  Service errors are classified by their error code;
/// anything that failed before reaching the service (DNS, connect, timeout) is transient.
fn classify_error<E>(action: &'static str, error: SdkError<E>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match error {
        SdkError::ServiceError(context) => {
            let err = context.err();
            classify_service_error(
                action,
                err.code().unwrap_or("unknown"),
                err.message().unwrap_or("no message returned").to_string(),
            )
        }
        other => error::TransientSnafu {
            action,
            message: DisplayErrorContext(&other).to_string(),
        }
        .build(),
    }
}

/// Classifies an EC2 service error by its code.  EC2's errors aren't modeled in the SDK, so
/// matching code strings is the best we can do; the families matched here follow the patterns
/// EC2 documents.
fn classify_service_error(action: &'static str, code: &str, message: String) -> Error {
    // Missing-resource codes share the ".NotFound" suffix, e.g. InvalidAMIID.NotFound and
    // InvalidSnapshot.NotFound.
    if code.ends_with(".NotFound") {
        return error::NotFoundSnafu { action, message }.build();
    }

    match code {
        "UnauthorizedOperation" | "AuthFailure" | "OptInRequired" => {
            return error::AccessSnafu { action, message }.build();
        }
        // RequestLimitExceeded is API throttling, not a resource quota, so it has to be matched
        // before the LimitExceeded family below.
        "RequestLimitExceeded" | "RequestExpired" => {
            return error::TransientSnafu { action, message }.build();
        }
        _ => {}
    }

    if code.contains("Throttl") || code.contains("Unavailable") || code.starts_with("Internal") {
        return error::TransientSnafu { action, message }.build();
    }

    if code.ends_with("LimitExceeded") || code.contains("QuotaExceeded") {
        return error::QuotaExceededSnafu { action, message }.build();
    }

    error::RejectedSnafu {
        action,
        code,
        message,
    }
    .build()
}

pub(crate) mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub(crate) enum Error {
        #[snafu(display("Not allowed to {}: {}", action, message))]
        Access { action: String, message: String },

        #[snafu(display("EC2 response to {} was missing {}", action, field))]
        Missing { action: String, field: String },

        #[snafu(display("DescribeImages for {} returned multiple results", id))]
        MultipleImages { id: String },

        #[snafu(display("Could not {}, resource not found: {}", action, message))]
        NotFound { action: String, message: String },

        #[snafu(display("Service quota prevented {}: {}", action, message))]
        QuotaExceeded { action: String, message: String },

        #[snafu(display("EC2 rejected {} with code {}: {}", action, code, message))]
        Rejected {
            action: String,
            code: String,
            message: String,
        },

        #[snafu(display("Temporary failure during {}: {}", action, message))]
        Transient { action: String, message: String },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;
