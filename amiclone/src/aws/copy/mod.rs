//! The copy module owns the 'copy' subcommand: taking an AMI someone has shared with you and
//! re-registering it under your own account, by copying its root snapshot and registering a new
//! image from the copy.

pub(crate) mod ec2;
mod mapping;
mod register;
mod snapshot;
mod source;

use crate::aws::client::build_client_config;
use crate::aws::{default_region, region_from_string};
use crate::Args;
use amiclone_config::AmicloneConfig;
use aws_sdk_ec2::Client as Ec2Client;
use clap::Parser;
use ec2::{Ec2Api, Ec2Ops};
use log::{info, trace, warn};
use register::NetworkingOverride;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

/// Copies a shared AMI into your own account
#[derive(Debug, Parser)]
pub(crate) struct CopyArgs {
    /// The ID of the AMI to copy
    #[arg(short = 'i', long)]
    ami_id: String,

    /// The region to copy into; defaults to the region your environment is set up for
    #[arg(short = 'r', long)]
    region: Option<String>,

    /// The region the AMI is shared in, if different from the target region
    #[arg(long)]
    source_region: Option<String>,

    /// The name for the new AMI; defaults to the source image's name
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// The description for the new AMI; defaults to the source image's description
    #[arg(long)]
    description: Option<String>,

    /// Grow the new root volume to at least this many gibibytes
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(i32).range(1..=16384))]
    min_root_volume_size: i32,

    /// How many ephemeral devices to map alongside the root volume
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u8).range(..=23))]
    ephemeral_count: u8,

    /// Enhanced networking for the new AMI: on, off, or inherit from the source image
    #[arg(long, default_value = "inherit", value_parser = register::parse_networking_override)]
    enhanced_networking: NetworkingOverride,

    /// Seconds between status checks while waiting on EC2
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..=3600))]
    poll_interval: u64,

    /// Give up on the snapshot copy after this many seconds
    #[arg(long, default_value = "3600", value_parser = clap::value_parser!(u64).range(1..=86400))]
    timeout: u64,

    /// If specified, save the new AMI's details in JSON at this path
    #[arg(long)]
    ami_output: Option<PathBuf>,
}

/// Everything `copy_image` needs, resolved from the command line and config.
#[derive(Debug)]
pub(crate) struct CopyRequest {
    pub(crate) ami_id: String,
    pub(crate) source_region: String,
    pub(crate) name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) min_root_volume_size: i32,
    pub(crate) ephemeral_count: u8,
    pub(crate) enhanced_networking: NetworkingOverride,
    pub(crate) poll_interval: Duration,
    pub(crate) timeout: Duration,
}

/// Details of the new AMI; serialized to the output file when requested.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub(crate) struct RegisteredImage {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) snapshot_id: String,
}

/// Common entrypoint from main()
pub(crate) async fn run(args: &Args, copy_args: &CopyArgs) -> Result<()> {
    info!("Using config from path: {}", args.config_path.display());
    let config =
        AmicloneConfig::from_path_or_default(&args.config_path).context(error::ConfigSnafu)?;
    trace!("Parsed config: {:?}", config);
    let aws = config.aws.unwrap_or_default();

    // The target region comes from the command line if given, otherwise from the environment's
    // default provider chain.  The source region defaults to the target region; most shared AMIs
    // are copied within one region.
    let region = match &copy_args.region {
        Some(name) => region_from_string(name),
        None => default_region().await.context(error::DefaultRegionSnafu)?,
    };
    let source_region = copy_args
        .source_region
        .as_ref()
        .map(|name| region_from_string(name))
        .unwrap_or_else(|| region.clone());

    // STS calls for any assumed roles go through the target region's endpoint.
    let client_config = build_client_config(&region, &region, &aws).await;
    let target = Ec2Api::new(Ec2Client::new(&client_config));

    let source_client_config = build_client_config(&source_region, &region, &aws).await;
    let source = Ec2Api::new(Ec2Client::new(&source_client_config));

    let request = CopyRequest {
        ami_id: copy_args.ami_id.clone(),
        source_region: source_region.to_string(),
        name: copy_args.name.clone(),
        description: copy_args.description.clone(),
        min_root_volume_size: copy_args.min_root_volume_size,
        ephemeral_count: copy_args.ephemeral_count,
        enhanced_networking: copy_args.enhanced_networking,
        poll_interval: Duration::from_secs(copy_args.poll_interval),
        timeout: Duration::from_secs(copy_args.timeout),
    };

    info!(
        "Copying {} from {} into {}",
        request.ami_id, source_region, region
    );
    let image = copy_image(&request, &source, &target).await?;
    info!("Registered AMI '{}': {}", image.name, image.id);

    // Write the AMI details to file if requested
    if let Some(ref path) = copy_args.ami_output {
        let file = File::create(path).context(error::FileCreateSnafu { path })?;
        serde_json::to_writer_pretty(file, &image).context(error::SerializeSnafu { path })?;
        info!("Wrote AMI data to {}", path.display());
    }

    println!("{}", image.id);
    Ok(())
}

/// Copies the image described by `request`.  On failure or interruption, any snapshot we copied
/// but didn't register is deleted before the error is returned.
pub(crate) async fn copy_image(
    request: &CopyRequest,
    source: &dyn Ec2Ops,
    target: &dyn Ec2Ops,
) -> Result<RegisteredImage> {
    let mut cleanup_snapshot_ids = Vec::new();
    let result = _copy_image(request, source, target, &mut cleanup_snapshot_ids).await;

    if result.is_err() {
        snapshot::clean_up_snapshots(target, &cleanup_snapshot_ids).await;
    }

    result
}

/// Helper for `copy_image`.  Inserts the copied snapshot's ID into `cleanup_snapshot_ids` so it
/// can be cleaned up on failure; registration empties the list again, because from that point
/// the snapshot belongs to the new image.
async fn _copy_image(
    request: &CopyRequest,
    source: &dyn Ec2Ops,
    target: &dyn Ec2Ops,
    cleanup_snapshot_ids: &mut Vec<String>,
) -> Result<RegisteredImage> {
    let source_image = source::resolve_source(source, &request.ami_id)
        .await
        .context(error::ResolveSourceSnafu {
            ami_id: &request.ami_id,
        })?;
    trace!("Resolved source image: {:?}", source_image);

    // Settle everything that can still fail cheaply before the copy starts paying for storage.
    let name = request
        .name
        .clone()
        .or_else(|| source_image.name.clone())
        .context(error::MissingImageNameSnafu {
            ami_id: &request.ami_id,
        })?;
    let description = request
        .description
        .clone()
        .or_else(|| source_image.description.clone());
    let networking = register::resolve_networking(&source_image, request.enhanced_networking)
        .context(error::NetworkingSnafu)?;

    let mut copy = snapshot::start_copy(
        target,
        &source_image.root_snapshot_id,
        &request.source_region,
        source_image.root_snapshot_description.as_deref(),
    )
    .await
    .context(error::CopySnapshotSnafu)?;
    cleanup_snapshot_ids.push(copy.copy_id.clone());

    // The copy is the long part; racing it against ctrl-c lets an interrupted run delete the
    // snapshot instead of leaving it behind.
    tokio::select! {
        result = snapshot::wait_for_copy(target, &mut copy, request.poll_interval, request.timeout) => {
            result.context(error::WaitSnapshotSnafu)?
        }
        _ = tokio::signal::ctrl_c() => return error::CancelledSnafu.fail(),
    }
    info!("Snapshot {} copied to {}", copy.source_id, copy.copy_id);

    let mappings = mapping::build_device_mappings(
        &source_image,
        &copy.copy_id,
        request.min_root_volume_size,
        request.ephemeral_count,
    );

    // Registration is not raced against ctrl-c: once the call is issued, it fails or succeeds
    // server side.
    let image_id = register::register_image(
        target,
        &source_image,
        &name,
        description.as_deref(),
        mappings,
        networking,
    )
    .await
    .context(error::RegisterImageSnafu)?;
    // The new image owns the snapshot now; there is nothing left to clean up even if the wait
    // below fails.
    cleanup_snapshot_ids.clear();
    info!("Registered image {} from snapshot {}", image_id, copy.copy_id);

    tokio::select! {
        result = register::wait_for_image(target, &image_id, request.poll_interval) => {
            result.context(error::WaitImageSnafu)?
        }
        _ = tokio::signal::ctrl_c() => warn!(
            "Interrupted while waiting for {}; the image is registered and may still become available",
            image_id
        ),
    }

    Ok(RegisteredImage {
        id: image_id,
        name,
        snapshot_id: copy.copy_id,
    })
}

mod error {
    use crate::aws::copy::{register, snapshot, source};
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Copy was cancelled"))]
        Cancelled,

        #[snafu(display("Error reading config: {}", source))]
        Config { source: amiclone_config::Error },

        #[snafu(display("Failed to start snapshot copy: {}", source))]
        CopySnapshot { source: snapshot::Error },

        #[snafu(display("Failed to determine target region: {}", source))]
        DefaultRegion { source: crate::aws::Error },

        #[snafu(display("Failed to create file '{}': {}", path.display(), source))]
        FileCreate {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Image {} has no name; use --name to name the new AMI", ami_id))]
        MissingImageName { ami_id: String },

        #[snafu(display("Unsupported configuration: {}", source))]
        Networking { source: register::Error },

        #[snafu(display("Failed to register image: {}", source))]
        RegisterImage { source: register::Error },

        #[snafu(display("Failed to resolve source image {}: {}", ami_id, source))]
        ResolveSource {
            ami_id: String,
            source: source::Error,
        },

        #[snafu(display("Failed to serialize output to '{}': {}", path.display(), source))]
        Serialize {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("Registered image did not become available: {}", source))]
        WaitImage { source: register::Error },

        #[snafu(display("Snapshot copy did not succeed: {}", source))]
        WaitSnapshot { source: snapshot::Error },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::ec2::{self, Ec2Ops, RegisterParams, SnapshotStatus};
    use super::register::NetworkingOverride;
    use super::{copy_image, snapshot, source, CopyArgs, CopyRequest, Error};
    use async_trait::async_trait;
    use aws_sdk_ec2::types::{
        ArchitectureValues, BlockDeviceMapping, DeviceType, EbsBlockDevice, Image, ImageState,
        SnapshotState, VirtualizationType,
    };
    use clap::Parser;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const SOURCE_AMI_ID: &str = "ami-0123456789abcdef0";
    const SOURCE_SNAPSHOT_ID: &str = "snap-1111";
    const COPIED_SNAPSHOT_ID: &str = "snap-copy";

    /// Scripted EC2 stand-in: status responses are served from queues, and the calls that change
    /// things are recorded.
    #[derive(Default)]
    struct FakeEc2 {
        image: Option<Image>,
        copy_error: bool,
        register_error: bool,
        snapshot_statuses: Mutex<VecDeque<ec2::Result<SnapshotStatus>>>,
        image_states: Mutex<VecDeque<ec2::Result<ImageState>>>,
        copied: Mutex<Vec<(String, String, Option<String>)>>,
        registered: Mutex<Vec<RegisterParams>>,
        deleted: Mutex<Vec<String>>,
    }

    fn completed_status() -> SnapshotStatus {
        SnapshotStatus {
            state: SnapshotState::Completed,
            progress: Some("100%".to_string()),
            state_message: None,
            description: None,
        }
    }

    fn pending_status(progress: &str) -> SnapshotStatus {
        SnapshotStatus {
            state: SnapshotState::Pending,
            progress: Some(progress.to_string()),
            state_message: None,
            description: None,
        }
    }

    fn transient_error() -> ec2::Error {
        ec2::error::TransientSnafu {
            action: "describe snapshot",
            message: "Request limit exceeded",
        }
        .build()
    }

    #[async_trait]
    impl Ec2Ops for FakeEc2 {
        async fn describe_image(&self, image_id: &str) -> ec2::Result<Image> {
            self.image.clone().ok_or_else(|| {
                ec2::error::NotFoundSnafu {
                    action: "describe image",
                    message: format!("no image with ID {}", image_id),
                }
                .build()
            })
        }

        async fn image_state(&self, _image_id: &str) -> ec2::Result<ImageState> {
            self.image_states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ImageState::Available))
        }

        async fn describe_snapshot(&self, snapshot_id: &str) -> ec2::Result<SnapshotStatus> {
            // The source image's snapshot; the copy process only asks for its description.
            if snapshot_id == SOURCE_SNAPSHOT_ID {
                return Ok(SnapshotStatus {
                    state: SnapshotState::Completed,
                    progress: None,
                    state_message: None,
                    description: Some("source root volume".to_string()),
                });
            }
            self.snapshot_statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(completed_status()))
        }

        async fn copy_snapshot(
            &self,
            snapshot_id: &str,
            source_region: &str,
            description: Option<&str>,
        ) -> ec2::Result<String> {
            if self.copy_error {
                return ec2::error::QuotaExceededSnafu {
                    action: "copy snapshot",
                    message: "snapshot limit exceeded".to_string(),
                }
                .fail();
            }
            self.copied.lock().unwrap().push((
                snapshot_id.to_string(),
                source_region.to_string(),
                description.map(|d| d.to_string()),
            ));
            Ok(COPIED_SNAPSHOT_ID.to_string())
        }

        async fn register_image(&self, params: &RegisterParams) -> ec2::Result<String> {
            if self.register_error {
                return ec2::error::RejectedSnafu {
                    action: "register image",
                    code: "InvalidParameterValue".to_string(),
                    message: "bad block device mapping".to_string(),
                }
                .fail();
            }
            self.registered.lock().unwrap().push(params.clone());
            Ok("ami-new".to_string())
        }

        async fn delete_snapshot(&self, snapshot_id: &str) -> ec2::Result<()> {
            self.deleted.lock().unwrap().push(snapshot_id.to_string());
            Ok(())
        }
    }

    fn shared_image(root_volume_size: i32) -> Image {
        Image::builder()
            .image_id(SOURCE_AMI_ID)
            .name("shared-appliance-v1")
            .description("a shared appliance image")
            .architecture(ArchitectureValues::X8664)
            .virtualization_type(VirtualizationType::Hvm)
            .root_device_type(DeviceType::Ebs)
            .root_device_name("/dev/sda1")
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name("/dev/sda1")
                    .ebs(
                        EbsBlockDevice::builder()
                            .snapshot_id(SOURCE_SNAPSHOT_ID)
                            .volume_size(root_volume_size)
                            .build(),
                    )
                    .build(),
            )
            .ena_support(true)
            .sriov_net_support("simple")
            .build()
    }

    fn request() -> CopyRequest {
        CopyRequest {
            ami_id: SOURCE_AMI_ID.to_string(),
            source_region: "us-east-1".to_string(),
            name: None,
            description: None,
            min_root_volume_size: 10,
            ephemeral_count: 4,
            enhanced_networking: NetworkingOverride::Inherit,
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn small_image_copies_with_grown_root() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            snapshot_statuses: Mutex::new(VecDeque::from(vec![
                Ok(pending_status("37%")),
                Ok(completed_status()),
            ])),
            ..Default::default()
        };

        let image = copy_image(&request(), &fake, &fake).await.unwrap();
        assert_eq!(image.id, "ami-new");
        assert_eq!(image.name, "shared-appliance-v1");
        assert_eq!(image.snapshot_id, COPIED_SNAPSHOT_ID);

        // The copy was started from the source snapshot, in the source region, carrying the
        // source snapshot's description.
        let copied = fake.copied.lock().unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].0, SOURCE_SNAPSHOT_ID);
        assert_eq!(copied[0].1, "us-east-1");
        assert_eq!(copied[0].2.as_deref(), Some("source root volume"));

        let registered = fake.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        let params = &registered[0];
        assert_eq!(params.name, "shared-appliance-v1");
        assert_eq!(params.description.as_deref(), Some("a shared appliance image"));
        assert_eq!(params.root_device_name, "/dev/sda1");
        assert!(params.ena_support);
        assert_eq!(params.sriov_net_support.as_deref(), Some("simple"));

        // Root volume grown to the minimum, plus the four default ephemerals.
        assert_eq!(params.block_device_mappings.len(), 5);
        let root_ebs = params.block_device_mappings[0].ebs().unwrap();
        assert_eq!(root_ebs.volume_size(), Some(10));
        assert_eq!(root_ebs.snapshot_id(), Some(COPIED_SNAPSHOT_ID));

        // Nothing went wrong, so nothing should have been deleted.
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn large_image_keeps_root_size() {
        let fake = FakeEc2 {
            image: Some(shared_image(20)),
            ..Default::default()
        };
        let mut request = request();
        request.ephemeral_count = 0;

        copy_image(&request, &fake, &fake).await.unwrap();

        let registered = fake.registered.lock().unwrap();
        let params = &registered[0];
        assert_eq!(params.block_device_mappings.len(), 1);
        assert_eq!(
            params.block_device_mappings[0].ebs().unwrap().volume_size(),
            Some(20)
        );
    }

    #[tokio::test]
    async fn failed_copy_cleans_up_and_never_registers() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            snapshot_statuses: Mutex::new(VecDeque::from(vec![Ok(SnapshotStatus {
                state: SnapshotState::Error,
                progress: None,
                state_message: Some("source snapshot became unavailable".to_string()),
                description: None,
            })])),
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::WaitSnapshot {
                source: snapshot::Error::CopyFailed { .. }
            }
        ));

        assert!(fake.registered.lock().unwrap().is_empty());
        assert_eq!(
            *fake.deleted.lock().unwrap(),
            vec![COPIED_SNAPSHOT_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn timeout_cleans_up_exactly_once() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            ..Default::default()
        };
        let mut request = request();
        request.timeout = Duration::ZERO;

        let error = copy_image(&request, &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::WaitSnapshot {
                source: snapshot::Error::WaitTimeout { .. }
            }
        ));
        assert_eq!(
            *fake.deleted.lock().unwrap(),
            vec![COPIED_SNAPSHOT_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn transient_poll_failures_are_ridden_out() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            snapshot_statuses: Mutex::new(VecDeque::from(vec![
                Err(transient_error()),
                Err(transient_error()),
                Ok(completed_status()),
            ])),
            ..Default::default()
        };

        let image = copy_image(&request(), &fake, &fake).await.unwrap();
        assert_eq!(image.id, "ami-new");
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn persistent_poll_failures_abandon_the_wait() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            snapshot_statuses: Mutex::new(VecDeque::from(
                (0..8).map(|_| Err(transient_error())).collect::<Vec<_>>(),
            )),
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::WaitSnapshot {
                source: snapshot::Error::PollSnapshot {
                    source: ec2::Error::Transient { .. },
                    ..
                }
            }
        ));

        // Five failures in a row exhaust the waiter; the rest of the script goes unasked.
        assert_eq!(fake.snapshot_statuses.lock().unwrap().len(), 3);
        assert!(fake.registered.lock().unwrap().is_empty());
        assert_eq!(
            *fake.deleted.lock().unwrap(),
            vec![COPIED_SNAPSHOT_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn access_failure_while_polling_aborts_immediately() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            snapshot_statuses: Mutex::new(VecDeque::from(vec![
                Err(ec2::error::AccessSnafu {
                    action: "describe snapshot",
                    message: "not allowed",
                }
                .build()),
                Ok(completed_status()),
            ])),
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::WaitSnapshot {
                source: snapshot::Error::PollSnapshot {
                    source: ec2::Error::Access { .. },
                    ..
                }
            }
        ));

        // No second poll happened; the scripted recovery is still queued.
        assert_eq!(fake.snapshot_statuses.lock().unwrap().len(), 1);
        assert_eq!(
            *fake.deleted.lock().unwrap(),
            vec![COPIED_SNAPSHOT_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn quota_failure_starting_copy_deletes_nothing() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            copy_error: true,
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::CopySnapshot {
                source: snapshot::Error::StartCopy {
                    source: ec2::Error::QuotaExceeded { .. },
                    ..
                }
            }
        ));
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn register_rejection_cleans_up() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            register_error: true,
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(error, Error::RegisterImage { .. }));
        assert_eq!(
            *fake.deleted.lock().unwrap(),
            vec![COPIED_SNAPSHOT_ID.to_string()]
        );
    }

    #[tokio::test]
    async fn failure_after_registration_keeps_the_snapshot() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            image_states: Mutex::new(VecDeque::from(vec![Ok(ImageState::Failed)])),
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(error, Error::WaitImage { .. }));

        // Registration went through, so the snapshot belongs to the image and must survive.
        assert_eq!(fake.registered.lock().unwrap().len(), 1);
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_misses_while_pending_are_tolerated() {
        // Right after registration, DescribeImages may not return the new image for a while.
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            image_states: Mutex::new(VecDeque::from(vec![
                Err(ec2::error::NotFoundSnafu {
                    action: "describe image",
                    message: "no image with ID ami-new",
                }
                .build()),
                Err(ec2::error::MissingSnafu {
                    action: "describe image",
                    field: "state",
                }
                .build()),
                Ok(ImageState::Pending),
                Ok(ImageState::Available),
            ])),
            ..Default::default()
        };

        let image = copy_image(&request(), &fake, &fake).await.unwrap();
        assert_eq!(image.id, "ami-new");

        // Every scripted response was consumed on the way to available.
        assert!(fake.image_states.lock().unwrap().is_empty());
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_source_name_fails_before_any_copy() {
        let image = Image::builder()
            .image_id(SOURCE_AMI_ID)
            .architecture(ArchitectureValues::X8664)
            .virtualization_type(VirtualizationType::Hvm)
            .root_device_type(DeviceType::Ebs)
            .root_device_name("/dev/sda1")
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name("/dev/sda1")
                    .ebs(
                        EbsBlockDevice::builder()
                            .snapshot_id(SOURCE_SNAPSHOT_ID)
                            .volume_size(8)
                            .build(),
                    )
                    .build(),
            )
            .build();
        let fake = FakeEc2 {
            image: Some(image),
            ..Default::default()
        };

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(error, Error::MissingImageName { .. }));
        assert!(fake.copied.lock().unwrap().is_empty());
        assert!(fake.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn name_and_networking_overrides_apply() {
        let fake = FakeEc2 {
            image: Some(shared_image(8)),
            ..Default::default()
        };
        let mut request = request();
        request.name = Some("my-copy".to_string());
        request.enhanced_networking = NetworkingOverride::Off;

        let image = copy_image(&request, &fake, &fake).await.unwrap();
        assert_eq!(image.name, "my-copy");

        let registered = fake.registered.lock().unwrap();
        assert_eq!(registered[0].name, "my-copy");
        assert!(!registered[0].ena_support);
        assert_eq!(registered[0].sriov_net_support, None);
    }

    #[tokio::test]
    async fn missing_image_is_not_found() {
        let fake = FakeEc2::default();

        let error = copy_image(&request(), &fake, &fake).await.unwrap_err();
        assert!(matches!(
            error,
            Error::ResolveSource {
                source: source::Error::DescribeImage {
                    source: ec2::Error::NotFound { .. },
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn wait_flags_are_bounded() {
        fn parse(extra: &[&str]) -> std::result::Result<CopyArgs, clap::Error> {
            CopyArgs::try_parse_from(
                ["copy", "--ami-id", SOURCE_AMI_ID]
                    .iter()
                    .chain(extra.iter())
                    .copied(),
            )
        }

        assert!(parse(&["--poll-interval", "0"]).is_err());
        assert!(parse(&["--timeout", "0"]).is_err());
        assert!(parse(&["--timeout", "18446744073709551615"]).is_err());

        let copy_args = parse(&["--poll-interval", "1", "--timeout", "86400"]).unwrap();
        assert_eq!(copy_args.poll_interval, 1);
        assert_eq!(copy_args.timeout, 86400);
    }
}
