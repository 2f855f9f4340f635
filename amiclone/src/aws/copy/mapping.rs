//! The mapping module builds the block device mapping for the new image: the copied snapshot as
//! the root volume plus the conventional run of ephemeral devices.

use super::source::SourceImage;
use aws_sdk_ec2::types::{BlockDeviceMapping, EbsBlockDevice, VolumeType};

const VOLUME_TYPE: VolumeType = VolumeType::Gp2;

// Ephemeral devices are conventionally exposed as /dev/sdb, /dev/sdc, and so on.
const FIRST_EPHEMERAL_DEVICE: u8 = b'b';

/// Builds the device mapping for registration: the copied snapshot as the root volume, sized at
/// least `min_root_volume_size` GiB, followed by `ephemeral_count` instance-store devices.  A
/// device name that would collide with the root device is skipped over.
pub(crate) fn build_device_mappings(
    source: &SourceImage,
    snapshot_id: &str,
    min_root_volume_size: i32,
    ephemeral_count: u8,
) -> Vec<BlockDeviceMapping> {
    let root_volume_size = source.root_volume_size.max(min_root_volume_size);

    let mut mappings = vec![BlockDeviceMapping::builder()
        .device_name(&source.root_device_name)
        .ebs(
            EbsBlockDevice::builder()
                .delete_on_termination(true)
                .snapshot_id(snapshot_id)
                .volume_size(root_volume_size)
                .volume_type(VOLUME_TYPE)
                .build(),
        )
        .build()];

    let mut device_letter = FIRST_EPHEMERAL_DEVICE;
    for index in 0..ephemeral_count {
        let mut device_name = format!("/dev/sd{}", device_letter as char);
        if device_name == source.root_device_name {
            device_letter += 1;
            device_name = format!("/dev/sd{}", device_letter as char);
        }
        mappings.push(
            BlockDeviceMapping::builder()
                .device_name(device_name)
                .virtual_name(format!("ephemeral{}", index))
                .build(),
        );
        device_letter += 1;
    }

    mappings
}
