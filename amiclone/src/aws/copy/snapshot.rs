//! The snapshot module owns the server-side copy of the source image's root snapshot: starting
//! it, polling it to completion, and deleting copies that end up orphaned.

use super::ec2::{self, Ec2Ops};
use aws_sdk_ec2::types::SnapshotState;
use log::{info, warn};
use snafu::{ensure, ResultExt};
use std::time::{Duration, Instant};
use tokio::time::sleep;

// Consecutive DescribeSnapshots failures we ride out before giving up on a copy we started.
const MAX_CONSECUTIVE_POLL_FAILURES: u32 = 5;

/// A snapshot copy in flight.
#[derive(Debug)]
pub(crate) struct SnapshotCopy {
    pub(crate) source_id: String,
    pub(crate) copy_id: String,
    pub(crate) progress: Option<String>,
}

/// Starts copying the given snapshot into the target region.  The returned job is pending; pass
/// it to `wait_for_copy` to see it through.
pub(crate) async fn start_copy(
    ops: &dyn Ec2Ops,
    snapshot_id: &str,
    source_region: &str,
    description: Option<&str>,
) -> Result<SnapshotCopy> {
    info!("Copying snapshot {} from {}", snapshot_id, source_region);
    let copy_id = ops
        .copy_snapshot(snapshot_id, source_region, description)
        .await
        .context(error::StartCopySnafu { snapshot_id })?;
    info!("Started snapshot copy: {}", copy_id);

    Ok(SnapshotCopy {
        source_id: snapshot_id.to_string(),
        copy_id,
        progress: None,
    })
}

/// Polls the copy until it completes, fails, or outlives `timeout`.  Transient trouble reaching
/// EC2 doesn't abandon a copy we already paid to start; a bounded streak of failed polls is
/// ridden out at a slower pace.
pub(crate) async fn wait_for_copy(
    ops: &dyn Ec2Ops,
    copy: &mut SnapshotCopy,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut consecutive_failures: u32 = 0;
    let mut attempts: u32 = 0;

    loop {
        ensure!(
            Instant::now() < deadline,
            error::WaitTimeoutSnafu {
                snapshot_id: &copy.copy_id,
                seconds: timeout.as_secs(),
            }
        );
        attempts += 1;

        match ops.describe_snapshot(&copy.copy_id).await {
            Ok(status) => {
                consecutive_failures = 0;
                copy.progress = status.progress;
                match status.state {
                    SnapshotState::Completed => {
                        info!("Snapshot copy {} completed", copy.copy_id);
                        return Ok(());
                    }
                    SnapshotState::Error => {
                        return error::CopyFailedSnafu {
                            snapshot_id: &copy.copy_id,
                            message: status
                                .state_message
                                .unwrap_or_else(|| "no state message returned".to_string()),
                        }
                        .fail();
                    }
                    _ => {
                        if attempts % 5 == 1 {
                            info!(
                                "Waiting for snapshot copy {}... ({} complete)",
                                copy.copy_id,
                                copy.progress.as_deref().unwrap_or("0%")
                            );
                        }
                    }
                }
            }
            Err(e @ ec2::Error::Transient { .. }) => {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_POLL_FAILURES {
                    return Err(e).context(error::PollSnapshotSnafu {
                        snapshot_id: &copy.copy_id,
                    });
                }
                warn!(
                    "Could not check snapshot copy {} ({} failures in a row): {}",
                    copy.copy_id, consecutive_failures, e
                );
                // Give the service extra room on top of the regular interval below.
                sleep(poll_interval).await;
            }
            Err(e) => {
                return Err(e).context(error::PollSnapshotSnafu {
                    snapshot_id: &copy.copy_id,
                });
            }
        }

        sleep(poll_interval).await;
    }
}

/// Best-effort deletion of copied snapshots that no image ended up referencing; failures are
/// logged and skipped so the error that got us here stays visible.
pub(crate) async fn clean_up_snapshots(ops: &dyn Ec2Ops, snapshot_ids: &[String]) {
    for snapshot_id in snapshot_ids {
        info!("Cleaning up orphaned snapshot {}", snapshot_id);
        if let Err(e) = ops.delete_snapshot(snapshot_id).await {
            warn!(
                "While cleaning up, failed to delete snapshot {}: {}",
                snapshot_id, e
            );
        }
    }
}

mod error {
    use crate::aws::copy::ec2;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Snapshot copy {} failed: {}", snapshot_id, message))]
        CopyFailed {
            snapshot_id: String,
            message: String,
        },

        #[snafu(display("Failed to check status of snapshot copy {}: {}", snapshot_id, source))]
        PollSnapshot {
            snapshot_id: String,
            source: ec2::Error,
        },

        #[snafu(display("Failed to start copy of snapshot {}: {}", snapshot_id, source))]
        StartCopy {
            snapshot_id: String,
            source: ec2::Error,
        },

        #[snafu(display(
            "Snapshot copy {} did not complete within {} seconds",
            snapshot_id,
            seconds
        ))]
        WaitTimeout { snapshot_id: String, seconds: u64 },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
