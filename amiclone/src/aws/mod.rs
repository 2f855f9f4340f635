use aws_config::meta::region::RegionProviderChain;
use aws_types::region::Region;
use snafu::OptionExt;

pub(crate) mod client;
pub(crate) mod copy;

const DEFAULT_REGION: &str = "us-east-1";

/// Builds a Region from the given region name.
pub(crate) fn region_from_string(name: &str) -> Region {
    Region::new(name.to_owned())
}

/// Finds the region the environment is set up for, falling back to us-east-1 like the AWS CLI.
pub(crate) async fn default_region() -> Result<Region> {
    RegionProviderChain::default_provider()
        .or_else(DEFAULT_REGION)
        .region()
        .await
        .context(error::DefaultRegionSnafu)
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to determine a default AWS region"))]
        DefaultRegion,
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
