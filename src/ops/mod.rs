//! Ops commands over a cluster image

pub mod repair;
pub mod verify;

pub use repair::{plan_repairs, RepairPlan};
pub use verify::{verify_cluster, StuckContainer, VerifyReport};

use crate::common::Result;
use crate::coordinator::{ClusterImage, ContainerStore, InMemoryNodeRegistry};
use std::path::Path;

/// Load a JSON cluster image into a store and registry
pub(crate) async fn load_cluster(path: &Path) -> Result<(ContainerStore, InMemoryNodeRegistry)> {
    tracing::debug!(path = %path.display(), "loading cluster image");
    ClusterImage::load(path).await?.into_parts()
}
