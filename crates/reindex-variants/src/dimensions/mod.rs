//! Built-in dimensions.

mod partition;
mod stage;

pub use partition::{PartitionDimension, DEFAULT_PARTITION};
pub use stage::{StageDimension, STAGE_DRAFT, STAGE_LIVE};
