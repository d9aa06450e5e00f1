//! # reindex-variants
//!
//! The variant state space: independent, pluggable dimensions of entity
//! state and the machinery to enumerate and activate them.
//!
//! ## Key Components
//!
//! - [`Dimension`]: one axis of state (draft/live, tenant partition, ...)
//! - [`VariantRegistry`]: explicitly registered dimensions, current-state
//!   capture and activation, reindex state enumeration
//! - [`StateGuard`]: restores the prior state when dropped
//! - [`Combinations`]: restartable Cartesian product over dimension values
//! - [`StageDimension`], [`PartitionDimension`]: built-in dimensions

pub mod combinations;
pub mod dimension;
pub mod dimensions;
pub mod error;
pub mod registry;

pub use combinations::Combinations;
pub use dimension::{Dimension, VariantField};
pub use dimensions::{
    PartitionDimension, StageDimension, DEFAULT_PARTITION, STAGE_DRAFT, STAGE_LIVE,
};
pub use error::VariantError;
pub use registry::{StateGuard, VariantRegistry};
