//! Resources that run jobs and receive data
//!
//! - [`ResourceRequirements`] and [`Capacity`] arithmetic
//! - [`Resource`], [`JobListener`] and the job types
//! - [`MockResource`] for tests and dry runs

mod mock;
mod requirements;
mod traits;

pub use mock::*;
pub use requirements::*;
pub use traits::*;
