pub mod build;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod io;
pub mod ledger;
pub mod locks;
pub mod paths;
pub mod pipeline;
pub mod region;
pub mod store;
pub mod types;

pub use build::{Build, BuildFilter, NewBuild};
pub use dispatcher::{Applied, Chain};
pub use error::{ImmunityError, Result};
pub use ledger::{BuildStatus, StatusPayload};
pub use pipeline::Pipeline;
pub use region::{Region, RegionPolicy};
pub use types::{BuildState, PipelineEvent};
