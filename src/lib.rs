pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod geodesy;
pub mod kmeans;
pub mod manifest;
pub mod matcher;
pub mod metadata;
pub mod placement;
pub mod policy;
pub mod rig;
pub mod telemetry;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
pub use matcher::{GeoreferencedRecord, MatchStats, TemporalMatcher};
pub use metadata::ImageRecord;
pub use telemetry::{Telemetry, TelemetrySample, TelemetrySchema};
