mod api;
pub mod args;
mod backup;
mod checkpoint;
pub mod commands;
mod config;
mod error;
pub mod model;
mod pipeline;
mod utils;


pub use api::Mode;
pub use checkpoint::Checkpoint;
pub use config::{Config, Destination};
pub use error::{pipeline_error, Error, PipelineError, Result, Stage};
pub use pipeline::{Outcome, ResumePoint};
