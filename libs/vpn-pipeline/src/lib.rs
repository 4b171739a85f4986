//! The VPN core: wires a TUN device, one or more wire transports, and an
//! obfuscator chain together into the steady-state packet pipeline.
//! [`Pipeline::init`] performs the mandatory setup order; [`Pipeline::start`]
//! spawns the worker graph; [`RunningPipeline::destroy`] tears it back down.

mod errors;
mod pipeline;
mod workers;

pub use errors::PipelineError;
pub use pipeline::{Pipeline, RunningPipeline};
