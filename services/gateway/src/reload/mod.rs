//! Configuration generations and their hot reload.
//!
//! - [`config`]: the reloadable YAML document and its validation.
//! - [`source`]: the bounded update queue and the polling file source.
//! - [`lifecycle`]: the start/stop contract and in-flight tracking.
//! - [`generation`]: everything one configuration version owns.
//! - [`orchestrator`]: the swap and retirement of generations.
pub mod config;
pub mod generation;
pub mod lifecycle;
pub mod orchestrator;
pub mod source;
