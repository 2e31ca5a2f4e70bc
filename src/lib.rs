#[macro_use]
extern crate failure;

pub mod annotate;
pub mod camera;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod label;
pub mod pipeline;
pub mod recognizer;
pub mod registry;
pub mod server;
pub mod status;
pub mod types;
