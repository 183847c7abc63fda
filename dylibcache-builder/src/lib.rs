//! Offline shared-cache builder core for independently linked Mach-O dynamic
//! libraries. Consumers feed candidate library buffers to a [`Builder`],
//! configure it with a [`BuilderConfig`], and call [`Builder::build`] to
//! obtain the emitted sub-cache buffers. Mach-O parsing, code-signing hash
//! primitives, the host filesystem, and logging/statistics emission are
//! treated as external collaborators the caller wires in around this core,
//! the way a debug-info converter treats its own input sources as
//! collaborators around the type that actually assembles its output format.

pub mod builder;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod global;
pub mod input_registry;
pub mod layout;
pub mod model;
pub mod optimizers;
pub mod pass;
pub mod visitor;
pub mod warnings;

pub use builder::{BuildResults, Builder};
pub use config::BuilderConfig;
pub use error::{BuilderError, Capacity, Result};
pub use warnings::{Warning, Warnings};
