//! Application module
//!
//! Wiring of the daemon: the builder assembles the optimizer from CLI
//! arguments, the core owns it, and the task manager runs it until a
//! shutdown signal arrives.

pub mod builder;
pub mod core;
pub mod tasks;

pub use builder::ApplicationBuilder;
pub use core::Application;
