// Discord layer - commands and event handlers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "leveling/mod.rs"]
pub mod leveling;

// Re-export command types for convenience
pub use commands::leveling::{Data, Error};
