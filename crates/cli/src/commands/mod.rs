//! Subcommand implementations

pub mod instances;
pub mod settings;
pub mod status;
