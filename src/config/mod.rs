pub mod defs;
pub mod settings;
pub mod build;
