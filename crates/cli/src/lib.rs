//! Public library modules for the CLI crate
pub mod server;
