pub mod blobstore;
pub mod cli;
pub mod keyvault;
pub mod load_config;

pub use cli::{run, Cli, Commands};
