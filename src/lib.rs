pub mod bigquery;
pub mod cli;
pub mod graph;
pub mod load_config;

pub use cli::{run, Cli, Commands};
