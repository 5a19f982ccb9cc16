pub mod cli;
pub mod plugins;
