pub mod cli;
pub mod config;
pub mod playlist;
pub mod runtime;
