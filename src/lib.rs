pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod git;
pub mod github;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod runner;
pub mod session;
pub mod utils;
