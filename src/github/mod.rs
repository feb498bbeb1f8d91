pub mod client;

pub use client::GhClient;
