pub mod connection;
pub mod monitor;
pub mod pipelines;
pub mod schema;
pub mod sessions;
pub mod workspaces;

pub use connection::Database;
