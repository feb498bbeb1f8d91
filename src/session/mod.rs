pub mod service;

pub use service::{SessionReport, SessionRequest, SessionService};
