pub mod pipeline;
pub mod plan;
pub mod session;
pub mod status;

pub use pipeline::*;
pub use plan::*;
pub use session::*;
pub use status::*;
