pub mod config;
pub mod frame;
pub mod messages;
pub mod topics;

pub use config::*;
pub use frame::*;
pub use messages::*;
