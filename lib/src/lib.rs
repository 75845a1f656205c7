mod api;
#[cfg(feature = "client")]
pub mod client;
mod config;
mod event;
mod notification;
mod session;

pub use api::*;
pub use config::*;
pub use event::*;
pub use notification::*;
pub use session::*;
