pub mod config;
pub mod conn;
pub mod rate_limit;
pub mod registry;
pub mod room;
pub mod server;
pub mod transport;

pub use config::RelayConfig;
pub use server::{Relay, build_router};
