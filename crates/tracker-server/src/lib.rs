pub mod client;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use server::{start, ServerConfig, ServerHandle};
