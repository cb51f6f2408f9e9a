//! Client/server pair for tracking which application a device is actively
//! using. The client watches the foreground app, buffers usage intervals
//! across restarts and offline periods, and the server reconciles the
//! repeatedly-delivered batches into one deduplicated timeline per device and
//! application.

pub mod api;
pub mod cli;
pub mod client;
pub mod fs;
pub mod platform;
pub mod server;
pub mod shutdown;
pub mod utils;
