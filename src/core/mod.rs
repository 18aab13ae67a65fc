pub mod codec;
pub mod datex_engine;
pub mod datex_request;
pub mod geometry;
pub mod packets;
pub mod traffic_handler;

pub use crate::utils::error::Result;
