pub mod assistant;
pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod message;
pub mod request;
pub mod scenario;
pub mod stream_decoder;
pub mod transport;
