pub mod api;
pub mod channels;
pub mod cleanup;
pub mod config;
pub mod envelope;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod media;
pub mod pipeline;
pub mod stats;
