//! HTTP/WS surface for transcribe-engine.

pub mod health;
pub mod jobs;
pub mod ws;

pub use health::health_routes;
pub use jobs::job_routes;
pub use ws::stream_routes;
