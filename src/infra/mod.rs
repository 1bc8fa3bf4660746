pub mod error;
pub mod http;
pub mod roster;
pub mod telemetry;
