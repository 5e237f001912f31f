pub mod breaker;
pub mod bus;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod risk;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use engine::ControlPlane;
