pub mod api;
pub mod config;
pub mod engine;
mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use engine::DoorState;
pub use engine::Engine;
pub use engine::EngineHandle;
pub use engine::Snapshot;
