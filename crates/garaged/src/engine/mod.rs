mod cover;
mod door;
mod engine;
mod entity;
mod handle;
mod integration;
mod message;
mod resolver;
pub mod state;
mod timer;

pub use cover::Cover;
pub use cover::DEVICE_CLASS as COVER_DEVICE_CLASS;
pub use cover::SUPPORTED_FEATURES as COVER_FEATURES;
pub use door::CommandOutcome;
pub use door::DoorController;
pub use door::Effects;
pub use door::Publication;
pub use door::Rejection;
pub use door::ToggleAction;
pub use engine::Engine;
pub use entity::Entity;
pub use handle::EngineError;
pub use handle::EngineHandle;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::ControlMessage;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use resolver::resolve;
pub use state::CoverCommand;
pub use state::CoverState;
pub use state::DoorId;
pub use state::DoorInfo;
pub use state::DoorSnapshot;
pub use state::DoorState;
pub use state::Reading;
pub use state::Snapshot;
pub use state::ToggleDomain;
