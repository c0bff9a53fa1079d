// ABOUTME: Control plane for persistent code-execution sandboxes
// ABOUTME: Container lifecycle, action dispatch, observation pipeline, and WebSocket fan-out

pub mod config;
pub mod container;
pub mod error;
pub mod hub;
pub mod manager;
pub mod space;

pub use config::{ConfigError, RuntimeConfig, DEFAULT_BOX_IMAGE};
pub use container::ContainerClient;
pub use error::{Result, RuntimeError};
pub use hub::{Hub, SubscriberId};
pub use manager::{ActionKind, Sandbox, SandboxManager};
pub use space::{Space, SpaceRegistry, DEFAULT_SPACE_ID};

pub use mentis_protocol::{Observation, ObservationType, StreamKind};
