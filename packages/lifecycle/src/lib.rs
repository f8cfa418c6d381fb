//! # Botyard Lifecycle
//!
//! Per-project state machine driving generated bots through build, run and
//! teardown, plus the multiplexer that keeps each running bot's output in a
//! bounded buffer readable by any number of clients.

pub mod controller;
pub mod error;
pub mod logs;
pub mod session;
pub mod state;

pub use controller::{ControllerSettings, LifecycleController, StatusReport};
pub use error::{LifecycleError, LifecycleResult};
pub use logs::{LogBuffer, LogLine, LogMultiplexer, LogSnapshot, ReadinessLatch, MAX_LINE_BYTES};
pub use session::SessionGuard;
pub use state::{ContainerHandle, InvalidTransition, LifecycleEvent, LifecycleState};
