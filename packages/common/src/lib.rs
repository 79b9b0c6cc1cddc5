pub mod config;
pub mod event;
pub mod kind;
pub mod storage;

pub use event::{EntityEvent, EventMethod, EventPublisher, GenericEvent, PublishError};
pub use kind::{EntityKind, MediaKind};
