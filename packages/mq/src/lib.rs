pub mod error;
pub mod models;

pub use models::{BroccoliError, MqConfig, MqPublisher, MqQueue, init_mq};

pub type Mq = MqQueue;
