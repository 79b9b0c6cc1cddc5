use async_trait::async_trait;
pub use broccoli_queue::{error::BroccoliError, queue::BroccoliQueue};
use common::config::EventBusConfig;
use common::{EventPublisher, GenericEvent, PublishError};
use tracing::debug;

use crate::error::MqError;

pub type MqQueue = BroccoliQueue;

pub struct MqConfig {
    pub url: String,
    pub pool_size: u8,
}

impl From<&EventBusConfig> for MqConfig {
    fn from(cfg: &EventBusConfig) -> Self {
        Self {
            url: cfg.url.clone(),
            pool_size: cfg.pool_size,
        }
    }
}

pub async fn init_mq(config: MqConfig) -> Result<MqQueue, MqError> {
    BroccoliQueue::builder(&config.url)
        .pool_connections(config.pool_size)
        .build()
        .await
        .map_err(MqError::from)
}

/// Publishes entity events onto Redis queues named after their topic.
pub struct MqPublisher {
    queue: MqQueue,
    config: EventBusConfig,
}

impl MqPublisher {
    pub fn new(queue: MqQueue, config: EventBusConfig) -> Self {
        Self { queue, config }
    }

    pub async fn connect(config: &EventBusConfig) -> Result<Self, MqError> {
        let queue = init_mq(MqConfig::from(config)).await?;
        Ok(Self::new(queue, config.clone()))
    }
}

#[async_trait]
impl EventPublisher for MqPublisher {
    async fn publish(&self, event: GenericEvent) -> Result<(), PublishError> {
        let queue_name = self.config.queue_name(&event.topic);
        self.queue
            .publish(&queue_name, None, &event.payload, None)
            .await
            .map_err(MqError::from)?;
        debug!(queue = %queue_name, "Event published");
        Ok(())
    }
}
