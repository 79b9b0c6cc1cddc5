use serde::Deserialize;

/// Event bus configuration shared by the server and the mq publisher.
#[derive(Debug, Deserialize, Clone)]
pub struct EventBusConfig {
    /// Whether events are published at all. Default: false.
    #[serde(default)]
    pub enabled: bool,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Prepended to every topic as `{prefix}.{topic}`. Empty disables it.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_topic_prefix() -> String {
    "plaza".into()
}

impl EventBusConfig {
    /// Queue name a topic is published to.
    pub fn queue_name(&self, topic: &str) -> String {
        if self.topic_prefix.is_empty() {
            topic.to_string()
        } else {
            format!("{}.{topic}", self.topic_prefix)
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            topic_prefix: default_topic_prefix(),
        }
    }
}
