use super::NatsQueue;
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Commands go to `{subject_prefix}.{collection}`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Dead letters go to `{dead_letter_prefix}.{collection}`
    #[serde(default = "default_dead_letter_prefix")]
    pub dead_letter_prefix: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
    /// How long the broker waits for an ack before redelivering
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,
}

fn default_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_stream_name() -> String {
    "CITY_COMMANDS".to_string()
}

fn default_subject_prefix() -> String {
    "city.commands".to_string()
}

fn default_dead_letter_prefix() -> String {
    "city.deadletter".to_string()
}

fn default_max_age_days() -> i64 {
    7
}

fn default_max_bytes() -> i64 {
    1024 * 1024 * 1024 // 1GB
}

fn default_ack_wait_secs() -> u64 {
    30
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject_prefix: default_subject_prefix(),
            dead_letter_prefix: default_dead_letter_prefix(),
            max_age_days: default_max_age_days(),
            max_bytes: default_max_bytes(),
            ack_wait_secs: default_ack_wait_secs(),
        }
    }
}

impl NatsConfig {
    pub fn command_subject(&self, collection: &str) -> String {
        format!("{}.{}", self.subject_prefix, collection)
    }

    pub fn dead_letter_subject(&self, collection: &str) -> String {
        format!("{}.{}", self.dead_letter_prefix, collection)
    }

    fn stream_subjects(&self) -> Vec<String> {
        vec![
            format!("{}.>", self.subject_prefix),
            format!("{}.>", self.dead_letter_prefix),
        ]
    }
}

/// JetStream handle owning the command stream.
pub struct NatsClient {
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let nats_client = Self {
            jetstream: jetstream::new(client),
            config,
        };

        nats_client.ensure_stream().await?;

        Ok(nats_client)
    }

    /// Ensure the command stream exists with both command and dead-letter subjects
    async fn ensure_stream(&self) -> Result<()> {
        info!("Ensuring JetStream stream '{}' exists", self.config.stream_name);

        if self.jetstream.get_stream(&self.config.stream_name).await.is_ok() {
            info!("Stream '{}' already exists", self.config.stream_name);
            return Ok(());
        }

        info!("Stream '{}' does not exist, creating...", self.config.stream_name);

        let stream_config = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.stream_subjects(),
            max_age: Duration::from_secs((self.config.max_age_days * 86400) as u64),
            max_bytes: self.config.max_bytes,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        info!("Created JetStream stream '{}'", self.config.stream_name);
        Ok(())
    }

    /// Command channel for one collection.
    ///
    /// Each consumer worker should take its own handle so workers never
    /// share a pull stream.
    pub fn queue(&self, collection: &str) -> NatsQueue {
        NatsQueue::new(self.jetstream.clone(), &self.config, collection)
    }
}
