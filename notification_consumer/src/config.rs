//! Centralized configuration, loaded from YAML (§6 Environment). Same
//! `./consumer.yml` / `/etc/config/consumer.yml` / `CONSUMER_CONFIG` loading
//! order the other two binaries use.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub store: StoreConfig,
  pub queue: QueueConfig,
  pub fcm: FcmConfig,
  #[serde(default)]
  pub polling: PollingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  /// Port the health/metrics HTTP surface binds to. The consumer has no
  /// public API of its own (§4.7 "never surfaces to end users").
  pub port: u16,
  #[serde(default = "default_instance_id")]
  pub instance_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
  pub db_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
  pub redis_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FcmConfig {
  pub endpoint: String,
  pub server_key: String,
  #[serde(default)]
  pub sns_topic_arn: Option<String>,
}

impl From<FcmConfig> for fechatter_core::push::FcmConfig {
  fn from(c: FcmConfig) -> Self {
    fechatter_core::push::FcmConfig { endpoint: c.endpoint, server_key: c.server_key, sns_topic_arn: c.sns_topic_arn }
  }
}

/// Poll tuning (§4.3, §4.7): defaults match the spec's "~10 messages,
/// ~20s long poll, ~60s visibility".
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollingConfig {
  #[serde(default = "default_max_messages")]
  pub max_messages: u32,
  #[serde(default = "default_long_poll_secs")]
  pub long_poll_secs: u64,
  #[serde(default = "default_visibility_secs")]
  pub visibility_secs: u64,
}

impl Default for PollingConfig {
  fn default() -> Self {
    Self {
      max_messages: default_max_messages(),
      long_poll_secs: default_long_poll_secs(),
      visibility_secs: default_visibility_secs(),
    }
  }
}

fn default_max_messages() -> u32 {
  10
}

fn default_long_poll_secs() -> u64 {
  20
}

fn default_visibility_secs() -> u64 {
  60
}

fn default_instance_id() -> String {
  env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

impl AppConfig {
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("consumer.yml"),
      File::open("/etc/config/consumer.yml"),
      env::var("CONSUMER_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found (consumer.yml, /etc/config/consumer.yml, or CONSUMER_CONFIG)"),
    };
    Ok(ret?)
  }

  pub fn get_summary(&self) -> String {
    format!("notification_consumer instance={}", self.server.instance_id)
  }
}
