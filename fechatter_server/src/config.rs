//! Centralized configuration, loaded from YAML (§6 Environment). Mirrors
//! the teacher's `./*.yml` / `/etc/config/*.yml` / env-var-path loading
//! order.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  pub bus: BusConfig,
  pub queue: QueueConfig,
  pub fcm: FcmConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
  pub port: u16,
  pub db_url: String,
  #[serde(default = "default_instance_id")]
  pub instance_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
  pub secret: String,
  #[serde(default)]
  pub environment: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
  pub nats_url: String,
  pub redis_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
  pub redis_url: String,
}

/// Only exercised by the write path's in-process degraded-mode fallback
/// (§4.5 step 6d) — the notification consumer is the primary FCM caller.
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

fn default_instance_id() -> String {
  env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

impl AppConfig {
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("fechatter.yml"),
      File::open("/etc/config/fechatter.yml"),
      env::var("FECHATTER_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found (fechatter.yml, /etc/config/fechatter.yml, or FECHATTER_CONFIG)"),
    };
    Ok(ret?)
  }

  pub fn get_summary(&self) -> String {
    format!(
      "fechatter_server instance={} port={} environment={}",
      self.server.instance_id, self.server.port, self.auth.environment
    )
  }
}
