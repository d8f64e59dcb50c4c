//! Centralized configuration, loaded from YAML (§6 Environment). Same
//! `./notify.yml` / `/etc/config/notify.yml` / `NOTIFY_CONFIG` loading
//! order the teacher used.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  pub bus: BusConfig,
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

fn default_instance_id() -> String {
  env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

impl AppConfig {
  pub fn load() -> Result<Self> {
    let ret: std::result::Result<AppConfig, serde_yaml::Error> = match (
      File::open("notify.yml"),
      File::open("/etc/config/notify.yml"),
      env::var("NOTIFY_CONFIG"),
    ) {
      (Ok(reader), _, _) => serde_yaml::from_reader(reader),
      (_, Ok(reader), _) => serde_yaml::from_reader(reader),
      (_, _, Ok(path)) => serde_yaml::from_reader(File::open(path)?),
      _ => bail!("Config file not found (notify.yml, /etc/config/notify.yml, or NOTIFY_CONFIG)"),
    };
    Ok(ret?)
  }

  pub fn get_summary(&self) -> String {
    format!(
      "notify_server instance={} port={} environment={}",
      self.server.instance_id, self.server.port, self.auth.environment
    )
  }
}
