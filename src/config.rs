use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::hub::HubOptions;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatchat", about = "Realtime channel chat server")]
pub struct Config {
    #[arg(long, env = "CHATCHAT_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// `sqlite::memory:` keeps everything in RAM.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://chatchat.db?mode=rwc")]
    pub database_url: String,

    #[arg(long, env = "CHATCHAT_MAX_CONNECTIONS", default_value_t = 16)]
    pub max_connections: u32,

    /// Liveness deadline: a connection with no inbound frame or pong for this
    /// long is dropped. Pings go out twice per interval.
    #[arg(long, env = "CHATCHAT_HEARTBEAT_SECS", default_value_t = 15)]
    pub heartbeat_secs: u64,

    #[arg(long, env = "CHATCHAT_SUBSCRIBER_QUEUE", default_value_t = 256)]
    pub subscriber_queue: usize,

    #[arg(long, env = "CHATCHAT_DEFAULT_TAIL", default_value_t = 25)]
    pub default_tail: usize,

    #[arg(long, env = "CHATCHAT_MAX_TAIL", default_value_t = 500)]
    pub max_tail: usize,

    /// Photos are PUT under this URL. Photo posts are refused without it.
    #[arg(long, env = "CHATCHAT_BLOB_URL")]
    pub blob_url: Option<String>,

    #[arg(long, env = "CHATCHAT_SESSION_IDLE_MINUTES", default_value_t = 5)]
    pub session_idle_minutes: i64,

    #[arg(long, env = "CHATCHAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "CHATCHAT_JSON_LOGS", default_value_t = false)]
    pub json_logs: bool,
}

impl Config {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            subscriber_queue: self.subscriber_queue,
            default_tail: self.default_tail,
            max_tail: self.max_tail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "chatchat",
            "--bind",
            "127.0.0.1:9000",
            "--database-url",
            "sqlite::memory:",
            "--heartbeat-secs",
            "0",
            "--max-tail",
            "50",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.heartbeat(), Duration::from_secs(1));
        assert_eq!(config.hub_options().max_tail, 50);
    }
}
