use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// 应用配置
///
/// 加载顺序: 内置默认值 -> 可选的 reconciler.toml -> 环境变量 `RECONCILER__*`
/// -> 直接环境变量 `SERVER_HOST` / `SERVER_PORT` / `DATABASE_URL`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 文档库后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 会话默认租户
    pub tenant: String,
    pub backend: Backend,
    /// 批量写入每批条数
    pub bulk_chunk_size: usize,
    /// 单条语句超时
    pub write_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/procurement".to_string(),
                max_connections: 20,
            },
            engine: EngineConfig {
                tenant: "default".to_string(),
                backend: Backend::Memory,
                bulk_chunk_size: 1000,
                write_timeout_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// 按默认值、配置文件、环境变量依次覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let d = Self::default();
        let mut builder = Config::builder()
            .set_default("server.host", d.server.host)?
            .set_default("server.port", d.server.port as i64)?
            .set_default("database.url", d.database.url)?
            .set_default("database.max_connections", d.database.max_connections as i64)?
            .set_default("engine.tenant", d.engine.tenant)?
            .set_default("engine.backend", "memory")?
            .set_default("engine.bulk_chunk_size", d.engine.bulk_chunk_size as i64)?
            .set_default("engine.write_timeout_secs", d.engine.write_timeout_secs as i64)?
            .add_source(File::with_name("reconciler").required(false))
            .add_source(Environment::with_prefix("RECONCILER").separator("__"));

        if let Ok(host) = std::env::var("SERVER_HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Some(port) = std::env::var("SERVER_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
            builder = builder.set_override("server.port", port as i64)?;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        builder.build()?.try_deserialize()
    }

    /// 从环境变量加载配置, 失败时回退到默认值
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("配置加载失败, 使用默认值: {}", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bulk_write_limits() {
        let config = AppConfig::default();
        assert_eq!(config.engine.bulk_chunk_size, 1000);
        assert_eq!(config.engine.write_timeout_secs, 30);
        assert_eq!(config.engine.backend, Backend::Memory);
    }

    #[test]
    fn backend_names_deserialize_lowercase() {
        let backend: Backend = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(backend, Backend::Postgres);
    }
}
