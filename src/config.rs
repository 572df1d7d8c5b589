use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::database::DbPool;
use crate::integrations::tool_servers::{
    HttpToolServerFetcher, ToolServerCache, ToolServerConnection, ToolServerFetcher,
};
use crate::integrations::toolkits::{ArcadeClient, ToolkitBroker, ToolkitConfig, ToolkitMetadata};
use crate::plugin::{ManifestLoader, ModuleCache, ModuleLoader};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "TOOLS";

// 服务器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// 数据库配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://tools.db".to_string(),
        }
    }
}

// JWT配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "your-secret-key".to_string(),
        }
    }
}

// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Default permission tables, consulted when no group grants a permission.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub user: Value,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            user: json!({"workspace": {"tools": false}}),
        }
    }
}

/// Tool module loading rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Per-tool working directories are created under here.
    pub cache_dir: String,
    /// Host module prefixes a tool may import.
    pub allowed_imports: Vec<String>,
    /// Legacy module prefix -> canonical prefix.
    pub import_rewrites: HashMap<String, String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            cache_dir: "data/cache/tools".to_string(),
            allowed_imports: vec![
                "host.utils".to_string(),
                "host.http".to_string(),
                "host.files".to_string(),
            ],
            import_rewrites: HashMap::from([("utils".to_string(), "host.utils".to_string())]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    pub timeout_secs: u64,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

// 第三方授权代理
#[derive(Debug, Clone, Deserialize)]
pub struct ArcadeConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub log: LogConfig,
    pub permissions: PermissionsConfig,
    pub plugins: PluginConfig,
    pub integrations: IntegrationsConfig,
    pub tool_servers: Vec<ToolServerConnection>,
    pub toolkits: Vec<ToolkitConfig>,
    pub arcade: Option<ArcadeConfig>,
}

impl Config {
    // 从 config.toml 读取配置，环境变量覆盖
    pub fn from_file() -> Result<Self, config::ConfigError> {
        Self::load(CONFIG_FILE)
    }

    /// Reads `path` (optional) and overlays `TOOLS_<SECTION>__<KEY>` environment variables.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// JWT声明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

#[cfg(test)]
impl Claims {
    pub fn new(user_id: &str, expires_hours: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            sub: user_id.to_string(),
            exp: (now + chrono::Duration::hours(expires_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid import rewrite rule: {0}")]
    ImportRule(#[from] regex::Error),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub jwt_secret: String,
    pub loader: Arc<dyn ModuleLoader>,
    pub modules: ModuleCache,
    pub tool_servers: ToolServerCache,
    pub fetcher: Arc<dyn ToolServerFetcher>,
    pub broker: Option<Arc<dyn ToolkitBroker>>,
    pub toolkit_tools: ToolkitMetadata,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Result<Self, StateError> {
        let timeout = Duration::from_secs(config.integrations.timeout_secs);
        let loader = ManifestLoader::new(&config.plugins)?;
        let fetcher = HttpToolServerFetcher::new(timeout)?;
        let broker = match &config.arcade {
            Some(arcade) => Some(Arc::new(ArcadeClient::new(arcade, timeout)?) as Arc<dyn ToolkitBroker>),
            None => None,
        };

        Ok(Self {
            db,
            jwt_secret: config.jwt.secret.clone(),
            config: Arc::new(config),
            loader: Arc::new(loader),
            modules: ModuleCache::new(),
            tool_servers: ToolServerCache::new(),
            fetcher: Arc::new(fetcher),
            broker,
            toolkit_tools: ToolkitMetadata::default(),
        })
    }
}

#[cfg(test)]
impl AppState {
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ToolServerFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn ToolkitBroker>) -> Self {
        self.broker = Some(broker);
        self
    }
}
