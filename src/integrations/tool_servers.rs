use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::{join_url, IntegrationError};
use crate::models::AccessControl;

fn default_path() -> String {
    "openapi.json".to_string()
}

fn default_auth_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolServerSettings {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub access_control: Option<AccessControl>,
}

/// A configured remote tool server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConnection {
    pub url: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub config: ToolServerSettings,
}

impl ToolServerConnection {
    pub fn openapi_url(&self) -> String {
        join_url(&self.url, &self.path)
    }

    pub fn bearer_token(&self) -> Option<String> {
        if self.auth_type == "bearer" && !self.key.is_empty() {
            Some(self.key.clone())
        } else {
            None
        }
    }
}

/// A fetched tool server. `access_control` is captured from the connection when
/// the document was fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteToolServer {
    pub idx: usize,
    pub url: String,
    pub openapi: Value,
    pub specs: Vec<Value>,
    pub access_control: Option<AccessControl>,
}

impl RemoteToolServer {
    pub fn title(&self) -> String {
        self.openapi
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or("Tool Server")
            .to_string()
    }

    pub fn description(&self) -> String {
        self.openapi
            .pointer("/info/description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolServerFetcher: Send + Sync {
    async fn fetch_openapi(&self, url: &str, token: Option<String>) -> Result<Value, IntegrationError>;
}

pub struct HttpToolServerFetcher {
    client: reqwest::Client,
}

impl HttpToolServerFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ToolServerFetcher for HttpToolServerFetcher {
    async fn fetch_openapi(&self, url: &str, token: Option<String>) -> Result<Value, IntegrationError> {
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IntegrationError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let document: Value = response.json().await?;
        if !document.is_object() {
            return Err(IntegrationError::InvalidResponse(format!(
                "{} did not return an OpenAPI object",
                url
            )));
        }
        Ok(document)
    }
}

// 解析一层 #/components/schemas 引用
fn resolve_ref<'a>(openapi: &'a Value, schema: &'a Value) -> &'a Value {
    let Some(reference) = schema.get("$ref").and_then(Value::as_str) else {
        return schema;
    };
    reference
        .strip_prefix("#/components/schemas/")
        .and_then(|name| openapi.pointer(&format!("/components/schemas/{}", name)))
        .unwrap_or(schema)
}

const METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// Converts every OpenAPI operation that carries an `operationId` into a tool spec.
pub fn openapi_to_tool_specs(openapi: &Value) -> Vec<Value> {
    let Some(paths) = openapi.get("paths").and_then(Value::as_object) else {
        return vec![];
    };

    let mut specs = Vec::new();
    for item in paths.values() {
        for method in METHODS {
            let Some(operation) = item.get(method) else {
                continue;
            };
            let Some(name) = operation.get("operationId").and_then(Value::as_str) else {
                continue;
            };

            let description = operation
                .get("description")
                .or_else(|| operation.get("summary"))
                .and_then(Value::as_str)
                .unwrap_or(name);

            let mut properties = Map::new();
            let mut required: Vec<Value> = Vec::new();

            for param in operation
                .get("parameters")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let location = param.get("in").and_then(Value::as_str);
                if !matches!(location, Some("query") | Some("path")) {
                    continue;
                }
                let Some(param_name) = param.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let schema = param.get("schema").map(|s| resolve_ref(openapi, s));
                let mut property = json!({
                    "type": schema.and_then(|s| s.get("type")).cloned().unwrap_or(json!("string")),
                });
                if let Some(text) = param.get("description") {
                    property["description"] = text.clone();
                }
                properties.insert(param_name.to_string(), property);
                if param.get("required").and_then(Value::as_bool) == Some(true) {
                    required.push(json!(param_name));
                }
            }

            if let Some(schema) = operation.pointer("/requestBody/content/application~1json/schema") {
                let schema = resolve_ref(openapi, schema);
                if let Some(body) = schema.get("properties").and_then(Value::as_object) {
                    for (key, value) in body {
                        properties.insert(key.clone(), value.clone());
                    }
                }
                if let Some(body_required) = schema.get("required").and_then(Value::as_array) {
                    required.extend(body_required.iter().cloned());
                }
            }

            specs.push(json!({
                "name": name,
                "description": description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }));
        }
    }
    specs
}

/// Fetches every enabled connection concurrently. Failed servers are omitted.
pub async fn fetch_all(
    fetcher: &dyn ToolServerFetcher,
    connections: &[ToolServerConnection],
) -> Vec<RemoteToolServer> {
    let fetches = connections
        .iter()
        .enumerate()
        .filter(|(_, connection)| connection.config.enable)
        .map(|(idx, connection)| async move {
            let url = connection.openapi_url();
            match fetcher.fetch_openapi(&url, connection.bearer_token()).await {
                Ok(openapi) => Some(RemoteToolServer {
                    idx,
                    url: connection.url.clone(),
                    specs: openapi_to_tool_specs(&openapi),
                    openapi,
                    access_control: connection.config.access_control.clone(),
                }),
                Err(e) => {
                    warn!("Failed to fetch tool server {} ({}): {}", idx, url, e);
                    None
                }
            }
        });

    join_all(fetches).await.into_iter().flatten().collect()
}

/// Process-wide remote tool server list, populated once on first use.
#[derive(Debug, Clone, Default)]
pub struct ToolServerCache {
    servers: Arc<RwLock<Option<Arc<Vec<RemoteToolServer>>>>>,
    populate: Arc<Mutex<()>>,
}

impl ToolServerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Arc<Vec<RemoteToolServer>>> {
        self.servers.read().await.clone()
    }

    pub async fn get_or_populate(
        &self,
        fetcher: &dyn ToolServerFetcher,
        connections: &[ToolServerConnection],
    ) -> Arc<Vec<RemoteToolServer>> {
        if let Some(servers) = self.get().await {
            return servers;
        }

        let _guard = self.populate.lock().await;
        // 等待锁期间可能已被其他请求填充
        if let Some(servers) = self.get().await {
            return servers;
        }

        let servers = Arc::new(fetch_all(fetcher, connections).await);
        info!("Cached {} remote tool servers", servers.len());
        *self.servers.write().await = Some(servers.clone());
        servers
    }
}
