use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{join_url, IntegrationError};
use crate::config::ArcadeConfig;

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitTool {
    pub name: String,
}

/// A configured toolkit: a named group of broker tools sharing one authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    pub toolkit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tools: Vec<ToolkitTool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Requirement {
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequirement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Requirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolRequirements {
    #[serde(default)]
    pub authorization: Option<AuthorizationRequirement>,
}

/// Tool metadata as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerTool {
    pub qualified_name: String,
    #[serde(default)]
    pub requirements: Option<ToolRequirements>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl AuthorizationResponse {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

/// Broker tool metadata keyed by qualified name, loaded at startup.
pub type ToolkitMetadata = Arc<RwLock<HashMap<String, BrokerTool>>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolkitBroker: Send + Sync {
    async fn list_tools(&self, toolkit: &str) -> Result<Vec<BrokerTool>, IntegrationError>;

    async fn authorize(
        &self,
        requirement: &AuthorizationRequirement,
        user_id: &str,
    ) -> Result<Option<AuthorizationResponse>, IntegrationError>;
}

#[derive(Debug, Deserialize)]
struct ToolPage {
    #[serde(default)]
    items: Vec<BrokerTool>,
}

/// REST client for the authorization broker.
pub struct ArcadeClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ArcadeClient {
    pub fn new(config: &ArcadeConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, IntegrationError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(IntegrationError::Status {
                url: response.url().to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}

#[async_trait]
impl ToolkitBroker for ArcadeClient {
    async fn list_tools(&self, toolkit: &str) -> Result<Vec<BrokerTool>, IntegrationError> {
        let response = self
            .client
            .get(join_url(&self.base_url, "v1/tools"))
            .query(&[("toolkit", toolkit)])
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let page: ToolPage = Self::check(response).await?.json().await?;
        Ok(page.items)
    }

    async fn authorize(
        &self,
        requirement: &AuthorizationRequirement,
        user_id: &str,
    ) -> Result<Option<AuthorizationResponse>, IntegrationError> {
        let response = self
            .client
            .post(join_url(&self.base_url, "v1/auth/authorize"))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "auth_requirement": requirement,
                "user_id": user_id,
            }))
            .send()
            .await?;

        let result: Option<AuthorizationResponse> = Self::check(response).await?.json().await?;
        Ok(result)
    }
}

/// Merges the authorization requirements of a toolkit's member tools.
///
/// Scopes are unioned; id, provider id and provider type come from the first
/// member that sets them. Returns `None` unless both provider fields were found.
pub fn aggregate_requirement(
    toolkit: &ToolkitConfig,
    metadata: &HashMap<String, BrokerTool>,
) -> Option<AuthorizationRequirement> {
    let mut scopes = BTreeSet::new();
    let mut id = None;
    let mut provider_id = None;
    let mut provider_type = None;

    for member in &toolkit.tools {
        let Some(tool) = metadata.get(&member.name) else {
            warn!("Toolkit {} references unknown tool {}", toolkit.toolkit, member.name);
            continue;
        };
        let Some(auth) = tool
            .requirements
            .as_ref()
            .and_then(|r| r.authorization.as_ref())
        else {
            continue;
        };

        if let Some(oauth2) = &auth.oauth2 {
            scopes.extend(oauth2.scopes.iter().cloned());
        }
        id = id.or_else(|| auth.id.clone().filter(|s| !s.is_empty()));
        provider_id = provider_id.or_else(|| auth.provider_id.clone().filter(|s| !s.is_empty()));
        provider_type = provider_type.or_else(|| auth.provider_type.clone().filter(|s| !s.is_empty()));
    }

    match (provider_id, provider_type) {
        (Some(provider_id), Some(provider_type)) => Some(AuthorizationRequirement {
            id,
            provider_id: Some(provider_id),
            provider_type: Some(provider_type),
            oauth2: Some(OAuth2Requirement {
                scopes: scopes.into_iter().collect(),
            }),
        }),
        _ => None,
    }
}

// 启动时加载已启用工具包的工具元数据，失败只记录日志
pub async fn load_toolkit_metadata(
    broker: &dyn ToolkitBroker,
    toolkits: &[ToolkitConfig],
) -> HashMap<String, BrokerTool> {
    let mut metadata = HashMap::new();
    for toolkit in toolkits.iter().filter(|t| t.enabled) {
        match broker.list_tools(&toolkit.toolkit).await {
            Ok(tools) => {
                info!("Loaded {} tools for toolkit {}", tools.len(), toolkit.toolkit);
                for tool in tools {
                    metadata.insert(tool.qualified_name.clone(), tool);
                }
            }
            Err(e) => warn!("Failed to load toolkit {}: {}", toolkit.toolkit, e),
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn broker_tool(name: &str, provider: Option<(&str, &str)>, scopes: &[&str]) -> BrokerTool {
        BrokerTool {
            qualified_name: name.to_string(),
            requirements: Some(ToolRequirements {
                authorization: Some(AuthorizationRequirement {
                    id: None,
                    provider_id: provider.map(|(id, _)| id.to_string()),
                    provider_type: provider.map(|(_, kind)| kind.to_string()),
                    oauth2: Some(OAuth2Requirement {
                        scopes: scopes.iter().map(|s| s.to_string()).collect(),
                    }),
                }),
            }),
        }
    }

    fn github_toolkit(members: &[&str]) -> ToolkitConfig {
        ToolkitConfig {
            toolkit: "Github".to_string(),
            description: "GitHub tools".to_string(),
            enabled: true,
            tools: members
                .iter()
                .map(|name| ToolkitTool {
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_aggregate_unions_scopes_first_wins() {
        let metadata = HashMap::from([
            (
                "Github.ListRepos".to_string(),
                broker_tool("Github.ListRepos", None, &["repo:read"]),
            ),
            (
                "Github.CreateIssue".to_string(),
                broker_tool("Github.CreateIssue", Some(("github", "oauth2")), &["repo", "repo:read"]),
            ),
            (
                "Github.Star".to_string(),
                broker_tool("Github.Star", Some(("other", "oauth1")), &["star"]),
            ),
        ]);
        let toolkit = github_toolkit(&["Github.ListRepos", "Github.CreateIssue", "Github.Star", "Github.Missing"]);

        let requirement = aggregate_requirement(&toolkit, &metadata).unwrap();
        assert_eq!(requirement.provider_id.as_deref(), Some("github"));
        assert_eq!(requirement.provider_type.as_deref(), Some("oauth2"));
        assert_eq!(requirement.id, None);
        assert_eq!(
            requirement.oauth2.unwrap().scopes,
            vec!["repo".to_string(), "repo:read".to_string(), "star".to_string()]
        );
    }

    #[test]
    fn test_aggregate_without_provider_is_none() {
        let metadata = HashMap::from([(
            "Github.ListRepos".to_string(),
            broker_tool("Github.ListRepos", None, &["repo"]),
        )]);

        assert!(aggregate_requirement(&github_toolkit(&["Github.ListRepos"]), &metadata).is_none());
        assert!(aggregate_requirement(&github_toolkit(&[]), &metadata).is_none());
    }

    #[test]
    fn test_authorization_response_status() {
        let pending: AuthorizationResponse =
            serde_json::from_value(json!({"status": "pending", "url": "https://auth"})).unwrap();
        assert!(!pending.is_completed());
        assert_eq!(pending.url.as_deref(), Some("https://auth"));
    }

    #[tokio::test]
    async fn test_load_metadata_skips_disabled_and_failed() {
        let mut broker = MockToolkitBroker::new();
        broker
            .expect_list_tools()
            .withf(|toolkit| toolkit == "Github")
            .returning(|_| Ok(vec![broker_tool("Github.ListRepos", Some(("github", "oauth2")), &[])]));
        broker
            .expect_list_tools()
            .withf(|toolkit| toolkit == "Slack")
            .returning(|_| Err(IntegrationError::InvalidResponse("down".to_string())));

        let mut disabled = github_toolkit(&[]);
        disabled.toolkit = "Gmail".to_string();
        disabled.enabled = false;
        let mut slack = github_toolkit(&[]);
        slack.toolkit = "Slack".to_string();

        let metadata = load_toolkit_metadata(&broker, &[github_toolkit(&[]), disabled, slack]).await;
        assert_eq!(metadata.len(), 1);
        assert!(metadata.contains_key("Github.ListRepos"));
    }
}
