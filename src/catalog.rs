//! Unified tool listing: local records, remote tool servers and broker toolkits.

use serde_json::{json, Map, Value};
use tracing::warn;

use crate::access_control::AccessChecker;
use crate::auth::AuthUser;
use crate::config::AppState;
use crate::integrations::tool_servers::RemoteToolServer;
use crate::integrations::toolkits::{aggregate_requirement, ToolkitConfig};
use crate::models::{AccessMode, ToolMeta, ToolUserResponse};
use crate::store::ToolStore;
use crate::utils::{unix_now, AppError};

fn synthetic_entry(id: String, name: String, meta: ToolMeta) -> ToolUserResponse {
    let now = unix_now();
    ToolUserResponse {
        user_id: id.clone(),
        id,
        name,
        meta,
        access_control: None,
        updated_at: now,
        created_at: now,
        user: None,
    }
}

fn server_entry(server: &RemoteToolServer) -> ToolUserResponse {
    let mut meta = ToolMeta::with_description(server.description());
    meta.extra.insert("url".to_string(), json!(server.url));
    meta.extra.insert("specs".to_string(), json!(server.specs));

    let mut entry = synthetic_entry(format!("server:{}", server.idx), server.title(), meta);
    entry.access_control = server.access_control.clone();
    entry
}

fn toolkit_entry(idx: usize, toolkit: &ToolkitConfig, auth_completed: bool, auth_url: Option<String>) -> ToolUserResponse {
    let mut extra = Map::new();
    extra.insert("auth_completed".to_string(), json!(auth_completed));
    extra.insert("auth_url".to_string(), auth_url.map(Value::String).unwrap_or(Value::Null));

    synthetic_entry(
        format!("arcade:{}", idx),
        toolkit.toolkit.clone(),
        ToolMeta {
            description: Some(toolkit.description.clone()),
            manifest: None,
            extra,
        },
    )
}

async fn toolkit_entries(state: &AppState, user: &AuthUser) -> Vec<ToolUserResponse> {
    // 先汇总授权需求再释放读锁，授权请求不持锁
    let pending: Vec<_> = {
        let metadata = state.toolkit_tools.read().await;
        state
            .config
            .toolkits
            .iter()
            .enumerate()
            .filter(|(_, toolkit)| toolkit.enabled)
            .map(|(idx, toolkit)| (idx, toolkit, aggregate_requirement(toolkit, &metadata)))
            .collect()
    };

    let mut entries = Vec::new();
    for (idx, toolkit, requirement) in pending {
        let result = match (requirement, &state.broker) {
            (Some(requirement), Some(broker)) => broker.authorize(&requirement, &user.id).await,
            _ => Ok(None),
        };

        match result {
            Ok(Some(auth)) => {
                let completed = auth.is_completed();
                entries.push(toolkit_entry(idx, toolkit, completed, auth.url));
            }
            Ok(None) => entries.push(toolkit_entry(idx, toolkit, true, None)),
            Err(e) => warn!("Authorization check for toolkit {} failed: {}", toolkit.toolkit, e),
        }
    }
    entries
}

/// Every tool the caller may see, in order: local, remote servers, toolkits.
pub async fn list_tools_for_user(
    state: &AppState,
    user: &AuthUser,
) -> Result<Vec<ToolUserResponse>, AppError> {
    let servers = state
        .tool_servers
        .get_or_populate(state.fetcher.as_ref(), &state.config.tool_servers)
        .await;

    let mut tools = ToolStore::new(state.db.clone()).get_all_with_owner().await?;
    tools.extend(servers.iter().map(server_entry));
    tools.extend(toolkit_entries(state, user).await);

    if user.is_admin() {
        return Ok(tools);
    }

    let checker = AccessChecker::load(&state.db, &user.id).await?;
    Ok(tools
        .into_iter()
        .filter(|tool| {
            tool.user_id == user.id || checker.has_access(AccessMode::Read, tool.access_control.as_ref())
        })
        .collect())
}
