use serde_json::Value;
use tracing::warn;

use crate::database::DbPool;
use crate::models::{AccessControl, AccessMode, Group, GroupRow};
use crate::utils::AppError;

/// Decides whether a user (and the groups they belong to) passes an access list.
///
/// `None` is the public default: everyone may read, nobody is granted write
/// through the list (owners and admins are checked by the caller).
pub fn has_access(
    user_id: &str,
    group_ids: &[String],
    mode: AccessMode,
    access_control: Option<&AccessControl>,
) -> bool {
    let Some(access_control) = access_control else {
        return mode == AccessMode::Read;
    };
    let Some(grant) = access_control.grant(mode) else {
        return false;
    };

    grant.user_ids.iter().any(|id| id == user_id)
        || grant.group_ids.iter().any(|id| group_ids.contains(id))
}

// 按点号路径查找权限表中的布尔值，缺失即为 false
fn lookup_permission(table: &Value, key: &str) -> Option<bool> {
    let mut node = table;
    for part in key.split('.') {
        node = node.get(part)?;
    }
    node.as_bool()
}

pub async fn get_groups_by_member(db: &DbPool, user_id: &str) -> Result<Vec<Group>, AppError> {
    // 成员列表不是合法 JSON 的组直接跳过
    let rows = sqlx::query_as::<_, GroupRow>(
        r#"
        SELECT g.* FROM groups g
        WHERE CASE WHEN json_valid(g.user_ids)
            THEN EXISTS (SELECT 1 FROM json_each(g.user_ids) m WHERE m.value = ?)
            ELSE 0 END
        ORDER BY g.created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    let mut groups = Vec::new();
    for row in rows {
        let group_id = row.id.clone();
        match Group::try_from(row) {
            Ok(group) => groups.push(group),
            Err(e) => warn!("Skipping malformed group {}: {}", group_id, e),
        }
    }
    Ok(groups)
}

/// A caller's resolved group memberships, loaded once per request.
#[derive(Debug, Clone)]
pub struct AccessChecker {
    user_id: String,
    groups: Vec<Group>,
}

impl AccessChecker {
    pub async fn load(db: &DbPool, user_id: &str) -> Result<Self, AppError> {
        let groups = get_groups_by_member(db, user_id).await?;
        Ok(Self {
            user_id: user_id.to_string(),
            groups,
        })
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.id.clone()).collect()
    }

    pub fn has_access(&self, mode: AccessMode, access_control: Option<&AccessControl>) -> bool {
        has_access(&self.user_id, &self.group_ids(), mode, access_control)
    }

    /// Any group granting `key` wins; otherwise the default table decides.
    pub fn has_permission(&self, key: &str, default_permissions: &Value) -> bool {
        if self
            .groups
            .iter()
            .any(|group| lookup_permission(&group.permissions, key) == Some(true))
        {
            return true;
        }
        lookup_permission(default_permissions, key).unwrap_or(false)
    }
}

pub async fn has_permission(
    db: &DbPool,
    user_id: &str,
    key: &str,
    default_permissions: &Value,
) -> Result<bool, AppError> {
    let checker = AccessChecker::load(db, user_id).await?;
    Ok(checker.has_permission(key, default_permissions))
}
