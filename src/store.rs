use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::access_control::AccessChecker;
use crate::database::DbPool;
use crate::models::{
    AccessMode, ToolForm, ToolOwnerRow, ToolPatch, ToolRecord, ToolRow, ToolUserResponse,
};
use crate::utils::{unix_now, AppError};

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| {
        error!("failed to encode column: {}", e);
        AppError::InternalServerError
    })
}

fn decode_record(row: ToolRow) -> Result<ToolRecord, AppError> {
    let id = row.id.clone();
    ToolRecord::try_from(row).map_err(|e| {
        error!("malformed tool record {}: {}", id, e);
        AppError::DatabaseError
    })
}

fn decode_valves(raw: Option<String>) -> Result<Map<String, Value>, AppError> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Ok(Map::new()),
            Err(e) => {
                error!("malformed valves column: {}", e);
                Err(AppError::DatabaseError)
            }
        },
    }
}

const OWNER_SELECT: &str = r#"
    SELECT t.id, t.user_id, t.name, t.content, t.specs, t.meta, t.access_control,
           t.updated_at, t.created_at,
           u.name AS owner_name, u.email AS owner_email, u.role AS owner_role
    FROM tools t
    LEFT JOIN users u ON u.id = t.user_id
    ORDER BY t.updated_at DESC
"#;

const TOOL_COLUMNS: &str =
    "id, user_id, name, content, specs, meta, access_control, updated_at, created_at";

/// Persistence for tool records and their valves.
#[derive(Debug, Clone)]
pub struct ToolStore {
    db: DbPool,
}

impl ToolStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    // 所有工具及其所有者信息，按更新时间倒序
    pub async fn get_all_with_owner(&self) -> Result<Vec<ToolUserResponse>, AppError> {
        let rows = sqlx::query_as::<_, ToolOwnerRow>(OWNER_SELECT)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter()
            .map(|row| {
                let id = row.tool.id.clone();
                ToolUserResponse::try_from(row).map_err(|e| {
                    error!("malformed tool record {}: {}", id, e);
                    AppError::DatabaseError
                })
            })
            .collect()
    }

    pub async fn get_all(&self) -> Result<Vec<ToolRecord>, AppError> {
        let rows = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {} FROM tools ORDER BY updated_at DESC",
            TOOL_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(decode_record).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ToolRecord>, AppError> {
        let row = sqlx::query_as::<_, ToolRow>(&format!(
            "SELECT {} FROM tools WHERE id = ?",
            TOOL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(decode_record).transpose()
    }

    /// Records the user owns or that `mode` grants them through the access list.
    pub async fn get_by_user(
        &self,
        user_id: &str,
        mode: AccessMode,
        checker: &AccessChecker,
    ) -> Result<Vec<ToolUserResponse>, AppError> {
        let tools = self.get_all_with_owner().await?;
        Ok(tools
            .into_iter()
            .filter(|tool| {
                tool.user_id == user_id || checker.has_access(mode, tool.access_control.as_ref())
            })
            .collect())
    }

    /// Inserts a new record. Returns `None` when the id is already taken.
    pub async fn insert(
        &self,
        user_id: &str,
        form: &ToolForm,
        specs: &[Value],
    ) -> Result<Option<ToolRecord>, AppError> {
        let now = unix_now();
        let record = ToolRecord {
            id: form.id.clone(),
            user_id: user_id.to_string(),
            name: form.name.clone(),
            content: form.content.clone(),
            specs: specs.to_vec(),
            meta: form.meta.clone(),
            access_control: form.access_control.clone(),
            updated_at: now,
            created_at: now,
        };

        let access_control = match &record.access_control {
            Some(ac) => Some(to_json(ac)?),
            None => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO tools (id, user_id, name, content, specs, meta, access_control, updated_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.name)
        .bind(&record.content)
        .bind(to_json(&record.specs)?)
        .bind(to_json(&record.meta)?)
        .bind(access_control)
        .bind(record.updated_at)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Tool id {} already taken", record.id);
            return Ok(None);
        }
        debug!("Inserted tool {}", record.id);
        Ok(Some(record))
    }

    pub async fn update(&self, id: &str, patch: &ToolPatch) -> Result<Option<ToolRecord>, AppError> {
        let access_control = match &patch.access_control {
            Some(ac) => Some(to_json(ac)?),
            None => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE tools
            SET name = ?, content = ?, meta = ?, access_control = ?, specs = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&patch.name)
        .bind(&patch.content)
        .bind(to_json(&patch.meta)?)
        .bind(access_control)
        .bind(to_json(&patch.specs)?)
        .bind(unix_now())
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM tools WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_valves(&self, id: &str) -> Result<Option<Map<String, Value>>, AppError> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT valves FROM tools WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|(raw,)| decode_valves(raw)).transpose()
    }

    pub async fn update_valves(
        &self,
        id: &str,
        valves: &Map<String, Value>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE tools SET valves = ?, updated_at = ? WHERE id = ?")
            .bind(to_json(valves)?)
            .bind(unix_now())
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_user_valves(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Map<String, Value>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT valves FROM tool_user_valves WHERE tool_id = ? AND user_id = ?")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;

        decode_valves(row.map(|(raw,)| raw))
    }

    pub async fn update_user_valves(
        &self,
        id: &str,
        user_id: &str,
        valves: &Map<String, Value>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tool_user_valves (tool_id, user_id, valves, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (tool_id, user_id) DO UPDATE SET valves = excluded.valves, updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(to_json(valves)?)
        .bind(unix_now())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessControl, AccessGrant, ToolMeta, UserRole};
    use crate::utils_tests::{create_test_app_state, seed_user};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use serial_test::serial;

    fn form(id: &str) -> ToolForm {
        ToolForm {
            id: id.to_string(),
            name: id.to_uppercase(),
            content: r#"{"functions": []}"#.to_string(),
            meta: ToolMeta::with_description("test tool"),
            access_control: None,
        }
    }

    async fn store() -> ToolStore {
        let state = create_test_app_state().await;
        seed_user(&state.db, "u1", UserRole::User).await;
        ToolStore::new(state.db)
    }

    #[tokio::test]
    #[serial]
    async fn test_insert_and_get_by_id() {
        let store = store().await;
        let specs = vec![json!({"name": "add"})];

        let inserted = store.insert("u1", &form("calc"), &specs).await.unwrap().unwrap();
        let fetched = store.get_by_id("calc").await.unwrap().unwrap();

        assert_eq!(inserted, fetched);
        assert_eq!(fetched.specs, specs);
        assert!(store.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_duplicate_insert_keeps_first() {
        let store = store().await;
        store.insert("u1", &form("calc"), &[]).await.unwrap();

        let mut other = form("calc");
        other.name = "Other".to_string();
        assert!(store.insert("ghost", &other, &[]).await.unwrap().is_none());

        let stored = store.get_by_id("calc").await.unwrap().unwrap();
        assert_eq!(stored.user_id, "u1");
        assert_eq!(stored.name, "CALC");
    }

    #[tokio::test]
    #[serial]
    async fn test_get_all_with_owner_joins_user() {
        let store = store().await;
        store.insert("u1", &form("calc"), &[]).await.unwrap();
        store.insert("ghost", &form("orphan"), &[]).await.unwrap();

        let tools = store.get_all_with_owner().await.unwrap();
        assert_eq!(tools.len(), 2);

        let calc = tools.iter().find(|t| t.id == "calc").unwrap();
        assert_eq!(calc.user.as_ref().unwrap().email, "u1@test.com");
        let orphan = tools.iter().find(|t| t.id == "orphan").unwrap();
        assert!(orphan.user.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_get_by_user_write_mode() {
        let store = store().await;
        store.insert("u1", &form("mine"), &[]).await.unwrap();

        let mut shared = form("shared");
        shared.access_control = Some(AccessControl {
            read: None,
            write: Some(AccessGrant {
                user_ids: vec!["u2".to_string()],
                group_ids: vec![],
            }),
        });
        store.insert("u1", &shared, &[]).await.unwrap();
        store.insert("u1", &form("public"), &[]).await.unwrap();

        let checker = AccessChecker::load(&store.db, "u2").await.unwrap();
        let writable = store.get_by_user("u2", AccessMode::Write, &checker).await.unwrap();
        let ids: Vec<_> = writable.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["shared"]);

        let readable = store.get_by_user("u2", AccessMode::Read, &checker).await.unwrap();
        assert_eq!(readable.len(), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_update_and_delete() {
        let store = store().await;
        store.insert("u1", &form("calc"), &[]).await.unwrap();

        let patch = ToolPatch {
            name: "Calculator".to_string(),
            content: r#"{"functions": [{"name": "add"}]}"#.to_string(),
            meta: ToolMeta::with_description("updated"),
            access_control: None,
            specs: vec![json!({"name": "add"})],
        };
        let updated = store.update("calc", &patch).await.unwrap().unwrap();
        assert_eq!(updated.name, "Calculator");
        assert_eq!(updated.specs.len(), 1);
        assert!(store.update("missing", &patch).await.unwrap().is_none());

        assert!(store.delete("calc").await.unwrap());
        assert!(store.get_by_id("calc").await.unwrap().is_none());
        assert!(!store.delete("calc").await.unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn test_valves_default_to_empty() {
        let store = store().await;
        store.insert("u1", &form("calc"), &[]).await.unwrap();

        assert_eq!(store.get_valves("calc").await.unwrap(), Some(Map::new()));
        assert_eq!(store.get_valves("missing").await.unwrap(), None);
        assert!(store.get_user_valves("calc", "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_user_valves_upsert_and_cascade() {
        let store = store().await;
        store.insert("u1", &form("calc"), &[]).await.unwrap();

        let first = json!({"units": "metric"}).as_object().cloned().unwrap();
        let second = json!({"units": "imperial"}).as_object().cloned().unwrap();
        store.update_user_valves("calc", "u1", &first).await.unwrap();
        store.update_user_valves("calc", "u1", &second).await.unwrap();
        assert_eq!(store.get_user_valves("calc", "u1").await.unwrap(), second);

        store.delete("calc").await.unwrap();
        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tool_user_valves")
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
