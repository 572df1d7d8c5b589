use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use utoipa::ToSchema;

// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
    Pending,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub user_ids: String,
    pub permissions: String,
    pub created_at: i64,
}

// 用户组：成员列表与权限表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub user_ids: Vec<String>,
    pub permissions: Value,
    pub created_at: i64,
}

impl TryFrom<GroupRow> for Group {
    type Error = serde_json::Error;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            user_ids: serde_json::from_str(&row.user_ids)?,
            permissions: serde_json::from_str(&row.permissions)?,
            created_at: row.created_at,
        })
    }
}

/// Read or write side of an access-control list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AccessGrant {
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

/// Explicit allow-list. A missing list (`None` on the record) means public read,
/// owner and admin write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AccessControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<AccessGrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<AccessGrant>,
}

impl AccessControl {
    pub fn grant(&self, mode: AccessMode) -> Option<&AccessGrant> {
        match mode {
            AccessMode::Read => self.read.as_ref(),
            AccessMode::Write => self.write.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMeta {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolMeta {
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }
}

// 数据库中的工具记录，JSON 列以文本存储
#[derive(Debug, Clone, FromRow)]
pub struct ToolRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub content: String,
    pub specs: String,
    pub meta: String,
    pub access_control: Option<String>,
    pub updated_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ToolOwnerRow {
    #[sqlx(flatten)]
    pub tool: ToolRow,
    pub owner_name: Option<String>,
    pub owner_email: Option<String>,
    pub owner_role: Option<UserRole>,
}

/// Persisted tool, returned in full by export, get and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub content: String,
    #[schema(value_type = Vec<Object>)]
    pub specs: Vec<Value>,
    #[schema(value_type = Object)]
    pub meta: ToolMeta,
    pub access_control: Option<AccessControl>,
    pub updated_at: i64,
    pub created_at: i64,
}

impl TryFrom<ToolRow> for ToolRecord {
    type Error = serde_json::Error;

    fn try_from(row: ToolRow) -> Result<Self, Self::Error> {
        let access_control = match row.access_control.as_deref() {
            None | Some("null") => None,
            Some(raw) => Some(serde_json::from_str(raw)?),
        };
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            content: row.content,
            specs: serde_json::from_str(&row.specs)?,
            meta: serde_json::from_str(&row.meta)?,
            access_control,
            updated_at: row.updated_at,
            created_at: row.created_at,
        })
    }
}

// 创建/更新工具请求
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ToolForm {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub meta: ToolMeta,
    #[serde(default)]
    pub access_control: Option<AccessControl>,
}

// 更新时写入的字段
#[derive(Debug, Clone)]
pub struct ToolPatch {
    pub name: String,
    pub content: String,
    pub meta: ToolMeta,
    pub access_control: Option<AccessControl>,
    pub specs: Vec<Value>,
}

// 创建成功后返回，不含源码
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ToolResponse {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub meta: ToolMeta,
    pub access_control: Option<AccessControl>,
    pub updated_at: i64,
    pub created_at: i64,
}

impl From<ToolRecord> for ToolResponse {
    fn from(tool: ToolRecord) -> Self {
        Self {
            id: tool.id,
            user_id: tool.user_id,
            name: tool.name,
            meta: tool.meta,
            access_control: tool.access_control,
            updated_at: tool.updated_at,
            created_at: tool.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolOwner {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

// 工具目录条目：本地工具、远程工具服务器、第三方工具包
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolUserResponse {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[schema(value_type = Object)]
    pub meta: ToolMeta,
    pub access_control: Option<AccessControl>,
    pub updated_at: i64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ToolOwner>,
}

impl TryFrom<ToolOwnerRow> for ToolUserResponse {
    type Error = serde_json::Error;

    fn try_from(row: ToolOwnerRow) -> Result<Self, Self::Error> {
        let user = match (row.owner_name, row.owner_email, row.owner_role) {
            (Some(name), Some(email), Some(role)) => Some(ToolOwner {
                id: row.tool.user_id.clone(),
                name,
                email,
                role,
            }),
            _ => None,
        };
        let tool = ToolRecord::try_from(row.tool)?;
        Ok(Self {
            id: tool.id,
            user_id: tool.user_id,
            name: tool.name,
            meta: tool.meta,
            access_control: tool.access_control,
            updated_at: tool.updated_at,
            created_at: tool.created_at,
            user,
        })
    }
}
