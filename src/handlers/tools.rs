use axum::{
    extract::{Path, State},
    middleware,
    response::Json,
    routing::{delete, get, post},
    Extension, Router,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::access_control::{has_permission, AccessChecker};
use crate::auth::{auth_middleware, AuthUser};
use crate::catalog::list_tools_for_user;
use crate::config::AppState;
use crate::models::{AccessMode, ToolForm, ToolPatch, ToolRecord, ToolResponse, ToolUserResponse};
use crate::plugin::{derive_specs, ToolModule, ValvesSchema};
use crate::store::ToolStore;
use crate::utils::{is_valid_tool_id, messages, AppError};

fn store(state: &AppState) -> ToolStore {
    ToolStore::new(state.db.clone())
}

async fn find_tool(state: &AppState, id: &str) -> Result<ToolRecord, AppError> {
    store(state).get_by_id(id).await?.ok_or_else(AppError::not_found)
}

// 所有者、拥有对应授权或管理员
async fn is_permitted(
    state: &AppState,
    user: &AuthUser,
    tool: &ToolRecord,
    mode: AccessMode,
) -> Result<bool, AppError> {
    if user.is_admin() || tool.user_id == user.id {
        return Ok(true);
    }
    let checker = AccessChecker::load(&state.db, &user.id).await?;
    Ok(checker.has_access(mode, tool.access_control.as_ref()))
}

// 改写导入并加载模块，失败统一转为 400
fn load_content(
    state: &AppState,
    id: &str,
    content: &str,
) -> Result<(String, ToolModule, Map<String, Value>), AppError> {
    let content = state.loader.rewrite_imports(content);
    let (module, manifest) = state.loader.load_module(id, &content).map_err(|e| {
        warn!("Failed to load the tool by id {}: {}", id, e);
        AppError::LoadFailure(messages::default_error(e))
    })?;
    Ok((content, module, manifest))
}

async fn cached_module(state: &AppState, tool: &ToolRecord) -> Result<std::sync::Arc<ToolModule>, AppError> {
    state
        .modules
        .get_or_load(state.loader.as_ref(), tool)
        .await
        .map_err(|e| {
            warn!("Failed to load the tool by id {}: {}", tool.id, e);
            AppError::LoadFailure(messages::default_error(e))
        })
}

// 记录在写入前被删除时按不存在处理
async fn save_valves(state: &AppState, id: &str, valves: &Map<String, Value>) -> Result<(), AppError> {
    if store(state).update_valves(id, valves).await? {
        Ok(())
    } else {
        Err(AppError::not_found())
    }
}

fn instantiate(schema: &ValvesSchema, form: Map<String, Value>) -> Result<Map<String, Value>, AppError> {
    schema
        .instantiate(form)
        .map_err(|e| AppError::BadRequest(messages::default_error(e)))
}

// 获取当前用户可见的全部工具
#[utoipa::path(
    get,
    path = "/api/v1/tools",
    tag = "tools",
    summary = "工具目录",
    description = "合并本地工具、远程工具服务器与第三方工具包，按读权限过滤",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "获取成功", body = Vec<ToolUserResponse>),
        (status = 401, description = "未授权访问", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tools(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ToolUserResponse>>, AppError> {
    let tools = list_tools_for_user(&state, &user).await?;
    Ok(Json(tools))
}

// 获取当前用户可编辑的工具
#[utoipa::path(
    get,
    path = "/api/v1/tools/list",
    tag = "tools",
    summary = "可编辑工具列表",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "获取成功", body = Vec<ToolUserResponse>),
        (status = 401, description = "未授权访问", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ToolUserResponse>>, AppError> {
    let store = store(&state);
    let tools = if user.is_admin() {
        store.get_all_with_owner().await?
    } else {
        let checker = AccessChecker::load(&state.db, &user.id).await?;
        store.get_by_user(&user.id, AccessMode::Write, &checker).await?
    };
    Ok(Json(tools))
}

// 导出全部工具（仅管理员）
#[utoipa::path(
    get,
    path = "/api/v1/tools/export",
    tag = "tools",
    summary = "导出工具",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "导出成功", body = Vec<ToolRecord>),
        (status = 401, description = "需要管理员权限", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn export_tools(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ToolRecord>>, AppError> {
    user.require_admin()?;
    let tools = store(&state).get_all().await?;
    Ok(Json(tools))
}

// 注册新工具
#[utoipa::path(
    post,
    path = "/api/v1/tools/create",
    tag = "tools",
    summary = "创建工具",
    description = "校验ID、加载工具源码并生成函数描述后保存",
    request_body = ToolForm,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "创建成功", body = ToolResponse),
        (status = 400, description = "ID不合法、已被占用或源码加载失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "没有创建工具的权限", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn create_tool(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(mut form): Json<ToolForm>,
) -> Result<Json<ToolResponse>, AppError> {
    if !user.is_admin()
        && !has_permission(&state.db, &user.id, "workspace.tools", &state.config.permissions.user)
            .await?
    {
        return Err(AppError::unauthorized());
    }

    if !is_valid_tool_id(&form.id) {
        return Err(AppError::BadRequest(messages::INVALID_ID.to_string()));
    }
    form.id = form.id.to_lowercase();

    let store = store(&state);
    if store.get_by_id(&form.id).await?.is_some() {
        return Err(AppError::BadRequest(messages::ID_TAKEN.to_string()));
    }

    let (content, module, manifest) = load_content(&state, &form.id, &form.content)?;
    form.content = content;
    form.meta.manifest = Some(manifest);
    let specs = derive_specs(&module);

    // 并发创建同一ID时以插入结果为准
    let tool = store
        .insert(&user.id, &form, &specs)
        .await
        .map_err(|e| AppError::BadRequest(messages::default_error(e)))?
        .ok_or_else(|| AppError::BadRequest(messages::ID_TAKEN.to_string()))?;
    state.modules.insert(module).await;

    let cache_dir = PathBuf::from(&state.config.plugins.cache_dir).join(&tool.id);
    if let Err(e) = tokio::fs::create_dir_all(&cache_dir).await {
        warn!("Failed to create cache dir {}: {}", cache_dir.display(), e);
    }

    info!("Tool {} created by {}", tool.id, user.id);
    Ok(Json(tool.into()))
}

// 获取工具详情
#[utoipa::path(
    get,
    path = "/api/v1/tools/id/{id}",
    tag = "tools",
    summary = "工具详情",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "获取成功", body = ToolRecord),
        (status = 401, description = "工具不存在或无读权限", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_by_id(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ToolRecord>, AppError> {
    let tool = find_tool(&state, &id).await?;
    if !is_permitted(&state, &user, &tool, AccessMode::Read).await? {
        return Err(AppError::not_found());
    }
    Ok(Json(tool))
}

// 更新工具源码及元数据
#[utoipa::path(
    post,
    path = "/api/v1/tools/id/{id}/update",
    tag = "tools",
    summary = "更新工具",
    params(("id" = String, Path, description = "工具ID")),
    request_body = ToolForm,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "更新成功", body = ToolRecord),
        (status = 400, description = "源码加载失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "工具不存在或无写权限", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn update_tool_by_id(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(form): Json<ToolForm>,
) -> Result<Json<ToolRecord>, AppError> {
    let tool = find_tool(&state, &id).await?;
    if !is_permitted(&state, &user, &tool, AccessMode::Write).await? {
        return Err(AppError::unauthorized());
    }

    let (content, module, manifest) = load_content(&state, &id, &form.content)?;
    let mut meta = form.meta;
    meta.manifest = Some(manifest);
    let patch = ToolPatch {
        name: form.name,
        content,
        meta,
        access_control: form.access_control,
        specs: derive_specs(&module),
    };

    let updated = store(&state)
        .update(&id, &patch)
        .await?
        .ok_or_else(AppError::not_found)?;
    state.modules.insert(module).await;

    Ok(Json(updated))
}

// 删除工具
#[utoipa::path(
    delete,
    path = "/api/v1/tools/id/{id}/delete",
    tag = "tools",
    summary = "删除工具",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "是否删除", body = bool),
        (status = 401, description = "工具不存在或无写权限", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn delete_tool_by_id(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<bool>, AppError> {
    let tool = find_tool(&state, &id).await?;
    if !is_permitted(&state, &user, &tool, AccessMode::Write).await? {
        return Err(AppError::unauthorized());
    }

    let deleted = store(&state).delete(&id).await?;
    if deleted {
        state.modules.evict(&id).await;
        info!("Tool {} deleted by {}", id, user.id);
    }
    Ok(Json(deleted))
}

// 获取管理员级 valves
#[utoipa::path(
    get,
    path = "/api/v1/tools/id/{id}/valves",
    tag = "valves",
    summary = "获取 valves",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "获取成功", body = serde_json::Value),
        (status = 401, description = "工具不存在", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_valves(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let valves = store(&state)
        .get_valves(&id)
        .await?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(valves))
}

#[utoipa::path(
    get,
    path = "/api/v1/tools/id/{id}/valves/spec",
    tag = "valves",
    summary = "valves 结构",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "JSON Schema，未声明时为 null", body = serde_json::Value),
        (status = 400, description = "源码加载失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "工具不存在", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_valves_spec(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Option<Value>>, AppError> {
    let tool = find_tool(&state, &id).await?;
    let module = cached_module(&state, &tool).await?;
    Ok(Json(module.valves.as_ref().map(|v| v.schema().clone())))
}

// 更新管理员级 valves
#[utoipa::path(
    post,
    path = "/api/v1/tools/id/{id}/valves/update",
    tag = "valves",
    summary = "更新 valves",
    params(("id" = String, Path, description = "工具ID")),
    request_body = serde_json::Value,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "更新后的 valves", body = serde_json::Value),
        (status = 400, description = "无权限或校验失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "工具不存在或未声明 valves", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn update_tool_valves(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(form): Json<Map<String, Value>>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let tool = find_tool(&state, &id).await?;
    if !is_permitted(&state, &user, &tool, AccessMode::Write).await? {
        return Err(AppError::BadRequest(messages::ACCESS_PROHIBITED.to_string()));
    }

    let module = cached_module(&state, &tool).await?;
    let schema = module.valves.as_ref().ok_or_else(AppError::not_found)?;
    let valves = instantiate(schema, form)?;

    save_valves(&state, &id, &valves).await?;
    Ok(Json(valves))
}

// 获取当前用户的 valves
#[utoipa::path(
    get,
    path = "/api/v1/tools/id/{id}/valves/user",
    tag = "valves",
    summary = "获取用户 valves",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "获取成功", body = serde_json::Value),
        (status = 401, description = "工具不存在", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_user_valves(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let tool = find_tool(&state, &id).await?;
    let valves = store(&state).get_user_valves(&tool.id, &user.id).await?;
    Ok(Json(valves))
}

#[utoipa::path(
    get,
    path = "/api/v1/tools/id/{id}/valves/user/spec",
    tag = "valves",
    summary = "用户 valves 结构",
    params(("id" = String, Path, description = "工具ID")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "JSON Schema，未声明时为 null", body = serde_json::Value),
        (status = 400, description = "源码加载失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "工具不存在", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn get_tool_user_valves_spec(
    State(state): State<AppState>,
    Extension(_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Option<Value>>, AppError> {
    let tool = find_tool(&state, &id).await?;
    let module = cached_module(&state, &tool).await?;
    Ok(Json(module.user_valves.as_ref().map(|v| v.schema().clone())))
}

// 更新当前用户的 valves，不校验所有权
#[utoipa::path(
    post,
    path = "/api/v1/tools/id/{id}/valves/user/update",
    tag = "valves",
    summary = "更新用户 valves",
    params(("id" = String, Path, description = "工具ID")),
    request_body = serde_json::Value,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "更新后的用户 valves", body = serde_json::Value),
        (status = 400, description = "校验失败", body = crate::openapi::ErrorResponse),
        (status = 401, description = "工具不存在或未声明用户 valves", body = crate::openapi::ErrorResponse)
    )
)]
pub async fn update_tool_user_valves(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(form): Json<Map<String, Value>>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let tool = find_tool(&state, &id).await?;
    let module = cached_module(&state, &tool).await?;
    let schema = module.user_valves.as_ref().ok_or_else(AppError::not_found)?;
    let valves = instantiate(schema, form)?;

    store(&state)
        .update_user_valves(&tool.id, &user.id, &valves)
        .await?;
    Ok(Json(valves))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_tools))
        .route("/list", get(get_tool_list))
        .route("/export", get(export_tools))
        .route("/create", post(create_tool))
        .route("/id/{id}", get(get_tool_by_id))
        .route("/id/{id}/update", post(update_tool_by_id))
        .route("/id/{id}/delete", delete(delete_tool_by_id))
        .route("/id/{id}/valves", get(get_tool_valves))
        .route("/id/{id}/valves/spec", get(get_tool_valves_spec))
        .route("/id/{id}/valves/update", post(update_tool_valves))
        .route("/id/{id}/valves/user", get(get_tool_user_valves))
        .route("/id/{id}/valves/user/spec", get(get_tool_user_valves_spec))
        .route("/id/{id}/valves/user/update", post(update_tool_user_valves))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
