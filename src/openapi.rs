use serde::{Deserialize, Serialize};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, ToSchema};

use crate::handlers::tools;
use crate::models::{
    AccessControl, AccessGrant, ToolForm, ToolOwner, ToolRecord, ToolResponse, ToolUserResponse,
    UserRole,
};

// 错误响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub detail: String,
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        tools::get_tools,
        tools::get_tool_list,
        tools::export_tools,
        tools::create_tool,
        tools::get_tool_by_id,
        tools::update_tool_by_id,
        tools::delete_tool_by_id,
        tools::get_tool_valves,
        tools::get_tool_valves_spec,
        tools::update_tool_valves,
        tools::get_tool_user_valves,
        tools::get_tool_user_valves_spec,
        tools::update_tool_user_valves,
    ),
    components(schemas(
        ErrorResponse,
        AccessControl,
        AccessGrant,
        ToolForm,
        ToolOwner,
        ToolRecord,
        ToolResponse,
        ToolUserResponse,
        UserRole,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "tools", description = "工具管理"),
        (name = "valves", description = "工具配置")
    ),
    info(
        title = "Tools Server API",
        description = "用户自定义工具的注册、配置与目录聚合",
        version = "0.1.0"
    )
)]
pub struct ApiDoc;
