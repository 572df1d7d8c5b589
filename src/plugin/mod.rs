//! Tool modules: loading caller-supplied tool source behind a narrow contract.
//!
//! A loaded module exposes declared functions plus two optional configuration
//! schemas (`valves` for admins, `user_valves` per caller). It never gets access
//! to host state beyond the host imports it is allowed to declare.

pub mod cache;
pub mod frontmatter;
pub mod loader;
pub mod specs;
pub mod valves;

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use cache::ModuleCache;
pub use frontmatter::extract_frontmatter;
pub use loader::{ManifestLoader, ModuleLoader};
pub use specs::derive_specs;
pub use valves::ValvesSchema;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("invalid front-matter: {0}")]
    Frontmatter(String),
    #[error("tool module body is empty")]
    EmptyModule,
    #[error("tool module is not valid: {0}")]
    Syntax(String),
    #[error("import '{0}' is not available to tools")]
    ForbiddenImport(String),
    #[error("invalid function: {0}")]
    InvalidFunction(String),
    #[error("invalid valves: {0}")]
    InvalidValves(String),
}

/// A callable declared by a tool module.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl FunctionDef {
    pub fn is_private(&self) -> bool {
        self.name.starts_with('_')
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolModule {
    pub id: String,
    pub imports: Vec<String>,
    pub functions: Vec<FunctionDef>,
    pub valves: Option<ValvesSchema>,
    pub user_valves: Option<ValvesSchema>,
    /// sha256 of the source the module was loaded from
    pub digest: String,
}

pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
