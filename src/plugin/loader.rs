use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use super::{
    content_digest, extract_frontmatter, FunctionDef, LoadError, ToolModule, ValvesSchema,
};
use crate::config::PluginConfig;
use crate::utils::is_valid_tool_id;

/// Loads tool source into a [`ToolModule`].
pub trait ModuleLoader: Send + Sync {
    /// Rewrites legacy host module references to their canonical names.
    fn rewrite_imports(&self, content: &str) -> String;

    /// Compiles `content` for tool `id`, returning the module and its front-matter manifest.
    fn load_module(&self, id: &str, content: &str)
        -> Result<(ToolModule, Map<String, Value>), LoadError>;
}

#[derive(Debug, Deserialize)]
struct ModuleBody {
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    functions: Vec<FunctionDef>,
    #[serde(default)]
    valves: Option<Value>,
    #[serde(default)]
    user_valves: Option<Value>,
}

/// Loader for declarative tool modules: a front-matter block followed by a
/// JSON body listing imports, functions and configuration schemas.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    allowed_imports: Vec<String>,
    rewrites: Vec<(Regex, String)>,
}

impl ManifestLoader {
    pub fn new(config: &PluginConfig) -> Result<Self, regex::Error> {
        let mut rewrites = Vec::with_capacity(config.import_rewrites.len());
        let mut legacy: Vec<_> = config.import_rewrites.iter().collect();
        legacy.sort();
        for (from, to) in legacy {
            let pattern = Regex::new(&format!(
                r#""{}((?:\.[A-Za-z0-9_]+)*)""#,
                regex::escape(from)
            ))?;
            rewrites.push((pattern, format!("\"{}${{1}}\"", to)));
        }

        Ok(Self {
            allowed_imports: config.allowed_imports.clone(),
            rewrites,
        })
    }

    fn check_import(&self, import: &str) -> Result<(), LoadError> {
        let allowed = self.allowed_imports.iter().any(|prefix| {
            import == prefix || import.starts_with(&format!("{}.", prefix))
        });
        if allowed {
            Ok(())
        } else {
            Err(LoadError::ForbiddenImport(import.to_string()))
        }
    }
}

fn check_functions(functions: &[FunctionDef]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for function in functions {
        if !is_valid_tool_id(&function.name) {
            return Err(LoadError::InvalidFunction(format!(
                "'{}' is not a valid function name",
                function.name
            )));
        }
        if !seen.insert(function.name.as_str()) {
            return Err(LoadError::InvalidFunction(format!(
                "'{}' is declared more than once",
                function.name
            )));
        }
        for param in &function.required {
            if !function.parameters.contains_key(param) {
                return Err(LoadError::InvalidFunction(format!(
                    "'{}' requires undeclared parameter '{}'",
                    function.name, param
                )));
            }
        }
    }
    Ok(())
}

impl ModuleLoader for ManifestLoader {
    fn rewrite_imports(&self, content: &str) -> String {
        let mut rewritten = content.to_string();
        for (pattern, replacement) in &self.rewrites {
            rewritten = pattern
                .replace_all(&rewritten, replacement.as_str())
                .into_owned();
        }
        rewritten
    }

    fn load_module(
        &self,
        id: &str,
        content: &str,
    ) -> Result<(ToolModule, Map<String, Value>), LoadError> {
        let (frontmatter, body) = extract_frontmatter(content)?;
        if body.trim().is_empty() {
            return Err(LoadError::EmptyModule);
        }

        let body: ModuleBody =
            serde_json::from_str(body).map_err(|e| LoadError::Syntax(e.to_string()))?;

        for import in &body.imports {
            self.check_import(import)?;
        }
        check_functions(&body.functions)?;

        let valves = body
            .valves
            .map(|schema| ValvesSchema::new("valves", schema))
            .transpose()?;
        let user_valves = body
            .user_valves
            .map(|schema| ValvesSchema::new("user_valves", schema))
            .transpose()?;

        debug!("Loaded tool module {} with {} functions", id, body.functions.len());

        let module = ToolModule {
            id: id.to_string(),
            imports: body.imports,
            functions: body.functions,
            valves,
            user_valves,
            digest: content_digest(content),
        };
        Ok((module, frontmatter))
    }
}
