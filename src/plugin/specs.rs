use serde_json::{json, Value};

use super::ToolModule;

/// Reflects the module's public functions into callable specs.
pub fn derive_specs(module: &ToolModule) -> Vec<Value> {
    module
        .functions
        .iter()
        .filter(|function| !function.is_private())
        .map(|function| {
            json!({
                "name": function.name,
                "description": function.description,
                "parameters": {
                    "type": "object",
                    "properties": function.parameters,
                    "required": function.required,
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::FunctionDef;
    use pretty_assertions::assert_eq;
    use serde_json::Map;

    fn function(name: &str) -> FunctionDef {
        let mut parameters = Map::new();
        parameters.insert("a".to_string(), json!({"type": "number"}));
        FunctionDef {
            name: name.to_string(),
            description: format!("{} numbers", name),
            parameters,
            required: vec!["a".to_string()],
        }
    }

    #[test]
    fn test_derive_specs_skips_private_functions() {
        let module = ToolModule {
            id: "calc".to_string(),
            functions: vec![function("add"), function("_helper")],
            ..Default::default()
        };

        let specs = derive_specs(&module);
        assert_eq!(
            specs,
            vec![json!({
                "name": "add",
                "description": "add numbers",
                "parameters": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}},
                    "required": ["a"]
                }
            })]
        );
    }

    #[test]
    fn test_module_without_functions_has_no_specs() {
        let module = ToolModule::default();
        assert!(derive_specs(&module).is_empty());
    }
}
