use std::collections::BTreeMap;

use serde_json::Value;
use tavern_model::{ModelTool, ToolCallRequest};
use thiserror::Error;

use super::{BoxedToolFuture, Error as ToolError, ToolObject};

const MAX_NAME_LEN: usize = 64;

/// Errors found while validating tools.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is empty, too long or has characters other than ASCII
    /// letters, digits, `_` and `-`.
    #[error("invalid tool name {0:?}")]
    InvalidName(String),
    /// Two tools share a name.
    #[error("tool `{0}` is registered more than once")]
    DuplicateName(String),
    /// The parameter schema doesn't describe a JSON object.
    #[error("parameter schema of tool `{0}` is not an object schema")]
    InvalidSchema(String),
}

/// An immutable set of tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn ToolObject>>,
}

impl ToolRegistry {
    /// Validates `tools` and builds a registry from them.
    pub fn new(tools: Vec<Box<dyn ToolObject>>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for tool in tools {
            let name = tool.name().to_owned();
            if !is_valid_name(&name) {
                return Err(RegistryError::InvalidName(name));
            }
            if !is_object_schema(tool.parameter_schema()) {
                return Err(RegistryError::InvalidSchema(name));
            }
            if map.contains_key(&name) {
                return Err(RegistryError::DuplicateName(name));
            }
            map.insert(name, tool);
        }
        Ok(Self { tools: map })
    }

    /// Returns the tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .values()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Returns `true` if `name` is a registered return-direct tool.
    #[inline]
    pub fn is_return_direct(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|tool| tool.return_direct())
    }

    /// Returns the names of all tools, sorted.
    #[inline]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if there are no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes a tool call request from the model.
    ///
    /// An unknown tool resolves to a [`ToolError::not_found`] error.
    pub fn execute(&self, req: &ToolCallRequest) -> BoxedToolFuture {
        let Some(tool) = self.tools.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            let err = ToolError::not_found()
                .with_reason(format!("no tool named `{}`", req.name));
            return Box::pin(std::future::ready(Err(err)));
        };
        trace!("executing tool ({}) with args: {:?}", req.id, req.arguments);
        tool.execute(req.arguments.clone())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_object_schema(schema: &Value) -> bool {
    let Some(schema) = schema.as_object() else {
        return false;
    };
    match schema.get("type") {
        Some(ty) => ty == "object",
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::tool::{AnyTool, Tool, ToolResult};

    struct NamedTool {
        name: &'static str,
        schema: Value,
        return_direct: bool,
    }

    impl NamedTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                schema: json!({ "type": "object", "properties": {} }),
                return_direct: false,
            }
        }
    }

    impl Tool for NamedTool {
        type Input = Value;

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "A test tool."
        }

        fn parameter_schema(&self) -> &Value {
            &self.schema
        }

        fn return_direct(&self) -> bool {
            self.return_direct
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            std::future::ready(Ok("done".to_owned()))
        }
    }

    #[test]
    fn test_definitions_sorted() {
        let mut direct = NamedTool::new("suggest_choices");
        direct.return_direct = true;
        let registry = ToolRegistry::new(vec![
            AnyTool::boxed(NamedTool::new("roll_a_skill")),
            AnyTool::boxed(direct),
            AnyTool::boxed(NamedTool::new("roll_a_dice")),
        ])
        .unwrap();

        let names: Vec<_> =
            registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["roll_a_dice", "roll_a_skill", "suggest_choices"]);
        assert!(registry.is_return_direct("suggest_choices"));
        assert!(!registry.is_return_direct("roll_a_dice"));
        assert!(!registry.is_return_direct("missing"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = ToolRegistry::new(vec![
            AnyTool::boxed(NamedTool::new("roll_a_dice")),
            AnyTool::boxed(NamedTool::new("roll_a_dice")),
        ]);
        assert_eq!(
            result.err(),
            Some(RegistryError::DuplicateName("roll_a_dice".to_owned()))
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        for name in ["", "roll a dice", "dé"] {
            let result =
                ToolRegistry::new(vec![AnyTool::boxed(NamedTool::new(name))]);
            assert!(
                matches!(result, Err(RegistryError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        let long = "x".repeat(65).leak();
        let result = ToolRegistry::new(vec![AnyTool::boxed(NamedTool::new(long))]);
        assert!(matches!(result, Err(RegistryError::InvalidName(_))));
    }

    #[test]
    fn test_non_object_schema_rejected() {
        let mut tool = NamedTool::new("roll_a_dice");
        tool.schema = json!({ "type": "string" });
        let result = ToolRegistry::new(vec![AnyTool::boxed(tool)]);
        assert_eq!(
            result.err(),
            Some(RegistryError::InvalidSchema("roll_a_dice".to_owned()))
        );
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::default();
        let err = registry
            .execute(&ToolCallRequest {
                id: "call_1".to_owned(),
                name: "cast_fireball".to_owned(),
                arguments: json!({}),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::tool::ErrorKind::NotFound);
        assert!(err.reason().contains("cast_fireball"));
    }
}
