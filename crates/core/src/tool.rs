//! Tool call supports.

mod error;
mod registry;

use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

pub use error::{Error, ErrorKind};
pub use registry::{RegistryError, ToolRegistry};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// A future returned by [`ToolObject::execute`].
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// A tool that can be called by the model.
///
/// The tool can be context-aware, meaning it can access additional
/// information such as a shared embedding client or an API key. To do
/// this, make the context an immutable state of the tool, which can be set
/// during initialization, and clone it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Whether a successful output ends the agent turn and becomes the
    /// final answer verbatim.
    fn return_direct(&self) -> bool {
        false
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// An object-safe view of a [`Tool`], taking raw JSON arguments.
pub trait ToolObject: Send + Sync + 'static {
    /// See [`Tool::name`].
    fn name(&self) -> &str;

    /// See [`Tool::description`].
    fn description(&self) -> &str;

    /// See [`Tool::parameter_schema`].
    fn parameter_schema(&self) -> &Value;

    /// See [`Tool::return_direct`].
    fn return_direct(&self) -> bool;

    /// Decodes `arguments` and executes the tool.
    fn execute(&self, arguments: Value) -> BoxedToolFuture;
}

/// Adapts a [`Tool`] into a [`ToolObject`].
pub struct AnyTool<T: Tool>(pub T);

impl<T: Tool> AnyTool<T> {
    /// Boxes `tool` as a trait object.
    #[inline]
    pub fn boxed(tool: T) -> Box<dyn ToolObject> {
        Box::new(Self(tool))
    }
}

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    #[inline]
    fn return_direct(&self) -> bool {
        self.0.return_direct()
    }

    fn execute(&self, arguments: Value) -> BoxedToolFuture {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        let span = debug_span!("tool execute", tool = self.0.name());
        Box::pin(self.0.execute(input).instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Deserialize)]
    struct ShoutInput {
        text: String,
    }

    struct ShoutTool;

    static SCHEMA: LazyLock<Value> = LazyLock::new(|| {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    });

    impl Tool for ShoutTool {
        type Input = ShoutInput;

        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Shouts the text."
        }

        fn parameter_schema(&self) -> &Value {
            &SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            std::future::ready(Ok(input.text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_execute_decodes_arguments() {
        let tool = AnyTool::boxed(ShoutTool);
        assert!(!tool.return_direct());
        let output = tool.execute(json!({ "text": "hail" })).await.unwrap();
        assert_eq!(output, "HAIL");
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let tool = AnyTool::boxed(ShoutTool);
        let err = tool.execute(json!({ "txt": "hail" })).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.reason().contains("text"), "{}", err.reason());

        let err = tool.execute(Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}
