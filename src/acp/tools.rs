//! Tool surface: `tools/list` and `tools/call`.
//!
//! Tools are supplied by a [`ToolProvider`]. Both methods require a healthy
//! session and run under the request's cancellation token, so a timed-out
//! or shut-down request stops the tool as well.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::handshake::LifecycleHandler;
use super::methods;
use crate::dispatch::MethodRouter;
use crate::transport::BoxFuture;
use crate::{AppError, Result};

/// Description of one callable tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the `arguments` object.
    pub input_schema: Value,
}

/// One block of tool output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
}

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Output blocks.
    pub content: Vec<ToolContent>,
    /// Whether the tool itself reported failure.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }
}

/// Source of tools exposed to the client.
pub trait ToolProvider: Send + Sync {
    /// Enumerate available tools.
    fn list_tools<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ToolDefinition>>>;

    /// Run the tool called `name`.
    ///
    /// Implementations return `AppError::NotFound` for unknown names and
    /// `AppError::InvalidParams` for unusable arguments.
    fn execute_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ToolResult>>;
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Register `tools/list` and `tools/call` on `router`.
pub fn register_tool_methods(
    router: &MethodRouter,
    lifecycle: &Arc<LifecycleHandler>,
    provider: Arc<dyn ToolProvider>,
) {
    let list_lifecycle = Arc::clone(lifecycle);
    let list_provider = Arc::clone(&provider);
    router.register_method(methods::TOOLS_LIST, move |_params, cancel| {
        list_tools(Arc::clone(&list_lifecycle), Arc::clone(&list_provider), cancel)
    });

    let call_lifecycle = Arc::clone(lifecycle);
    router.register_method(methods::TOOLS_CALL, move |params, cancel| {
        call_tool(Arc::clone(&call_lifecycle), Arc::clone(&provider), params, cancel)
    });
}

async fn list_tools(
    lifecycle: Arc<LifecycleHandler>,
    provider: Arc<dyn ToolProvider>,
    cancel: CancellationToken,
) -> Result<Value> {
    lifecycle.require_session()?;
    let tools = provider.list_tools(&cancel).await?;
    Ok(json!({ "tools": tools }))
}

async fn call_tool(
    lifecycle: Arc<LifecycleHandler>,
    provider: Arc<dyn ToolProvider>,
    params: Option<Value>,
    cancel: CancellationToken,
) -> Result<Value> {
    let session = lifecycle.require_session()?;
    let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|err| AppError::InvalidParams(format!("invalid tools/call params: {err}")))?;
    debug!(session_id = %session.id(), tool = %params.name, "calling tool");

    let result = provider
        .execute_tool(&params.name, params.arguments, &cancel)
        .await
        .map_err(|err| match err {
            AppError::NotFound(what) => AppError::InvalidParams(format!("unknown tool: {what}")),
            other => other,
        })?;
    Ok(serde_json::to_value(result)?)
}

/// Built-in provider with a single `echo` tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTools;

impl EchoTools {
    const ECHO: &'static str = "echo";

    fn definitions() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: Self::ECHO.into(),
            description: Some("Return the supplied text unchanged.".into()),
            input_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }]
    }
}

impl ToolProvider for EchoTools {
    fn list_tools<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<ToolDefinition>>> {
        Box::pin(async { Ok(Self::definitions()) })
    }

    fn execute_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            if name != Self::ECHO {
                return Err(AppError::NotFound(name.to_owned()));
            }
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let text = arguments
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::InvalidParams("echo requires a string `text`".into()))?;
            Ok(ToolResult::text(text))
        })
    }
}
