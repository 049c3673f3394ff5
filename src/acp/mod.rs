//! Agent Client Protocol surface.
//!
//! - `handshake`: [`LifecycleHandler`], the `initialize` / `initialized` /
//!   `shutdown` exchange and the current-session slot.
//! - `tools`: [`ToolProvider`] and the `tools/list` / `tools/call` methods.

pub mod handshake;
pub mod tools;

pub use handshake::{HandshakeOptions, InitializeParams, InitializeResult, LifecycleHandler};
pub use tools::{register_tool_methods, EchoTools, ToolDefinition, ToolProvider, ToolResult};

/// Method names understood by the engine.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake confirmation notification.
    pub const INITIALIZED: &str = "initialized";
    /// Graceful session shutdown.
    pub const SHUTDOWN: &str = "shutdown";
    /// Tool enumeration.
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation.
    pub const TOOLS_CALL: &str = "tools/call";
    /// Server-to-client session update notification.
    pub const SESSION_UPDATE: &str = "session/update";

    /// Methods that manage the session itself and are never tracked as
    /// pending requests.
    #[must_use]
    pub fn is_lifecycle(method: &str) -> bool {
        matches!(method, INITIALIZE | INITIALIZED | SHUTDOWN)
    }
}
