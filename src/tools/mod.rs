//! Tool registry and invocation
//!
//! Tools are registered by name and dispatched through a typed handler
//! interface. The invoker validates every request against the calling
//! persona's allowed set and bounds execution with a timeout; tools own
//! no orchestrator state.

mod inventory;

pub use inventory::InventoryLookupTool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::persona::PersonaProfile;

/// A registered tool implementation
///
/// Pure function contract: validated arguments in, structured text result
/// or typed error out.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// One-line usage hint injected into persona prompts
    fn usage(&self) -> &str;

    /// Execute with the given argument object
    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError>;
}

/// Name-keyed tool registry with authorization and timeout enforcement
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry with the given per-call timeout
    #[must_use]
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            tools: HashMap::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Register a tool under its own name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        tracing::debug!(tool = tool.name(), "tool registered");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// (name, usage) pairs for the tools a persona may call
    #[must_use]
    pub fn usage_for(&self, persona: &PersonaProfile) -> Vec<(String, String)> {
        let mut entries: Vec<_> = self
            .tools
            .values()
            .filter(|tool| persona.allows_tool(tool.name()))
            .map(|tool| (tool.name().to_string(), tool.usage().to_string()))
            .collect();
        entries.sort();
        entries
    }

    /// Invoke a tool on behalf of a persona
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the tool is unregistered or not in the
    /// persona's allowed set; `Timeout` when it exceeds the configured
    /// bound; `ExecutionFailed` when the tool itself fails.
    pub async fn invoke(
        &self,
        persona: &PersonaProfile,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<String, ToolError> {
        if !persona.allows_tool(tool_name) {
            tracing::warn!(
                persona = %persona.name,
                tool = tool_name,
                "tool call rejected: not in allowed set"
            );
            return Err(ToolError::Unauthorized(tool_name.to_string()));
        }

        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::Unauthorized(tool_name.to_string()))?;

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(self.timeout, tool.execute(arguments))
            .await
            .map_err(|_| ToolError::Timeout(tool_name.to_string()))?;

        match &result {
            Ok(_) => tracing::info!(
                tool = tool_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool call complete"
            ),
            Err(e) => tracing::warn!(tool = tool_name, error = %e, "tool call failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn usage(&self) -> &str {
            "echo the arguments back"
        }

        async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments.to_string())
        }
    }

    struct StuckTool;

    #[async_trait]
    impl Tool for StuckTool {
        fn name(&self) -> &str {
            "stuck"
        }

        fn usage(&self) -> &str {
            "never returns"
        }

        async fn execute(&self, _arguments: &serde_json::Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn persona_allowing(tools: &[&str]) -> PersonaProfile {
        PersonaProfile {
            name: "tester".to_string(),
            prompt: "p".to_string(),
            activation_phrases: Vec::new(),
            voices: HashMap::new(),
            allowed_tools: tools.iter().map(ToString::to_string).collect(),
            fallback: None,
        }
    }

    #[tokio::test]
    async fn allowed_tool_executes() {
        let mut registry = ToolRegistry::new(5);
        registry.register(Arc::new(EchoTool));
        let persona = persona_allowing(&["echo"]);

        let out = registry
            .invoke(&persona, "echo", &serde_json::json!({"k": "v"}))
            .await
            .unwrap();
        assert_eq!(out, r#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn disallowed_tool_is_unauthorized() {
        let mut registry = ToolRegistry::new(5);
        registry.register(Arc::new(EchoTool));
        let persona = persona_allowing(&[]);

        let err = registry
            .invoke(&persona, "echo", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unregistered_tool_is_unauthorized() {
        let registry = ToolRegistry::new(5);
        let persona = persona_allowing(&["ghost"]);

        let err = registry
            .invoke(&persona, "ghost", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new(1);
        registry.register(Arc::new(StuckTool));
        let persona = persona_allowing(&["stuck"]);

        let err = registry
            .invoke(&persona, "stuck", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[test]
    fn usage_lists_only_allowed_tools() {
        let mut registry = ToolRegistry::new(5);
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(StuckTool));
        let persona = persona_allowing(&["echo"]);

        let usage = registry.usage_for(&persona);
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].0, "echo");
    }
}
