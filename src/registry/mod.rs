//! Tool registry — name-keyed lookup table of available tools.
//!
//! Populated once before a flow executes, then only read from during a run.
//! Re-registering a name replaces the previous instance (latest wins), the
//! same semantics as the original Python `ToolRegistry.register_tool`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::tools::Tool;

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under `name`, overwriting any prior registration.
    pub async fn register(&self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        info!(tool = %name, "registered tool");
        self.tools.write().await.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Name → description, for diagnostics and the CLI's listing output.
    pub async fn list(&self) -> HashMap<String, String> {
        self.tools
            .read()
            .await
            .iter()
            .map(|(name, tool)| (name.clone(), tool.description().to_string()))
            .collect()
    }
}
