use crate::ai_sdk::ToolDefinitionApi;
use crate::error::{ChatError, ChatResult};
use crate::search::TavilyClient;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod web_search;

#[cfg(test)]
pub(crate) use web_search::input_schema as web_search_schema;

pub(crate) type ToolFuture = Pin<Box<dyn Future<Output = ChatResult<serde_json::Value>> + Send>>;

type ToolHandler = Arc<dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync>;

pub(crate) struct ToolDefinition {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) input_schema: serde_json::Value,
    pub(crate) handler: ToolHandler,
}

impl ToolDefinition {
    pub(crate) fn new<F>(
        name: &'static str,
        description: &'static str,
        input_schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> ToolFuture + Send + Sync + 'static,
    {
        Self {
            name,
            description,
            input_schema,
            handler: Arc::new(handler),
        }
    }
}

/// Capabilities the model may invoke, keyed by tool name.
#[derive(Default)]
pub(crate) struct ToolRegistry {
    tools: BTreeMap<&'static str, ToolDefinition>,
}

impl ToolRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name, tool);
    }

    pub(crate) fn with(mut self, tool: ToolDefinition) -> Self {
        self.register(tool);
        self
    }

    pub(crate) fn api_definitions(&self) -> Vec<ToolDefinitionApi> {
        self.tools
            .values()
            .map(|t| ToolDefinitionApi {
                name: t.name.to_string(),
                description: t.description.to_string(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    pub(crate) async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> ChatResult<serde_json::Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ChatError::UnknownTool(name.to_string()))?;
        (tool.handler)(input).await
    }
}

pub(crate) fn default_registry(search: Arc<TavilyClient>) -> ToolRegistry {
    ToolRegistry::new().with(web_search::definition(search))
}
