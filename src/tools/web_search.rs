use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ToolDefinition;
use crate::error::{ChatError, ChatResult};
use crate::search::TavilyClient;

pub(crate) const NAME: &str = "web_search";

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct WebSearchInput {
    #[schemars(description = "Search query")]
    query: String,
}

async fn web_search_impl(
    client: Arc<TavilyClient>,
    input: serde_json::Value,
) -> ChatResult<serde_json::Value> {
    let input: WebSearchInput =
        serde_json::from_value(input).map_err(|e| ChatError::InvalidToolInput {
            tool: NAME.to_string(),
            message: e.to_string(),
        })?;
    client.search(&input.query).await
}

pub(crate) fn input_schema() -> serde_json::Value {
    schema_for!(WebSearchInput).to_value()
}

pub(crate) fn definition(client: Arc<TavilyClient>) -> ToolDefinition {
    ToolDefinition::new(NAME, "Web Search", input_schema(), move |input| {
        Box::pin(web_search_impl(Arc::clone(&client), input))
    })
}
