use crate::agent::{Agent, AgentConfig};
use crate::ai_sdk::AnthropicClient;
use crate::error::{ChatError, ChatResult};
use crate::search::{SearchConfig, TavilyClient};
use crate::tools::default_registry;
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by every front-end. Each one can come from a flag, the
/// environment, or a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct Config {
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: String,

    #[arg(long, env = "ANTHROPIC_BASE_URL", default_value = "https://api.anthropic.com")]
    pub anthropic_base_url: String,

    #[arg(long, env = "SEEKER_MODEL", default_value = "claude-haiku-4-5-20251001")]
    pub model: String,

    #[arg(long, env = "SEEKER_MAX_TOKENS", default_value_t = 4096)]
    pub max_tokens: u32,

    /// Model calls allowed per turn before giving up.
    #[arg(
        long,
        env = "SEEKER_MAX_ITERATIONS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_iterations: u32,

    /// Enables extended thinking with this token budget.
    #[arg(long, env = "SEEKER_THINKING_BUDGET")]
    pub thinking_budget: Option<u32>,

    /// Longest silence tolerated on the model stream.
    #[arg(long, env = "SEEKER_STREAM_TIMEOUT_SECS", default_value_t = 60)]
    pub stream_timeout_secs: u64,

    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: String,

    #[arg(long, env = "TAVILY_BASE_URL", default_value = "https://api.tavily.com")]
    pub tavily_base_url: String,

    #[arg(long, env = "SEEKER_SEARCH_MAX_RESULTS", default_value_t = 5)]
    pub search_max_results: u32,

    #[arg(long, env = "SEEKER_SEARCH_TIMEOUT_SECS", default_value_t = 30)]
    pub search_timeout_secs: u64,
}

impl Config {
    pub(crate) fn agent_config(&self) -> ChatResult<AgentConfig> {
        if let Some(budget) = self.thinking_budget {
            if budget < 1024 || budget >= self.max_tokens {
                return Err(ChatError::Config(format!(
                    "thinking budget must be at least 1024 and below max tokens ({}), got {}",
                    self.max_tokens, budget
                )));
            }
        }

        Ok(AgentConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            max_iterations: self.max_iterations as usize,
            thinking_budget: self.thinking_budget,
        })
    }

    pub(crate) fn search_config(&self) -> SearchConfig {
        SearchConfig {
            api_key: self.tavily_api_key.clone(),
            base_url: self.tavily_base_url.clone(),
            max_results: self.search_max_results,
            timeout: Duration::from_secs(self.search_timeout_secs),
        }
    }

    pub(crate) fn build_agent(&self) -> ChatResult<Agent<AnthropicClient>> {
        let model = AnthropicClient::new(
            self.anthropic_api_key.clone(),
            &self.anthropic_base_url,
            Duration::from_secs(self.stream_timeout_secs),
        )?;
        let search = Arc::new(TavilyClient::new(self.search_config())?);
        Ok(Agent::new(model, default_registry(search), self.agent_config()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: Config,
    }

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec![
            "seeker",
            "--anthropic-api-key",
            "sk-test",
            "--tavily-api-key",
            "tvly-test",
        ];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().config
    }

    #[test]
    fn flags_fill_agent_config() {
        let config = parse(&[
            "--model",
            "claude-test",
            "--max-tokens",
            "2048",
            "--max-iterations",
            "3",
        ])
        .agent_config()
        .unwrap();
        assert_eq!(config.model, "claude-test");
        assert_eq!(config.max_tokens, 2048);
        assert_eq!(config.max_iterations, 3);
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let result = TestCli::try_parse_from([
            "seeker",
            "--anthropic-api-key",
            "k",
            "--tavily-api-key",
            "k",
            "--max-iterations",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn thinking_budget_must_fit_under_max_tokens() {
        let err = parse(&["--max-tokens", "2000", "--thinking-budget", "4000"])
            .agent_config()
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let ok = parse(&["--max-tokens", "4096", "--thinking-budget", "1024"])
            .agent_config()
            .unwrap();
        assert_eq!(ok.thinking_budget, Some(1024));
    }
}
