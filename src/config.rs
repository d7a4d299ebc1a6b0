use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiProvider {
    #[default]
    Openai,
    Gemini,
}

impl AiProvider {
    /// Human-facing name used in greetings and apology messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            AiProvider::Openai => "OpenAI",
            AiProvider::Gemini => "Gemini",
        }
    }

    /// Environment variable holding the API key for this provider.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            AiProvider::Openai => "OPENAI_API_KEY",
            AiProvider::Gemini => "GOOGLE_API_KEY",
        }
    }

    fn model_var(&self) -> &'static str {
        match self {
            AiProvider::Openai => "OPENAI_MODEL",
            AiProvider::Gemini => "GEMINI_MODEL",
        }
    }

    fn base_url_var(&self) -> &'static str {
        match self {
            AiProvider::Openai => "OPENAI_BASE_URL",
            AiProvider::Gemini => "GEMINI_BASE_URL",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            AiProvider::Openai => "gpt-3.5-turbo",
            AiProvider::Gemini => "gemini-pro",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            AiProvider::Openai => "https://api.openai.com/v1",
            AiProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Openai => write!(f, "openai"),
            AiProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for AiProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(AiProvider::Openai),
            "gemini" => Ok(AiProvider::Gemini),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

/// Startup validation failures. Any of these stops the process before the
/// dispatcher is started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("TELEGRAM_BOT_TOKEN not found in environment or config file")]
    MissingBotToken,
    #[error("{key} not found in environment or config file (required for AI_PROVIDER={provider})")]
    MissingApiKey {
        key: &'static str,
        provider: AiProvider,
    },
    #[error("Invalid AI_PROVIDER specified: {0}. Choose 'openai' or 'gemini'.")]
    InvalidProvider(String),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Overrides the Bot API endpoint (local Bot API server, tests).
    pub api_url: Option<String>,
    /// Empty means every user may talk to the bot.
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: AiProvider,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    telegram: FileTelegram,
    ai: FileAi,
    openai: FileProvider,
    gemini: FileProvider,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileTelegram {
    bot_token: Option<String>,
    api_url: Option<String>,
    allowed_user_ids: Option<Vec<u64>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileAi {
    provider: Option<String>,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct FileProvider {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

impl FileConfig {
    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    fn provider(&self, provider: AiProvider) -> &FileProvider {
        match provider {
            AiProvider::Openai => &self.openai,
            AiProvider::Gemini => &self.gemini,
        }
    }
}

/// Environment wins over the file; blank values count as unset.
fn layered<F>(env: &F, key: &str, file_value: Option<&String>) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |v: String| {
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    };
    env(key)
        .and_then(non_blank)
        .or_else(|| file_value.cloned().and_then(non_blank))
}

fn parse_user_ids(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "ALLOWED_USER_IDS",
                value: s.to_string(),
            })
        })
        .collect()
}

impl Config {
    /// Load the configuration from an optional TOML file overlaid with the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                FileConfig::parse(&content)
                    .with_context(|| format!("Invalid config file: {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let config = Self::resolve(&file, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn resolve<F>(file: &FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match layered(&env, "AI_PROVIDER", file.ai.provider.as_ref()) {
            Some(name) => name.parse::<AiProvider>()?,
            None => AiProvider::default(),
        };

        let section = file.provider(provider);

        let api_key = layered(&env, provider.api_key_var(), section.api_key.as_ref()).ok_or(
            ConfigError::MissingApiKey {
                key: provider.api_key_var(),
                provider,
            },
        )?;

        let model = layered(&env, provider.model_var(), section.model.as_ref())
            .unwrap_or_else(|| provider.default_model().to_string());

        let base_url = layered(&env, provider.base_url_var(), section.base_url.as_ref())
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| provider.default_base_url().to_string());

        let max_tokens = match env("AI_MAX_TOKENS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue {
                    key: "AI_MAX_TOKENS",
                    value: raw.clone(),
                }
            })?),
            None => file.ai.max_tokens,
        };

        let system_prompt = layered(&env, "AI_SYSTEM_PROMPT", file.ai.system_prompt.as_ref());

        let bot_token = layered(&env, "TELEGRAM_BOT_TOKEN", file.telegram.bot_token.as_ref())
            .ok_or(ConfigError::MissingBotToken)?;

        let api_url = layered(&env, "TELEGRAM_API_URL", file.telegram.api_url.as_ref());

        let allowed_user_ids = match env("ALLOWED_USER_IDS").filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_user_ids(&raw)?,
            None => file.telegram.allowed_user_ids.clone().unwrap_or_default(),
        };

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                api_url,
                allowed_user_ids,
            },
            llm: LlmConfig {
                provider,
                model,
                api_key,
                base_url,
                system_prompt,
                max_tokens,
            },
        })
    }
}
