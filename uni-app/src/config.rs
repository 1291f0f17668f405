//! unillm configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uni_agent::AgentSettings;
use uni_llm::{CallSettings, ClientConfig, Provider};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnillmConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    /// OpenAI-compatible gateway root, e.g. `http://localhost:11434/v1`.
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

fn default_max_steps() -> usize {
    8
}

fn default_stream() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            stream: default_stream(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_clock")]
    pub clock: bool,
}

fn default_clock() -> bool {
    true
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            clock: default_clock(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl UnillmConfig {
    /// Load from `path`, or from `~/.unillm/config.toml` when none is given.
    ///
    /// A missing default file falls back to built-in defaults; an explicit path must exist.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str::<UnillmConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                UnillmConfig::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        tracing::debug!(
            path = %path.display(),
            model = %cfg.general.model,
            max_steps = cfg.agent.max_steps,
            stream = cfg.agent.stream,
            "config loaded"
        );
        Ok(cfg)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("UNILLM_MODEL") {
            self.general.model = v;
        }
        if let Some(v) = non_empty("OPENAI_API_KEY") {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = non_empty("ANTHROPIC_API_KEY") {
            self.keys.anthropic_api_key = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.agent.max_steps == 0 {
            return Err(anyhow::anyhow!("agent.max_steps must be > 0"));
        }
        if self.http.timeout_secs == 0 {
            return Err(anyhow::anyhow!("http.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn provider(&self) -> Provider {
        Provider::detect(&self.general.model)
    }

    pub fn api_key_for_model(&self) -> Option<String> {
        let key = match self.provider() {
            Provider::Anthropic => &self.keys.anthropic_api_key,
            Provider::OpenAI => &self.keys.openai_api_key,
        };
        key.clone().filter(|s| !s.is_empty())
    }

    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let Some(api_key) = self.api_key_for_model() else {
            return Err(anyhow::anyhow!(
                "no API key configured for {} model {}",
                self.provider().as_str(),
                self.general.model
            ));
        };
        let base_url = match self.provider() {
            Provider::Anthropic => self.keys.anthropic_base_url.clone(),
            Provider::OpenAI => self.keys.openai_base_url.clone(),
        };
        Ok(ClientConfig {
            base_url,
            timeout: Duration::from_secs(self.http.timeout_secs),
            ..ClientConfig::new(&api_key, &self.general.model)
        })
    }

    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            max_steps: self.agent.max_steps,
            streaming: self.agent.stream,
            call: CallSettings {
                max_tokens: self.agent.max_tokens,
                temperature: self.agent.temperature,
                top_p: self.agent.top_p,
                stop_sequences: self.agent.stop.clone(),
            },
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".unillm").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[tokio::test]
    async fn loads_file_and_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[general]
model = "claude-sonnet-4-5"
system_prompt = "Be brief."

[keys]
anthropic_api_key = "sk-ant-test"

[agent]
max_steps = 3
temperature = 0.2
stop = ["END"]
"#
        )
        .expect("write config");

        let cfg = UnillmConfig::load(Some(file.path().to_path_buf()))
            .await
            .expect("load");
        assert_eq!(cfg.agent.max_steps, 3);
        assert!(cfg.agent.stream);
        assert!(cfg.tools.clock);
        assert_eq!(cfg.http.timeout_secs, 60);
        assert_eq!(cfg.general.system_prompt.as_deref(), Some("Be brief."));

        let settings = cfg.agent_settings();
        assert_eq!(settings.call.temperature, Some(0.2));
        assert_eq!(settings.call.stop_sequences, vec!["END".to_string()]);
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = UnillmConfig::load(Some(dir.path().join("absent.toml")))
            .await
            .expect_err("missing file");
        assert!(err.to_string().contains("read config"));
    }

    #[test]
    fn validate_rejects_zero_limits_and_empty_model() {
        let mut cfg = UnillmConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.agent.max_steps = 0;
        assert!(cfg.validate().is_err());
        cfg.agent.max_steps = 1;

        cfg.http.timeout_secs = 0;
        assert!(cfg.validate().is_err());
        cfg.http.timeout_secs = 5;

        cfg.general.model = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_pick_model_and_key() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("UNILLM_MODEL", "claude-3-5-haiku"),
            ("ANTHROPIC_API_KEY", "sk-ant-env"),
            ("OPENAI_API_KEY", " "),
        ]);
        let mut cfg = UnillmConfig::default();
        cfg.keys.openai_api_key = Some("sk-file".to_string());
        cfg.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.provider(), Provider::Anthropic);
        assert_eq!(cfg.api_key_for_model().as_deref(), Some("sk-ant-env"));
        assert_eq!(cfg.keys.openai_api_key.as_deref(), Some("sk-file"));

        let client = cfg.client_config().expect("client config");
        assert_eq!(client.model, "claude-3-5-haiku");
        assert_eq!(client.timeout, Duration::from_secs(60));
    }

    #[test]
    fn missing_key_is_reported() {
        let cfg = UnillmConfig::default();
        let err = cfg.client_config().expect_err("no key");
        assert!(err.to_string().contains("openai"));
    }
}
