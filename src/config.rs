//! Configuration management
//!
//! Server binding, per-call session tuning, and the provider endpoints for
//! the transcription, completion and synthesis stages.

use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP / WebSocket server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-call session behaviour
    #[serde(default)]
    pub session: SessionConfig,
    /// Completion (LLM) provider
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Synthesis (TTS) provider
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Streaming transcription (STT) provider
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    /// Where finished call transcripts go
    #[serde(default)]
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public host name the telephony provider connects the media stream to
    #[serde(default = "default_public_host")]
    pub public_host: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_host() -> String {
    "localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: default_public_host(),
        }
    }
}

/// Tuning for a live call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Opening line spoken as interaction 0 (empty = wait for the caller)
    #[serde(default = "default_greeting")]
    pub greeting: String,
    /// System prompt for the completion stage
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Minimum utterance length (characters) that counts as an interruption
    #[serde(default = "default_barge_in_min_chars")]
    pub barge_in_min_chars: usize,
    /// Number of transcript lines passed to the completion stage as context
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    #[serde(default = "default_transcription_connect_timeout_ms")]
    pub transcription_connect_timeout_ms: u64,
    #[serde(default = "default_finalize_timeout_ms")]
    pub finalize_timeout_ms: u64,
}

fn default_greeting() -> String {
    "Hello! This is Brandon calling. Do you have a quick minute?".to_string()
}

fn default_system_prompt() -> String {
    r#"You are a friendly outbound phone agent in a live call. Keep every answer short and conversational, one or two sentences. Do not use markdown, lists or emojis; your words are spoken aloud. Insert a '•' symbol every 5 to 10 words at natural pauses so the reply can be spoken in pieces."#.to_string()
}

fn default_barge_in_min_chars() -> usize {
    6
}

fn default_context_window() -> usize {
    20
}

fn default_completion_timeout_ms() -> u64 {
    15_000
}

fn default_synthesis_timeout_ms() -> u64 {
    10_000
}

fn default_transcription_connect_timeout_ms() -> u64 {
    5_000
}

fn default_finalize_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            system_prompt: default_system_prompt(),
            barge_in_min_chars: default_barge_in_min_chars(),
            context_window: default_context_window(),
            completion_timeout_ms: default_completion_timeout_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            transcription_connect_timeout_ms: default_transcription_connect_timeout_ms(),
            finalize_timeout_ms: default_finalize_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn transcription_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transcription_connect_timeout_ms)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_completion_url")]
    pub base_url: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_completion_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_url(),
            model: default_completion_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of a server exposing `/v1/audio/speech`
    #[serde(default = "default_synthesis_url")]
    pub base_url: String,
    #[serde(default = "default_synthesis_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Audio format requested from the provider; must match the call leg
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_synthesis_url() -> String {
    "http://127.0.0.1:8880".to_string()
}

fn default_synthesis_model() -> String {
    "kokoro".to_string()
}

fn default_voice() -> String {
    "af_heart".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_synthesis_url(),
            model: default_synthesis_model(),
            voice: default_voice(),
            output_format: default_output_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Streaming speech-to-text WebSocket endpoint
    #[serde(default = "default_transcription_url")]
    pub url: String,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Silence (ms) after which the provider finalizes an utterance
    #[serde(default = "default_endpointing_ms")]
    pub endpointing_ms: u32,
}

fn default_transcription_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_transcription_model() -> String {
    "nova-2".to_string()
}

fn default_encoding() -> String {
    "mulaw".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_endpointing_ms() -> u32 {
    200
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            url: default_transcription_url(),
            model: default_transcription_model(),
            encoding: default_encoding(),
            sample_rate: default_sample_rate(),
            endpointing_ms: default_endpointing_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Where call records are written
    #[serde(default)]
    pub sink: RecordSink,
    /// Directory for `calls.jsonl`; defaults to the data directory
    #[serde(default)]
    pub transcript_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSink {
    /// Append one JSON line per call to `calls.jsonl`
    #[default]
    Jsonl,
    /// Only log the rendered transcript
    Log,
}

impl RecordingConfig {
    pub fn resolve_dir(&self) -> Result<PathBuf> {
        match &self.transcript_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("transcripts")),
        }
    }
}

impl Config {
    /// Load configuration from the default location, writing defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-agent", "call-agent")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "call-agent", "call-agent")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Show current configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("Server:        {}:{} (public {})", config.server.host, config.server.port, config.server.public_host);
    println!("Completion:    {} @ {}", config.completion.model, config.completion.base_url);
    println!("Synthesis:     {} / {} @ {} ({})", config.synthesis.model, config.synthesis.voice,
        config.synthesis.base_url, config.synthesis.output_format);
    println!("Transcription: {} @ {} ({} {} Hz)", config.transcription.model, config.transcription.url,
        config.transcription.encoding, config.transcription.sample_rate);
    println!("Barge-in:      >= {} characters", config.session.barge_in_min_chars);
    println!("Greeting:      {}", if config.session.greeting.is_empty() { "(none)" } else { &config.session.greeting });

    for provider in crate::security::keyring::PROVIDERS {
        let status = if crate::security::keyring::get_provider_key(provider).is_ok() { "set" } else { "missing" };
        println!("API key [{}]: {}", provider, status);
    }

    Ok(())
}

/// Reset configuration to defaults
pub fn reset_config() -> Result<()> {
    let config = Config::default();
    config.save()?;
    println!("Configuration reset to defaults at {}", config_path()?.display());
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}
