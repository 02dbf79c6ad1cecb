//! The assistant's configuration document (`config/config.env`).
//!
//! The document is a dotenv file: flat `KEY=value` settings plus three
//! structured values encoded as JSON (`LANGUAGE_SUPPORT`, `MODEL_CONFIG`,
//! `OLLAMA_CONFIG`). Values that are not made of plain characters are
//! double-quoted with `\\`, `\"`, `\$` and `\n` escapes so any dotenv reader
//! returns them unchanged.
//!
//! Writes go to a temporary file next to the destination which is then
//! renamed over it, so a reader never observes a partial document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Keys every document must carry, in the order they are written.
pub const REQUIRED_KEYS: &[&str] = &[
    "WHISPER_MODEL",
    "LANGUAGE_SUPPORT",
    "LLM_MODEL",
    "CODING_MODEL",
    "CHAT_MODEL",
    "TEMPERATURE",
    "MAX_TOKENS",
    "CONTEXT_LENGTH",
    "MEMORY_SIZE",
    "TTS_PROVIDER",
    "VOICE_ID",
    "ENABLE_INTERPRETER",
    "ENABLE_CODE_EXECUTION",
    "ENABLE_VOICE_FEEDBACK",
    "REMOTE_HOST",
    "REMOTE_USER",
    "MODEL_CONFIG",
    "OLLAMA_CONFIG",
];

const HEADER: &str = "# Generated by `tether install`. Edits are overwritten on the next install.";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dotenv content: {0}")]
    Parse(#[from] dotenvy::Error),

    #[error("missing required key {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Parameters for one model role (chat, code, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub system_prompt: String,
}

/// Where the application reaches the inference engine (through the tunnel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            timeout: 60,
        }
    }
}

/// Typed view of every setting the assistant reads at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub whisper_model: String,
    pub language_support: Vec<String>,
    pub llm_model: String,
    pub coding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub context_length: u32,
    pub memory_size: u32,
    pub tts_provider: String,
    pub voice_id: String,
    pub enable_interpreter: bool,
    pub enable_code_execution: bool,
    pub enable_voice_feedback: bool,
    pub remote_host: String,
    pub remote_user: String,
    pub model_config: BTreeMap<String, ModelParams>,
    pub ollama_config: OllamaConfig,
}

const DEFAULT_CHAT_MODEL: &str = "neural-chat:7b-v3.3-q4_K_M";
const DEFAULT_CODING_MODEL: &str = "codellama:7b-instruct-q4_K_M";

impl Default for AssistantSettings {
    fn default() -> Self {
        let mut model_config = BTreeMap::new();
        model_config.insert(
            "chat".to_string(),
            ModelParams {
                model: DEFAULT_CHAT_MODEL.to_string(),
                temperature: 0.7,
                max_tokens: 2048,
                system_prompt: "You are a helpful AI assistant. You understand and answer in English and Persian.".to_string(),
            },
        );
        model_config.insert(
            "code".to_string(),
            ModelParams {
                model: DEFAULT_CODING_MODEL.to_string(),
                temperature: 0.3,
                max_tokens: 2048,
                system_prompt: "You are an expert programmer. Write complete, runnable Python scripts with error handling.".to_string(),
            },
        );

        Self {
            whisper_model: "base".to_string(),
            language_support: vec!["en-US".to_string(), "fa-IR".to_string()],
            llm_model: DEFAULT_CHAT_MODEL.to_string(),
            coding_model: DEFAULT_CODING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            context_length: 4096,
            memory_size: 10,
            tts_provider: "gtts".to_string(),
            voice_id: "en".to_string(),
            enable_interpreter: true,
            enable_code_execution: false,
            enable_voice_feedback: true,
            remote_host: String::new(),
            remote_user: String::new(),
            model_config,
            ollama_config: OllamaConfig::default(),
        }
    }
}

impl AssistantSettings {
    /// Every distinct model the settings refer to, in first-seen order.
    pub fn required_models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        let candidates = [&self.llm_model, &self.coding_model, &self.chat_model]
            .into_iter()
            .chain(self.model_config.values().map(|params| &params.model));
        for model in candidates {
            if !model.is_empty() && !models.contains(model) {
                models.push(model.clone());
            }
        }
        models
    }
}

/// A rendered configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    entries: Vec<(&'static str, String)>,
    settings: AssistantSettings,
}

impl ConfigDocument {
    /// Render settings into the stable key set.
    pub fn render(settings: &AssistantSettings) -> Result<Self, DocumentError> {
        let entries = vec![
            ("WHISPER_MODEL", settings.whisper_model.clone()),
            ("LANGUAGE_SUPPORT", encode("LANGUAGE_SUPPORT", &settings.language_support)?),
            ("LLM_MODEL", settings.llm_model.clone()),
            ("CODING_MODEL", settings.coding_model.clone()),
            ("CHAT_MODEL", settings.chat_model.clone()),
            ("TEMPERATURE", settings.temperature.to_string()),
            ("MAX_TOKENS", settings.max_tokens.to_string()),
            ("CONTEXT_LENGTH", settings.context_length.to_string()),
            ("MEMORY_SIZE", settings.memory_size.to_string()),
            ("TTS_PROVIDER", settings.tts_provider.clone()),
            ("VOICE_ID", settings.voice_id.clone()),
            ("ENABLE_INTERPRETER", settings.enable_interpreter.to_string()),
            ("ENABLE_CODE_EXECUTION", settings.enable_code_execution.to_string()),
            ("ENABLE_VOICE_FEEDBACK", settings.enable_voice_feedback.to_string()),
            ("REMOTE_HOST", settings.remote_host.clone()),
            ("REMOTE_USER", settings.remote_user.clone()),
            ("MODEL_CONFIG", encode("MODEL_CONFIG", &settings.model_config)?),
            ("OLLAMA_CONFIG", encode("OLLAMA_CONFIG", &settings.ollama_config)?),
        ];

        Ok(Self {
            entries,
            settings: settings.clone(),
        })
    }

    /// Parse a dotenv document back into typed settings.
    pub fn parse_str(content: &str) -> Result<Self, DocumentError> {
        let mut values = BTreeMap::new();
        for item in dotenvy::from_read_iter(content.as_bytes()) {
            let (key, value) = item?;
            values.insert(key, value);
        }

        let settings = settings_from_map(&values)?;
        Self::render(&settings)
    }

    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }

    pub fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to dotenv text.
    pub fn to_dotenv(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(HEADER);
        out.push('\n');
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value(value));
            out.push('\n');
        }
        out
    }
}

/// Render `settings` and atomically replace the document at `path`.
pub fn materialize(settings: &AssistantSettings, path: &Path) -> Result<ConfigDocument, DocumentError> {
    let document = ConfigDocument::render(settings)?;
    let io_err = |source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
    tmp.write_all(document.to_dotenv().as_bytes())
        .map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    debug!(tmp = %tmp.path().display(), "config document staged");

    tmp.persist(path).map_err(|e| io_err(e.error))?;
    info!(path = %path.display(), keys = document.entries.len(), "config document written");

    Ok(document)
}

/// Keys from [`REQUIRED_KEYS`] that are absent from a raw dotenv document.
pub fn missing_keys(content: &str) -> Result<Vec<&'static str>, DocumentError> {
    let mut present = Vec::new();
    for item in dotenvy::from_read_iter(content.as_bytes()) {
        let (key, _) = item?;
        present.push(key);
    }
    Ok(REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !present.iter().any(|p| p == key))
        .collect())
}

fn encode<T: Serialize>(key: &'static str, value: &T) -> Result<String, DocumentError> {
    serde_json::to_string(value).map_err(|source| DocumentError::Encode { key, source })
}

fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':' | '/' | '@' | '+' | ','));
    if plain {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn settings_from_map(values: &BTreeMap<String, String>) -> Result<AssistantSettings, DocumentError> {
    fn required<'a>(
        values: &'a BTreeMap<String, String>,
        key: &'static str,
    ) -> Result<&'a str, DocumentError> {
        values
            .get(key)
            .map(String::as_str)
            .ok_or(DocumentError::MissingKey(key))
    }

    fn parsed<T: std::str::FromStr>(
        values: &BTreeMap<String, String>,
        key: &'static str,
    ) -> Result<T, DocumentError>
    where
        T::Err: std::fmt::Display,
    {
        required(values, key)?
            .trim()
            .parse()
            .map_err(|e: T::Err| DocumentError::InvalidValue {
                key,
                message: e.to_string(),
            })
    }

    fn json<T: serde::de::DeserializeOwned>(
        values: &BTreeMap<String, String>,
        key: &'static str,
    ) -> Result<T, DocumentError> {
        serde_json::from_str(required(values, key)?).map_err(|e| DocumentError::InvalidValue {
            key,
            message: e.to_string(),
        })
    }

    Ok(AssistantSettings {
        whisper_model: required(values, "WHISPER_MODEL")?.to_string(),
        language_support: json(values, "LANGUAGE_SUPPORT")?,
        llm_model: required(values, "LLM_MODEL")?.to_string(),
        coding_model: required(values, "CODING_MODEL")?.to_string(),
        chat_model: required(values, "CHAT_MODEL")?.to_string(),
        temperature: parsed(values, "TEMPERATURE")?,
        max_tokens: parsed(values, "MAX_TOKENS")?,
        context_length: parsed(values, "CONTEXT_LENGTH")?,
        memory_size: parsed(values, "MEMORY_SIZE")?,
        tts_provider: required(values, "TTS_PROVIDER")?.to_string(),
        voice_id: required(values, "VOICE_ID")?.to_string(),
        enable_interpreter: parsed(values, "ENABLE_INTERPRETER")?,
        enable_code_execution: parsed(values, "ENABLE_CODE_EXECUTION")?,
        enable_voice_feedback: parsed(values, "ENABLE_VOICE_FEEDBACK")?,
        remote_host: required(values, "REMOTE_HOST")?.to_string(),
        remote_user: required(values, "REMOTE_USER")?.to_string(),
        model_config: json(values, "MODEL_CONFIG")?,
        ollama_config: json(values, "OLLAMA_CONFIG")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> AssistantSettings {
        AssistantSettings {
            remote_host: "192.168.1.40".to_string(),
            remote_user: "ada".to_string(),
            ..AssistantSettings::default()
        }
    }

    #[test]
    fn test_render_has_every_required_key_in_order() {
        let doc = ConfigDocument::render(&sample()).unwrap();
        let keys: Vec<&str> = doc.entries.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, REQUIRED_KEYS);
    }

    #[test]
    fn test_quote_value() {
        assert_eq!(quote_value("base"), "base");
        assert_eq!(quote_value("neural-chat:7b-v3.3-q4_K_M"), "neural-chat:7b-v3.3-q4_K_M");
        assert_eq!(quote_value(""), "\"\"");
        assert_eq!(quote_value("two words"), "\"two words\"");
        assert_eq!(quote_value("say \"hi\" $HOME"), "\"say \\\"hi\\\" \\$HOME\"");
        assert_eq!(quote_value("a\nb"), "\"a\\nb\"");
    }

    #[test]
    fn test_parse_str_reports_missing_key() {
        let text = ConfigDocument::render(&sample()).unwrap().to_dotenv();
        let without_voice: String = text
            .lines()
            .filter(|line| !line.starts_with("VOICE_ID="))
            .map(|line| format!("{line}\n"))
            .collect();

        let err = ConfigDocument::parse_str(&without_voice).unwrap_err();
        assert!(matches!(err, DocumentError::MissingKey("VOICE_ID")));
        assert_eq!(missing_keys(&without_voice).unwrap(), vec!["VOICE_ID"]);
    }

    #[test]
    fn test_parse_str_rejects_bad_number() {
        let text = ConfigDocument::render(&sample())
            .unwrap()
            .to_dotenv()
            .replace("MAX_TOKENS=2048", "MAX_TOKENS=lots");
        let err = ConfigDocument::parse_str(&text).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidValue { key: "MAX_TOKENS", .. }));
    }

    #[test]
    fn test_materialize_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("config.env");

        materialize(&sample(), &path).unwrap();
        let mut changed = sample();
        changed.memory_size = 32;
        materialize(&changed, &path).unwrap();

        let loaded = ConfigDocument::load(&path).unwrap();
        assert_eq!(loaded.settings().memory_size, 32);

        // Only the document itself is left behind; the staging file was renamed.
        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("config.env")]);
    }

    #[test]
    fn test_required_models_deduplicates() {
        let models = AssistantSettings::default().required_models();
        assert_eq!(
            models,
            vec![
                "neural-chat:7b-v3.3-q4_K_M".to_string(),
                "codellama:7b-instruct-q4_K_M".to_string()
            ]
        );
    }
}
