//! Runtime configuration.
//!
//! Values come from, in increasing priority: built-in defaults,
//! `config/default.toml` when present, the user's file, `${VAR}` references
//! expanded from the environment, the `LLM_*` environment variables, and
//! finally command-line overrides applied by the caller.

use crate::error::{Error, Result};
use crate::models::FallbackMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DOTENV_PATH: &str = ".env";

/// Upper bound for `splitter.max_ratio`.
pub const MAX_SPLIT_RATIO: f64 = 10.0;

static ENV_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterDetectionConfig {
    pub enable_llm_fallback: bool,
    pub sample_size: usize,
    pub sample_count: usize,
}

impl Default for ChapterDetectionConfig {
    fn default() -> Self {
        Self {
            enable_llm_fallback: true,
            sample_size: 2000,
            sample_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleFormattingConfig {
    pub batch_size: usize,
}

impl Default for TitleFormattingConfig {
    fn default() -> Self {
        Self { batch_size: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Key into the provider table, or `"none"`.
    pub provider: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    pub base_url: Option<String>,
    /// Overrides the provider's default model.
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    pub chapter_detection: ChapterDetectionConfig,
    pub title_formatting: TitleFormattingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_key: String::new(),
            base_url: None,
            model: None,
            timeout_secs: 30,
            retry: RetryConfig::default(),
            chapter_detection: ChapterDetectionConfig::default(),
            title_formatting: TitleFormattingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub target_chars: usize,
    pub min_ratio: f64,
    pub max_ratio: f64,
    pub separator: String,
    pub split_search_range: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            target_chars: 1000,
            min_ratio: 0.7,
            max_ratio: 1.3,
            separator: "===".to_string(),
            split_search_range: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Epub,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Epub => "epub",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub encoding: String,
    pub blank_lines_between_chapters: usize,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            encoding: "utf-8".to_string(),
            blank_lines_between_chapters: 2,
            format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub no_chapter_detected: FallbackMode,
}

pub fn default_formats() -> HashMap<String, String> {
    [
        ("zh", "第{num}章：{title} ({part}/{total})"),
        ("zh_no_split", "第{num}章：{title}"),
        ("en", "Chapter {num}: {title} (part {part})"),
        ("en_no_split", "Chapter {num}: {title}"),
    ]
    .into_iter()
    .map(|(key, template)| (key.to_string(), template.to_string()))
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub splitter: SplitterConfig,
    pub output: OutputConfig,
    pub fallback: FallbackConfig,
    /// Title templates keyed by `zh`, `zh_no_split`, `en`, `en_no_split`.
    pub formats: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            splitter: SplitterConfig::default(),
            output: OutputConfig::default(),
            fallback: FallbackConfig::default(),
            formats: default_formats(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        let splitter = &self.splitter;
        if splitter.target_chars == 0 {
            return Err(Error::Config("splitter.target_chars must be > 0".into()));
        }
        let (min, max) = (splitter.min_ratio, splitter.max_ratio);
        if !(min > 0.0 && min <= max && max <= MAX_SPLIT_RATIO) {
            return Err(Error::Config(format!(
                "splitter ratios must satisfy 0 < min_ratio <= max_ratio <= {MAX_SPLIT_RATIO} (got {min} and {max})"
            )));
        }
        Ok(())
    }

    /// Applies `LLM_PROVIDER`, `LLM_API_KEY`, `LLM_API_URL` and `LLM_MODEL`.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(provider) = non_empty("LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(key) = non_empty("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(url) = non_empty("LLM_API_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.llm.model = Some(model);
        }
    }

    pub fn with_target_chars(mut self, target_chars: Option<usize>) -> Self {
        if let Some(target) = target_chars.filter(|&target| target > 0) {
            self.splitter.target_chars = target;
        }
        self
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Recursively merges `patch` into `base`; tables merge, everything else
/// replaces.
fn deep_merge(base: &mut toml::Table, patch: toml::Table) {
    for (key, value) in patch {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => deep_merge(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn expand_env(value: &mut toml::Value, lookup: &impl Fn(&str) -> Option<String>) {
    match value {
        toml::Value::String(text) => {
            if ENV_REF.is_match(text.as_str()) {
                *text = ENV_REF
                    .replace_all(text.as_str(), |caps: &regex::Captures| {
                        lookup(&caps[1]).unwrap_or_default()
                    })
                    .into_owned();
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(|item| expand_env(item, lookup)),
        toml::Value::Table(table) => table
            .iter_mut()
            .for_each(|(_, item)| expand_env(item, lookup)),
        _ => {}
    }
}

fn build_config(
    layers: Vec<toml::Table>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    let mut merged = toml::Table::new();
    for layer in layers {
        deep_merge(&mut merged, layer);
    }

    let mut value = toml::Value::Table(merged);
    expand_env(&mut value, &lookup);

    let text = toml::to_string(&value).map_err(|e| Error::Config(e.to_string()))?;
    let mut config: AppConfig = toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))?;
    // A partial [formats] table must not drop the other templates.
    for (key, template) in default_formats() {
        config.formats.entry(key).or_insert(template);
    }
    config.apply_overrides_from(lookup);
    config.validate()?;
    Ok(config)
}

/// Parses `KEY=VALUE` lines of a dotenv file. Blank lines, `#` comments and
/// lines without `=` are skipped; an `export ` prefix and matching quotes
/// around the value are dropped.
pub fn parse_dotenv(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = ['"', '\'']
                .iter()
                .find_map(|&quote| value.strip_prefix(quote)?.strip_suffix(quote))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn read_dotenv(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let vars = parse_dotenv(&text);
            tracing::debug!(path = %path.display(), vars = vars.len(), "dotenv file loaded");
            vars
        }
        Err(_) => HashMap::new(),
    }
}

/// Process environment first, then the dotenv values.
fn env_lookup(dotenv: HashMap<String, String>) -> impl Fn(&str) -> Option<String> {
    move |key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

/// Loads the layered configuration. A missing `config/default.toml` is fine;
/// a missing explicit `path` is an error. Variables are read from the process
/// environment, falling back to a `.env` file in the working directory.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut layers = Vec::new();
    let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        layers.push(read_table(&default_path)?);
    }
    if let Some(path) = path {
        if path != default_path.as_path() {
            layers.push(read_table(path)?);
        }
    }
    tracing::debug!(layers = layers.len(), "loading configuration");
    build_config(layers, env_lookup(read_dotenv(Path::new(DOTENV_PATH))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> toml::Table {
        toml::from_str(text).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = build_config(Vec::new(), no_env).unwrap();
        assert_eq!(config.splitter.target_chars, 1000);
        assert_eq!(config.splitter.separator, "===");
        assert_eq!(config.output.blank_lines_between_chapters, 2);
        assert_eq!(config.fallback.no_chapter_detected, FallbackMode::Paragraph);
        assert_eq!(config.llm.title_formatting.batch_size, 20);
        assert_eq!(config.formats["zh_no_split"], "第{num}章：{title}");
    }

    #[test]
    fn test_layers_deep_merge() {
        let base = table("[splitter]\ntarget_chars = 800\nseparator = \"##\"\n");
        let user = table("[splitter]\ntarget_chars = 1500\n[fallback]\nno_chapter_detected = \"sentence\"\n");
        let config = build_config(vec![base, user], no_env).unwrap();
        assert_eq!(config.splitter.target_chars, 1500);
        assert_eq!(config.splitter.separator, "##");
        assert_eq!(config.fallback.no_chapter_detected, FallbackMode::Sentence);
    }

    #[test]
    fn test_partial_formats_keep_defaults() {
        let user = table("[formats]\nen = \"Ch {num} - {title} [{part}/{total}]\"\n");
        let config = build_config(vec![user], no_env).unwrap();
        assert_eq!(config.formats["en"], "Ch {num} - {title} [{part}/{total}]");
        assert_eq!(config.formats["zh"], "第{num}章：{title} ({part}/{total})");
    }

    #[test]
    fn test_env_references_expand() {
        let user = table("[llm]\napi_key = \"${MY_KEY}\"\nprovider = \"grok\"\n");
        let config = build_config(vec![user], |key| {
            (key == "MY_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.provider, "grok");
    }

    #[test]
    fn test_env_overrides_win() {
        let user = table("[llm]\nprovider = \"grok\"\nmodel = \"a\"\n");
        let config = build_config(vec![user], |key| match key {
            "LLM_PROVIDER" => Some("ollama".to_string()),
            "LLM_MODEL" => Some("b".to_string()),
            "LLM_API_KEY" => Some("  ".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model.as_deref(), Some("b"));
        assert!(config.llm.api_key.is_empty());
    }

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            "# keys\nLLM_API_KEY=\"sk-quoted\"\n\nexport LLM_MODEL = 'grok-3'\nBROKEN LINE\n=nokey\nEMPTY=\nURL=http://h/?a=b\n",
        );
        assert_eq!(vars.len(), 4);
        assert_eq!(vars["LLM_API_KEY"], "sk-quoted");
        assert_eq!(vars["LLM_MODEL"], "grok-3");
        assert_eq!(vars["EMPTY"], "");
        assert_eq!(vars["URL"], "http://h/?a=b");
    }

    #[test]
    fn test_dotenv_fills_unset_variables_only() {
        let dotenv = parse_dotenv(
            "CHAPTERSPLIT_TEST_DOTENV_ONLY=from-file\nCARGO_PKG_NAME=from-file\n",
        );
        let lookup = env_lookup(dotenv);
        assert_eq!(lookup("CHAPTERSPLIT_TEST_DOTENV_ONLY").as_deref(), Some("from-file"));
        assert_eq!(lookup("CARGO_PKG_NAME").as_deref(), Some("chaptersplit"));
        assert_eq!(lookup("CHAPTERSPLIT_TEST_UNSET_ANYWHERE"), None);
    }

    #[test]
    fn test_dotenv_values_reach_config() {
        let dotenv = parse_dotenv("CHAPTERSPLIT_TEST_KEY=sk-dotenv\n");
        let user = table("[llm]\napi_key = \"${CHAPTERSPLIT_TEST_KEY}\"\n");
        let config = build_config(vec![user], env_lookup(dotenv)).unwrap();
        assert_eq!(config.llm.api_key, "sk-dotenv");
    }

    #[test]
    fn test_invalid_ratios_rejected() {
        let user = table("[splitter]\nmin_ratio = 1.5\nmax_ratio = 1.2\n");
        assert!(matches!(build_config(vec![user], no_env), Err(Error::Config(_))));
    }

    #[test]
    fn test_unbounded_ratios_rejected() {
        for (min, max) in [(0.7, 1e19), (0.7, f64::INFINITY), (f64::NAN, 1.3), (0.7, f64::NAN)] {
            let mut config = AppConfig::default();
            config.splitter.min_ratio = min;
            config.splitter.max_ratio = max;
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{min} {max}");
        }
        let mut config = AppConfig::default();
        config.splitter.max_ratio = MAX_SPLIT_RATIO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fallback_mode_rejected() {
        let user = table("[fallback]\nno_chapter_detected = \"chapter\"\n");
        assert!(build_config(vec![user], no_env).is_err());
    }

    #[test]
    fn test_with_target_chars() {
        let config = AppConfig::default().with_target_chars(Some(3000));
        assert_eq!(config.splitter.target_chars, 3000);
        let config = config.with_target_chars(Some(0));
        assert_eq!(config.splitter.target_chars, 3000);
    }

    #[test]
    fn test_shipped_default_file_matches_builtins() {
        let shipped = table(include_str!("../config/default.toml"));
        let config = build_config(vec![shipped], no_env).unwrap();
        assert_eq!(config.llm.provider, "deepseek");
        assert_eq!(config.splitter.split_search_range, 200);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert_eq!(config.formats, default_formats());
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let missing = Path::new("/definitely/not/here.toml");
        assert!(load_config(Some(missing)).is_err());
    }
}
