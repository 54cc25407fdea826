use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::error::{ImportError, Result};
use crate::model::InsertPosition;
use crate::plan::rules::RuleSet;

pub const DEFAULT_CONFIG_FILE: &str = "vault-import.yaml";
pub const DEFAULT_ATTACHMENT_OUTPUT_PATH: &str = "Resource";
pub const DEFAULT_TRASH_OUTPUT_PATH: &str = "Trash";

/// Image, video, audio and PDF formats treated as attachments.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "heic", "mp4", "mov", "avi", "mkv", "qt", "m4a",
    "mp3", "wav", "pdf",
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStrategy {
    /// Resolve each link target on its own; only referenced files move.
    #[default]
    Reference,
    /// Take every file in the directory carrying the document's identifier.
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionPosition {
    First,
    Last,
}

/// Content spliced around a document's whole metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SectionRule {
    Insert {
        position: SectionPosition,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Retain,
    Delete,
    Rename {
        new_name: String,
    },
    ModifyValue {
        #[serde(default, deserialize_with = "scalar_map")]
        value_mapping: BTreeMap<String, String>,
        #[serde(default)]
        regex_mapping: Vec<(String, String)>,
    },
    AppendAfter {
        #[serde(default)]
        content: String,
    },
    Insert {
        #[serde(default)]
        at: InsertPosition,
        #[serde(default)]
        content: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    metadata_rules: BTreeMap<String, RuleSpec>,
    metadata_section_rules: Vec<SectionRule>,
    attachment_output_path: Option<String>,
    trash_output_path: Option<String>,
    attachment_strategy: AttachmentStrategy,
    stop_on_error: bool,
    supported_extensions: Option<Vec<String>>,
}

/// Validated run configuration. Regexes are compiled at load time.
#[derive(Debug, Clone)]
pub struct Config {
    pub rules: RuleSet,
    pub section_rules: Vec<SectionRule>,
    pub attachment_output_path: PathBuf,
    pub trash_output_path: PathBuf,
    pub attachment_strategy: AttachmentStrategy,
    pub stop_on_error: bool,
    supported_extensions: BTreeSet<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules: RuleSet::default(),
            section_rules: Vec::new(),
            attachment_output_path: PathBuf::from(DEFAULT_ATTACHMENT_OUTPUT_PATH),
            trash_output_path: PathBuf::from(DEFAULT_TRASH_OUTPUT_PATH),
            attachment_strategy: AttachmentStrategy::default(),
            stop_on_error: false,
            supported_extensions: default_extensions(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ImportError::ConfigNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text, path)
    }

    /// Parse configuration text; `origin` is only used in error messages.
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self> {
        let invalid = |msg: String| ImportError::ConfigInvalid(origin.to_path_buf(), msg);

        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| invalid(e.to_string()))?;
        if value.is_null() {
            return Err(invalid("configuration is empty".into()));
        }
        let file: ConfigFile = serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))?;

        let supported_extensions = match file.supported_extensions {
            Some(list) if !list.is_empty() => list
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            _ => default_extensions(),
        };

        Ok(Self {
            rules: RuleSet::compile(&file.metadata_rules)?,
            section_rules: file.metadata_section_rules,
            attachment_output_path: PathBuf::from(
                file.attachment_output_path
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_OUTPUT_PATH.into()),
            ),
            trash_output_path: PathBuf::from(
                file.trash_output_path
                    .unwrap_or_else(|| DEFAULT_TRASH_OUTPUT_PATH.into()),
            ),
            attachment_strategy: file.attachment_strategy,
            stop_on_error: file.stop_on_error,
            supported_extensions,
        })
    }

    pub fn is_supported_extension(&self, ext: &str) -> bool {
        self.supported_extensions
            .contains(&ext.trim_start_matches('.').to_ascii_lowercase())
    }
}

fn default_extensions() -> BTreeSet<String> {
    SUPPORTED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

/// Rule files often carry unquoted numbers or booleans as mapping keys and
/// values; accept any scalar and keep its textual form.
fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_yaml::Mapping::deserialize(deserializer)?;
    raw.iter()
        .map(|(k, v)| Ok((scalar_text(k)?, scalar_text(v)?)))
        .collect()
}

fn scalar_text<E: serde::de::Error>(value: &serde_yaml::Value) -> std::result::Result<String, E> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(E::custom(format!(
            "value_mapping entries must be scalars, got {other:?}"
        ))),
    }
}
