use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::{ActionSpec, RuleSpec};
use crate::error::{ImportError, Result};
use crate::model::InsertPosition;

static BACKREF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(\d+)").unwrap());

/// A `key: value` metadata field as it flows through the action pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub value: String,
}

impl Field {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Split a line on the first `": "`.
    pub fn parse(line: &str) -> Option<Self> {
        let (key, value) = line.split_once(": ")?;
        Some(Self::new(key, value.trim()))
    }

    pub fn to_line(&self) -> String {
        format!("{}: {}", self.key, self.value)
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    replacement: String,
}

impl Pattern {
    fn apply(&self, value: &str) -> Option<String> {
        if !self.regex.is_match(value) {
            return None;
        }
        // Group 0 is always present; anything above it is a capturing group.
        if self.regex.captures_len() > 1 {
            Some(self.regex.replace_all(value, self.replacement.as_str()).into_owned())
        } else {
            Some(self.replacement.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueOutcome {
    Direct(String),
    Pattern(String),
    Unmatched,
}

#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    direct: BTreeMap<String, String>,
    patterns: Vec<Pattern>,
}

impl ValueMap {
    pub fn covers(&self, value: &str) -> bool {
        self.direct.contains_key(value)
    }

    /// Direct map first, then the first matching pattern.
    pub fn apply(&self, value: &str) -> ValueOutcome {
        if let Some(mapped) = self.direct.get(value) {
            return ValueOutcome::Direct(mapped.clone());
        }
        self.patterns
            .iter()
            .find_map(|p| p.apply(value))
            .map_or(ValueOutcome::Unmatched, ValueOutcome::Pattern)
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Retain,
    Delete,
    Rename { new_name: String },
    ModifyValue(ValueMap),
    AppendAfter { content: String },
    Insert { position: InsertPosition, content: String },
}

impl Action {
    /// Pipeline rank: modify_value, then append_after, then rename.
    /// Actions outside the replace pipeline have no rank.
    fn pipeline_rank(&self) -> Option<u8> {
        match self {
            Self::ModifyValue(_) => Some(0),
            Self::AppendAfter { .. } => Some(1),
            Self::Rename { .. } => Some(2),
            Self::Retain | Self::Delete | Self::Insert { .. } => None,
        }
    }

    /// Apply one action to a field. `None` means the field is deleted.
    pub fn apply(&self, field: Field) -> Option<Field> {
        match self {
            Self::Delete => None,
            Self::Retain | Self::Insert { .. } => Some(field),
            Self::Rename { new_name } => Some(Field::new(new_name.clone(), field.value)),
            Self::ModifyValue(map) => match map.apply(&field.value) {
                ValueOutcome::Direct(value) | ValueOutcome::Pattern(value) => {
                    Some(Field::new(field.key, value))
                }
                ValueOutcome::Unmatched => Some(field),
            },
            Self::AppendAfter { content } => {
                let value = format!("{}{}", field.value, content);
                Some(Field::new(field.key, value))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataRule {
    pub key: String,
    pub actions: Vec<Action>,
}

impl MetadataRule {
    pub fn deletes(&self) -> bool {
        self.actions.iter().any(|a| matches!(a, Action::Delete))
    }

    pub fn retain_only(&self) -> bool {
        matches!(self.actions.as_slice(), [Action::Retain])
    }

    /// Replace-pipeline actions in priority order; ties keep configured order.
    pub fn pipeline(&self) -> Vec<&Action> {
        let mut ranked: Vec<(u8, &Action)> = self
            .actions
            .iter()
            .filter_map(|a| a.pipeline_rank().map(|rank| (rank, a)))
            .collect();
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, a)| a).collect()
    }

    pub fn inserts(&self) -> impl Iterator<Item = (InsertPosition, &str)> {
        self.actions.iter().filter_map(|a| match a {
            Action::Insert { position, content } => Some((*position, content.as_str())),
            _ => None,
        })
    }

    pub fn value_maps(&self) -> impl Iterator<Item = &ValueMap> {
        self.actions.iter().filter_map(|a| match a {
            Action::ModifyValue(map) => Some(map),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: BTreeMap<String, MetadataRule>,
}

impl RuleSet {
    pub fn compile(specs: &BTreeMap<String, RuleSpec>) -> Result<Self> {
        let mut rules = BTreeMap::new();
        for (key, spec) in specs {
            let actions = spec
                .actions
                .iter()
                .map(|action| compile_action(key, action))
                .collect::<Result<Vec<_>>>()?;
            rules.insert(
                key.clone(),
                MetadataRule {
                    key: key.clone(),
                    actions,
                },
            );
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True when `key` names a configured rule exactly.
    pub fn is_rule_key(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    /// Exact match, otherwise the longest rule key that prefixes `key`.
    pub fn resolve(&self, key: &str) -> Option<&MetadataRule> {
        if let Some(rule) = self.rules.get(key) {
            return Some(rule);
        }
        self.rules
            .values()
            .filter(|rule| key.starts_with(rule.key.as_str()))
            .max_by_key(|rule| rule.key.len())
    }
}

fn compile_action(key: &str, spec: &ActionSpec) -> Result<Action> {
    Ok(match spec {
        ActionSpec::Retain => Action::Retain,
        ActionSpec::Delete => Action::Delete,
        ActionSpec::Rename { new_name } => Action::Rename {
            new_name: new_name.clone(),
        },
        ActionSpec::AppendAfter { content } => Action::AppendAfter {
            content: content.clone(),
        },
        ActionSpec::Insert { at, content } => Action::Insert {
            position: *at,
            content: content.clone(),
        },
        ActionSpec::ModifyValue {
            value_mapping,
            regex_mapping,
        } => {
            let patterns = regex_mapping
                .iter()
                .map(|(pattern, replacement)| {
                    let regex = Regex::new(pattern).map_err(|source| ImportError::InvalidRegex {
                        key: key.to_string(),
                        pattern: pattern.clone(),
                        source,
                    })?;
                    Ok(Pattern {
                        regex,
                        replacement: normalize_template(replacement),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Action::ModifyValue(ValueMap {
                direct: value_mapping.clone(),
                patterns,
            })
        }
    })
}

/// Rewrite `\1`-style back-references as `${1}`.
fn normalize_template(template: &str) -> String {
    BACKREF
        .replace_all(template, |caps: &Captures| format!("${{{}}}", &caps[1]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::config::Config;

    fn rules(yaml: &str) -> RuleSet {
        Config::from_yaml_str(yaml, Path::new("t.yaml")).unwrap().rules
    }

    const YAML: &str = r#"
metadata_rules:
  Created:
    actions:
      - type: retain
  Created time:
    actions:
      - type: delete
  Status:
    actions:
      - type: rename
        new_name: state
      - type: append_after
        content: "!"
      - type: modify_value
        value_mapping:
          Done: finished
        regex_mapping:
          - ["^v(\\d+)\\.(\\d+)$", "\\2.\\1"]
          - ["^In ", "ongoing"]
"#;

    #[test]
    fn resolve_prefers_exact_then_longest_prefix() {
        let set = rules(YAML);
        assert_eq!(set.resolve("Created").unwrap().key, "Created");
        assert_eq!(set.resolve("Created time").unwrap().key, "Created time");
        assert_eq!(set.resolve("Created time (UTC)").unwrap().key, "Created time");
        assert_eq!(set.resolve("Createdby").unwrap().key, "Created");
        assert!(set.resolve("Owner").is_none());
    }

    #[test]
    fn pipeline_runs_modify_then_append_then_rename() {
        let set = rules(YAML);
        let rule = set.resolve("Status").unwrap();
        let kinds: Vec<u8> = rule
            .pipeline()
            .into_iter()
            .filter_map(Action::pipeline_rank)
            .collect();
        assert_eq!(kinds, vec![0, 1, 2]);

        let field = rule
            .pipeline()
            .into_iter()
            .try_fold(Field::new("Status", "Done"), |f, a| a.apply(f))
            .unwrap();
        assert_eq!(field, Field::new("state", "finished!"));
    }

    #[test]
    fn capturing_pattern_substitutes_groups() {
        let set = rules(YAML);
        let map = set.resolve("Status").unwrap().value_maps().next().unwrap();
        assert_eq!(map.apply("v1.2"), ValueOutcome::Pattern("2.1".into()));
    }

    #[test]
    fn non_capturing_pattern_replaces_whole_value() {
        let set = rules(YAML);
        let map = set.resolve("Status").unwrap().value_maps().next().unwrap();
        assert_eq!(
            map.apply("In review"),
            ValueOutcome::Pattern("ongoing".into())
        );
        assert_eq!(map.apply("Blocked"), ValueOutcome::Unmatched);
        assert!(map.covers("Done"));
        assert!(!map.covers("Blocked"));
    }

    #[test]
    fn delete_and_retain_flags() {
        let set = rules(YAML);
        assert!(set.resolve("Created time").unwrap().deletes());
        assert!(set.resolve("Created").unwrap().retain_only());
        assert!(!set.resolve("Status").unwrap().retain_only());
    }

    #[test]
    fn field_parse_splits_on_first_separator() {
        let field = Field::parse("URL: https://example.com: x ").unwrap();
        assert_eq!(field.key, "URL");
        assert_eq!(field.value, "https://example.com: x");
        assert!(Field::parse("no separator").is_none());
    }

    #[test]
    fn template_backrefs_are_normalized() {
        assert_eq!(normalize_template(r"\1-\2"), "${1}-${2}");
        assert_eq!(normalize_template("$1 stays"), "$1 stays");
    }
}
