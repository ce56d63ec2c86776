use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known rule keys
pub mod keys {
    pub const CHECK: &str = "check";
    pub const IGNORE: &str = "ignore";
    pub const REPLACE: &str = "replace";
    pub const REPLACEMENT: &str = "replacement";
    pub const CHANGE_RESULT: &str = "change_result";
    pub const CHANGE_RESULT_LEGACY: &str = "change_result_legacy";
    pub const CHECK_COLUMN: &str = "check_column";
    pub const PRIMARY_KEY: &str = "primary_key";
    pub const IGNORE_ARRAY_ORDER: &str = "ignore_array_order";
    pub const IGNORE_PROPERTIES: &str = "ignore_properties";
    pub const MANDATORY_ATTRIBUTES: &str = "mandatory_attributes";
    pub const IGNORE_VALUES: &str = "ignore_values";
    pub const CASE_INSENSITIVE_KEYS: &str = "case_insensitive_keys";
    pub const SCHEMA_VALIDATION: &str = "schema_validation";
    pub const SKIP_TYPE_CHECK_FOR_REGEX: &str = "skip_type_check_for_regex";
    pub const FIND_ER_IN_AR: &str = "find_er_in_ar";
}

/// Multi-valued rule configuration: key to the ordered values given for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleConfig {
    values: BTreeMap<String, Vec<String>>,
}

impl RuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value for `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(key, value);
        self
    }

    pub fn set_flag(&mut self, key: impl Into<String>, enabled: bool) -> &mut Self {
        self.add(key, if enabled { "true" } else { "false" })
    }

    /// All values for `key` in insertion order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self, key: &str) -> Option<&str> {
        self.get_all(key).last().map(String::as_str)
    }

    /// Flag value; the last value given wins
    pub fn flag(&self, key: &str) -> bool {
        self.last(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1" | "on"))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(Vec::is_empty)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Global rules extended with per-object ones: lists union, flags take the later value.
    pub fn merged(&self, local: &RuleConfig) -> RuleConfig {
        let mut merged = self.clone();
        for (key, values) in &local.values {
            merged
                .values
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
        merged
    }

    /// Parse `key=value` pairs as given on a command line.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = RuleConfig::new();
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Rule '{}' is not of the form key=value", pair))?;
            config.add(key.trim(), value);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_keep_insertion_order() {
        let config = RuleConfig::new()
            .with(keys::IGNORE, "b")
            .with(keys::IGNORE, "a")
            .with(keys::CHECK, "c");
        assert_eq!(config.get_all(keys::IGNORE), &["b".to_string(), "a".to_string()]);
        assert_eq!(config.get_all("missing").len(), 0);
    }

    #[test]
    fn test_flag_last_value_wins() {
        let mut config = RuleConfig::new();
        config.set_flag(keys::IGNORE_ARRAY_ORDER, true);
        assert!(config.flag(keys::IGNORE_ARRAY_ORDER));
        config.set_flag(keys::IGNORE_ARRAY_ORDER, false);
        assert!(!config.flag(keys::IGNORE_ARRAY_ORDER));
    }

    #[test]
    fn test_merge_unions_lists() {
        let global = RuleConfig::new().with(keys::IGNORE_PROPERTIES, "id");
        let local = RuleConfig::new()
            .with(keys::IGNORE_PROPERTIES, "ts")
            .with(keys::CASE_INSENSITIVE_KEYS, "true");
        let merged = global.merged(&local);
        assert_eq!(merged.get_all(keys::IGNORE_PROPERTIES).len(), 2);
        assert!(merged.flag(keys::CASE_INSENSITIVE_KEYS));
        assert!(!global.flag(keys::CASE_INSENSITIVE_KEYS));
    }

    #[test]
    fn test_from_pairs() {
        let config = RuleConfig::from_pairs(["ignore=\\d+", "change_result=MODIFIED=IGNORED=$.a"]).unwrap();
        assert_eq!(config.last(keys::CHANGE_RESULT), Some("MODIFIED=IGNORED=$.a"));
        assert!(RuleConfig::from_pairs(["novalue"]).is_err());
    }
}
