//! Rule language: string-encoded rules compiled once per comparison call.

pub mod column_check;
pub mod path;
pub mod primary_key;
pub mod regexp;
pub mod remap;

pub use column_check::{ColumnCheckRule, ColumnOperator};
pub use path::PathPattern;
pub use primary_key::PrimaryKeySpec;
pub use regexp::{PatternCache, RegexFlag, RegexpRule, RegexpRules};
pub use remap::{apply_remaps, ResultRemapRule};

use rverify_common::{keys, RuleConfig, VerifyError};
use tracing::debug;

/// A property named either plainly (`id`) or by location (`$.user.id`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertySelector {
    Name(String),
    Path(PathPattern),
}

impl PropertySelector {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.contains(['/', '.', '$', '[']) {
            PropertySelector::Path(PathPattern::parse(spec))
        } else {
            PropertySelector::Name(spec.to_string())
        }
    }

    /// `key` is the property name, `locator` its full location.
    pub fn matches(&self, key: &str, locator: &str) -> bool {
        match self {
            PropertySelector::Name(name) => name == key,
            PropertySelector::Path(pattern) => pattern.matches_exact(locator),
        }
    }

    fn to_lowercase(&self) -> Self {
        match self {
            PropertySelector::Name(name) => PropertySelector::Name(name.to_lowercase()),
            PropertySelector::Path(pattern) => PropertySelector::Path(pattern.to_lowercase()),
        }
    }
}

/// Every rule of one comparison call in compiled form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledRules {
    pub regexps: RegexpRules,
    pub remaps: Vec<ResultRemapRule>,
    pub column_checks: Vec<ColumnCheckRule>,
    pub primary_keys: Vec<PrimaryKeySpec>,
    pub ignore_properties: Vec<PropertySelector>,
    pub mandatory_attributes: Vec<PropertySelector>,
    pub ignore_values: Vec<PropertySelector>,
    pub ignore_array_order: bool,
    pub case_insensitive_keys: bool,
    pub schema_validation: bool,
    pub skip_type_check_for_regex: bool,
    pub find_er_in_ar: bool,
    pub patterns: PatternCache,
}

impl CompiledRules {
    /// Compile a rule configuration. Any malformed rule fails the whole set,
    /// except column checks, which are skipped individually.
    pub fn compile(config: &RuleConfig) -> Result<Self, VerifyError> {
        let regexps = RegexpRules::compile(
            config.get_all(keys::CHECK),
            config.get_all(keys::IGNORE),
            config.get_all(keys::REPLACE),
            config.get_all(keys::REPLACEMENT),
        )?;

        let mut remaps = config
            .get_all(keys::CHANGE_RESULT)
            .iter()
            .map(|spec| ResultRemapRule::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;
        for block in config.get_all(keys::CHANGE_RESULT_LEGACY) {
            remaps.extend(ResultRemapRule::parse_legacy(block)?);
        }

        let column_checks = config
            .get_all(keys::CHECK_COLUMN)
            .iter()
            .filter_map(|spec| ColumnCheckRule::parse(spec))
            .collect();

        let case_insensitive_keys = config.flag(keys::CASE_INSENSITIVE_KEYS);

        let mut primary_keys = config
            .get_all(keys::PRIMARY_KEY)
            .iter()
            .map(|spec| PrimaryKeySpec::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let selectors = |key: &str| -> Vec<PropertySelector> {
            config
                .get_all(key)
                .iter()
                .flat_map(|value| value.split(','))
                .filter(|s| !s.trim().is_empty())
                .map(PropertySelector::parse)
                .collect()
        };
        let mut ignore_properties = selectors(keys::IGNORE_PROPERTIES);
        let mut mandatory_attributes = selectors(keys::MANDATORY_ATTRIBUTES);
        let mut ignore_values = selectors(keys::IGNORE_VALUES);

        if case_insensitive_keys {
            primary_keys = primary_keys.iter().map(PrimaryKeySpec::to_lowercase).collect();
            for list in [
                &mut ignore_properties,
                &mut mandatory_attributes,
                &mut ignore_values,
            ] {
                *list = list.iter().map(PropertySelector::to_lowercase).collect();
            }
        }

        let rules = Self {
            regexps,
            remaps,
            column_checks,
            primary_keys,
            ignore_properties,
            mandatory_attributes,
            ignore_values,
            ignore_array_order: config.flag(keys::IGNORE_ARRAY_ORDER),
            case_insensitive_keys,
            schema_validation: config.flag(keys::SCHEMA_VALIDATION),
            skip_type_check_for_regex: config.flag(keys::SKIP_TYPE_CHECK_FOR_REGEX),
            find_er_in_ar: config.flag(keys::FIND_ER_IN_AR),
            patterns: PatternCache::default(),
        };
        debug!(
            "Compiled rules: {} remap(s), {} primary key(s), {} column check(s)",
            rules.remaps.len(),
            rules.primary_keys.len(),
            rules.column_checks.len()
        );
        Ok(rules)
    }

    /// First primary key covering the collection at `locator`
    pub fn primary_key_for(&self, locator: &str) -> Option<&PrimaryKeySpec> {
        self.primary_keys.iter().find(|pk| pk.applies_to(locator))
    }

    pub fn is_property_ignored(&self, key: &str, locator: &str) -> bool {
        self.ignore_properties.iter().any(|s| s.matches(key, locator))
    }

    pub fn is_value_ignored(&self, key: &str, locator: &str) -> bool {
        self.ignore_values.iter().any(|s| s.matches(key, locator))
    }

    pub fn is_mandatory(&self, key: &str, locator: &str) -> bool {
        self.mandatory_attributes.iter().any(|s| s.matches(key, locator))
    }

    /// Path-qualified mandatory properties whose parent is `parent`, as (name, locator).
    /// `child_locator` builds the locator of a named child of `parent`.
    pub fn mandatory_children<F>(&self, parent: &str, child_locator: F) -> Vec<(String, String)>
    where
        F: Fn(&str) -> String,
    {
        self.mandatory_attributes
            .iter()
            .filter_map(|selector| match selector {
                PropertySelector::Path(pattern) => {
                    let name = pattern.last_name()?;
                    let locator = child_locator(name);
                    pattern
                        .matches_exact(&locator)
                        .then(|| (name.to_string(), locator))
                }
                PropertySelector::Name(_) => None,
            })
            .filter(|(_, locator)| locator != parent)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rverify_common::codes;

    fn sample_config() -> RuleConfig {
        RuleConfig::new()
            .with(keys::IGNORE, r"\s+/flags:MULTILINE")
            .with(keys::REPLACE, "colou?r")
            .with(keys::REPLACEMENT, "color")
            .with(keys::CHANGE_RESULT, "MODIFIED=SIMILAR=$.price")
            .with(keys::CHECK_COLUMN, "status=EQUALS=OK")
            .with(keys::CHECK_COLUMN, "broken")
            .with(keys::PRIMARY_KEY, "$.users[id]")
            .with(keys::IGNORE_PROPERTIES, "timestamp,$.meta.trace")
            .with(keys::IGNORE_ARRAY_ORDER, "true")
    }

    #[test]
    fn test_empty_config_yields_defaults() {
        let rules = CompiledRules::compile(&RuleConfig::new()).unwrap();
        assert_eq!(rules, CompiledRules::default());
        assert!(rules.primary_key_for("$.users").is_none());
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let config = sample_config();
        let first = CompiledRules::compile(&config).unwrap();
        let second = CompiledRules::compile(&config).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.column_checks.len(), 1);
        assert_eq!(first.ignore_properties.len(), 2);
        assert!(first.ignore_array_order);
    }

    #[test]
    fn test_one_bad_rule_fails_everything() {
        let config = sample_config().with(keys::IGNORE, "([");
        let err = CompiledRules::compile(&config).unwrap_err();
        assert_eq!(err.code(), codes::REGEXP_SYNTAX);
    }

    #[test]
    fn test_selectors() {
        let rules = CompiledRules::compile(&sample_config()).unwrap();
        assert!(rules.is_property_ignored("timestamp", "$.a.timestamp"));
        assert!(rules.is_property_ignored("trace", "$.meta.trace"));
        assert!(!rules.is_property_ignored("trace", "$.other.trace"));
    }

    #[test]
    fn test_case_insensitive_lowercases_selectors() {
        let config = RuleConfig::new()
            .with(keys::CASE_INSENSITIVE_KEYS, "true")
            .with(keys::IGNORE_PROPERTIES, "UserId")
            .with(keys::PRIMARY_KEY, "$.Users[Id]");
        let rules = CompiledRules::compile(&config).unwrap();
        assert!(rules.is_property_ignored("userid", "$.userid"));
        let pk = rules.primary_key_for("$.users").unwrap();
        assert_eq!(pk.fields, vec!["id"]);
    }

    #[test]
    fn test_mandatory_children() {
        let config = RuleConfig::new().with(keys::MANDATORY_ATTRIBUTES, "$.user.email");
        let rules = CompiledRules::compile(&config).unwrap();
        let found = rules.mandatory_children("$.user", |name| format!("$.user.{}", name));
        assert_eq!(found, vec![("email".to_string(), "$.user.email".to_string())]);
        assert!(rules
            .mandatory_children("$.account", |name| format!("$.account.{}", name))
            .is_empty());
    }
}
