//! Structural JSON diff.
//!
//! Locators are `$`, `$.key` and `$.key[i]`. Every entry carries the locator on
//! each side it exists on; the two may differ once elements are paired by key
//! or as a multiset.

use super::matching::{self, Pairing};
use super::{finalize, json_schema, Comparator, REGEX_PREFIX};
use crate::rules::path::{json_element, json_member};
use crate::rules::{CompiledRules, PrimaryKeySpec};
use rverify_common::{ContentType, DiffEntry, ResultType, VerifyError};
use serde_json::{Map, Number, Value};
use tracing::debug;

pub(crate) const ROOT: &str = "$";

pub struct JsonComparator;

impl Comparator for JsonComparator {
    fn content_type(&self) -> ContentType {
        ContentType::Json
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let mut expected = parse_document(expected, "expected")?;
        let mut actual = parse_document(actual, "actual")?;
        if rules.case_insensitive_keys {
            expected = lowercase_keys(expected);
            actual = lowercase_keys(actual);
        }

        let diffs = if rules.schema_validation {
            json_schema::validate(&expected, &actual, rules)?
        } else {
            let mut differ = JsonDiff::new(rules, &actual);
            differ.diff(&expected, &actual, &Location::root())?;
            differ.diffs
        };
        Ok(finalize(diffs, rules))
    }
}

pub(crate) fn parse_document(text: &str, side: &str) -> Result<Value, VerifyError> {
    serde_json::from_str(text)
        .map_err(|e| VerifyError::malformed(format!("The {} value is not valid JSON: {}", side, e)))
}

/// Lowercase every object key; colliding keys keep the value written last.
pub(crate) fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut lowered = Map::with_capacity(map.len());
            for (key, value) in map {
                lowered.insert(key.to_lowercase(), lowercase_keys(value));
            }
            Value::Object(lowered)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Display form of a value: strings unquoted, everything else compact JSON.
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Integers compare exactly; a float on either side falls back to f64.
fn numbers_equal(expected: &Number, actual: &Number) -> bool {
    if let (Some(e), Some(a)) = (expected.as_i64(), actual.as_i64()) {
        return e == a;
    }
    if let (Some(e), Some(a)) = (expected.as_u64(), actual.as_u64()) {
        return e == a;
    }
    if expected.is_f64() || actual.is_f64() {
        return match (expected.as_f64(), actual.as_f64()) {
            (Some(e), Some(a)) => e == a,
            _ => expected == actual,
        };
    }
    // one negative i64 and one u64 above i64::MAX
    false
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone)]
struct Location {
    expected: String,
    actual: String,
}

impl Location {
    fn root() -> Self {
        Self {
            expected: ROOT.to_string(),
            actual: ROOT.to_string(),
        }
    }

    fn member(&self, key: &str) -> Self {
        Self {
            expected: json_member(&self.expected, key),
            actual: json_member(&self.actual, key),
        }
    }

    fn element(&self, expected: usize, actual: usize) -> Self {
        Self {
            expected: json_element(&self.expected, expected),
            actual: json_element(&self.actual, actual),
        }
    }
}

struct JsonDiff<'a> {
    rules: &'a CompiledRules,
    actual_root: &'a Value,
    diffs: Vec<DiffEntry>,
}

impl<'a> JsonDiff<'a> {
    fn new(rules: &'a CompiledRules, actual_root: &'a Value) -> Self {
        Self {
            rules,
            actual_root,
            diffs: Vec::new(),
        }
    }

    fn diff(&mut self, expected: &Value, actual: &Value, at: &Location) -> Result<(), VerifyError> {
        match (expected, actual) {
            (Value::Object(e), Value::Object(a)) => self.diff_objects(e, a, at),
            (Value::Array(e), Value::Array(a)) => self.diff_arrays(e, a, at),
            (Value::String(pattern), _) if pattern.starts_with(REGEX_PREFIX) => {
                self.diff_pattern(&pattern[REGEX_PREFIX.len()..], expected, actual, at)
            }
            (Value::Null, Value::Null) => Ok(()),
            (Value::Bool(e), Value::Bool(a)) => {
                if e != a {
                    self.modified(expected, actual, at, None);
                }
                Ok(())
            }
            (Value::Number(e), Value::Number(a)) => {
                let equal = numbers_equal(e, a);
                if !equal {
                    self.modified(expected, actual, at, None);
                }
                Ok(())
            }
            (Value::String(e), Value::String(a)) => {
                let regexps = &self.rules.regexps;
                if regexps.prepare(e) != regexps.prepare(a) {
                    self.modified(expected, actual, at, None);
                }
                Ok(())
            }
            _ => {
                let description = format!(
                    "Type mismatch: expected {}, actual {}",
                    type_name(expected),
                    type_name(actual)
                );
                self.modified(expected, actual, at, Some(description));
                Ok(())
            }
        }
    }

    fn diff_pattern(
        &mut self,
        pattern: &str,
        expected: &Value,
        actual: &Value,
        at: &Location,
    ) -> Result<(), VerifyError> {
        if !actual.is_string() && !self.rules.skip_type_check_for_regex {
            let description = format!("Pattern expects a string, actual is {}", type_name(actual));
            self.modified(expected, actual, at, Some(description));
            return Ok(());
        }
        if !self.rules.patterns.matches(pattern, &render(actual))? {
            self.modified(expected, actual, at, Some("Value does not match pattern".to_string()));
        }
        Ok(())
    }

    fn diff_objects(
        &mut self,
        expected: &Map<String, Value>,
        actual: &Map<String, Value>,
        at: &Location,
    ) -> Result<(), VerifyError> {
        for (key, value) in expected {
            let child = at.member(key);
            match actual.get(key) {
                Some(actual_value) => {
                    if self.rules.is_property_ignored(key, &child.expected)
                        || self.rules.is_value_ignored(key, &child.expected)
                    {
                        continue;
                    }
                    self.diff(value, actual_value, &child)?;
                }
                None => self.absent(key, value, &child)?,
            }
        }

        for (key, value) in actual {
            if expected.contains_key(key) {
                continue;
            }
            let child = at.member(key);
            if self.rules.is_property_ignored(key, &child.actual) {
                continue;
            }
            self.diffs.push(
                DiffEntry::new(ResultType::Extra)
                    .actual(child.actual.clone(), Some(render(value)))
                    .at(child.actual),
            );
        }

        for (name, locator) in self
            .rules
            .mandatory_children(&at.actual, |name| json_member(&at.actual, name))
        {
            if !actual.contains_key(&name) && !expected.contains_key(&name) {
                self.diffs.push(
                    DiffEntry::new(ResultType::Failed)
                        .expected(locator.clone(), None)
                        .at(locator)
                        .describe(format!("Mandatory attribute '{}' is absent", name)),
                );
            }
        }
        Ok(())
    }

    /// An expected member with no actual counterpart.
    fn absent(&mut self, key: &str, value: &Value, at: &Location) -> Result<(), VerifyError> {
        if self.rules.is_mandatory(key, &at.expected) {
            self.diffs.push(
                DiffEntry::new(ResultType::Failed)
                    .expected(at.expected.clone(), Some(render(value)))
                    .at(at.expected.clone())
                    .describe(format!("Mandatory attribute '{}' is absent", key)),
            );
            return Ok(());
        }
        if self.rules.is_property_ignored(key, &at.expected) {
            return Ok(());
        }

        if self.rules.find_er_in_ar {
            if let Some(found) = find_member(self.actual_root, ROOT, key, value) {
                debug!("Found {} elsewhere at {}", at.expected, found);
                self.diffs.push(
                    DiffEntry::new(ResultType::Similar)
                        .expected(at.expected.clone(), Some(render(value)))
                        .actual(found.clone(), Some(render(value)))
                        .at(at.expected.clone())
                        .describe(format!("Found at {}", found)),
                );
                return Ok(());
            }
        }

        self.diffs.push(
            DiffEntry::new(ResultType::Missed)
                .expected(at.expected.clone(), Some(render(value)))
                .at(at.expected.clone()),
        );
        Ok(())
    }

    fn diff_arrays(
        &mut self,
        expected: &[Value],
        actual: &[Value],
        at: &Location,
    ) -> Result<(), VerifyError> {
        let pairings = if let Some(pk) = self.rules.primary_key_for(&at.expected) {
            let expected_keys: Vec<_> = expected.iter().map(|v| element_key(v, pk)).collect();
            let actual_keys: Vec<_> = actual.iter().map(|v| element_key(v, pk)).collect();
            matching::by_key(&expected_keys, &actual_keys)
        } else if self.rules.ignore_array_order {
            matching::unordered(expected.len(), actual.len(), |i, j| {
                self.equivalent(&expected[i], &actual[j], &at.element(i, j))
            })?
        } else {
            matching::positional(expected.len(), actual.len())
        };

        for pairing in pairings {
            match pairing {
                Pairing::Matched(i, j) => self.diff(&expected[i], &actual[j], &at.element(i, j))?,
                Pairing::ExpectedOnly(i) => {
                    let locator = json_element(&at.expected, i);
                    self.diffs.push(
                        DiffEntry::new(ResultType::Missed)
                            .expected(locator.clone(), Some(render(&expected[i])))
                            .at(locator),
                    );
                }
                Pairing::ActualOnly(j) => {
                    let locator = json_element(&at.actual, j);
                    self.diffs.push(
                        DiffEntry::new(ResultType::Extra)
                            .actual(locator.clone(), Some(render(&actual[j])))
                            .at(locator),
                    );
                }
            }
        }
        Ok(())
    }

    /// True when diffing the two values reports nothing worth attention.
    fn equivalent(&self, expected: &Value, actual: &Value, at: &Location) -> Result<bool, VerifyError> {
        let mut probe = JsonDiff::new(self.rules, self.actual_root);
        probe.diff(expected, actual, at)?;
        Ok(probe.diffs.iter().all(|d| !d.result.is_difference()))
    }

    fn modified(&mut self, expected: &Value, actual: &Value, at: &Location, description: Option<String>) {
        let mut entry = DiffEntry::new(ResultType::Modified)
            .expected(at.expected.clone(), Some(render(expected)))
            .actual(at.actual.clone(), Some(render(actual)))
            .at(at.expected.clone());
        entry.description = description;
        self.diffs.push(entry);
    }
}

/// Key of an array element: the rendered key fields joined, `None` when any is missing.
fn element_key(value: &Value, pk: &PrimaryKeySpec) -> Option<String> {
    let object = value.as_object()?;
    let parts = pk
        .fields
        .iter()
        .map(|field| object.get(field).map(render))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("\u{1f}"))
}

/// Depth-first search for a member named `key` holding `value`.
fn find_member(node: &Value, locator: &str, key: &str, value: &Value) -> Option<String> {
    match node {
        Value::Object(map) => {
            if map.get(key) == Some(value) {
                return Some(json_member(locator, key));
            }
            map.iter()
                .find_map(|(k, child)| find_member(child, &json_member(locator, k), key, value))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, child)| find_member(child, &json_element(locator, i), key, value)),
        _ => None,
    }
}
