//! Validation of an actual JSON document against a simplified schema document.
//!
//! Schema leaves are type names (`string`, `number`, `integer`, `boolean`,
//! `null`, `object`, `array`, `any`) or example values whose JSON type is
//! required. Object keys may be suffixed with `?` (optional) and array-valued
//! keys with `[min..max]` cardinality bounds. A schema array describes its
//! elements with its first item; an empty schema array admits no elements.

use super::json::{render, type_name};
use crate::rules::path::{json_element, json_member};
use crate::rules::CompiledRules;
use rverify_common::{codes, DiffEntry, ResultType, VerifyError};
use serde_json::{Map, Value};

const ROOT: &str = super::json::ROOT;

/// Number of elements admitted by an array declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cardinality {
    pub min: usize,
    pub max: Option<usize>,
}

impl Default for Cardinality {
    fn default() -> Self {
        Self { min: 0, max: None }
    }
}

impl Cardinality {
    /// Parse `min..max`; `max` may be empty or `*`.
    fn parse(bounds: &str, declaration: &str) -> Result<Self, VerifyError> {
        let bad = || {
            VerifyError::config(
                codes::SCHEMA_SYNTAX,
                format!("Invalid cardinality in schema key '{}'", declaration),
            )
        };
        let (min, max) = bounds.split_once("..").ok_or_else(bad)?;
        let min = match min.trim() {
            "" => 0,
            digits => digits.parse().map_err(|_| bad())?,
        };
        let max = match max.trim() {
            "" | "*" => None,
            digits => Some(digits.parse().map_err(|_| bad())?),
        };
        if max.map_or(false, |max| max < min) {
            return Err(bad());
        }
        Ok(Self { min, max })
    }

    pub fn admits(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }

    fn describe(&self) -> String {
        match self.max {
            Some(max) => format!("{}..{}", self.min, max),
            None => format!("{}..", self.min),
        }
    }
}

/// A parsed schema object key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub optional: bool,
    pub cardinality: Option<Cardinality>,
}

impl PropertyDecl {
    pub fn parse(key: &str) -> Result<Self, VerifyError> {
        let mut rest = key.trim();
        let mut optional = false;
        if let Some(stripped) = rest.strip_suffix('?') {
            optional = true;
            rest = stripped;
        }

        let mut cardinality = None;
        if rest.ends_with(']') {
            let open = rest.rfind('[').ok_or_else(|| {
                VerifyError::config(
                    codes::SCHEMA_SYNTAX,
                    format!("Unbalanced brackets in schema key '{}'", key),
                )
            })?;
            cardinality = Some(Cardinality::parse(&rest[open + 1..rest.len() - 1], key)?);
            rest = &rest[..open];
        }
        if let Some(stripped) = rest.strip_suffix('?') {
            optional = true;
            rest = stripped;
        }

        if rest.is_empty() {
            return Err(VerifyError::config(
                codes::SCHEMA_SYNTAX,
                format!("Schema key '{}' has no property name", key),
            ));
        }
        Ok(Self {
            name: rest.to_string(),
            optional,
            cardinality,
        })
    }
}

pub fn validate(
    schema: &Value,
    actual: &Value,
    rules: &CompiledRules,
) -> Result<Vec<DiffEntry>, VerifyError> {
    let mut validator = SchemaValidator {
        rules,
        diffs: Vec::new(),
    };
    validator.check(schema, actual, ROOT, None)?;
    Ok(validator.diffs)
}

struct SchemaValidator<'a> {
    rules: &'a CompiledRules,
    diffs: Vec<DiffEntry>,
}

impl SchemaValidator<'_> {
    fn check(
        &mut self,
        schema: &Value,
        actual: &Value,
        locator: &str,
        cardinality: Option<Cardinality>,
    ) -> Result<(), VerifyError> {
        match schema {
            Value::Object(properties) => match actual {
                Value::Object(fields) => self.check_object(properties, fields, locator),
                other => {
                    self.mismatch(schema, other, locator, "object");
                    Ok(())
                }
            },
            Value::Array(items) => match actual {
                Value::Array(elements) => {
                    self.check_array(items, elements, locator, cardinality.unwrap_or_default())
                }
                other => {
                    self.mismatch(schema, other, locator, "array");
                    Ok(())
                }
            },
            Value::String(name) if is_type_name(name) => {
                if !type_matches(name, actual) {
                    self.mismatch(schema, actual, locator, name);
                }
                Ok(())
            }
            example => {
                if type_name(example) != type_name(actual) {
                    self.mismatch(schema, actual, locator, type_name(example));
                }
                Ok(())
            }
        }
    }

    fn check_object(
        &mut self,
        properties: &Map<String, Value>,
        fields: &Map<String, Value>,
        locator: &str,
    ) -> Result<(), VerifyError> {
        let declarations = properties
            .iter()
            .map(|(key, schema)| PropertyDecl::parse(key).map(|decl| (decl, schema)))
            .collect::<Result<Vec<_>, _>>()?;

        for (decl, schema) in &declarations {
            let child = json_member(locator, &decl.name);
            if self.rules.is_property_ignored(&decl.name, &child) {
                continue;
            }
            match fields.get(&decl.name) {
                Some(value) => self.check(schema, value, &child, decl.cardinality)?,
                None if decl.optional => {}
                None => {
                    let result = if self.rules.is_mandatory(&decl.name, &child) {
                        ResultType::Failed
                    } else {
                        ResultType::Missed
                    };
                    self.diffs.push(
                        DiffEntry::new(result)
                            .expected(child.clone(), Some(render(schema)))
                            .at(child),
                    );
                }
            }
        }

        for (key, value) in fields {
            if declarations.iter().any(|(decl, _)| &decl.name == key) {
                continue;
            }
            let child = json_member(locator, key);
            if self.rules.is_property_ignored(key, &child) {
                continue;
            }
            self.diffs.push(
                DiffEntry::new(ResultType::Extra)
                    .actual(child.clone(), Some(render(value)))
                    .at(child),
            );
        }
        Ok(())
    }

    fn check_array(
        &mut self,
        items: &[Value],
        elements: &[Value],
        locator: &str,
        cardinality: Cardinality,
    ) -> Result<(), VerifyError> {
        let Some(item_schema) = items.first() else {
            for (idx, element) in elements.iter().enumerate() {
                let child = json_element(locator, idx);
                self.diffs.push(
                    DiffEntry::new(ResultType::Extra)
                        .actual(child.clone(), Some(render(element)))
                        .at(child),
                );
            }
            return Ok(());
        };

        if !cardinality.admits(elements.len()) {
            self.diffs.push(
                DiffEntry::new(ResultType::Modified)
                    .expected(locator, Some(cardinality.describe()))
                    .actual(locator, Some(elements.len().to_string()))
                    .at(locator)
                    .describe(format!(
                        "Expected {} element(s), found {}",
                        cardinality.describe(),
                        elements.len()
                    )),
            );
        }

        for (idx, element) in elements.iter().enumerate() {
            self.check(item_schema, element, &json_element(locator, idx), None)?;
        }
        Ok(())
    }

    fn mismatch(&mut self, schema: &Value, actual: &Value, locator: &str, expected_type: &str) {
        self.diffs.push(
            DiffEntry::new(ResultType::Modified)
                .expected(locator, Some(render(schema)))
                .actual(locator, Some(render(actual)))
                .at(locator)
                .describe(format!(
                    "Expected {}, found {}",
                    expected_type,
                    type_name(actual)
                )),
        );
    }
}

fn is_type_name(name: &str) -> bool {
    matches!(
        name,
        "string" | "number" | "integer" | "boolean" | "null" | "object" | "array" | "any"
    )
}

fn type_matches(name: &str, value: &Value) -> bool {
    match name {
        "any" => true,
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        other => type_name(value) == other,
    }
}
