//! Content-type specific diff algorithms and the registry that dispatches to them.

pub mod json;
pub mod json_schema;
pub mod matching;
pub mod primitives;
pub mod table;
pub mod text;
pub mod xml;

pub use json::JsonComparator;
pub use primitives::PrimitivesComparator;
pub use table::{CsvComparator, TableComparator};
pub use text::{FullTextComparator, PlainTextComparator, TaskListComparator};
pub use xml::{compare_locators, XmlComparator};

use crate::rules::{apply_remaps, CompiledRules};
use rverify_common::{
    codes, renumber, ContentNode, ContentType, DiffEntry, EngineConfig, VerifyError,
};
use std::collections::HashMap;
use tracing::debug;

/// Expected values carrying this prefix are full-match regular expressions.
pub const REGEX_PREFIX: &str = "regex:";

/// One diff algorithm. Implementations hold no per-call state.
pub trait Comparator: Send + Sync {
    fn content_type(&self) -> ContentType;

    /// Compare decoded texts.
    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError>;

    /// Compare two leaf nodes of this comparator's content type.
    fn compare(
        &self,
        expected: &ContentNode,
        actual: &ContentNode,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let expected = expected.decoded_content()?;
        let actual = actual.decoded_content()?;
        self.compare_raw(&expected, &actual, rules)
    }
}

type Factory = Box<dyn Fn() -> Result<Box<dyn Comparator>, VerifyError> + Send + Sync>;

/// Static mapping from content type to comparator constructor
pub struct ComparatorRegistry {
    factories: HashMap<ContentType, Factory>,
}

impl ComparatorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Every built-in comparator. XSD has no implementation and stays unregistered.
    pub fn with_defaults(config: &EngineConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(ContentType::Primitives, || Ok(Box::new(PrimitivesComparator)));
        registry.register(ContentType::Json, || Ok(Box::new(JsonComparator)));
        registry.register(ContentType::Xml, || Ok(Box::new(XmlComparator::new(false))));
        registry.register(ContentType::MaskedXml, || Ok(Box::new(XmlComparator::new(true))));
        registry.register(ContentType::PlainText, || Ok(Box::new(PlainTextComparator)));
        registry.register(ContentType::FullText, || Ok(Box::new(FullTextComparator)));
        registry.register(ContentType::TaskList, || Ok(Box::new(TaskListComparator)));

        let prefix = config.generated_column_prefix.clone();
        registry.register(ContentType::Table, move || {
            Ok(Box::new(TableComparator::new(prefix.clone())))
        });
        let prefix = config.generated_column_prefix.clone();
        registry.register(ContentType::Csv, move || {
            Ok(Box::new(CsvComparator::new(prefix.clone())))
        });
        registry
    }

    pub fn register<F>(&mut self, content_type: ContentType, factory: F)
    where
        F: Fn() -> Result<Box<dyn Comparator>, VerifyError> + Send + Sync + 'static,
    {
        self.factories.insert(content_type, Box::new(factory));
    }

    pub fn contains(&self, content_type: ContentType) -> bool {
        self.factories.contains_key(&content_type)
    }

    /// Construct the comparator for a content type.
    pub fn get(&self, content_type: ContentType) -> Result<Box<dyn Comparator>, VerifyError> {
        let factory = self
            .factories
            .get(&content_type)
            .ok_or_else(|| VerifyError::ComparatorNotFound(content_type.to_string()))?;
        factory().map_err(|e| match e {
            VerifyError::Instantiation { .. } => e,
            other => VerifyError::Instantiation {
                content_type: content_type.to_string(),
                message: other.to_string(),
            },
        })
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::with_defaults(&EngineConfig::default())
    }
}

/// Compare one expected value with one actual value: `regex:` patterns must match
/// the whole actual text, anything else is compared after rule preparation.
pub fn text_matches(
    expected: &str,
    actual: &str,
    rules: &CompiledRules,
) -> Result<bool, VerifyError> {
    if let Some(pattern) = expected.strip_prefix(REGEX_PREFIX) {
        return rules.patterns.matches(pattern, actual);
    }
    Ok(rules.regexps.prepare(expected) == rules.regexps.prepare(actual))
}

/// Apply result remapping as the last pass and number the entries.
pub fn finalize(mut diffs: Vec<DiffEntry>, rules: &CompiledRules) -> Vec<DiffEntry> {
    apply_remaps(&mut diffs, &rules.remaps);
    renumber(&mut diffs);
    debug!("Comparator produced {} diff entries", diffs.len());
    diffs
}
