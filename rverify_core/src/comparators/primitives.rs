use super::{finalize, text_matches, Comparator};
use crate::rules::CompiledRules;
use rverify_common::{ContentType, DiffEntry, ResultType, VerifyError};

pub(crate) const VALUE_LOCATOR: &str = "value";

/// Scalar equality after rule preparation
pub struct PrimitivesComparator;

impl Comparator for PrimitivesComparator {
    fn content_type(&self) -> ContentType {
        ContentType::Primitives
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let mut diffs = Vec::new();
        if !text_matches(expected, actual, rules)? {
            diffs.push(
                DiffEntry::new(ResultType::Modified)
                    .expected(VALUE_LOCATOR, Some(expected.to_string()))
                    .actual(VALUE_LOCATOR, Some(actual.to_string()))
                    .at(VALUE_LOCATOR),
            );
        }
        Ok(finalize(diffs, rules))
    }
}
