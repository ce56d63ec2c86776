//! Comparison dispatch and result-tree assembly.

use crate::comparators::ComparatorRegistry;
use crate::rules::CompiledRules;
use rayon::prelude::*;
use rverify_common::{
    CompareResult, CompareType, ContentNode, ContentType, DiffEntry, EngineConfig, ResultBundle,
    ResultType, RuleConfig, VerifyError,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// One expected tree and the actual trees it is compared against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparePair {
    pub expected: ContentNode,
    pub actuals: Vec<ContentNode>,
    /// Rules for this pair only, merged over the request rules
    #[serde(default)]
    pub rules: RuleConfig,
}

impl ComparePair {
    pub fn new(expected: ContentNode, actuals: Vec<ContentNode>) -> Self {
        Self {
            expected,
            actuals,
            rules: RuleConfig::new(),
        }
    }

    pub fn with_rules(mut self, rules: RuleConfig) -> Self {
        self.rules = rules;
        self
    }
}

/// Payload of a batch comparison
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    #[serde(default)]
    pub rules: RuleConfig,
    pub pairs: Vec<ComparePair>,
}

pub struct ComparisonManager {
    registry: ComparatorRegistry,
}

impl ComparisonManager {
    pub fn new(registry: ComparatorRegistry) -> Self {
        Self { registry }
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self::new(ComparatorRegistry::with_defaults(config))
    }

    pub fn registry(&self) -> &ComparatorRegistry {
        &self.registry
    }

    /// Compare every pair in parallel. Results keep input order; a failing
    /// pair leaves its siblings untouched.
    pub fn compare(
        &self,
        pairs: &[ComparePair],
        global: &RuleConfig,
    ) -> Vec<Result<CompareResult, VerifyError>> {
        let start = Instant::now();
        let results: Vec<_> = pairs
            .par_iter()
            .map(|pair| self.compare_pair(pair, global))
            .collect();
        info!(
            "Compared {} pair(s) in {:?} ({} failed)",
            pairs.len(),
            start.elapsed(),
            results.iter().filter(|r| r.is_err()).count()
        );
        results
    }

    pub fn compare_pair(
        &self,
        pair: &ComparePair,
        global: &RuleConfig,
    ) -> Result<CompareResult, VerifyError> {
        let rules = CompiledRules::compile(&global.merged(&pair.rules))?;
        let actuals: Vec<Option<&ContentNode>> = pair.actuals.iter().map(Some).collect();
        self.compare_node(&pair.expected, &actuals, &rules, None, 0)
    }

    /// Compare two decoded texts of one content type.
    pub fn compare_raw(
        &self,
        content_type: ContentType,
        expected: &str,
        actual: &str,
        rules: &RuleConfig,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let rules = CompiledRules::compile(rules)?;
        self.registry
            .get(content_type)?
            .compare_raw(expected, actual, &rules)
    }

    fn compare_node(
        &self,
        expected: &ContentNode,
        actuals: &[Option<&ContentNode>],
        rules: &CompiledRules,
        parent_id: Option<&str>,
        depth: usize,
    ) -> Result<CompareResult, VerifyError> {
        let id = match parent_id {
            Some(parent) => format!("{}/{}[{}]", parent, expected.name, expected.order),
            None => expected.name.clone(),
        };
        let composite = expected.content_type == ContentType::Container || !expected.is_leaf();
        debug!("Comparing {} against {} actual(s)", id, actuals.len());

        let mut bundles = Vec::with_capacity(actuals.len());
        let mut child_slots: Vec<Vec<Option<&ContentNode>>> =
            vec![Vec::with_capacity(actuals.len()); expected.children.len()];

        for actual in actuals {
            let Some(actual) = *actual else {
                bundles.push(ResultBundle {
                    actual: None,
                    diffs: vec![DiffEntry::new(ResultType::Missed)
                        .expected(expected.name.clone(), None)
                        .describe("No actual counterpart")],
                    result: ResultType::Missed,
                });
                for slots in child_slots.iter_mut() {
                    slots.push(None);
                }
                continue;
            };

            let diffs = if composite {
                let mapping = match_children(&expected.children, &actual.children);
                let mut diffs = Vec::new();
                for (j, child) in actual.children.iter().enumerate() {
                    if !mapping.contains(&Some(j)) {
                        diffs.push(
                            DiffEntry::new(ResultType::Extra)
                                .actual(child.name.clone(), child.content.clone())
                                .describe("No expected counterpart"),
                        );
                    }
                }
                for (slots, partner) in child_slots.iter_mut().zip(mapping) {
                    slots.push(partner.map(|j| &actual.children[j]));
                }
                rverify_common::renumber(&mut diffs);
                diffs
            } else {
                self.compare_leaf(expected, actual, rules)?
            };

            let result = ResultType::worst(diffs.iter().map(|d| d.result));
            bundles.push(ResultBundle {
                actual: Some(actual.shallow()),
                diffs,
                result,
            });
        }

        let children = expected
            .children
            .iter()
            .zip(child_slots)
            .map(|(child, slots)| self.compare_node(child, &slots, rules, Some(&id), depth + 1))
            .collect::<Result<Vec<_>, _>>()?;

        let result = ResultType::worst(
            bundles
                .iter()
                .map(|b| b.result)
                .chain(children.iter().map(|c| c.result)),
        );

        let compare_type = if !composite {
            CompareType::Simple
        } else {
            match depth {
                0 => CompareType::Process,
                1 => CompareType::TestCase,
                _ => CompareType::Step,
            }
        };

        let mut node = CompareResult {
            id,
            compare_type,
            expected: expected.shallow(),
            actual_results: bundles,
            children,
            result,
            message: None,
        };
        if result.is_difference() {
            node.message = Some(format!("{} difference(s)", node.diff_count()));
        }
        Ok(node)
    }

    fn compare_leaf(
        &self,
        expected: &ContentNode,
        actual: &ContentNode,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let comparator = self.registry.get(expected.content_type)?;
        if actual.content_type == expected.content_type {
            return comparator.compare(expected, actual, rules);
        }
        if actual.content_type.is_encoded() == expected.content_type.is_encoded() {
            let retagged = actual.with_content_type(expected.content_type);
            return comparator.compare(expected, &retagged, rules);
        }
        let expected_text = expected.decoded_content()?;
        let actual_text = actual.decoded_content()?;
        comparator.compare_raw(&expected_text, &actual_text, rules)
    }
}

/// For each expected child, the index of its actual partner: the k-th child of
/// a name pairs with the k-th actual child of that name, leftovers pair with the
/// unclaimed actual child at the same position.
fn match_children(expected: &[ContentNode], actual: &[ContentNode]) -> Vec<Option<usize>> {
    let mut claimed = vec![false; actual.len()];
    let mut mapping = vec![None; expected.len()];

    for (i, child) in expected.iter().enumerate() {
        let occurrence = expected[..i].iter().filter(|c| c.name == child.name).count();
        let partner = actual
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == child.name)
            .nth(occurrence)
            .map(|(j, _)| j);
        if let Some(j) = partner {
            claimed[j] = true;
            mapping[i] = Some(j);
        }
    }

    for (i, slot) in mapping.iter_mut().enumerate() {
        if slot.is_none() && i < actual.len() && !claimed[i] {
            claimed[i] = true;
            *slot = Some(i);
        }
    }
    mapping
}
