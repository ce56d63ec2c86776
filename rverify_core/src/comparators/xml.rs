//! XML element-tree diff.
//!
//! Elements are located as `root/child[n]`, `n` being the index among
//! same-named siblings. Attribute and text differences are reported against
//! their element as `parent:root/child[n]/@attr` and
//! `parent:root/child[n]/text()`, so that they sort next to it.

use super::matching::{self, Pairing};
use super::{finalize, text_matches, Comparator};
use crate::rules::path::strip_parent;
use crate::rules::{CompiledRules, PrimaryKeySpec};
use roxmltree::{Attribute, Document, Node};
use rverify_common::{ContentType, DiffEntry, ResultType, VerifyError};
use std::cmp::Ordering;
use std::collections::HashMap;

const PARENT_PREFIX: &str = "parent:";
const TEXT_STEP: &str = "text()";
const MASK_ANY: &str = "*";

pub struct XmlComparator {
    masked: bool,
}

impl XmlComparator {
    /// In masked mode expected attribute and text values may be `*` or `regex:` patterns.
    pub fn new(masked: bool) -> Self {
        Self { masked }
    }
}

impl Comparator for XmlComparator {
    fn content_type(&self) -> ContentType {
        if self.masked {
            ContentType::MaskedXml
        } else {
            ContentType::Xml
        }
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let expected_doc = parse_document(expected, "expected")?;
        let actual_doc = parse_document(actual, "actual")?;
        let er_root = expected_doc.root_element();
        let ar_root = actual_doc.root_element();

        let mut differ = XmlDiff {
            rules,
            masked: self.masked,
            expected_src: expected,
            actual_src: actual,
            diffs: Vec::new(),
        };

        let er_name = differ.name_of(er_root);
        let ar_name = differ.name_of(ar_root);
        if er_name == ar_name {
            differ.element(er_root, ar_root, &er_name, &ar_name)?;
        } else {
            differ.diffs.push(
                DiffEntry::new(ResultType::Modified)
                    .expected(er_name.clone(), Some(er_name.clone()))
                    .actual(ar_name.clone(), Some(ar_name))
                    .at(er_name)
                    .describe("Root elements differ"),
            );
        }

        let mut diffs = differ.diffs;
        diffs.sort_by(|a, b| {
            compare_locators(a.locator().unwrap_or(""), b.locator().unwrap_or(""))
        });
        Ok(finalize(diffs, rules))
    }
}

pub(crate) fn parse_document<'i>(text: &'i str, side: &str) -> Result<Document<'i>, VerifyError> {
    Document::parse(text)
        .map_err(|e| VerifyError::malformed(format!("The {} value is not valid XML: {}", side, e)))
}

/// `prefix:local` for a namespaced name, the bare local name otherwise.
/// Names in different namespaces never compare equal.
fn qualified_name(scope: Node<'_, '_>, namespace: Option<&str>, local: &str) -> String {
    match namespace.and_then(|uri| scope.lookup_prefix(uri)) {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, local),
        _ => local.to_string(),
    }
}

pub(crate) fn element_name(node: Node<'_, '_>) -> String {
    let tag = node.tag_name();
    qualified_name(node, tag.namespace(), tag.name())
}

pub(crate) fn attribute_name(node: Node<'_, '_>, attr: &Attribute<'_, '_>) -> String {
    qualified_name(node, attr.namespace(), attr.name())
}

/// Direct, trimmed text of an element
pub(crate) fn own_text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|child| child.is_text())
        .filter_map(|child| child.text())
        .collect::<String>()
        .trim()
        .to_string()
}

struct XmlDiff<'r> {
    rules: &'r CompiledRules,
    masked: bool,
    expected_src: &'r str,
    actual_src: &'r str,
    diffs: Vec<DiffEntry>,
}

impl XmlDiff<'_> {
    fn name_of(&self, node: Node<'_, '_>) -> String {
        self.key(&element_name(node))
    }

    fn values_match(&self, expected: &str, actual: &str) -> Result<bool, VerifyError> {
        if self.masked {
            if expected == MASK_ANY {
                return Ok(true);
            }
            return text_matches(expected, actual, self.rules);
        }
        let regexps = &self.rules.regexps;
        Ok(regexps.prepare(expected) == regexps.prepare(actual))
    }

    fn element(
        &mut self,
        expected: Node<'_, '_>,
        actual: Node<'_, '_>,
        er_loc: &str,
        ar_loc: &str,
    ) -> Result<(), VerifyError> {
        self.attributes(expected, actual, er_loc, ar_loc)?;
        self.text(expected, actual, er_loc, ar_loc)?;
        self.children(expected, actual, er_loc, ar_loc)
    }

    fn attributes(
        &mut self,
        expected: Node<'_, '_>,
        actual: Node<'_, '_>,
        er_loc: &str,
        ar_loc: &str,
    ) -> Result<(), VerifyError> {
        let actual_attrs: HashMap<String, &str> = actual
            .attributes()
            .map(|attr| (self.key(&attribute_name(actual, &attr)), attr.value()))
            .collect();
        let mut seen = Vec::new();

        for attr in expected.attributes() {
            let name = self.key(&attribute_name(expected, &attr));
            let locator = format!("{}/@{}", er_loc, name);
            seen.push(name.clone());
            match actual_attrs.get(&name) {
                None => {
                    let result = if self.is_mandatory(&name, &locator) {
                        ResultType::Failed
                    } else if self.is_ignored(&name, &locator) {
                        continue;
                    } else {
                        ResultType::Missed
                    };
                    self.diffs.push(
                        DiffEntry::new(result)
                            .expected(locator.clone(), Some(attr.value().to_string()))
                            .at(format!("{}{}", PARENT_PREFIX, locator)),
                    );
                }
                Some(value) => {
                    if self.is_ignored(&name, &locator)
                        || self.rules.is_value_ignored(&name, &locator)
                        || self.rules.is_value_ignored(&format!("@{}", name), &locator)
                    {
                        continue;
                    }
                    if !self.values_match(attr.value(), value)? {
                        let ar_attr = format!("{}/@{}", ar_loc, name);
                        self.diffs.push(
                            DiffEntry::new(ResultType::Modified)
                                .expected(locator.clone(), Some(attr.value().to_string()))
                                .actual(ar_attr, Some(value.to_string()))
                                .at(format!("{}{}", PARENT_PREFIX, locator)),
                        );
                    }
                }
            }
        }

        for attr in actual.attributes() {
            let name = self.key(&attribute_name(actual, &attr));
            if seen.contains(&name) {
                continue;
            }
            let locator = format!("{}/@{}", ar_loc, name);
            if self.is_ignored(&name, &locator) {
                continue;
            }
            self.diffs.push(
                DiffEntry::new(ResultType::Extra)
                    .actual(locator.clone(), Some(attr.value().to_string()))
                    .at(format!("{}{}", PARENT_PREFIX, locator)),
            );
        }

        for (name, locator) in self
            .rules
            .mandatory_children(ar_loc, |name| format!("{}/{}", ar_loc, name))
        {
            let Some(attr) = name.strip_prefix('@') else {
                continue;
            };
            if !actual_attrs.contains_key(attr) && !seen.iter().any(|s| s == attr) {
                self.diffs.push(
                    DiffEntry::new(ResultType::Failed)
                        .expected(locator.clone(), None)
                        .at(format!("{}{}", PARENT_PREFIX, locator))
                        .describe(format!("Mandatory attribute '{}' is absent", attr)),
                );
            }
        }
        Ok(())
    }

    fn text(
        &mut self,
        expected: Node<'_, '_>,
        actual: Node<'_, '_>,
        er_loc: &str,
        ar_loc: &str,
    ) -> Result<(), VerifyError> {
        let er_text = own_text(expected);
        let ar_text = own_text(actual);
        if er_text.is_empty() && ar_text.is_empty() {
            return Ok(());
        }
        let locator = format!("{}/{}", er_loc, TEXT_STEP);
        if self.rules.is_value_ignored(TEXT_STEP, &locator) {
            return Ok(());
        }
        if !self.values_match(&er_text, &ar_text)? {
            self.diffs.push(
                DiffEntry::new(ResultType::Modified)
                    .expected(locator.clone(), Some(er_text))
                    .actual(format!("{}/{}", ar_loc, TEXT_STEP), Some(ar_text))
                    .at(format!("{}{}", PARENT_PREFIX, locator)),
            );
        }
        Ok(())
    }

    fn children(
        &mut self,
        expected: Node<'_, '_>,
        actual: Node<'_, '_>,
        er_loc: &str,
        ar_loc: &str,
    ) -> Result<(), VerifyError> {
        let er_groups = self.group_children(expected);
        let ar_groups = self.group_children(actual);

        for (name, er_nodes) in &er_groups {
            let ar_nodes = ar_groups
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, nodes)| nodes.as_slice())
                .unwrap_or(&[]);
            self.child_group(name, er_nodes, ar_nodes, er_loc, ar_loc)?;
        }

        for (name, ar_nodes) in &ar_groups {
            if er_groups.iter().any(|(n, _)| n == name) {
                continue;
            }
            for (idx, node) in ar_nodes.iter().enumerate() {
                self.extra(*node, &format!("{}/{}[{}]", ar_loc, name, idx), name);
            }
        }

        for (name, locator) in self
            .rules
            .mandatory_children(ar_loc, |name| format!("{}/{}", ar_loc, name))
        {
            if name.starts_with('@') {
                continue;
            }
            let present = ar_groups.iter().chain(er_groups.iter()).any(|(n, _)| *n == name);
            if !present {
                self.diffs.push(
                    DiffEntry::new(ResultType::Failed)
                        .expected(locator.clone(), None)
                        .at(locator)
                        .describe(format!("Mandatory element '{}' is absent", name)),
                );
            }
        }
        Ok(())
    }

    fn child_group(
        &mut self,
        name: &str,
        expected: &[Node<'_, '_>],
        actual: &[Node<'_, '_>],
        er_loc: &str,
        ar_loc: &str,
    ) -> Result<(), VerifyError> {
        let collection = format!("{}/{}", er_loc, name);
        let pairings = if let Some(pk) = self.rules.primary_key_for(&collection) {
            let er_keys: Vec<_> = expected.iter().map(|n| self.element_key(*n, pk)).collect();
            let ar_keys: Vec<_> = actual.iter().map(|n| self.element_key(*n, pk)).collect();
            matching::by_key(&er_keys, &ar_keys)
        } else if self.rules.ignore_array_order {
            matching::unordered(expected.len(), actual.len(), |i, j| {
                self.equivalent(expected[i], actual[j], er_loc, ar_loc, name, i, j)
            })?
        } else {
            matching::positional(expected.len(), actual.len())
        };

        for pairing in pairings {
            match pairing {
                Pairing::Matched(i, j) => {
                    let er_child = format!("{}/{}[{}]", er_loc, name, i);
                    let ar_child = format!("{}/{}[{}]", ar_loc, name, j);
                    if self.is_ignored(name, &er_child) {
                        continue;
                    }
                    self.element(expected[i], actual[j], &er_child, &ar_child)?;
                }
                Pairing::ExpectedOnly(i) => {
                    let er_child = format!("{}/{}[{}]", er_loc, name, i);
                    let result = if self.is_mandatory(name, &er_child) {
                        ResultType::Failed
                    } else if self.is_ignored(name, &er_child) {
                        continue;
                    } else {
                        ResultType::Missed
                    };
                    let source = self.expected_src[expected[i].range()].to_string();
                    self.diffs.push(
                        DiffEntry::new(result)
                            .expected(er_child.clone(), Some(source))
                            .at(er_child),
                    );
                }
                Pairing::ActualOnly(j) => {
                    self.extra(actual[j], &format!("{}/{}[{}]", ar_loc, name, j), name);
                }
            }
        }
        Ok(())
    }

    fn extra(&mut self, node: Node<'_, '_>, locator: &str, name: &str) {
        if self.is_ignored(name, locator) {
            return;
        }
        let source = self.actual_src[node.range()].to_string();
        self.diffs.push(
            DiffEntry::new(ResultType::Extra)
                .actual(locator, Some(source))
                .at(locator),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn equivalent(
        &self,
        expected: Node<'_, '_>,
        actual: Node<'_, '_>,
        er_loc: &str,
        ar_loc: &str,
        name: &str,
        i: usize,
        j: usize,
    ) -> Result<bool, VerifyError> {
        let mut probe = XmlDiff {
            rules: self.rules,
            masked: self.masked,
            expected_src: self.expected_src,
            actual_src: self.actual_src,
            diffs: Vec::new(),
        };
        probe.element(
            expected,
            actual,
            &format!("{}/{}[{}]", er_loc, name, i),
            &format!("{}/{}[{}]", ar_loc, name, j),
        )?;
        Ok(probe.diffs.iter().all(|d| !d.result.is_difference()))
    }

    /// Element children grouped by name, groups in order of first appearance.
    fn group_children<'a, 'i>(&self, node: Node<'a, 'i>) -> Vec<(String, Vec<Node<'a, 'i>>)> {
        let mut groups: Vec<(String, Vec<Node<'a, 'i>>)> = Vec::new();
        for child in node.children().filter(|c| c.is_element()) {
            let name = self.name_of(child);
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, nodes)) => nodes.push(child),
                None => groups.push((name, vec![child])),
            }
        }
        groups
    }

    /// Key fields: `@attr` reads an attribute, `text()` the element text,
    /// anything else the text of the first child element of that name.
    fn element_key(&self, node: Node<'_, '_>, pk: &PrimaryKeySpec) -> Option<String> {
        let parts = pk
            .fields
            .iter()
            .map(|field| {
                if let Some(attr) = field.strip_prefix('@') {
                    node.attributes()
                        .find(|a| self.key(&attribute_name(node, a)) == attr)
                        .map(|a| a.value().to_string())
                } else if field == TEXT_STEP {
                    Some(own_text(node))
                } else {
                    node.children()
                        .find(|c| c.is_element() && self.name_of(*c) == *field)
                        .map(own_text)
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("\u{1f}"))
    }

    fn key(&self, name: &str) -> String {
        if self.rules.case_insensitive_keys {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn is_ignored(&self, name: &str, locator: &str) -> bool {
        self.rules.is_property_ignored(name, locator)
            || self.rules.is_property_ignored(&format!("@{}", name), locator)
    }

    fn is_mandatory(&self, name: &str, locator: &str) -> bool {
        self.rules.is_mandatory(name, locator)
            || self.rules.is_mandatory(&format!("@{}", name), locator)
    }
}

/// Canonical order of XML locators.
///
/// Segments are compared pairwise after dropping any `parent:` prefix: names
/// lexically first, then an unindexed segment before an indexed one, then
/// indices numerically. A path that is a prefix of another sorts first.
pub fn compare_locators(a: &str, b: &str) -> Ordering {
    let left: Vec<&str> = strip_parent(a).split('/').collect();
    let right: Vec<&str> = strip_parent(b).split('/').collect();

    for (x, y) in left.iter().zip(right.iter()) {
        let (x_name, x_index) = split_index(x);
        let (y_name, y_index) = split_index(y);
        let ordering = x_name.cmp(y_name).then_with(|| match (x_index, y_index) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(i), Some(j)) => compare_indices(i, j),
        });
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn split_index(segment: &str) -> (&str, Option<&str>) {
    match segment.find('[') {
        Some(open) if segment.ends_with(']') => {
            (&segment[..open], Some(&segment[open + 1..segment.len() - 1]))
        }
        _ => (segment, None),
    }
}

/// Numeric indices sort before non-numeric ones.
fn compare_indices(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
