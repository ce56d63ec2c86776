use super::matching::{self, Pairing};
use super::{finalize, text_matches, Comparator};
use crate::rules::CompiledRules;
use rverify_common::{ContentType, DiffEntry, ResultType, VerifyError};
use similar::{capture_diff_slices, Algorithm, DiffOp};

pub(crate) const FULL_TEXT_LOCATOR: &str = "text";

pub(crate) fn line_locator(index: usize) -> String {
    format!("line[{}]", index)
}

pub(crate) fn task_locator(index: usize) -> String {
    format!("task[{}]", index)
}

/// Non-blank, trimmed lines of a task list
pub(crate) fn task_lines(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Line-based diff
pub struct PlainTextComparator;

impl Comparator for PlainTextComparator {
    fn content_type(&self) -> ContentType {
        ContentType::PlainText
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let expected = rules.regexps.prepare(expected);
        let actual = rules.regexps.prepare(actual);
        let old: Vec<&str> = expected.lines().collect();
        let new: Vec<&str> = actual.lines().collect();

        let mut diffs = Vec::new();
        let missed = |i: usize| {
            DiffEntry::new(ResultType::Missed)
                .expected(line_locator(i), Some(old[i].to_string()))
                .at(line_locator(i))
        };
        let extra = |j: usize| {
            DiffEntry::new(ResultType::Extra)
                .actual(line_locator(j), Some(new[j].to_string()))
                .at(line_locator(j))
        };

        for op in capture_diff_slices(Algorithm::Myers, &old, &new) {
            match op {
                DiffOp::Equal { .. } => {}
                DiffOp::Delete {
                    old_index, old_len, ..
                } => diffs.extend((old_index..old_index + old_len).map(missed)),
                DiffOp::Insert {
                    new_index, new_len, ..
                } => diffs.extend((new_index..new_index + new_len).map(extra)),
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    let paired = old_len.min(new_len);
                    for k in 0..paired {
                        let (i, j) = (old_index + k, new_index + k);
                        diffs.push(
                            DiffEntry::new(ResultType::Modified)
                                .expected(line_locator(i), Some(old[i].to_string()))
                                .actual(line_locator(j), Some(new[j].to_string()))
                                .at(line_locator(i)),
                        );
                    }
                    diffs.extend((old_index + paired..old_index + old_len).map(missed));
                    diffs.extend((new_index + paired..new_index + new_len).map(extra));
                }
            }
        }
        Ok(finalize(diffs, rules))
    }
}

/// Whole-text equality; any difference is one entry.
pub struct FullTextComparator;

impl Comparator for FullTextComparator {
    fn content_type(&self) -> ContentType {
        ContentType::FullText
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
                    .expected(FULL_TEXT_LOCATOR, Some(expected.to_string()))
                    .actual(FULL_TEXT_LOCATOR, Some(actual.to_string()))
                    .at(FULL_TEXT_LOCATOR),
            );
        }
        Ok(finalize(diffs, rules))
    }
}

/// Lines compared as a multiset: order does not matter, duplicates do.
pub struct TaskListComparator;

impl Comparator for TaskListComparator {
    fn content_type(&self) -> ContentType {
        ContentType::TaskList
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let old = task_lines(expected);
        let new = task_lines(actual);
        let pairings = matching::unordered(old.len(), new.len(), |i, j| {
            text_matches(old[i], new[j], rules)
        })?;

        let diffs = pairings
            .into_iter()
            .filter_map(|pairing| match pairing {
                Pairing::Matched(..) => None,
                Pairing::ExpectedOnly(i) => Some(
                    DiffEntry::new(ResultType::Missed)
                        .expected(task_locator(i), Some(old[i].to_string()))
                        .at(task_locator(i)),
                ),
                Pairing::ActualOnly(j) => Some(
                    DiffEntry::new(ResultType::Extra)
                        .actual(task_locator(j), Some(new[j].to_string()))
                        .at(task_locator(j)),
                ),
            })
            .collect();
        Ok(finalize(diffs, rules))
    }
}
