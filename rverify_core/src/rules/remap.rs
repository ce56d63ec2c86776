use super::path::PathPattern;
use rverify_common::{codes, DiffEntry, ResultType, VerifyError};
use tracing::debug;

/// Rewrites the result of diff entries at matching locations: `OLD=NEW=path`
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRemapRule {
    /// `None` matches any result (legacy `ignore=<path>` form)
    pub from: Option<ResultType>,
    pub to: ResultType,
    pub path: PathPattern,
}

impl ResultRemapRule {
    pub fn parse(spec: &str) -> Result<Self, VerifyError> {
        let parts: Vec<&str> = spec.splitn(3, '=').collect();
        let [from, to, path] = parts.as_slice() else {
            return Err(malformed(spec));
        };
        if path.trim().is_empty() {
            return Err(malformed(spec));
        }
        Ok(Self {
            from: Some(from.parse()?),
            to: to.parse()?,
            path: PathPattern::parse(path),
        })
    }

    /// Parse the legacy multi-line form. Each line is either `OLD=NEW=paths`
    /// or `ignore=paths`, where `paths` may list several locations separated by `;`.
    pub fn parse_legacy(block: &str) -> Result<Vec<Self>, VerifyError> {
        let mut rules = Vec::new();
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (from, to, paths) = match line.split_once('=') {
                Some((head, paths)) if head.trim().eq_ignore_ascii_case("ignore") => {
                    (None, ResultType::Ignored, paths)
                }
                _ => {
                    let parts: Vec<&str> = line.splitn(3, '=').collect();
                    let [from, to, paths] = parts.as_slice() else {
                        return Err(malformed(line));
                    };
                    (Some(from.parse()?), to.parse()?, *paths)
                }
            };

            let before = rules.len();
            for path in paths.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                rules.push(Self {
                    from,
                    to,
                    path: PathPattern::parse(path),
                });
            }
            if rules.len() == before {
                return Err(malformed(line));
            }
        }
        Ok(rules)
    }

    pub fn applies(&self, diff: &DiffEntry) -> bool {
        if self.from.map_or(false, |from| from != diff.result) {
            return false;
        }
        diff.locator().map_or(false, |locator| self.path.matches(locator))
    }
}

fn malformed(spec: &str) -> VerifyError {
    VerifyError::config(
        codes::RESULT_REMAP,
        format!("Result remap rule '{}' must be OLD=NEW=path", spec),
    )
}

/// Apply rules in declaration order; a later rule sees the result of an earlier one.
pub fn apply_remaps(diffs: &mut [DiffEntry], rules: &[ResultRemapRule]) {
    if rules.is_empty() {
        return;
    }
    for diff in diffs.iter_mut() {
        for rule in rules {
            if rule.applies(diff) {
                debug!(
                    "Remapping {} -> {} at {:?}",
                    diff.result,
                    rule.to,
                    diff.locator()
                );
                diff.result = rule.to;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_rule() {
        let rule = ResultRemapRule::parse("MODIFIED=SIMILAR=$.price").unwrap();
        assert_eq!(rule.from, Some(ResultType::Modified));
        assert_eq!(rule.to, ResultType::Similar);

        let mut diffs = vec![
            DiffEntry::new(ResultType::Modified).at("$.price"),
            DiffEntry::new(ResultType::Missed).at("$.price"),
            DiffEntry::new(ResultType::Modified).at("$.name"),
        ];
        apply_remaps(&mut diffs, &[rule]);
        assert_eq!(diffs[0].result, ResultType::Similar);
        assert_eq!(diffs[1].result, ResultType::Missed);
        assert_eq!(diffs[2].result, ResultType::Modified);
    }

    #[test]
    fn test_strict_rule_errors() {
        assert_eq!(
            ResultRemapRule::parse("MODIFIED=SIMILAR").unwrap_err().code(),
            codes::RESULT_REMAP
        );
        assert_eq!(
            ResultRemapRule::parse("BETTER=SIMILAR=$.a").unwrap_err().code(),
            codes::RESULT_REMAP
        );
        assert!(ResultRemapRule::parse("MODIFIED=SIMILAR= ").is_err());
    }

    #[test]
    fn test_legacy_block() {
        let rules = ResultRemapRule::parse_legacy(
            "ignore=$.meta;$.trace\n\nEXTRA=PASSED=root/debug",
        )
        .unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].from, None);
        assert_eq!(rules[0].to, ResultType::Ignored);
        assert_eq!(rules[2].from, Some(ResultType::Extra));

        let mut diffs = vec![DiffEntry::new(ResultType::Failed).at("$.trace.id")];
        apply_remaps(&mut diffs, &rules);
        assert_eq!(diffs[0].result, ResultType::Ignored);
    }

    #[test]
    fn test_legacy_malformed_line_fails() {
        let err = ResultRemapRule::parse_legacy("ignore=$.a\nnonsense").unwrap_err();
        assert_eq!(err.code(), codes::RESULT_REMAP);
        assert!(ResultRemapRule::parse_legacy("ignore= ; ").is_err());
    }

    #[test]
    fn test_xml_parent_locator_matches() {
        let rule = ResultRemapRule::parse("MODIFIED=IGNORED=root/item/@stamp").unwrap();
        let diff = DiffEntry::new(ResultType::Modified).at("parent:root/item[3]/@stamp");
        assert!(rule.applies(&diff));
    }
}
