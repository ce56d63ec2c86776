use regex::{Regex, RegexBuilder};
use rverify_common::{codes, VerifyError};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

const FLAGS_MARKER: &str = "/flags:";

/// Standard regex flags accepted in the `/flags:` suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexFlag {
    CaseInsensitive,
    Multiline,
    Dotall,
    Literal,
    UnicodeCase,
    UnicodeCharacterClass,
    UnixLines,
    CanonEq,
    Comments,
}

impl RegexFlag {
    fn parse(name: &str) -> Option<Self> {
        let flag = match name.trim().to_ascii_uppercase().as_str() {
            "CASE_INSENSITIVE" => RegexFlag::CaseInsensitive,
            "MULTILINE" => RegexFlag::Multiline,
            "DOTALL" => RegexFlag::Dotall,
            "LITERAL" => RegexFlag::Literal,
            "UNICODE_CASE" => RegexFlag::UnicodeCase,
            "UNICODE_CHARACTER_CLASS" => RegexFlag::UnicodeCharacterClass,
            "UNIX_LINES" => RegexFlag::UnixLines,
            "CANON_EQ" => RegexFlag::CanonEq,
            "COMMENTS" => RegexFlag::Comments,
            _ => return None,
        };
        Some(flag)
    }
}

/// A compiled `check` / `ignore` / `replace` pattern
#[derive(Debug, Clone)]
pub struct RegexpRule {
    source: String,
    flags: Vec<RegexFlag>,
    regex: Regex,
}

impl PartialEq for RegexpRule {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

impl RegexpRule {
    /// Parse `pattern` or `pattern/flags:FLAG1|FLAG2`.
    pub fn parse(spec: &str) -> Result<Self, VerifyError> {
        let (pattern, flags) = match spec.rfind(FLAGS_MARKER) {
            Some(pos) => {
                let flags = spec[pos + FLAGS_MARKER.len()..]
                    .split('|')
                    .filter(|f| !f.trim().is_empty())
                    .map(|f| {
                        RegexFlag::parse(f).ok_or_else(|| {
                            VerifyError::config(
                                codes::REGEXP_FLAG,
                                format!("Unknown regexp flag '{}' in '{}'", f.trim(), spec),
                            )
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (&spec[..pos], flags)
            }
            None => (spec, Vec::new()),
        };

        let source: Cow<'_, str> = if flags.contains(&RegexFlag::Literal) {
            Cow::Owned(regex::escape(pattern))
        } else {
            Cow::Borrowed(pattern)
        };

        let mut builder = RegexBuilder::new(&source);
        for flag in &flags {
            match flag {
                RegexFlag::CaseInsensitive => {
                    builder.case_insensitive(true);
                }
                RegexFlag::Multiline => {
                    builder.multi_line(true);
                }
                RegexFlag::Dotall => {
                    builder.dot_matches_new_line(true);
                }
                RegexFlag::Comments => {
                    builder.ignore_whitespace(true);
                }
                RegexFlag::UnicodeCase | RegexFlag::UnicodeCharacterClass => {
                    builder.unicode(true);
                }
                RegexFlag::UnixLines => {
                    builder.crlf(false);
                }
                // Literal is handled by escaping; canonical equivalence has no engine support.
                RegexFlag::Literal | RegexFlag::CanonEq => {}
            }
        }

        let regex = builder.build().map_err(|e| {
            VerifyError::config(
                codes::REGEXP_SYNTAX,
                format!("Invalid regexp '{}': {}", pattern, e),
            )
        })?;

        debug!("Compiled regexp rule '{}' with {} flag(s)", pattern, flags.len());

        Ok(Self {
            source: pattern.to_string(),
            flags,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn flags(&self) -> &[RegexFlag] {
        &self.flags
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// The text filters of one comparison call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegexpRules {
    pub check: Vec<RegexpRule>,
    pub ignore: Vec<RegexpRule>,
    pub replace: Vec<(RegexpRule, String)>,
}

impl RegexpRules {
    pub fn compile(
        check: &[String],
        ignore: &[String],
        replace: &[String],
        replacements: &[String],
    ) -> Result<Self, VerifyError> {
        if replace.len() != replacements.len() {
            return Err(VerifyError::config(
                codes::REPLACE_COUNT_MISMATCH,
                format!(
                    "{} replace pattern(s) but {} replacement(s)",
                    replace.len(),
                    replacements.len()
                ),
            ));
        }

        Ok(Self {
            check: check.iter().map(|s| RegexpRule::parse(s)).collect::<Result<_, _>>()?,
            ignore: ignore.iter().map(|s| RegexpRule::parse(s)).collect::<Result<_, _>>()?,
            replace: replace
                .iter()
                .zip(replacements)
                .map(|(p, r)| RegexpRule::parse(p).map(|rule| (rule, r.clone())))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.check.is_empty() && self.ignore.is_empty() && self.replace.is_empty()
    }

    /// Reduce text to what takes part in the comparison: `check` selects,
    /// `ignore` removes, `replace` rewrites.
    pub fn prepare<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.is_empty() {
            return Cow::Borrowed(text);
        }

        let mut result = if self.check.is_empty() {
            text.to_string()
        } else {
            self.check
                .iter()
                .flat_map(|rule| rule.regex.find_iter(text).map(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        for rule in &self.ignore {
            result = rule.regex.replace_all(&result, "").into_owned();
        }

        for (rule, replacement) in &self.replace {
            result = rule
                .regex
                .replace_all(&result, replacement.as_str())
                .into_owned();
        }

        Cow::Owned(result)
    }
}

/// Anchored `regex:` patterns met in expected documents, compiled on first use
/// and shared by every clone of the rule set.
#[derive(Debug, Clone, Default)]
pub struct PatternCache {
    compiled: Arc<RwLock<HashMap<String, Regex>>>,
}

impl PartialEq for PatternCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl PatternCache {
    /// Whether `actual` matches `pattern` in full.
    pub fn matches(&self, pattern: &str, actual: &str) -> Result<bool, VerifyError> {
        if let Ok(compiled) = self.compiled.read() {
            if let Some(regex) = compiled.get(pattern) {
                return Ok(regex.is_match(actual));
            }
        }

        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            VerifyError::config(
                codes::REGEXP_SYNTAX,
                format!("Invalid expected pattern '{}': {}", pattern, e),
            )
        })?;
        let matched = regex.is_match(actual);
        if let Ok(mut compiled) = self.compiled.write() {
            compiled.entry(pattern.to_string()).or_insert(regex);
        }
        Ok(matched)
    }

    pub fn len(&self) -> usize {
        self.compiled.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_suffix() {
        let rule = RegexpRule::parse("abc/flags:CASE_INSENSITIVE|DOTALL").unwrap();
        assert_eq!(rule.source(), "abc");
        assert_eq!(rule.flags(), &[RegexFlag::CaseInsensitive, RegexFlag::Dotall]);
        assert!(rule.regex().is_match("xABCx"));
    }

    #[test]
    fn test_literal_flag_escapes() {
        let rule = RegexpRule::parse("a.b/flags:LITERAL").unwrap();
        assert!(rule.regex().is_match("a.b"));
        assert!(!rule.regex().is_match("axb"));
    }

    #[test]
    fn test_invalid_pattern_and_flag() {
        let err = RegexpRule::parse("(unclosed").unwrap_err();
        assert_eq!(err.code(), codes::REGEXP_SYNTAX);

        let err = RegexpRule::parse("x/flags:SHOUTING").unwrap_err();
        assert_eq!(err.code(), codes::REGEXP_FLAG);
    }

    #[test]
    fn test_replace_count_mismatch() {
        let err = RegexpRules::compile(&[], &[], &["a".into(), "b".into()], &["x".into()])
            .unwrap_err();
        assert_eq!(err.code(), codes::REPLACE_COUNT_MISMATCH);
    }

    #[test]
    fn test_prepare_pipeline() {
        let rules = RegexpRules::compile(
            &[],
            &[r"\d{4}-\d{2}-\d{2}".into()],
            &["colou?r".into()],
            &["color".into()],
        )
        .unwrap();
        assert_eq!(rules.prepare("colour on 2024-01-02"), "color on ");

        let check = RegexpRules::compile(&[r"id=\d+".into()], &[], &[], &[]).unwrap();
        assert_eq!(check.prepare("x id=1 y id=22"), "id=1\nid=22");
    }

    #[test]
    fn test_pattern_cache_compiles_once() {
        let cache = PatternCache::default();
        assert!(cache.matches(r"\d+", "123").unwrap());
        assert!(!cache.matches(r"\d+", "123a").unwrap());
        assert!(cache.clone().matches(r"\d+", "7").unwrap());
        assert_eq!(cache.len(), 1);

        let err = cache.matches("(", "x").unwrap_err();
        assert_eq!(err.code(), codes::REGEXP_SYNTAX);
        assert_eq!(cache.len(), 1);
    }
}
