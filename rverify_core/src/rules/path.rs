//! Locator parsing and path patterns shared by every path-driven rule.
//!
//! Locators come in two dialects: JSON (`$.store.book[0].title`, with keys that
//! need it quoted as `$['a.b']`) and slash-separated XML and table locators
//! (`root/book[0]/@id`, optionally prefixed with `parent:`). Both are reduced
//! to the same sequence of [`Segment`]s so that one pattern language serves
//! ignore lists, primary keys and result remapping.

const PARENT_PREFIX: &str = "parent:";

/// One locator step: a name and an optional index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub index: Option<String>,
}

/// Remove the `parent:` marker used by XML attribute and text locators.
pub fn strip_parent(locator: &str) -> &str {
    locator.strip_prefix(PARENT_PREFIX).unwrap_or(locator)
}

/// Split a locator into segments, ignoring `$`, `parent:` and empty steps.
/// Slash-separated locators never split on dots; names such as `v1.2` stay whole.
pub fn segments(locator: &str) -> Vec<Segment> {
    let locator = strip_parent(locator.trim());
    match locator.strip_prefix('$') {
        Some(rest) => json_segments(rest),
        None if locator.contains('/') => slash_segments(locator),
        None => json_segments(locator),
    }
}

/// `.name`, `[0]` and `['quoted.name']` steps
fn json_segments(locator: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut current: Option<Segment> = None;
    let mut chars = locator.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => out.extend(current.take()),
            '[' if chars.peek() == Some(&'\'') => {
                chars.next();
                out.extend(current.take());
                current = Some(Segment {
                    name: read_quoted(&mut chars),
                    index: None,
                });
            }
            '[' => {
                let rest: String = chars.clone().collect();
                let Some(close) = rest.find(']') else {
                    // unclosed bracket is part of the name
                    let segment = current.get_or_insert_with(|| Segment::named(""));
                    segment.name.push('[');
                    continue;
                };
                let index = rest[..close].to_string();
                for _ in 0..rest[..=close].chars().count() {
                    chars.next();
                }
                match current.take() {
                    Some(mut segment) if segment.index.is_none() => {
                        segment.index = Some(index);
                        current = Some(segment);
                    }
                    previous => {
                        out.extend(previous);
                        current = Some(Segment {
                            name: String::new(),
                            index: Some(index),
                        });
                    }
                }
            }
            other => current
                .get_or_insert_with(|| Segment::named(""))
                .name
                .push(other),
        }
    }
    out.extend(current);
    out
}

/// Body of a `['...']` step; `\'` and `\\` are escapes.
fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut name = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => name.extend(chars.next()),
            '\'' if chars.peek() == Some(&']') => {
                chars.next();
                break;
            }
            other => name.push(other),
        }
    }
    name
}

impl Segment {
    fn named(name: &str) -> Self {
        Segment {
            name: name.to_string(),
            index: None,
        }
    }
}

fn slash_segments(locator: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for raw in locator.split('/') {
        if raw.is_empty() {
            continue;
        }
        let (name, indices) = split_indices(raw);
        let mut indices = indices.into_iter();
        match indices.next() {
            Some(first) => {
                out.push(Segment {
                    name: name.to_string(),
                    index: Some(first),
                });
                for index in indices {
                    out.push(Segment {
                        name: String::new(),
                        index: Some(index),
                    });
                }
            }
            None => out.push(Segment {
                name: name.to_string(),
                index: None,
            }),
        }
    }
    out
}

/// `items[2][0]` -> (`items`, ["2", "0"]). Brackets that do not close are part of the name.
fn split_indices(raw: &str) -> (&str, Vec<String>) {
    let Some(open) = raw.find('[') else {
        return (raw, Vec::new());
    };
    if !raw.ends_with(']') {
        return (raw, Vec::new());
    }

    let name = &raw[..open];
    let mut indices = Vec::new();
    let mut rest = &raw[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(close) => {
                indices.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
            None => return (raw, Vec::new()),
        }
    }
    if !rest.is_empty() {
        return (raw, Vec::new());
    }
    (name, indices)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    /// `*`
    AnyOne,
    /// `**`
    AnyRun,
    Named {
        name: String,
        /// `None` matches any index or none
        index: Option<String>,
    },
}

/// Compiled path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn parse(source: &str) -> Self {
        let segments = segments(source)
            .into_iter()
            .map(|segment| match (segment.name.as_str(), segment.index.as_deref()) {
                ("**", None) => PatternSegment::AnyRun,
                ("*", None) => PatternSegment::AnyOne,
                (_, index) => PatternSegment::Named {
                    name: segment.name.clone(),
                    index: index.filter(|i| *i != "*").map(str::to_string),
                },
            })
            .collect();
        Self {
            source: source.trim().to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Pattern with every segment name lowercased
    pub fn to_lowercase(&self) -> Self {
        let segments = self
            .segments
            .iter()
            .map(|segment| match segment {
                PatternSegment::Named { name, index } => PatternSegment::Named {
                    name: name.to_lowercase(),
                    index: index.clone(),
                },
                other => other.clone(),
            })
            .collect();
        Self {
            source: self.source.to_lowercase(),
            segments,
        }
    }

    /// Name of the last named segment, if any
    pub fn last_name(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            PatternSegment::Named { name, .. } if !name.is_empty() => Some(name.as_str()),
            _ => None,
        })
    }

    /// True when the pattern addresses the locator or one of its ancestors.
    pub fn matches(&self, locator: &str) -> bool {
        match_from(&self.segments, &segments(locator), true)
    }

    /// True when the pattern addresses exactly the locator.
    pub fn matches_exact(&self, locator: &str) -> bool {
        match_from(&self.segments, &segments(locator), false)
    }
}

fn match_from(pattern: &[PatternSegment], locator: &[Segment], allow_prefix: bool) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return allow_prefix || locator.is_empty();
    };

    match head {
        PatternSegment::AnyRun => {
            match_from(rest, locator, allow_prefix)
                || (!locator.is_empty() && match_from(pattern, &locator[1..], allow_prefix))
        }
        PatternSegment::AnyOne => {
            !locator.is_empty() && match_from(rest, &locator[1..], allow_prefix)
        }
        PatternSegment::Named { name, index } => {
            let Some((segment, tail)) = locator.split_first() else {
                return false;
            };
            if &segment.name != name {
                return false;
            }
            if let Some(index) = index {
                if segment.index.as_deref() != Some(index.as_str()) {
                    return false;
                }
            }
            match_from(rest, tail, allow_prefix)
        }
    }
}

/// JSON child locator for an object member
pub fn json_member(parent: &str, key: &str) -> String {
    if key.is_empty() || key.contains(['.', '[', ']', '/', '\'', '\\']) {
        let escaped = key.replace('\\', "\\\\").replace('\'', "\\'");
        format!("{}['{}']", parent, escaped)
    } else {
        format!("{}.{}", parent, key)
    }
}

/// JSON child locator for an array element
pub fn json_element(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}
