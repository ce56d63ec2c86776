use crate::{codes, VerifyError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Content kind of a [`ContentNode`], also the comparator dispatch key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Primitives,
    Xml,
    MaskedXml,
    Json,
    Csv,
    Table,
    PlainText,
    FullText,
    Xsd,
    TaskList,
    /// Composite node (process, test case, step) carrying children only
    Container,
}

impl ContentType {
    pub const ALL: [ContentType; 11] = [
        ContentType::Primitives,
        ContentType::Xml,
        ContentType::MaskedXml,
        ContentType::Json,
        ContentType::Csv,
        ContentType::Table,
        ContentType::PlainText,
        ContentType::FullText,
        ContentType::Xsd,
        ContentType::TaskList,
        ContentType::Container,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Primitives => "PRIMITIVES",
            ContentType::Xml => "XML",
            ContentType::MaskedXml => "MASKED_XML",
            ContentType::Json => "JSON",
            ContentType::Csv => "CSV",
            ContentType::Table => "TABLE",
            ContentType::PlainText => "PLAIN_TEXT",
            ContentType::FullText => "FULL_TEXT",
            ContentType::Xsd => "XSD",
            ContentType::TaskList => "TASK_LIST",
            ContentType::Container => "CONTAINER",
        }
    }

    /// Primitive content is stored decoded; everything else is base64.
    pub fn is_encoded(&self) -> bool {
        !matches!(self, ContentType::Primitives | ContentType::Container)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        ContentType::ALL
            .iter()
            .find(|t| t.as_str() == normalized || t.as_str().replace('_', "") == normalized)
            .copied()
            .ok_or_else(|| VerifyError::BadRequest(format!("Unknown content type '{}'", s)))
    }
}

/// A named node of compared data: a leaf with content or a composite with children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub name: String,
    pub content_type: ContentType,
    /// Decoded for primitives, base64 for every other leaf type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContentNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub order: u32,
}

impl ContentNode {
    /// Build a leaf from decoded text, encoding it when the type requires.
    pub fn leaf(name: impl Into<String>, content_type: ContentType, text: &str) -> Self {
        let content = if content_type.is_encoded() {
            STANDARD.encode(text.as_bytes())
        } else {
            text.to_string()
        };
        Self {
            name: name.into(),
            content_type,
            content: Some(content),
            children: Vec::new(),
            external_id: None,
            order: 0,
        }
    }

    pub fn container(name: impl Into<String>, children: Vec<ContentNode>) -> Self {
        let children = children
            .into_iter()
            .enumerate()
            .map(|(idx, mut child)| {
                child.order = idx as u32;
                child
            })
            .collect();
        Self {
            name: name.into(),
            content_type: ContentType::Container,
            content: None,
            children,
            external_id: None,
            order: 0,
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Re-tag the node; the stored content is kept byte for byte.
    pub fn with_content_type(&self, content_type: ContentType) -> Self {
        let mut node = self.clone();
        node.content_type = content_type;
        node
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Copy of the node without its children
    pub fn shallow(&self) -> Self {
        Self {
            name: self.name.clone(),
            content_type: self.content_type,
            content: self.content.clone(),
            children: Vec::new(),
            external_id: self.external_id.clone(),
            order: self.order,
        }
    }

    /// Content as text, decoding base64 for encoded content types.
    pub fn decoded_content(&self) -> Result<String, VerifyError> {
        let Some(content) = &self.content else {
            return Ok(String::new());
        };
        if !self.content_type.is_encoded() {
            return Ok(content.clone());
        }
        let bytes = STANDARD.decode(content.trim()).map_err(|e| {
            VerifyError::comparison(
                codes::MALFORMED_CONTENT,
                format!("Content of '{}' is not valid base64: {}", self.name, e),
            )
        })?;
        String::from_utf8(bytes).map_err(|e| {
            VerifyError::comparison(
                codes::MALFORMED_CONTENT,
                format!("Content of '{}' is not valid UTF-8: {}", self.name, e),
            )
        })
    }
}

/// Outcome classification of a single difference or a roll-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    Success,
    Skipped,
    Ignored,
    Identical,
    Passed,
    Similar,
    Changed,
    Modified,
    ArMissed,
    ErMissed,
    Extra,
    Missed,
    Failed,
    Error,
    BrokenStepIndex,
    /// Alignment placeholder used by the highlighter only
    Hidden,
}

impl ResultType {
    pub const ALL: [ResultType; 16] = [
        ResultType::Success,
        ResultType::Skipped,
        ResultType::Ignored,
        ResultType::Identical,
        ResultType::Passed,
        ResultType::Similar,
        ResultType::Changed,
        ResultType::Modified,
        ResultType::ArMissed,
        ResultType::ErMissed,
        ResultType::Extra,
        ResultType::Missed,
        ResultType::Failed,
        ResultType::Error,
        ResultType::BrokenStepIndex,
        ResultType::Hidden,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Success => "SUCCESS",
            ResultType::Skipped => "SKIPPED",
            ResultType::Ignored => "IGNORED",
            ResultType::Identical => "IDENTICAL",
            ResultType::Passed => "PASSED",
            ResultType::Similar => "SIMILAR",
            ResultType::Changed => "CHANGED",
            ResultType::Modified => "MODIFIED",
            ResultType::ArMissed => "AR_MISSED",
            ResultType::ErMissed => "ER_MISSED",
            ResultType::Extra => "EXTRA",
            ResultType::Missed => "MISSED",
            ResultType::Failed => "FAILED",
            ResultType::Error => "ERROR",
            ResultType::BrokenStepIndex => "BROKEN_STEP_INDEX",
            ResultType::Hidden => "HIDDEN",
        }
    }

    /// Roll-up rank; `None` for results that never take part in a summary.
    pub fn severity(&self) -> Option<u8> {
        let rank = match self {
            ResultType::Ignored | ResultType::Skipped => 0,
            ResultType::Identical | ResultType::Success | ResultType::Passed => 1,
            ResultType::Similar => 2,
            ResultType::Changed => 3,
            ResultType::Extra | ResultType::ArMissed | ResultType::ErMissed => 4,
            ResultType::Missed => 5,
            ResultType::Modified => 6,
            ResultType::Failed | ResultType::BrokenStepIndex => 7,
            ResultType::Error => 8,
            ResultType::Hidden => return None,
        };
        Some(rank)
    }

    /// Worst result of the sequence, `Identical` when it holds nothing countable.
    pub fn worst<I>(results: I) -> ResultType
    where
        I: IntoIterator<Item = ResultType>,
    {
        results
            .into_iter()
            .filter_map(|r| r.severity().map(|rank| (rank, r)))
            .fold(None, |acc: Option<(u8, ResultType)>, (rank, r)| match acc {
                Some((best, _)) if best >= rank => acc,
                _ => Some((rank, r)),
            })
            .map(|(_, r)| r)
            .unwrap_or(ResultType::Identical)
    }

    /// True for outcomes a caller has to look at.
    pub fn is_difference(&self) -> bool {
        self.severity().map_or(false, |rank| rank >= 2)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        ResultType::ALL
            .iter()
            .find(|r| r.as_str() == normalized)
            .copied()
            .ok_or_else(|| {
                VerifyError::config(codes::RESULT_REMAP, format!("Unknown result type '{}'", s))
            })
    }
}

/// One reported difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub order_id: usize,
    /// Locator of the difference on the expected side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    /// Locator of the difference on the actual side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
    pub result: ResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Format-specific primary locator (JSON path, XML path, table cell)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl DiffEntry {
    pub fn new(result: ResultType) -> Self {
        Self {
            order_id: 0,
            expected_name: None,
            expected_value: None,
            actual_name: None,
            actual_value: None,
            result,
            description: None,
            path: None,
        }
    }

    pub fn expected(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.expected_name = Some(name.into());
        self.expected_value = value;
        self
    }

    pub fn actual(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.actual_name = Some(name.into());
        self.actual_value = value;
        self
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Locator used for sorting and rule matching
    pub fn locator(&self) -> Option<&str> {
        self.path
            .as_deref()
            .or(self.expected_name.as_deref())
            .or(self.actual_name.as_deref())
    }
}

/// Assign consecutive order ids in the current sequence order.
pub fn renumber(diffs: &mut [DiffEntry]) {
    for (idx, diff) in diffs.iter_mut().enumerate() {
        diff.order_id = idx;
    }
}

/// What a [`CompareResult`] node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompareType {
    Simple,
    Step,
    TestCase,
    Process,
}

/// Diff entries of one actual node at one position of the expected tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBundle {
    pub actual: Option<ContentNode>,
    pub diffs: Vec<DiffEntry>,
    pub result: ResultType,
}

/// Node of the comparison report, mirroring the expected tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub id: String,
    pub compare_type: CompareType,
    pub expected: ContentNode,
    pub actual_results: Vec<ResultBundle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CompareResult>,
    pub result: ResultType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CompareResult {
    /// Total number of diff entries in this node and all descendants
    pub fn diff_count(&self) -> usize {
        self.actual_results
            .iter()
            .map(|bundle| bundle.diffs.len())
            .sum::<usize>()
            + self.children.iter().map(|c| c.diff_count()).sum::<usize>()
    }
}

/// Labeled content produced by a reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataList {
    pub id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    pub name: String,
    pub data: Vec<ContentNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Session identifier for a comparison unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub Uuid);

impl QueueId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_encoding() {
        let json = ContentNode::leaf("body", ContentType::Json, r#"{"a":1}"#);
        assert_ne!(json.content.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(json.decoded_content().unwrap(), r#"{"a":1}"#);

        let primitive = ContentNode::leaf("count", ContentType::Primitives, "42");
        assert_eq!(primitive.content.as_deref(), Some("42"));
        assert_eq!(primitive.decoded_content().unwrap(), "42");
    }

    #[test]
    fn test_retag_keeps_bytes() {
        let node = ContentNode::leaf("body", ContentType::Json, "[1]");
        let retagged = node.with_content_type(ContentType::PlainText);
        assert_eq!(retagged.content, node.content);
        assert_eq!(retagged.content_type, ContentType::PlainText);
    }

    #[test]
    fn test_invalid_base64_is_malformed() {
        let mut node = ContentNode::leaf("body", ContentType::Xml, "<a/>");
        node.content = Some("***".to_string());
        let err = node.decoded_content().unwrap_err();
        assert_eq!(err.code(), codes::MALFORMED_CONTENT);
    }

    #[test]
    fn test_worst_ignores_hidden() {
        assert_eq!(ResultType::worst(vec![]), ResultType::Identical);
        assert_eq!(ResultType::worst(vec![ResultType::Hidden]), ResultType::Identical);
        assert_eq!(
            ResultType::worst(vec![ResultType::Extra, ResultType::Hidden, ResultType::Missed]),
            ResultType::Missed
        );
        assert_eq!(
            ResultType::worst(vec![ResultType::Modified, ResultType::Failed, ResultType::Similar]),
            ResultType::Failed
        );
        assert_eq!(
            ResultType::worst(vec![ResultType::Ignored, ResultType::Identical]),
            ResultType::Identical
        );
    }

    #[test]
    fn test_result_type_parsing() {
        assert_eq!("ar_missed".parse::<ResultType>().unwrap(), ResultType::ArMissed);
        assert_eq!(
            "BROKEN_STEP_INDEX".parse::<ResultType>().unwrap(),
            ResultType::BrokenStepIndex
        );
        assert!("WORSE".parse::<ResultType>().is_err());
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!("json".parse::<ContentType>().unwrap(), ContentType::Json);
        assert_eq!("masked-xml".parse::<ContentType>().unwrap(), ContentType::MaskedXml);
        assert_eq!("plaintext".parse::<ContentType>().unwrap(), ContentType::PlainText);
        assert!("binary".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_result_type_serde_names() {
        let json = serde_json::to_string(&ResultType::ErMissed).unwrap();
        assert_eq!(json, "\"ER_MISSED\"");
    }
}
