use super::path::PathPattern;
use rverify_common::{codes, VerifyError};

/// Maps a collection path to the fields identifying its elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeySpec {
    /// `None` applies to every collection
    pub path: Option<PathPattern>,
    pub fields: Vec<String>,
}

impl PrimaryKeySpec {
    /// Parse `path/keyExpr`, `path[keyExpr]` or a bare `keyExpr`; keyExpr is a comma list.
    pub fn parse(spec: &str) -> Result<Self, VerifyError> {
        let spec = spec.trim();
        let (path, key_expr) = if spec.ends_with(']') && spec.contains('[') {
            let open = spec.rfind('[').unwrap_or(0);
            (&spec[..open], &spec[open + 1..spec.len() - 1])
        } else if let Some((path, key)) = spec.rsplit_once('/') {
            (path, key)
        } else {
            ("", spec)
        };

        let fields: Vec<String> = key_expr
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        if fields.is_empty() {
            return Err(VerifyError::config(
                codes::PRIMARY_KEY,
                format!("Primary key '{}' names no key fields", spec),
            ));
        }

        let path = path.trim();
        let path = if path.is_empty() || path == "*" {
            None
        } else {
            Some(PathPattern::parse(path))
        };

        Ok(Self { path, fields })
    }

    pub fn applies_to(&self, collection: &str) -> bool {
        self.path
            .as_ref()
            .map_or(true, |pattern| pattern.matches_exact(collection))
    }

    pub(crate) fn to_lowercase(&self) -> Self {
        Self {
            path: self.path.as_ref().map(PathPattern::to_lowercase),
            fields: self.fields.iter().map(|f| f.to_lowercase()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_form() {
        let spec = PrimaryKeySpec::parse("$.users[id, region]").unwrap();
        assert_eq!(spec.fields, vec!["id", "region"]);
        assert!(spec.applies_to("$.users"));
        assert!(!spec.applies_to("$.groups"));
    }

    #[test]
    fn test_slash_form() {
        let spec = PrimaryKeySpec::parse("root/item/@code").unwrap();
        assert_eq!(spec.fields, vec!["@code"]);
        assert!(spec.applies_to("root/item"));
    }

    #[test]
    fn test_bare_key_applies_everywhere() {
        let spec = PrimaryKeySpec::parse("id").unwrap();
        assert!(spec.path.is_none());
        assert!(spec.applies_to("$.anything"));
    }

    #[test]
    fn test_empty_key_is_error() {
        assert_eq!(
            PrimaryKeySpec::parse("$.users[]").unwrap_err().code(),
            codes::PRIMARY_KEY
        );
        assert!(PrimaryKeySpec::parse("$.users/").is_err());
    }
}
