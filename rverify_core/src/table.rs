//! Tabular data model and its JSON wire format.

use rverify_common::{ContentNode, ContentType, VerifyError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Name given to a single unnamed table
pub const DEFAULT_TABLE_NAME: &str = "Query result";

/// Named grid. Rows are plain cell sequences; column lookups go through the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_cells")]
    pub headers: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_rows")]
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            headers,
            rows,
        }
    }

    /// Widest of the header row and every data row
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn is_consistent(&self) -> bool {
        self.rows.iter().all(|row| row.len() == self.headers.len())
    }

    /// Pad headers and rows up to the widest row. Never truncates.
    pub fn expand_table_to_max_row_size(&mut self, prefix: &str) {
        let width = self.width();
        self.resize(width, prefix);
    }

    /// Set the width explicitly, truncating or padding headers and rows.
    /// Generated headers are `prefix` plus the first unused number.
    pub fn resize(&mut self, width: usize, prefix: &str) {
        self.headers.truncate(width);
        let mut counter = self.headers.len();
        while self.headers.len() < width {
            let candidate = format!("{}{}", prefix, counter);
            counter += 1;
            if self.column_index(&candidate).is_none() {
                self.headers.push(candidate);
            }
        }
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    /// Case-insensitive header lookup; `prefix.column` also matches `column`.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        let wanted = column.trim().to_lowercase();
        if let Some(idx) = self
            .headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
        {
            return Some(idx);
        }
        let unqualified = |name: &str| -> String {
            let name = name.trim().to_lowercase();
            match name.rsplit_once('.') {
                Some((_, suffix)) => suffix.to_string(),
                None => name,
            }
        };
        let wanted = unqualified(column);
        self.headers.iter().position(|h| unqualified(h) == wanted)
    }

    /// Cell of `row` under `column`, `row` being one of this table's rows.
    pub fn cell<'r>(&self, row: &'r [String], column: &str) -> Option<&'r str> {
        let idx = self.column_index(column)?;
        row.get(idx).map(String::as_str)
    }

    /// Every cell as `(row, column, value)`
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &str)> + '_ {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .map(move |(c, value)| (r, c, value.as_str()))
        })
    }

    pub fn row_locator(&self, row: usize) -> String {
        format!("{}/row[{}]", self.name, row)
    }

    pub fn column_locator(&self, column: usize) -> String {
        format!("{}/column[{}]", self.name, column)
    }

    pub fn cell_locator(&self, row: usize, column: usize) -> String {
        format!("{}/row[{}]/column[{}]", self.name, row, column)
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn deserialize_cells<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let cells = Vec::<Value>::deserialize(deserializer)?;
    Ok(cells.into_iter().map(cell_text).collect())
}

fn deserialize_rows<'de, D>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows = Vec::<Vec<Value>>::deserialize(deserializer)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(cell_text).collect())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TableDocument {
    List(Vec<Table>),
    Wrapped { tables: Vec<Table> },
    Single(SingleTable),
}

/// A lone table object must at least carry its grid.
#[derive(Deserialize)]
struct SingleTable {
    #[serde(default)]
    name: String,
    #[serde(deserialize_with = "deserialize_cells")]
    headers: Vec<String>,
    #[serde(deserialize_with = "deserialize_rows")]
    rows: Vec<Vec<String>>,
}

/// Label of an unnamed table in a list
pub fn table_label(index: usize) -> String {
    format!("table[{}]", index)
}

/// Decode a bare table list, `{"tables": [...]}` or one `{headers, rows}` object.
pub fn decode_tables(text: &str) -> Result<Vec<Table>, VerifyError> {
    let document: TableDocument = serde_json::from_str(text)
        .map_err(|e| VerifyError::malformed(format!("Not a table document: {}", e)))?;
    let tables = match document {
        TableDocument::Single(SingleTable {
            name,
            headers,
            rows,
        }) => {
            let name = if name.is_empty() {
                DEFAULT_TABLE_NAME.to_string()
            } else {
                name
            };
            vec![Table::new(name, headers, rows)]
        }
        TableDocument::List(tables) | TableDocument::Wrapped { tables } => tables
            .into_iter()
            .enumerate()
            .map(|(idx, mut table)| {
                if table.name.is_empty() {
                    table.name = table_label(idx);
                }
                table
            })
            .collect(),
    };
    Ok(tables)
}

pub fn encode_tables(tables: &[Table]) -> Result<String, VerifyError> {
    serde_json::to_string(tables).map_err(|e| VerifyError::Serialization(e.to_string()))
}

/// Leaf node holding the given tables
pub fn table_node(name: &str, tables: &[Table]) -> Result<ContentNode, VerifyError> {
    Ok(ContentNode::leaf(name, ContentType::Table, &encode_tables(tables)?))
}
