//! Table and CSV comparison.
//!
//! Cell differences are located as `table/row[r]/column[c]`, whole rows as
//! `table/row[r]`, whole columns as `table/column[c]`.

use super::matching::{self, Pairing};
use super::{finalize, text_matches, Comparator};
use crate::rules::{ColumnOperator, CompiledRules, PrimaryKeySpec};
use crate::table::{decode_tables, Table};
use rverify_common::{ContentType, DiffEntry, ResultType, VerifyError};
use tracing::debug;

/// Name of the table parsed from CSV text
pub const CSV_TABLE_NAME: &str = "csv";

pub struct TableComparator {
    column_prefix: String,
}

impl TableComparator {
    pub fn new(column_prefix: impl Into<String>) -> Self {
        Self {
            column_prefix: column_prefix.into(),
        }
    }

    pub fn compare_tables(
        &self,
        mut expected: Vec<Table>,
        mut actual: Vec<Table>,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        for table in expected.iter_mut().chain(actual.iter_mut()) {
            if !table.is_consistent() {
                debug!("Expanding inconsistent table '{}'", table.name);
                table.expand_table_to_max_row_size(&self.column_prefix);
            }
        }

        let er_names: Vec<_> = expected.iter().map(|t| Some(t.name.to_lowercase())).collect();
        let ar_names: Vec<_> = actual.iter().map(|t| Some(t.name.to_lowercase())).collect();
        let pairings = matching::pair_leftovers(matching::by_key(&er_names, &ar_names));

        let mut diffs = Vec::new();
        for pairing in pairings {
            match pairing {
                Pairing::Matched(i, j) => {
                    diffs.extend(compare_table(&expected[i], &actual[j], rules)?);
                }
                Pairing::ExpectedOnly(i) => {
                    let table = &expected[i];
                    diffs.push(
                        DiffEntry::new(ResultType::Missed)
                            .expected(table.name.clone(), Some(table.headers.join(",")))
                            .at(table.name.clone())
                            .describe(format!("{} row(s)", table.rows.len())),
                    );
                }
                Pairing::ActualOnly(j) => {
                    let table = &actual[j];
                    diffs.push(
                        DiffEntry::new(ResultType::Extra)
                            .actual(table.name.clone(), Some(table.headers.join(",")))
                            .at(table.name.clone())
                            .describe(format!("{} row(s)", table.rows.len())),
                    );
                }
            }
        }

        for table in &actual {
            diffs.extend(column_checks(table, rules));
        }
        Ok(finalize(diffs, rules))
    }
}

impl Comparator for TableComparator {
    fn content_type(&self) -> ContentType {
        ContentType::Table
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        self.compare_tables(decode_tables(expected)?, decode_tables(actual)?, rules)
    }
}

/// Column-mapped comparison of two paired tables.
fn compare_table(
    expected: &Table,
    actual: &Table,
    rules: &CompiledRules,
) -> Result<Vec<DiffEntry>, VerifyError> {
    let mut diffs = Vec::new();

    let mut columns = Vec::new();
    let mut mapped = vec![false; actual.headers.len()];
    for (c, header) in expected.headers.iter().enumerate() {
        let locator = expected.column_locator(c);
        if is_column_ignored(header, &locator, rules) {
            if let Some(ac) = actual.column_index(header) {
                mapped[ac] = true;
            }
            continue;
        }
        match actual.column_index(header) {
            Some(ac) if !mapped[ac] => {
                mapped[ac] = true;
                columns.push((c, ac));
            }
            _ => diffs.push(
                DiffEntry::new(ResultType::Missed)
                    .expected(locator.clone(), Some(header.clone()))
                    .at(locator),
            ),
        }
    }
    for (ac, header) in actual.headers.iter().enumerate() {
        let locator = actual.column_locator(ac);
        if mapped[ac] || is_column_ignored(header, &locator, rules) {
            continue;
        }
        diffs.push(
            DiffEntry::new(ResultType::Extra)
                .actual(locator.clone(), Some(header.clone()))
                .at(locator),
        );
    }

    let pairings = if let Some(pk) = rules.primary_key_for(&expected.name) {
        let er_keys: Vec<_> = expected.rows.iter().map(|row| row_key(expected, row, pk)).collect();
        let ar_keys: Vec<_> = actual.rows.iter().map(|row| row_key(actual, row, pk)).collect();
        matching::by_key(&er_keys, &ar_keys)
    } else if rules.ignore_array_order {
        matching::unordered(expected.rows.len(), actual.rows.len(), |i, j| {
            rows_equal(expected, i, actual, j, &columns, rules)
        })?
    } else {
        matching::positional(expected.rows.len(), actual.rows.len())
    };

    for pairing in pairings {
        match pairing {
            Pairing::Matched(i, j) => {
                for &(c, ac) in &columns {
                    let locator = expected.cell_locator(i, c);
                    if rules.is_value_ignored(&expected.headers[c], &locator) {
                        continue;
                    }
                    let e = &expected.rows[i][c];
                    let a = &actual.rows[j][ac];
                    if !text_matches(e, a, rules)? {
                        diffs.push(
                            DiffEntry::new(ResultType::Modified)
                                .expected(locator.clone(), Some(e.clone()))
                                .actual(actual.cell_locator(j, ac), Some(a.clone()))
                                .at(locator),
                        );
                    }
                }
            }
            Pairing::ExpectedOnly(i) => {
                let locator = expected.row_locator(i);
                diffs.push(
                    DiffEntry::new(ResultType::Missed)
                        .expected(locator.clone(), Some(expected.rows[i].join(",")))
                        .at(locator),
                );
            }
            Pairing::ActualOnly(j) => {
                let locator = actual.row_locator(j);
                diffs.push(
                    DiffEntry::new(ResultType::Extra)
                        .actual(locator.clone(), Some(actual.rows[j].join(",")))
                        .at(locator),
                );
            }
        }
    }
    Ok(diffs)
}

fn is_column_ignored(header: &str, locator: &str, rules: &CompiledRules) -> bool {
    let header = if rules.case_insensitive_keys {
        header.to_lowercase()
    } else {
        header.to_string()
    };
    rules.is_property_ignored(&header, locator)
}

fn row_key(table: &Table, row: &[String], pk: &PrimaryKeySpec) -> Option<String> {
    let parts = pk
        .fields
        .iter()
        .map(|field| table.cell(row, field))
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("\u{1f}"))
}

/// Row equality for multiset pairing; value-ignored cells never break a match.
fn rows_equal(
    expected: &Table,
    i: usize,
    actual: &Table,
    j: usize,
    columns: &[(usize, usize)],
    rules: &CompiledRules,
) -> Result<bool, VerifyError> {
    for &(c, ac) in columns {
        if rules.is_value_ignored(&expected.headers[c], &expected.cell_locator(i, c)) {
            continue;
        }
        if !text_matches(&expected.rows[i][c], &actual.rows[j][ac], rules)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Column-check violations of one actual table
fn column_checks(table: &Table, rules: &CompiledRules) -> Vec<DiffEntry> {
    let mut diffs = Vec::new();
    for rule in &rules.column_checks {
        let Some(c) = table.column_index(&rule.column) else {
            continue;
        };
        for (r, row) in table.rows.iter().enumerate() {
            let cell = &row[c];
            if rule.violates(cell) {
                let locator = table.cell_locator(r, c);
                let operator = match rule.operator {
                    ColumnOperator::Equals => "one of",
                    ColumnOperator::NotEquals => "none of",
                };
                diffs.push(
                    DiffEntry::new(ResultType::Modified)
                        .actual(locator.clone(), Some(cell.clone()))
                        .at(locator)
                        .describe(format!(
                            "Column '{}' must be {} [{}]",
                            rule.column,
                            operator,
                            rule.values.join(", ")
                        )),
                );
            }
        }
    }
    diffs
}

/// CSV text parsed into a single table and compared as such
pub struct CsvComparator {
    tables: TableComparator,
}

impl CsvComparator {
    pub fn new(column_prefix: impl Into<String>) -> Self {
        Self {
            tables: TableComparator::new(column_prefix),
        }
    }
}

impl Comparator for CsvComparator {
    fn content_type(&self) -> ContentType {
        ContentType::Csv
    }

    fn compare_raw(
        &self,
        expected: &str,
        actual: &str,
        rules: &CompiledRules,
    ) -> Result<Vec<DiffEntry>, VerifyError> {
        let expected = parse_csv(expected, "expected")?;
        let actual = parse_csv(actual, "actual")?;
        self.tables.compare_tables(vec![expected], vec![actual], rules)
    }
}

pub(crate) fn parse_csv(text: &str, side: &str) -> Result<Table, VerifyError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let malformed = |e: csv::Error| VerifyError::malformed(format!("The {} value is not valid CSV: {}", side, e));
    let headers = reader
        .headers()
        .map_err(malformed)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table::new(CSV_TABLE_NAME, headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::encode_tables;
    use rverify_common::{keys, RuleConfig};

    fn table(name: &str, headers: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            name,
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn table_json(name: &str, headers: &[&str], rows: &[&[&str]]) -> String {
        encode_tables(&[table(name, headers, rows)]).unwrap()
    }

    fn compare(expected: &str, actual: &str, config: RuleConfig) -> Vec<DiffEntry> {
        let rules = CompiledRules::compile(&config).unwrap();
        TableComparator::new("column_")
            .compare_raw(expected, actual, &rules)
            .unwrap()
    }

    fn results(diffs: &[DiffEntry]) -> Vec<(ResultType, &str)> {
        diffs
            .iter()
            .map(|d| (d.result, d.path.as_deref().unwrap_or("")))
            .collect()
    }

    #[test]
    fn test_positional_cells_and_rows() {
        let expected = table_json("t", &["id", "v"], &[&["1", "a"], &["2", "b"], &["3", "c"]]);
        let actual = table_json("T", &["ID", "v"], &[&["1", "a"], &["2", "x"]]);
        let diffs = compare(&expected, &actual, RuleConfig::new());
        assert_eq!(
            results(&diffs),
            vec![
                (ResultType::Modified, "t/row[1]/column[1]"),
                (ResultType::Missed, "t/row[2]"),
            ]
        );
    }

    #[test]
    fn test_primary_key_rows() {
        let expected = table_json("t", &["id", "v"], &[&["1", "a"], &["2", "b"]]);
        let actual = table_json("t", &["id", "v"], &[&["3", "c"], &["2", "b"], &["1", "z"]]);
        let diffs = compare(&expected, &actual, RuleConfig::new().with(keys::PRIMARY_KEY, "t[id]"));
        assert_eq!(
            results(&diffs),
            vec![
                (ResultType::Modified, "t/row[0]/column[1]"),
                (ResultType::Extra, "t/row[0]"),
            ]
        );
        assert_eq!(diffs[0].actual_name.as_deref(), Some("t/row[2]/column[1]"));
    }

    #[test]
    fn test_missing_and_extra_columns_and_tables() {
        let expected = encode_tables(&[
            table("a", &["x", "y"], &[&["1", "2"]]),
            table("b", &["x"], &[]),
        ])
        .unwrap();
        let actual = table_json("a", &["x", "z"], &[&["1", "3"]]);
        let diffs = compare(&expected, &actual, RuleConfig::new());
        assert_eq!(
            results(&diffs),
            vec![
                (ResultType::Missed, "a/column[1]"),
                (ResultType::Extra, "a/column[1]"),
                (ResultType::Missed, "b"),
            ]
        );
    }

    #[test]
    fn test_unordered_rows_skip_ignored_values() {
        let expected = table_json("t", &["id", "ts"], &[&["1", "09:00"], &["2", "09:01"]]);
        let actual = table_json("t", &["id", "ts"], &[&["2", "10:30"], &["1", "10:29"]]);
        let config = RuleConfig::new()
            .with(keys::IGNORE_VALUES, "ts")
            .with(keys::IGNORE_ARRAY_ORDER, "true");
        assert!(compare(&expected, &actual, config).is_empty());

        let actual = table_json("t", &["id", "ts"], &[&["3", "10:30"], &["1", "10:29"]]);
        let config = RuleConfig::new()
            .with(keys::IGNORE_VALUES, "ts")
            .with(keys::IGNORE_ARRAY_ORDER, "true");
        assert_eq!(
            results(&compare(&expected, &actual, config)),
            vec![(ResultType::Missed, "t/row[1]"), (ResultType::Extra, "t/row[0]")]
        );
    }

    #[test]
    fn test_column_checks_flag_actual_cells() {
        let table = table_json("t", &["status"], &[&["OK"], &["FAILED"]]);
        let config = RuleConfig::new()
            .with(keys::CHECK_COLUMN, "status=EQUALS=OK")
            .with(keys::CHECK_COLUMN, "status=BETWEEN=1");
        let diffs = compare(&table, &table, config);
        assert_eq!(results(&diffs), vec![(ResultType::Modified, "t/row[1]/column[0]")]);
    }

    #[test]
    fn test_inconsistent_tables_are_expanded() {
        let expected = r#"{"headers": ["a"], "rows": [["1", "2"]]}"#;
        let actual = r#"{"headers": ["a", "column_1"], "rows": [["1", "2"]]}"#;
        assert!(compare(expected, actual, RuleConfig::new()).is_empty());
    }

    #[test]
    fn test_csv() {
        let rules = CompiledRules::default();
        let csv = CsvComparator::new("column_");
        let diffs = csv
            .compare_raw("id,name\n1,ann\n2,bob\n", "id,name\n1,ann\n2,rob\n3,cid,x\n", &rules)
            .unwrap();
        assert_eq!(
            results(&diffs),
            vec![
                (ResultType::Extra, "csv/column[2]"),
                (ResultType::Modified, "csv/row[1]/column[1]"),
                (ResultType::Extra, "csv/row[2]"),
            ]
        );
    }
}
