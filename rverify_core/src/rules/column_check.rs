use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOperator {
    Equals,
    NotEquals,
}

/// `column=OP=v1,v2,...`: every cell of the column must (not) be one of the values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCheckRule {
    pub column: String,
    pub operator: ColumnOperator,
    pub values: Vec<String>,
}

impl ColumnCheckRule {
    /// Malformed specs yield `None` and are skipped by the caller.
    pub fn parse(spec: &str) -> Option<Self> {
        let parts: Vec<&str> = spec.split('=').collect();
        let [column, operator, values] = parts.as_slice() else {
            warn!("Skipping column check '{}': expected column=OP=values", spec);
            return None;
        };

        let operator = match operator.trim().to_ascii_uppercase().as_str() {
            "EQUALS" => ColumnOperator::Equals,
            "NOT_EQUALS" => ColumnOperator::NotEquals,
            other => {
                warn!("Skipping column check '{}': unknown operator {}", spec, other);
                return None;
            }
        };

        let column = column.trim();
        if column.is_empty() {
            warn!("Skipping column check '{}': empty column name", spec);
            return None;
        }

        Some(Self {
            column: column.to_string(),
            operator,
            values: values.split(',').map(|v| v.trim().to_string()).collect(),
        })
    }

    /// True when the cell breaks the rule
    pub fn violates(&self, cell: &str) -> bool {
        let listed = self.values.iter().any(|v| v == cell.trim());
        match self.operator {
            ColumnOperator::Equals => !listed,
            ColumnOperator::NotEquals => listed,
        }
    }
}
