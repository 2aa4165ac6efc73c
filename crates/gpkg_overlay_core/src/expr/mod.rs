//! Status expression engine.
//!
//! # Responsibility
//! - Parse status expression text into a reusable syntax tree.
//! - Validate calls and column references, then evaluate against a working
//!   table, optionally with a selected row.
//! - Evaluate a plan's status rows independently of each other.
//!
//! # Invariants
//! - Evaluation never mutates the table.
//! - One failing status row never prevents its siblings from evaluating.
//! - Blank expression text evaluates to an empty string.

pub mod ast;
mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;

use crate::expr::ast::Expr;
use crate::expr::eval::Evaluator;
use crate::model::plan::StatusRow;
use crate::model::table::{WorkingRow, WorkingTable};
use crate::model::value::Value;
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ExprResult<T> = Result<T, ExprError>;

/// Errors raised while parsing or evaluating one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// Malformed syntax at a byte offset of the source text.
    Parse { position: usize, message: String },
    /// Operator or function applied to incompatible values.
    Type(String),
    UnknownColumn(String),
    UnknownFunction(String),
    Arity {
        function: String,
        expected: String,
        found: usize,
    },
    /// Row-level value requested while no row is selected.
    NoSelection,
    DivisionByZero,
}

impl ExprError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
        }
    }

    /// Stable error label used in status cells and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "ParseError",
            Self::Type(_) => "TypeError",
            Self::UnknownColumn(_) => "UnknownColumn",
            Self::UnknownFunction(_) => "UnknownFunction",
            Self::Arity { .. } => "ArityError",
            Self::NoSelection => "NoSelection",
            Self::DivisionByZero => "DivisionByZero",
        }
    }
}

impl Display for ExprError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { position, message } => {
                write!(f, "parse error at position {position}: {message}")
            }
            Self::Type(message) => write!(f, "type error: {message}"),
            Self::UnknownColumn(name) => write!(f, "unknown column \"{name}\""),
            Self::UnknownFunction(name) => write!(f, "unknown function `{name}`"),
            Self::Arity {
                function,
                expected,
                found,
            } => write!(
                f,
                "{function}() takes {expected} argument(s), {found} given"
            ),
            Self::NoSelection => write!(f, "expression reads a row value but no row is selected"),
            Self::DivisionByZero => write!(f, "division by zero"),
        }
    }
}

impl Error for ExprError {}

/// Parsed status expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Option<Expr>,
}

impl Expression {
    pub fn parse(source: &str) -> ExprResult<Self> {
        Ok(Self {
            source: source.to_string(),
            root: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax tree, or `None` for blank text.
    pub fn root(&self) -> Option<&Expr> {
        self.root.as_ref()
    }

    /// Column names referenced anywhere in the expression, in source order.
    pub fn column_references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(root) = &self.root {
            root.walk(&mut |node| {
                if let Expr::Column(name) = node {
                    if !names.contains(&name.as_str()) {
                        names.push(name.as_str());
                    }
                }
            });
        }
        names
    }

    /// Returns whether evaluation needs a selected row.
    pub fn requires_selection(&self) -> bool {
        self.root.as_ref().is_some_and(functions::requires_selection)
    }

    /// Rejects unknown functions, arity mismatches and unknown columns.
    pub fn validate(&self, table: &WorkingTable) -> ExprResult<()> {
        match &self.root {
            Some(root) => functions::validate(root, table),
            None => Ok(()),
        }
    }

    /// Validates, then evaluates against `table`. Aggregates always scan the
    /// whole table; bare column references read `row`.
    pub fn evaluate(&self, table: &WorkingTable, row: Option<&WorkingRow>) -> ExprResult<Value> {
        let Some(root) = &self.root else {
            return Ok(Value::Text(String::new()));
        };
        functions::validate(root, table)?;
        Evaluator::new(table).eval(root, row)
    }
}

/// Parses and evaluates one expression text.
pub fn evaluate(source: &str, table: &WorkingTable, row: Option<&WorkingRow>) -> ExprResult<Value> {
    Expression::parse(source)?.evaluate(table, row)
}

/// Evaluates every status row, one result per row in input order.
pub fn evaluate_status_rows(
    rows: &[StatusRow],
    table: &WorkingTable,
    selection: Option<&WorkingRow>,
) -> Vec<ExprResult<Value>> {
    let results: Vec<_> = rows
        .iter()
        .map(|status| evaluate(&status.expression, table, selection))
        .collect();
    let failed = results.iter().filter(|result| result.is_err()).count();
    debug!(
        "event=status_eval module=expr status=ok rows={} failed={} table_rows={}",
        rows.len(),
        failed,
        table.len()
    );
    results
}

/// Renders a status result for display: the value's text, or an error
/// marker such as `#ERR: TypeError`.
pub fn format_status(result: &ExprResult<Value>) -> String {
    match result {
        Ok(value) => value.display_text(),
        Err(err) => format!("#ERR: {}", err.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, evaluate_status_rows, format_status, ExprError, Expression};
    use crate::model::plan::StatusRow;
    use crate::model::schema::{Column, ColumnMode};
    use crate::model::table::{WorkingRow, WorkingTable};
    use crate::model::value::{ColumnType, FeatureId, Value};
    use std::collections::BTreeSet;

    fn table(values: &[Value]) -> WorkingTable {
        let mut table = WorkingTable::new(vec![
            Column::new("X", ColumnType::Number, ColumnMode::Editable),
            Column::new("NAME", ColumnType::Text, ColumnMode::Display),
        ]);
        for (index, value) in values.iter().enumerate() {
            table.push_row(WorkingRow {
                feature_id: FeatureId(index as i64 + 1),
                values: vec![value.clone(), Value::text(format!("n{}", index % 2))],
                edited_columns: BTreeSet::new(),
                added: false,
            });
        }
        table
    }

    fn sample() -> WorkingTable {
        table(&[
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Null,
            Value::Number(4.0),
        ])
    }

    #[test]
    fn aggregates_over_sample_column() {
        let table = sample();
        let eval = |source: &str| evaluate(source, &table, None).unwrap();
        assert_eq!(eval("sum(\"X\")"), Value::Number(7.0));
        assert_eq!(eval("unique(\"X\")"), Value::Number(3.0));
        assert_eq!(eval("count()"), Value::Number(4.0));
        assert_eq!(eval("count(\"X\" > 1)"), Value::Number(2.0));
        assert_eq!(eval("min(\"X\")"), Value::Number(1.0));
        assert_eq!(eval("max(\"X\")"), Value::Number(4.0));
        assert_eq!(eval("unique(\"NAME\")"), Value::Number(2.0));
    }

    #[test]
    fn aggregates_on_empty_table() {
        let table = table(&[]);
        assert_eq!(evaluate("sum(\"X\")", &table, None).unwrap(), Value::Number(0.0));
        assert_eq!(evaluate("max(\"X\")", &table, None).unwrap(), Value::Null);
        assert_eq!(evaluate("count()", &table, None).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn failing_status_row_does_not_block_siblings() {
        let table = sample();
        let rows = vec![
            StatusRow::new("bad", "\"X\" || 1"),
            StatusRow::new("avg", "round(sum(\"X\") / count(\"X\" > 0), 1)"),
            StatusRow::new("total", "round(sum(\"X\"), 1)"),
        ];
        let results = evaluate_status_rows(&rows, &table, None);
        assert!(matches!(results[0], Err(ExprError::NoSelection)));
        assert_eq!(results[1], Ok(Value::Number(2.3)));
        assert_eq!(results[2], Ok(Value::Number(7.0)));
        assert_eq!(format_status(&results[2]), "7");

        let selected = table.rows()[0].clone();
        let results = evaluate_status_rows(&rows, &table, Some(&selected));
        assert!(matches!(results[0], Err(ExprError::Type(_))));
        assert_eq!(format_status(&results[0]), "#ERR: TypeError");
        assert_eq!(results[2], Ok(Value::Number(7.0)));
    }

    #[test]
    fn row_scalars_read_the_selected_row() {
        let table = sample();
        let second = table.rows()[1].clone();
        assert_eq!(
            evaluate("\"X\" * 10 + 1", &table, Some(&second)).unwrap(),
            Value::Number(21.0)
        );
        assert_eq!(
            evaluate("'row ' || \"NAME\"", &table, Some(&second)).unwrap(),
            Value::text("row n1")
        );
        assert_eq!(
            evaluate("\"X\"", &table, None).unwrap_err(),
            ExprError::NoSelection
        );
    }

    #[test]
    fn if_is_lazy_and_truthiness_follows_value_rules() {
        let table = sample();
        assert_eq!(
            evaluate("if(count() > 3, 'many', 1 / 0)", &table, None).unwrap(),
            Value::text("many")
        );
        assert_eq!(
            evaluate("if('', 1, 2)", &table, None).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn validation_runs_before_evaluation() {
        let table = sample();
        assert!(matches!(
            evaluate("if(1, 2, nope())", &table, None).unwrap_err(),
            ExprError::UnknownFunction(_)
        ));
        assert!(matches!(
            evaluate("count(\"MISSING\")", &table, None).unwrap_err(),
            ExprError::UnknownColumn(_)
        ));
    }

    #[test]
    fn blank_cells_count_as_empty_text() {
        let mut table = WorkingTable::new(vec![Column::new(
            "K",
            ColumnType::Text,
            ColumnMode::Display,
        )]);
        for (index, value) in [Value::text("a"), Value::Null, Value::text("")]
            .into_iter()
            .enumerate()
        {
            table.push_row(WorkingRow {
                feature_id: FeatureId(index as i64 + 1),
                values: vec![value],
                edited_columns: BTreeSet::new(),
                added: false,
            });
        }
        assert_eq!(
            evaluate("count(\"K\" != '')", &table, None).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            evaluate("count(\"K\" = '')", &table, None).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        let table = sample();
        let negations = format!("{}1", "-".repeat(20_000));
        assert!(matches!(
            evaluate(&negations, &table, None).unwrap_err(),
            ExprError::Parse { .. }
        ));
        let parens = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert!(matches!(
            evaluate(&parens, &table, None).unwrap_err(),
            ExprError::Parse { .. }
        ));
        let chain = format!("1{}", "+1".repeat(20_000));
        assert!(matches!(
            evaluate(&chain, &table, None).unwrap_err(),
            ExprError::Parse { .. }
        ));
        assert_eq!(
            evaluate("((((-(-1)))))", &table, None).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn blank_expression_is_empty_text() {
        let table = sample();
        assert_eq!(evaluate("   ", &table, None).unwrap(), Value::text(""));
    }

    #[test]
    fn concat_with_aggregate_renders_integral_numbers() {
        let table = sample();
        assert_eq!(
            evaluate("'done: ' || count()", &table, None).unwrap(),
            Value::text("done: 4")
        );
    }

    #[test]
    fn column_references_are_deduplicated() {
        let expression = Expression::parse("sum(\"X\") + if(\"X\" > 0, \"NAME\", 'z')").unwrap();
        assert_eq!(expression.column_references(), vec!["X", "NAME"]);
        assert!(expression.requires_selection());
    }

    #[test]
    fn division_by_zero_is_reported() {
        let table = sample();
        let result = evaluate("sum(\"X\") / 0", &table, None);
        assert_eq!(format_status(&result), "#ERR: DivisionByZero");
    }
}
