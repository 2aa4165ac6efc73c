//! Recursive evaluator over a working table.

use crate::expr::ast::{BinaryOp, Expr};
use crate::expr::functions::{lookup, Function};
use crate::expr::ExprError;
use crate::model::table::{WorkingRow, WorkingTable};
use crate::model::value::{parse_number, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

pub(crate) struct Evaluator<'t> {
    table: &'t WorkingTable,
}

impl<'t> Evaluator<'t> {
    pub(crate) fn new(table: &'t WorkingTable) -> Self {
        Self { table }
    }

    pub(crate) fn eval(&self, expr: &Expr, row: Option<&WorkingRow>) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Column(name) => {
                let row = row.ok_or(ExprError::NoSelection)?;
                self.table
                    .value(row, name)
                    .cloned()
                    .ok_or_else(|| ExprError::UnknownColumn(name.clone()))
            }
            Expr::Negate(inner) => match self.eval(inner, row)? {
                Value::Null => Ok(Value::Null),
                Value::Number(value) => Ok(Value::Number(-value)),
                other => Err(ExprError::Type(format!(
                    "cannot negate a {} value",
                    other.kind_name()
                ))),
            },
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, row)?;
                let right = self.eval(right, row)?;
                binary(*op, &left, &right)
            }
            Expr::Call { name, args, .. } => self.call(name, args, row),
        }
    }

    fn call(&self, name: &str, args: &[Expr], row: Option<&WorkingRow>) -> Result<Value, ExprError> {
        let spec = lookup(name).ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
        match (spec.function, args) {
            (Function::If, [condition, then, otherwise]) => {
                if self.eval(condition, row)?.is_truthy() {
                    self.eval(then, row)
                } else {
                    self.eval(otherwise, row)
                }
            }
            (Function::Round, [value]) => round(self.eval(value, row)?, Value::Number(0.0)),
            (Function::Round, [value, digits]) => {
                round(self.eval(value, row)?, self.eval(digits, row)?)
            }
            (Function::Count, []) => Ok(Value::Number(self.table.len() as f64)),
            (Function::Count, [predicate]) => {
                let mut count = 0usize;
                for each in self.table.rows() {
                    if self.eval(predicate, Some(each))?.is_truthy() {
                        count += 1;
                    }
                }
                Ok(Value::Number(count as f64))
            }
            (Function::Sum, [argument]) => {
                let numbers = self.numbers(argument)?;
                Ok(Value::Number(numbers.iter().sum()))
            }
            (Function::Min, [argument]) => Ok(self
                .numbers(argument)?
                .into_iter()
                .reduce(f64::min)
                .map_or(Value::Null, Value::Number)),
            (Function::Max, [argument]) => Ok(self
                .numbers(argument)?
                .into_iter()
                .reduce(f64::max)
                .map_or(Value::Null, Value::Number)),
            (Function::Unique, [argument]) => {
                let mut seen = HashSet::new();
                for each in self.table.rows() {
                    let value = self.eval(argument, Some(each))?;
                    if !value.is_null() {
                        seen.insert(value.display_text());
                    }
                }
                Ok(Value::Number(seen.len() as f64))
            }
            _ => Err(ExprError::Arity {
                function: spec.name.to_string(),
                expected: spec.expected_arity(),
                found: args.len(),
            }),
        }
    }

    /// Evaluates `argument` once per table row and keeps the numeric results.
    fn numbers(&self, argument: &Expr) -> Result<Vec<f64>, ExprError> {
        let mut numbers = Vec::new();
        for each in self.table.rows() {
            if let Value::Number(value) = self.eval(argument, Some(each))? {
                numbers.push(value);
            }
        }
        Ok(numbers)
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Concat => concat(left, right),
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => compare(op, left, right).map(Value::Boolean),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic(op, left, right)
        }
    }
}

fn type_error(op: BinaryOp, left: &Value, right: &Value) -> ExprError {
    ExprError::Type(format!(
        "cannot apply `{}` to {} and {}",
        op.symbol(),
        left.kind_name(),
        right.kind_name()
    ))
}

fn concat(left: &Value, right: &Value) -> Result<Value, ExprError> {
    let textual = |value: &Value| matches!(value, Value::Text(_) | Value::Null);
    if !textual(left) && !textual(right) {
        return Err(type_error(BinaryOp::Concat, left, right));
    }
    Ok(Value::Text(format!(
        "{}{}",
        left.display_text(),
        right.display_text()
    )))
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    // A blank cell reads as empty text next to text.
    match (left, right) {
        (Value::Null, Value::Text(_)) => return compare(op, &Value::text(""), right),
        (Value::Text(_), Value::Null) => return compare(op, left, &Value::text("")),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return Ok(match op {
            BinaryOp::Eq => both,
            BinaryOp::NotEq => !both,
            _ => false,
        });
    }

    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Text(b)) => {
            let b = parse_number(b).ok_or_else(|| type_error(op, left, right))?;
            a.partial_cmp(&b)
        }
        (Value::Text(a), Value::Number(b)) => {
            let a = parse_number(a).ok_or_else(|| type_error(op, left, right))?;
            a.partial_cmp(b)
        }
        _ => return Err(type_error(op, left, right)),
    };

    Ok(match (op, ordering) {
        (BinaryOp::NotEq, None) => true,
        (_, None) => false,
        (BinaryOp::Eq, Some(ord)) => ord == Ordering::Equal,
        (BinaryOp::NotEq, Some(ord)) => ord != Ordering::Equal,
        (BinaryOp::Lt, Some(ord)) => ord == Ordering::Less,
        (BinaryOp::Le, Some(ord)) => ord != Ordering::Greater,
        (BinaryOp::Gt, Some(ord)) => ord == Ordering::Greater,
        (BinaryOp::Ge, Some(ord)) => ord != Ordering::Less,
        _ => false,
    })
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (*a, *b),
        (Value::Null | Value::Number(_), Value::Null | Value::Number(_)) => return Ok(Value::Null),
        _ => return Err(type_error(op, left, right)),
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a / b
        }
        _ => return Err(type_error(op, left, right)),
    };
    Ok(Value::Number(result))
}

/// Rounds half away from zero to `digits` decimal places.
fn round(value: Value, digits: Value) -> Result<Value, ExprError> {
    let digits = match digits {
        Value::Number(digits) => digits.trunc() as i32,
        other => {
            return Err(ExprError::Type(format!(
                "round() digits must be a number, got {}",
                other.kind_name()
            )))
        }
    };
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(value) => {
            let factor = 10f64.powi(digits);
            let scaled = value * factor;
            if !scaled.is_finite() {
                // More digits than an f64 carries.
                return Ok(Value::Number(value));
            }
            if factor == 0.0 {
                return Ok(Value::Number(0.0));
            }
            Ok(Value::Number(scaled.round() / factor))
        }
        other => Err(ExprError::Type(format!(
            "round() expects a number, got {}",
            other.kind_name()
        ))),
    }
}
