//! Static function table and pre-evaluation validation.
//!
//! # Invariants
//! - Names are matched case-insensitively.
//! - `validate` rejects unknown functions, arity mismatches and unknown
//!   column references before any row is evaluated.

use crate::expr::ast::Expr;
use crate::expr::ExprError;
use crate::model::table::WorkingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    If,
    Round,
    Count,
    Sum,
    Min,
    Max,
    Unique,
}

/// Where a function draws its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Operates on values of the current row.
    Row,
    /// Scans every row of the working table.
    Aggregate,
    /// Takes its scope from its arguments.
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub function: Function,
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub scope: Scope,
}

impl FunctionSpec {
    pub(crate) fn expected_arity(&self) -> String {
        if self.min_args == self.max_args {
            self.min_args.to_string()
        } else {
            format!("{}-{}", self.min_args, self.max_args)
        }
    }
}

pub const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec {
        function: Function::If,
        name: "if",
        min_args: 3,
        max_args: 3,
        scope: Scope::Either,
    },
    FunctionSpec {
        function: Function::Round,
        name: "round",
        min_args: 1,
        max_args: 2,
        scope: Scope::Row,
    },
    FunctionSpec {
        function: Function::Count,
        name: "count",
        min_args: 0,
        max_args: 1,
        scope: Scope::Aggregate,
    },
    FunctionSpec {
        function: Function::Sum,
        name: "sum",
        min_args: 1,
        max_args: 1,
        scope: Scope::Aggregate,
    },
    FunctionSpec {
        function: Function::Min,
        name: "min",
        min_args: 1,
        max_args: 1,
        scope: Scope::Aggregate,
    },
    FunctionSpec {
        function: Function::Max,
        name: "max",
        min_args: 1,
        max_args: 1,
        scope: Scope::Aggregate,
    },
    FunctionSpec {
        function: Function::Unique,
        name: "unique",
        min_args: 1,
        max_args: 1,
        scope: Scope::Aggregate,
    },
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Checks every call and column reference in `expr` against the function
/// table and the columns of `table`. Reports the first problem in
/// left-to-right order.
pub fn validate(expr: &Expr, table: &WorkingTable) -> Result<(), ExprError> {
    let mut result = Ok(());
    expr.walk(&mut |node| {
        if result.is_err() {
            return;
        }
        result = match node {
            Expr::Column(name) if table.column_index(name).is_none() => {
                Err(ExprError::UnknownColumn(name.clone()))
            }
            Expr::Call { name, args, .. } => check_call(name, args.len()),
            _ => Ok(()),
        };
    });
    result
}

fn check_call(name: &str, found: usize) -> Result<(), ExprError> {
    let spec = lookup(name).ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
    if found < spec.min_args || found > spec.max_args {
        return Err(ExprError::Arity {
            function: spec.name.to_string(),
            expected: spec.expected_arity(),
            found,
        });
    }
    Ok(())
}

/// Returns whether `expr` reads a bare column outside any aggregate call,
/// i.e. whether it needs a selected row to evaluate.
pub fn requires_selection(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) => false,
        Expr::Column(_) => true,
        Expr::Negate(inner) => requires_selection(inner),
        Expr::Binary { left, right, .. } => requires_selection(left) || requires_selection(right),
        Expr::Call { name, args, .. } => match lookup(name).map(|spec| spec.scope) {
            Some(Scope::Aggregate) => false,
            _ => args.iter().any(requires_selection),
        },
    }
}
