use std::fmt;

use bson::Bson;

use super::enums::{Direction, FunctionCategory, JoinKind, StatementKind};
use crate::query_ast::errors::Warning;

/// A literal value after coercion from SQL text.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

impl Scalar {
    /// Integers that fit in 32 bits are emitted as Int32, matching how `bson::doc!` encodes literals.
    pub fn to_bson(&self) -> Bson {
        match self {
            Scalar::Null => Bson::Null,
            Scalar::Bool(b) => Bson::Boolean(*b),
            Scalar::Integer(i) => match i32::try_from(*i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(*i),
            },
            Scalar::Double(d) => Bson::Double(*d),
            Scalar::String(s) => Bson::String(s.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Integer(i) => Some(*i),
            // i64::MAX as f64 rounds up to 2^63, which is already out of range
            Scalar::Double(d) if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d < i64::MAX as f64 => Some(*d as i64),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool { matches!(self, Scalar::Integer(_) | Scalar::Double(_)) }

    pub fn negate(&self) -> Option<Scalar> {
        match self {
            Scalar::Integer(i) => i.checked_neg().map(Scalar::Integer),
            Scalar::Double(d) => Some(Scalar::Double(-d)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Double(d) => write!(f, "{}", d),
            Scalar::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }

    pub fn operator(&self) -> &'static str {
        match self {
            BinaryOp::Add => "$add",
            BinaryOp::Subtract => "$subtract",
            BinaryOp::Multiply => "$multiply",
            BinaryOp::Divide => "$divide",
            BinaryOp::Modulo => "$mod",
        }
    }
}

/// Expression appearing in a select list, function argument, assignment or condition operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Field(String),
    Literal(Scalar),
    Star,
    Call(FunctionCall),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Raw(String),
}

impl Expr {
    pub fn as_field(&self) -> Option<&str> { match self { Expr::Field(f) => Some(f), _ => None } }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Call(call) => call.is_aggregate() || call.args.iter().any(Expr::contains_aggregate),
            Expr::Binary { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
            _ => false,
        }
    }

    pub fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Expr::Field(f) => out.push(f.clone()),
            Expr::Call(call) => call.args.iter().for_each(|a| a.collect_fields(out)),
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Literal(_) | Expr::Star | Expr::Raw(_) => {}
        }
    }

    pub fn collect_calls<'a>(&'a self, out: &mut Vec<&'a FunctionCall>) {
        match self {
            Expr::Call(call) => {
                out.push(call);
                call.args.iter().for_each(|a| a.collect_calls(out));
            }
            Expr::Binary { left, right, .. } => {
                left.collect_calls(out);
                right.collect_calls(out);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Literal(s) => write!(f, "{}", s),
            Expr::Star => write!(f, "*"),
            Expr::Call(call) => write!(f, "{}", call),
            Expr::Binary { op, left, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            Expr::Raw(text) => write!(f, "{}", text),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub category: FunctionCategory,
    pub args: Vec<Expr>,
    pub distinct: bool,
}

impl FunctionCall {
    pub fn is_aggregate(&self) -> bool { self.category == FunctionCategory::Aggregate }

    pub fn is_count_star(&self) -> bool {
        self.name == "COUNT" && !self.distinct && matches!(self.args.as_slice(), [Expr::Star])
    }

    /// `count_all` for COUNT(*), `<func>_<field>` when the first argument is a column.
    pub fn default_alias(&self) -> String {
        let func = self.name.to_ascii_lowercase();
        if self.is_count_star() {
            return "count_all".to_string();
        }
        match self.args.first() {
            Some(Expr::Field(field)) => format!("{}_{}", func, field.replace('.', "_")),
            _ => func,
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({}{})", self.name, if self.distinct { "DISTINCT " } else { "" }, args.join(", "))
    }
}

/// One item of a SELECT list.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRef {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl FieldRef {
    pub fn is_wildcard(&self) -> bool { matches!(self.expr, Expr::Star) }

    /// Name the value carries in the output document.
    pub fn output_name(&self, position: usize) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            Expr::Field(path) => path.rsplit('.').next().unwrap_or(path).to_string(),
            Expr::Call(call) => call.default_alias(),
            _ => format!("expr_{}", position + 1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Field(String),
    Expr(Expr),
}

impl Operand {
    pub fn from_expr(expr: Expr) -> Self {
        match expr {
            Expr::Field(f) => Operand::Field(f),
            other => Operand::Expr(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operator {
    Eq(Scalar),
    Ne(Scalar),
    Gt(Scalar),
    Gte(Scalar),
    Lt(Scalar),
    Lte(Scalar),
    In(Vec<Scalar>),
    NotIn(Vec<Scalar>),
    /// `pattern` is already the translated, anchored regular expression. `ilike` forces case-insensitive matching.
    Like { pattern: String, negated: bool, ilike: bool },
    Between { low: Scalar, high: Scalar },
    Exists(bool),
}

/// Boolean filter tree. Composites always hold at least two children.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Leaf { target: Operand, op: Operator },
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn leaf(field: impl Into<String>, op: Operator) -> Self {
        Condition::Leaf { target: Operand::Field(field.into()), op }
    }

    /// Conjunction with nested ANDs flattened; empty yields None, a single child is returned as is.
    pub fn all(children: Vec<Condition>) -> Option<Condition> {
        let mut flat = Vec::with_capacity(children.len());
        for c in children {
            match c {
                Condition::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Condition::And(flat)),
        }
    }

    pub fn any(children: Vec<Condition>) -> Option<Condition> {
        let mut flat = Vec::with_capacity(children.len());
        for c in children {
            match c {
                Condition::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Condition::Or(flat)),
        }
    }

    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Condition::Leaf { target: Operand::Field(f), .. } => out.push(f.clone()),
            Condition::Leaf { target: Operand::Expr(e), .. } => e.collect_fields(out),
            Condition::And(children) | Condition::Or(children) => children.iter().for_each(|c| c.collect_fields(out)),
        }
    }

    /// Top-level conjuncts; a non-AND condition is its own single conjunct.
    pub fn conjuncts(self) -> Vec<Condition> {
        match self {
            Condition::And(children) => children,
            other => vec![other],
        }
    }

    /// Rebuilds the tree leaf by leaf; leaves mapped to None are dropped and composites collapse.
    pub fn filter_map_leaves<F>(self, f: &mut F) -> Option<Condition>
    where
        F: FnMut(Operand, Operator) -> Option<Condition>,
    {
        match self {
            Condition::Leaf { target, op } => f(target, op),
            Condition::And(children) => Condition::all(children.into_iter().filter_map(|c| c.filter_map_leaves(f)).collect()),
            Condition::Or(children) => Condition::any(children.into_iter().filter_map(|c| c.filter_map_leaves(f)).collect()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinCondition {
    /// `left_table` / `right_table` are the qualifiers as written (empty when unqualified).
    Equality { left_table: String, left_field: String, right_table: String, right_field: String },
    Complex(String),
    None,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub condition: JoinCondition,
}

impl JoinSpec {
    pub fn names(&self, qualifier: &str) -> bool { qualifier == self.alias || qualifier == self.table }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionSpec {
    pub all: bool,
    /// Every branch of the union, the first one included.
    pub branches: Vec<ParsedStatement>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectSpec {
    pub fields: Vec<FieldRef>,
    pub filter: Option<Condition>,
    pub group_by: Vec<String>,
    pub having: Option<Condition>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub distinct: bool,
    pub joins: Vec<JoinSpec>,
    pub functions: Vec<FunctionCall>,
    pub table_alias: Option<String>,
    pub union: Option<UnionSpec>,
    pub has_subquery: bool,
}

impl SelectSpec {
    pub fn is_wildcard(&self) -> bool { self.fields.is_empty() || self.fields.iter().any(FieldRef::is_wildcard) }

    pub fn has_aggregates(&self) -> bool { self.functions.iter().any(FunctionCall::is_aggregate) }

    pub fn is_grouped(&self) -> bool { !self.group_by.is_empty() || self.has_aggregates() }

    pub fn needs_pipeline(&self) -> bool {
        !self.joins.is_empty() || self.is_grouped() || self.having.is_some() || self.distinct || !self.order_by.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsertSpec {
    /// Empty when the statement carries no column list.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateSpec {
    pub assignments: Vec<Assignment>,
    pub filter: Option<Condition>,
    pub table_alias: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteSpec {
    pub filter: Option<Condition>,
    pub table_alias: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    /// Upper-cased base type without its size, e.g. `VARCHAR`.
    pub data_type: String,
    pub length: Option<u32>,
    pub not_null: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
    pub default: Option<Scalar>,
    pub references: Option<(String, String)>,
    pub check: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableConstraint {
    PrimaryKey { columns: Vec<String> },
    Unique { name: Option<String>, columns: Vec<String> },
    Index { name: Option<String>, columns: Vec<String> },
    ForeignKey { name: Option<String>, columns: Vec<String>, ref_table: String, ref_columns: Vec<String> },
    Check { name: Option<String>, expr: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateTableSpec {
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub if_not_exists: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DropTableSpec {
    pub if_exists: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementBody {
    Select(SelectSpec),
    Insert(InsertSpec),
    Update(UpdateSpec),
    Delete(DeleteSpec),
    CreateTable(CreateTableSpec),
    DropTable(DropTableSpec),
}

/// A single SQL statement after parsing. Built once per input and never mutated by compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedStatement {
    pub kind: StatementKind,
    /// Lower-cased, delimiters stripped.
    pub table: String,
    pub body: StatementBody,
    pub warnings: Vec<Warning>,
}
