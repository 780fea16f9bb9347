use log::{debug, warn};
use sqlparser::tokenizer::Token;

use super::condition;
use super::errors::{ParseError, Warning};
use super::expr::{self, column_path};
use super::extractor::{self, Clause, RawClauses, RawJoin};
use super::lexer::{self, is_any_keyword, is_keyword, split_commas};
use super::value;
use crate::models::{
    Assignment, ColumnDef, Condition, CreateTableSpec, DeleteSpec, Direction, DropTableSpec, Expr, FieldRef, InsertSpec, JoinCondition, JoinKind, JoinSpec,
    OrderItem, ParsedStatement, Scalar, SelectSpec, StatementBody, StatementKind, TableConstraint, UnionSpec, UpdateSpec, WarningKind,
};

/// Parse one SQL statement into its typed form.
pub fn parse_statement(sql: &str) -> Result<ParsedStatement, ParseError> {
    let raw = extractor::extract(sql)?;
    build(raw)
}

fn build(raw: RawClauses) -> Result<ParsedStatement, ParseError> {
    let mut warnings = Vec::new();
    let body = match raw.kind {
        StatementKind::Select => StatementBody::Select(build_select(&raw, &mut warnings)?),
        StatementKind::Insert => StatementBody::Insert(build_insert(&raw)?),
        StatementKind::Update => StatementBody::Update(build_update(&raw, &mut warnings)?),
        StatementKind::Delete => StatementBody::Delete(DeleteSpec { filter: where_clause(&raw, &mut warnings), table_alias: raw.table_alias.clone() }),
        StatementKind::CreateTable => StatementBody::CreateTable(build_create(&raw)?),
        StatementKind::DropTable => StatementBody::DropTable(DropTableSpec { if_exists: raw.if_exists }),
    };
    debug!("parsed {:?} on `{}` with {} warning(s)", raw.kind, raw.table, warnings.len());
    Ok(ParsedStatement { kind: raw.kind, table: raw.table, body, warnings })
}

fn where_clause(raw: &RawClauses, warnings: &mut Vec<Warning>) -> Option<Condition> {
    raw.clause(Clause::Where).and_then(|t| condition::parse_tokens(t, warnings))
}

fn number(tokens: &[Token], what: &str) -> Result<u64, ParseError> {
    match tokens.first() {
        Some(Token::Number(n, _)) => n.parse::<u64>().map_err(|_| ParseError::Syntax(format!("{} expects a non-negative integer, got `{}`", what, n))),
        _ => Err(ParseError::Syntax(format!("{} expects a number, got `{}`", what, lexer::render(tokens)))),
    }
}

fn build_select(raw: &RawClauses, warnings: &mut Vec<Warning>) -> Result<SelectSpec, ParseError> {
    let field_tokens = raw.clause(Clause::Fields).unwrap_or(&[]);
    if field_tokens.is_empty() {
        return Err(ParseError::Syntax("SELECT list is empty".into()));
    }
    let fields: Vec<FieldRef> = split_commas(field_tokens).into_iter().map(expr::parse_select_item).collect();
    let mut functions = Vec::new();
    for f in &fields {
        let mut calls = Vec::new();
        f.expr.collect_calls(&mut calls);
        functions.extend(calls.into_iter().cloned());
    }

    let mut spec = SelectSpec {
        filter: where_clause(raw, warnings),
        having: raw.clause(Clause::Having).and_then(|t| condition::parse_tokens(t, warnings)),
        distinct: raw.distinct,
        table_alias: raw.table_alias.clone(),
        has_subquery: raw.has_subquery,
        functions,
        ..SelectSpec::default()
    };

    if let Some(tokens) = raw.clause(Clause::GroupBy) {
        for part in split_commas(tokens) {
            match positional(expr::parse_expr(part), &fields) {
                Expr::Field(f) => spec.group_by.push(f),
                other => {
                    warn!("unsupported GROUP BY key `{}`", other);
                    warnings.push(Warning::new(WarningKind::UnsupportedFunction, format!("GROUP BY key `{}` is not a column", other)));
                }
            }
        }
    }

    if let Some(tokens) = raw.clause(Clause::OrderBy) {
        for part in split_commas(tokens) {
            let (part, direction) = match part.split_last() {
                Some((last, rest)) if is_keyword(last, "DESC") => (rest, Direction::Desc),
                Some((last, rest)) if is_keyword(last, "ASC") => (rest, Direction::Asc),
                _ => (part, Direction::Asc),
            };
            spec.order_by.push(OrderItem { expr: positional(expr::parse_expr(part), &fields), direction });
        }
    }

    if let Some(tokens) = raw.clause(Clause::Limit) {
        match tokens {
            [first, Token::Comma, rest @ ..] => {
                spec.skip = Some(number(std::slice::from_ref(first), "LIMIT")?);
                spec.limit = Some(number(rest, "LIMIT")?);
            }
            _ => spec.limit = Some(number(tokens, "LIMIT")?),
        }
    }
    if let Some(tokens) = raw.clause(Clause::Offset) {
        spec.skip = Some(number(tokens, "OFFSET")?);
    }

    spec.joins = raw.joins.iter().map(build_join).collect();
    if let Some(union) = &raw.union {
        let branches = union.branches.iter().cloned().map(build).collect::<Result<Vec<_>, _>>()?;
        spec.union = Some(UnionSpec { all: union.all, branches });
    }
    spec.fields = fields;
    Ok(spec)
}

/// `ORDER BY 2` / `GROUP BY 1` refer to select items by position.
fn positional(e: Expr, fields: &[FieldRef]) -> Expr {
    let Expr::Literal(Scalar::Integer(n)) = e else { return e };
    match usize::try_from(n).ok().and_then(|n| n.checked_sub(1)).and_then(|i| fields.get(i)) {
        Some(FieldRef { alias: Some(a), expr: Expr::Call(_) | Expr::Binary { .. } }) => Expr::Field(a.to_ascii_lowercase()),
        Some(f) => f.expr.clone(),
        None => e,
    }
}

fn build_join(j: &RawJoin) -> JoinSpec {
    let alias = j.alias.clone().unwrap_or_else(|| j.table.clone());
    let (kind, condition) = match (&j.on, j.using.as_slice()) {
        (Some(on), _) => (j.kind, join_condition(on)),
        (None, [col]) => (
            j.kind,
            JoinCondition::Equality { left_table: String::new(), left_field: col.clone(), right_table: alias.clone(), right_field: col.clone() },
        ),
        (None, []) if matches!(j.kind, JoinKind::Inner | JoinKind::Cross) => (JoinKind::Cross, JoinCondition::None),
        (None, []) => (j.kind, JoinCondition::Complex(format!("{} JOIN {} without ON", j.kind.as_str(), j.table))),
        (None, cols) => (j.kind, JoinCondition::Complex(format!("USING ({})", cols.join(", ")))),
    };
    JoinSpec { kind, table: j.table.clone(), alias, condition }
}

fn join_condition(tokens: &[Token]) -> JoinCondition {
    let tokens = lexer::strip_parens(tokens);
    let logic = lexer::top_level(tokens).any(|(_, t)| is_any_keyword(t, &["AND", "OR"]));
    let eqs: Vec<usize> = lexer::top_level(tokens).filter(|(_, t)| matches!(t, Token::Eq | Token::DoubleEq)).map(|(i, _)| i).collect();
    if !logic
        && let [i] = eqs.as_slice()
        && let (Some(left), Some(right)) = (column_path(&tokens[..*i]), column_path(&tokens[*i + 1..]))
    {
        let (left_table, left_field) = qualify(&left);
        let (right_table, right_field) = qualify(&right);
        return JoinCondition::Equality { left_table, left_field, right_table, right_field };
    }
    JoinCondition::Complex(lexer::render(tokens))
}

fn qualify(path: &str) -> (String, String) {
    match path.split_once('.') {
        Some((q, f)) => (q.to_string(), f.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn column_name(tokens: &[Token]) -> Result<String, ParseError> {
    column_path(tokens).ok_or_else(|| ParseError::Syntax(format!("invalid column name `{}`", lexer::render(tokens))))
}

fn build_insert(raw: &RawClauses) -> Result<InsertSpec, ParseError> {
    let columns = match raw.clause(Clause::Columns) {
        Some(tokens) => split_commas(tokens).into_iter().map(column_name).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let values = raw.clause(Clause::Values).unwrap_or(&[]);
    let mut rows: Vec<Vec<Scalar>> = Vec::new();
    for group in split_commas(values) {
        let inner = lexer::paren_contents(group).ok_or_else(|| ParseError::Syntax(format!("VALUES expects parenthesised rows, got `{}`", lexer::render(group))))?;
        rows.push(split_commas(inner).into_iter().map(value::coerce).collect());
    }
    if rows.is_empty() {
        return Err(ParseError::Syntax("VALUES list is empty".into()));
    }
    Ok(InsertSpec { columns, rows })
}

fn build_update(raw: &RawClauses, warnings: &mut Vec<Warning>) -> Result<UpdateSpec, ParseError> {
    let mut assignments = Vec::new();
    for item in split_commas(raw.clause(Clause::Set).unwrap_or(&[])) {
        let eq = lexer::top_level(item)
            .find(|(_, t)| **t == Token::Eq)
            .map(|(i, _)| i)
            .ok_or_else(|| ParseError::Syntax(format!("malformed SET item `{}`", lexer::render(item))))?;
        let column = column_name(&item[..eq])?;
        // a qualifier naming the updated table is dropped
        let column = match column.split_once('.') {
            Some((q, rest)) if q == raw.table || raw.table_alias.as_deref() == Some(q) => rest.to_string(),
            _ => column,
        };
        assignments.push(Assignment { column, value: expr::parse_expr(&item[eq + 1..]) });
    }
    if assignments.is_empty() {
        return Err(ParseError::Syntax("SET list is empty".into()));
    }
    Ok(UpdateSpec { assignments, filter: where_clause(raw, warnings), table_alias: raw.table_alias.clone() })
}

const COLUMN_OPTIONS: &[&str] = &[
    "NOT", "NULL", "PRIMARY", "UNIQUE", "DEFAULT", "AUTO_INCREMENT", "AUTOINCREMENT", "IDENTITY", "REFERENCES", "CHECK", "CONSTRAINT", "COLLATE",
    "COMMENT", "KEY",
];

fn build_create(raw: &RawClauses) -> Result<CreateTableSpec, ParseError> {
    let mut spec = CreateTableSpec { if_not_exists: raw.if_not_exists, ..CreateTableSpec::default() };
    for def in split_commas(raw.clause(Clause::Body).unwrap_or(&[])) {
        if def.is_empty() {
            continue;
        }
        let (name, body) = match def {
            [c, n, rest @ ..] if is_keyword(c, "CONSTRAINT") => (lexer::word_value(n).map(str::to_ascii_lowercase), rest),
            _ => (None, def),
        };
        if let Some(constraint) = table_constraint(name.clone(), body)? {
            spec.constraints.push(constraint);
        } else if name.is_some() {
            return Err(ParseError::Syntax(format!("unrecognised constraint `{}`", lexer::render(def))));
        } else {
            spec.columns.push(column_def(def)?);
        }
    }
    if spec.columns.is_empty() {
        return Err(ParseError::Syntax("CREATE TABLE declares no columns".into()));
    }
    Ok(spec)
}

/// First parenthesised name list at or after `from`; returns the names and the index after `)`.
fn name_list(tokens: &[Token], from: usize) -> Result<(Vec<String>, usize), ParseError> {
    let open = tokens.iter().skip(from).position(|t| *t == Token::LParen).map(|p| p + from);
    let close = open.and_then(|o| lexer::matching_paren(tokens, o));
    match (open, close) {
        (Some(o), Some(c)) => Ok((split_commas(&tokens[o + 1..c]).into_iter().map(column_name).collect::<Result<_, _>>()?, c + 1)),
        _ => Err(ParseError::Syntax(format!("expected a column list in `{}`", lexer::render(tokens)))),
    }
}

fn optional_name(tokens: &[Token], at: usize) -> Option<String> {
    match tokens.get(at) {
        Some(Token::Word(w)) => Some(w.value.to_ascii_lowercase()),
        _ => None,
    }
}

fn table_constraint(name: Option<String>, t: &[Token]) -> Result<Option<TableConstraint>, ParseError> {
    let Some(first) = t.first() else { return Ok(None) };
    let constraint = if is_keyword(first, "PRIMARY") && t.get(1).is_some_and(|k| is_keyword(k, "KEY")) {
        TableConstraint::PrimaryKey { columns: name_list(t, 2)?.0 }
    } else if is_keyword(first, "UNIQUE") {
        let skip = if t.get(1).is_some_and(|k| is_any_keyword(k, &["KEY", "INDEX"])) { 2 } else { 1 };
        TableConstraint::Unique { name: name.or_else(|| optional_name(t, skip)), columns: name_list(t, skip)?.0 }
    } else if is_any_keyword(first, &["INDEX", "KEY"]) {
        TableConstraint::Index { name: name.or_else(|| optional_name(t, 1)), columns: name_list(t, 1)?.0 }
    } else if is_keyword(first, "FOREIGN") && t.get(1).is_some_and(|k| is_keyword(k, "KEY")) {
        let (columns, next) = name_list(t, 2)?;
        if !t.get(next).is_some_and(|k| is_keyword(k, "REFERENCES")) {
            return Err(ParseError::Syntax("FOREIGN KEY without REFERENCES".into()));
        }
        let ref_table = optional_name(t, next + 1).ok_or_else(|| ParseError::Syntax("REFERENCES without a table".into()))?;
        let (ref_columns, _) = name_list(t, next + 2)?;
        TableConstraint::ForeignKey { name, columns, ref_table, ref_columns }
    } else if is_keyword(first, "CHECK") {
        TableConstraint::Check { name, expr: lexer::render(lexer::strip_parens(&t[1..])) }
    } else {
        return Ok(None);
    };
    Ok(Some(constraint))
}

fn column_def(t: &[Token]) -> Result<ColumnDef, ParseError> {
    let name = column_name(&t[..1])?;
    let data_type = match t.get(1) {
        Some(Token::Word(w)) => w.value.to_ascii_uppercase(),
        _ => return Err(ParseError::Syntax(format!("column `{}` has no type", name))),
    };
    let mut col = ColumnDef { name, data_type, ..ColumnDef::default() };
    let mut i = 2;
    while i < t.len() {
        let tok = &t[i];
        if *tok == Token::LParen {
            let close = lexer::matching_paren(t, i).ok_or_else(|| ParseError::Syntax(format!("unbalanced type size for `{}`", col.name)))?;
            if col.length.is_none()
                && let Some(Token::Number(n, _)) = t.get(i + 1)
            {
                col.length = n.parse().ok();
            }
            i = close + 1;
        } else if is_keyword(tok, "NOT") && t.get(i + 1).is_some_and(|n| is_keyword(n, "NULL")) {
            col.not_null = true;
            i += 2;
        } else if is_keyword(tok, "PRIMARY") && t.get(i + 1).is_some_and(|k| is_keyword(k, "KEY")) {
            col.primary_key = true;
            i += 2;
        } else if is_keyword(tok, "UNIQUE") {
            col.unique = true;
            i += 1;
        } else if is_any_keyword(tok, &["AUTO_INCREMENT", "AUTOINCREMENT", "IDENTITY"]) {
            col.auto_increment = true;
            i += 1;
            if t.get(i) == Some(&Token::LParen) {
                i = lexer::matching_paren(t, i).map(|c| c + 1).unwrap_or(t.len());
            }
        } else if is_keyword(tok, "DEFAULT") {
            let (value, next) = default_value(t, i + 1);
            col.default = Some(value);
            i = next;
        } else if is_keyword(tok, "REFERENCES") {
            let table = optional_name(t, i + 1).ok_or_else(|| ParseError::Syntax("REFERENCES without a table".into()))?;
            let (cols, next) = name_list(t, i + 2)?;
            col.references = Some((table, cols.into_iter().next().unwrap_or_default()));
            i = next;
        } else if is_keyword(tok, "CHECK") {
            let close = lexer::matching_paren(t, i + 1).ok_or_else(|| ParseError::Syntax("CHECK expects a parenthesised condition".into()))?;
            col.check = Some(lexer::render(&t[i + 2..close]));
            i = close + 1;
        } else if is_any_keyword(tok, &["COLLATE", "COMMENT"]) {
            i += 2;
        } else {
            // extra type words (DOUBLE PRECISION, UNSIGNED, ON UPDATE ...) carry no schema meaning
            i += 1;
        }
    }
    Ok(col)
}

/// DEFAULT takes a literal (possibly signed) or a function call such as `CURRENT_TIMESTAMP`.
fn default_value(t: &[Token], at: usize) -> (Scalar, usize) {
    let end = (at..t.len()).find(|&k| k > at && is_any_keyword(&t[k], COLUMN_OPTIONS)).unwrap_or(t.len());
    let end = if t.get(at) == Some(&Token::LParen) { lexer::matching_paren(t, at).map(|c| c + 1).unwrap_or(end) } else { end };
    (value::coerce(lexer::strip_parens(&t[at..end])), end)
}
