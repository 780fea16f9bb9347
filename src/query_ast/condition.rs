//! WHERE / HAVING text → [`Condition`] tree.
//!
//! OR binds loosest, then AND (ignoring the AND that belongs to BETWEEN), then a wrapping
//! parenthesis pair is stripped and the inside parsed again. Whatever is left is a leaf.

use log::warn;
use sqlparser::tokenizer::Token;

use super::errors::{ParseError, Warning};
use super::expr;
use super::lexer::{self, find_keyword, is_keyword};
use super::value;
use crate::models::{Condition, Expr, Operand, Operator, Scalar, WarningKind};

/// Parse a condition, failing only if nothing in it could be understood.
pub fn parse_condition(clause: &str) -> Result<Condition, ParseError> {
    let tokens = lexer::tokenize(clause)?;
    let mut warnings = Vec::new();
    parse_tokens(&tokens, &mut warnings).ok_or_else(|| ParseError::UnparsableCondition(clause.trim().to_string()))
}

/// Lenient entry used during compilation: bad leaves are dropped and reported in `warnings`.
pub fn parse_tokens(tokens: &[Token], warnings: &mut Vec<Warning>) -> Option<Condition> {
    if tokens.is_empty() {
        return None;
    }
    let ors = lexer::split_keyword(tokens, "OR");
    if ors.len() > 1 {
        let children = ors.into_iter().filter_map(|part| parse_part(part, warnings)).collect();
        return Condition::any(children);
    }
    let ands = split_conjuncts(tokens);
    if ands.len() > 1 {
        let children = ands.into_iter().filter_map(|part| parse_part(part, warnings)).collect();
        return Condition::all(children);
    }
    let inner = lexer::strip_parens(tokens);
    if inner.len() != tokens.len() {
        return parse_tokens(inner, warnings);
    }
    if is_keyword(&tokens[0], "NOT") {
        return parse_part(&tokens[1..], warnings).and_then(negate);
    }
    match parse_leaf(tokens) {
        Ok(cond) => Some(cond),
        Err(reason) => {
            let text = lexer::render(tokens);
            warn!("dropping condition `{}`: {}", text, reason);
            warnings.push(Warning::new(WarningKind::UnparsableCondition, format!("`{}` ({})", text, reason)));
            None
        }
    }
}

fn parse_part(part: &[Token], warnings: &mut Vec<Warning>) -> Option<Condition> {
    if part.is_empty() {
        warnings.push(Warning::new(WarningKind::UnparsableCondition, "empty operand"));
        return None;
    }
    parse_tokens(part, warnings)
}

fn split_conjuncts(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut pending_between = false;
    for (i, t) in lexer::top_level(tokens) {
        if is_keyword(t, "BETWEEN") {
            pending_between = true;
        } else if is_keyword(t, "AND") {
            if pending_between {
                pending_between = false;
            } else {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Translate a SQL LIKE pattern into an anchored regular expression.
pub fn like_to_regex(pattern: &str) -> String {
    let mut body = String::with_capacity(pattern.len() + 4);
    for ch in pattern.chars() {
        match ch {
            '%' => body.push_str(".*"),
            '_' => body.push('.'),
            c => body.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    let mut out = format!("^{}", body);
    if !body.ends_with(".*") {
        out.push('$');
    }
    out
}

/// Splits off a trailing NOT: `x NOT` → (`x`, true).
fn strip_not(tokens: &[Token]) -> (&[Token], bool) {
    match tokens.split_last() {
        Some((last, rest)) if is_keyword(last, "NOT") => (rest, true),
        _ => (tokens, false),
    }
}

fn operand(tokens: &[Token]) -> Result<Operand, String> {
    if tokens.is_empty() {
        return Err("missing left operand".into());
    }
    match expr::parse_expr(tokens) {
        Expr::Raw(text) => Err(format!("unrecognised operand `{}`", text)),
        Expr::Literal(_) | Expr::Star => Err("left operand must reference a column".into()),
        other => Ok(Operand::from_expr(other)),
    }
}

/// A literal, or a single bare word kept as text.
fn value_of(tokens: &[Token]) -> Result<Scalar, String> {
    match tokens {
        [] => Err("missing value".into()),
        [Token::Word(_)] => Ok(value::coerce(tokens)),
        _ => value::literal(tokens).ok_or_else(|| format!("unrecognised value `{}`", lexer::render(tokens))),
    }
}

fn leaf(target: Operand, op: Operator) -> Condition { Condition::Leaf { target, op } }

fn parse_leaf(tokens: &[Token]) -> Result<Condition, String> {
    if tokens.is_empty() {
        return Err("empty condition".into());
    }

    let like = find_keyword(tokens, "LIKE").map(|i| (i, false)).or_else(|| find_keyword(tokens, "ILIKE").map(|i| (i, true)));
    if let Some((i, ilike)) = like {
        let (left, negated) = strip_not(&tokens[..i]);
        let pattern = match &tokens[i + 1..] {
            [Token::SingleQuotedString(s)] | [Token::DoubleQuotedString(s)] => s,
            _ => return Err("LIKE expects a quoted pattern".into()),
        };
        return Ok(leaf(operand(left)?, Operator::Like { pattern: like_to_regex(pattern), negated, ilike }));
    }

    if let Some(i) = find_keyword(tokens, "IN") {
        let (left, negated) = strip_not(&tokens[..i]);
        let list = lexer::paren_contents(&tokens[i + 1..]).ok_or("IN expects a parenthesised list")?;
        if list.first().is_some_and(|t| is_keyword(t, "SELECT")) {
            return Err("subquery in IN is not supported".into());
        }
        let values = lexer::split_commas(list).into_iter().map(value_of).collect::<Result<Vec<_>, _>>()?;
        let op = if negated { Operator::NotIn(values) } else { Operator::In(values) };
        return Ok(leaf(operand(left)?, op));
    }

    if let Some(i) = find_keyword(tokens, "BETWEEN") {
        let (left, negated) = strip_not(&tokens[..i]);
        let rest = &tokens[i + 1..];
        let and = find_keyword(rest, "AND").ok_or("BETWEEN without AND")?;
        let low = value_of(&rest[..and])?;
        let high = value_of(&rest[and + 1..])?;
        let target = operand(left)?;
        if negated {
            return Ok(Condition::Or(vec![leaf(target.clone(), Operator::Lt(low)), leaf(target, Operator::Gt(high))]));
        }
        return Ok(leaf(target, Operator::Between { low, high }));
    }

    if let Some(i) = find_keyword(tokens, "IS") {
        let exists = match &tokens[i + 1..] {
            [n] if is_keyword(n, "NULL") => false,
            [not, n] if is_keyword(not, "NOT") && is_keyword(n, "NULL") => true,
            _ => return Err("IS expects NULL or NOT NULL".into()),
        };
        return Ok(leaf(operand(&tokens[..i])?, Operator::Exists(exists)));
    }

    let (i, tok) = lexer::top_level(tokens)
        .find(|(_, t)| matches!(t, Token::Eq | Token::DoubleEq | Token::Neq | Token::Gt | Token::GtEq | Token::Lt | Token::LtEq))
        .ok_or("no comparison operator")?;
    let target = operand(&tokens[..i])?;
    let v = value_of(&tokens[i + 1..])?;
    let op = match tok {
        Token::Eq | Token::DoubleEq => Operator::Eq(v),
        Token::Neq => Operator::Ne(v),
        Token::Gt => Operator::Gt(v),
        Token::GtEq => Operator::Gte(v),
        Token::Lt => Operator::Lt(v),
        _ => Operator::Lte(v),
    };
    Ok(leaf(target, op))
}

/// Logical negation; composites are pushed down to their leaves (De Morgan).
pub fn negate(cond: Condition) -> Option<Condition> {
    let (target, op) = match cond {
        Condition::Leaf { target, op } => (target, op),
        Condition::And(children) => return Condition::any(children.into_iter().filter_map(negate).collect()),
        Condition::Or(children) => return Condition::all(children.into_iter().filter_map(negate).collect()),
    };
    let flipped = match op {
        Operator::Eq(v) => Operator::Ne(v),
        Operator::Ne(v) => Operator::Eq(v),
        Operator::Gt(v) => Operator::Lte(v),
        Operator::Gte(v) => Operator::Lt(v),
        Operator::Lt(v) => Operator::Gte(v),
        Operator::Lte(v) => Operator::Gt(v),
        Operator::In(vs) => Operator::NotIn(vs),
        Operator::NotIn(vs) => Operator::In(vs),
        Operator::Like { pattern, negated, ilike } => Operator::Like { pattern, negated: !negated, ilike },
        Operator::Exists(b) => Operator::Exists(!b),
        Operator::Between { low, high } => {
            return Some(Condition::Or(vec![leaf(target.clone(), Operator::Lt(low)), leaf(target, Operator::Gt(high))]));
        }
    };
    Some(leaf(target, flipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunctionCall, FunctionCategory};

    fn parse(sql: &str) -> (Option<Condition>, Vec<Warning>) {
        let mut warnings = Vec::new();
        let c = parse_tokens(&lexer::tokenize(sql).unwrap(), &mut warnings);
        (c, warnings)
    }

    #[test]
    fn between_is_one_leaf() {
        let c = parse_condition("a BETWEEN 10 AND 20").unwrap();
        assert_eq!(c, Condition::leaf("a", Operator::Between { low: Scalar::Integer(10), high: Scalar::Integer(20) }));
        let c = parse_condition("a BETWEEN 1 AND 2 AND b = 3").unwrap();
        let Condition::And(children) = c else { panic!("expected AND") };
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn or_binds_looser_than_and() {
        let c = parse_condition("a = 1 AND b = 2 OR c = 3").unwrap();
        let Condition::Or(children) = c else { panic!("expected OR") };
        assert!(matches!(children[0], Condition::And(_)));
        assert_eq!(children[1], Condition::leaf("c", Operator::Eq(Scalar::Integer(3))));
    }

    #[test]
    fn parentheses_group() {
        let c = parse_condition("(a = 1 OR b = 2) AND c = 'X'").unwrap();
        let Condition::And(children) = c else { panic!("expected AND") };
        assert!(matches!(children[0], Condition::Or(_)));
        assert_eq!(children[1], Condition::leaf("c", Operator::Eq(Scalar::String("X".into()))));
    }

    #[test]
    fn leaf_kinds() {
        assert_eq!(parse_condition("Name LIKE 'A%'").unwrap(), Condition::leaf("name", Operator::Like { pattern: "^A.*".into(), negated: false, ilike: false }));
        assert_eq!(
            parse_condition("status NOT IN ('a', 'b')").unwrap(),
            Condition::leaf("status", Operator::NotIn(vec![Scalar::String("a".into()), Scalar::String("b".into())]))
        );
        assert_eq!(parse_condition("email IS NULL").unwrap(), Condition::leaf("email", Operator::Exists(false)));
        assert_eq!(parse_condition("email IS NOT NULL").unwrap(), Condition::leaf("email", Operator::Exists(true)));
        assert_eq!(parse_condition("age >= 18").unwrap(), Condition::leaf("age", Operator::Gte(Scalar::Integer(18))));
        assert_eq!(parse_condition("age <> 18").unwrap(), Condition::leaf("age", Operator::Ne(Scalar::Integer(18))));
    }

    #[test]
    fn function_operand() {
        let c = parse_condition("YEAR(created) = 2024").unwrap();
        let call = FunctionCall { name: "YEAR".into(), category: FunctionCategory::DateExtract, args: vec![Expr::Field("created".into())], distinct: false };
        assert_eq!(c, Condition::Leaf { target: Operand::Expr(Expr::Call(call)), op: Operator::Eq(Scalar::Integer(2024)) });
    }

    #[test]
    fn like_patterns() {
        assert_eq!(like_to_regex("%son"), "^.*son$");
        assert_eq!(like_to_regex("a_c"), "^a.c$");
        assert_eq!(like_to_regex("1.5%"), "^1\\.5.*");
    }

    #[test]
    fn bad_leaf_is_dropped_with_warning() {
        let (c, warnings) = parse("a = 1 AND garbage AND b = 2");
        let Some(Condition::And(children)) = c else { panic!("expected AND") };
        assert_eq!(children.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::UnparsableCondition);
        assert!(parse_condition("garbage").is_err());
    }

    #[test]
    fn not_over_compound_applies_de_morgan() {
        assert_eq!(
            parse_condition("NOT (a = 1 OR b = 2)").unwrap(),
            Condition::And(vec![Condition::leaf("a", Operator::Ne(Scalar::Integer(1))), Condition::leaf("b", Operator::Ne(Scalar::Integer(2)))])
        );
        assert_eq!(
            parse_condition("x = 5 AND NOT (a = 1 AND b = 2)").unwrap(),
            Condition::And(vec![
                Condition::leaf("x", Operator::Eq(Scalar::Integer(5))),
                Condition::Or(vec![Condition::leaf("a", Operator::Ne(Scalar::Integer(1))), Condition::leaf("b", Operator::Ne(Scalar::Integer(2)))]),
            ])
        );
        assert_eq!(parse_condition("NOT NOT a = 1").unwrap(), Condition::leaf("a", Operator::Eq(Scalar::Integer(1))));
    }

    #[test]
    fn trailing_tokens_after_value_drop_the_leaf() {
        let (c, warnings) = parse("age > 18 18");
        assert!(c.is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::UnparsableCondition);
        let (c, warnings) = parse("status = 'a' 'b' AND age > 18");
        assert_eq!(c, Some(Condition::leaf("age", Operator::Gt(Scalar::Integer(18)))));
        assert_eq!(warnings.len(), 1);
        assert_eq!(parse_condition("owner = admin").unwrap(), Condition::leaf("owner", Operator::Eq(Scalar::String("admin".into()))));
    }

    #[test]
    fn ilike_is_flagged() {
        let c = parse_condition("name ILIKE 'a%'").unwrap();
        assert_eq!(c, Condition::leaf("name", Operator::Like { pattern: "^a.*".into(), negated: false, ilike: true }));
    }

    #[test]
    fn not_flips_leaf() {
        assert_eq!(parse_condition("NOT (a = 1)").unwrap(), Condition::leaf("a", Operator::Ne(Scalar::Integer(1))));
        let (c, _) = parse("a NOT BETWEEN 1 AND 5");
        assert!(matches!(c, Some(Condition::Or(_))));
    }
}
