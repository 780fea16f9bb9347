use sqlparser::tokenizer::Token;

use super::functions;
use super::lexer::{self, is_keyword};
use super::value;
use crate::models::{BinaryOp, Expr, FieldRef, FunctionCall};

fn ends_operand(tok: &Token) -> bool {
    matches!(tok, Token::Word(_) | Token::Number(_, _) | Token::SingleQuotedString(_) | Token::DoubleQuotedString(_) | Token::RParen)
}

fn binary_op(tok: &Token) -> Option<BinaryOp> {
    match tok {
        Token::Plus => Some(BinaryOp::Add),
        Token::Minus => Some(BinaryOp::Subtract),
        Token::Mul => Some(BinaryOp::Multiply),
        Token::Div => Some(BinaryOp::Divide),
        Token::Mod => Some(BinaryOp::Modulo),
        _ => None,
    }
}

/// Rightmost top-level binary operator from `ops`, so chains associate to the left.
fn split_binary(tokens: &[Token], ops: &[BinaryOp]) -> Option<(usize, BinaryOp)> {
    lexer::top_level(tokens)
        .filter(|(i, _)| *i > 0 && *i + 1 < tokens.len() && ends_operand(&tokens[*i - 1]))
        .filter_map(|(i, t)| binary_op(t).filter(|op| ops.contains(op)).map(|op| (i, op)))
        .last()
}

/// Parse an expression: arithmetic, function calls, column paths, literals. Anything else is kept raw.
pub fn parse_expr(tokens: &[Token]) -> Expr {
    if tokens.is_empty() {
        return Expr::Raw(String::new());
    }
    for ops in [&[BinaryOp::Add, BinaryOp::Subtract][..], &[BinaryOp::Multiply, BinaryOp::Divide, BinaryOp::Modulo][..]] {
        if let Some((i, op)) = split_binary(tokens, ops) {
            return Expr::Binary { op, left: Box::new(parse_expr(&tokens[..i])), right: Box::new(parse_expr(&tokens[i + 1..])) };
        }
    }
    parse_primary(tokens)
}

fn parse_primary(tokens: &[Token]) -> Expr {
    if let Some(lit) = value::literal(tokens) {
        return Expr::Literal(lit);
    }
    match tokens {
        [Token::Mul] => return Expr::Star,
        [Token::Word(_), Token::Period, Token::Mul] => return Expr::Star,
        [Token::Word(w), Token::LParen, .., Token::RParen] if lexer::matching_paren(tokens, 1) == Some(tokens.len() - 1) => {
            return Expr::Call(parse_call(&w.value, &tokens[2..tokens.len() - 1]));
        }
        _ => {}
    }
    if let Some(path) = column_path(tokens) {
        return Expr::Field(path);
    }
    if let Some(inner) = lexer::paren_contents(tokens)
        && !inner.first().is_some_and(|t| is_keyword(t, "SELECT"))
    {
        return parse_expr(inner);
    }
    Expr::Raw(lexer::render(tokens))
}

fn parse_call(name: &str, inner: &[Token]) -> FunctionCall {
    let name = name.to_ascii_uppercase();
    let (distinct, inner) = match inner.first() {
        Some(t) if is_keyword(t, "DISTINCT") => (true, &inner[1..]),
        _ => (false, inner),
    };
    let args = lexer::split_commas(inner).into_iter().map(parse_expr).collect();
    FunctionCall { category: functions::category_of(&name), name, args, distinct }
}

/// `col`, `t.col`, `db.t.col` with delimiters stripped, lower-cased.
pub fn column_path(tokens: &[Token]) -> Option<String> {
    if tokens.len() % 2 == 0 {
        return None;
    }
    let mut parts = Vec::with_capacity(tokens.len() / 2 + 1);
    for (i, t) in tokens.iter().enumerate() {
        match (i % 2, t) {
            (0, Token::Word(w)) => {
                if w.quote_style.is_none() && is_reserved(&w.value) {
                    return None;
                }
                parts.push(w.value.to_ascii_lowercase());
            }
            (1, Token::Period) => {}
            _ => return None,
        }
    }
    Some(parts.join("."))
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "SELECT" | "FROM" | "WHERE" | "AND" | "OR" | "NOT" | "IN" | "IS" | "LIKE" | "BETWEEN" | "CASE" | "WHEN" | "THEN" | "ELSE" | "END" | "NULL" | "EXISTS"
    )
}

/// One SELECT list item: expression plus `AS alias` or a trailing bare alias.
pub fn parse_select_item(tokens: &[Token]) -> FieldRef {
    let n = tokens.len();
    if n >= 3 && is_keyword(&tokens[n - 2], "AS") && let Token::Word(w) = &tokens[n - 1] {
        return FieldRef { expr: parse_expr(&tokens[..n - 2]), alias: Some(w.value.clone()) };
    }
    if n >= 2
        && let Token::Word(w) = &tokens[n - 1]
        && ends_operand(&tokens[n - 2])
        && (w.quote_style.is_some() || !is_reserved(&w.value))
    {
        return FieldRef { expr: parse_expr(&tokens[..n - 1]), alias: Some(w.value.clone()) };
    }
    FieldRef { expr: parse_expr(tokens), alias: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FunctionCategory, Scalar};

    fn expr(sql: &str) -> Expr { parse_expr(&lexer::tokenize(sql).unwrap()) }
    fn item(sql: &str) -> FieldRef { parse_select_item(&lexer::tokenize(sql).unwrap()) }

    #[test]
    fn column_paths_are_lowercased() {
        assert_eq!(expr("Users.\"Name\""), Expr::Field("users.name".into()));
        assert_eq!(expr("t.*"), Expr::Star);
    }

    #[test]
    fn arithmetic_is_left_associative() {
        let e = expr("a - b + 2 * c");
        let Expr::Binary { op, left, right } = e else { panic!("expected binary") };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Subtract, .. }));
        assert!(matches!(*right, Expr::Binary { op: BinaryOp::Multiply, .. }));
        assert_eq!(expr("-5"), Expr::Literal(Scalar::Integer(-5)));
    }

    #[test]
    fn calls_with_distinct_and_star() {
        let Expr::Call(c) = expr("count(DISTINCT user_id)") else { panic!("expected call") };
        assert_eq!(c.name, "COUNT");
        assert!(c.distinct);
        assert_eq!(c.category, FunctionCategory::Aggregate);
        let Expr::Call(c) = expr("COUNT(*)") else { panic!("expected call") };
        assert!(c.is_count_star());
        let Expr::Call(c) = expr("NOW()") else { panic!("expected call") };
        assert!(c.args.is_empty());
    }

    #[test]
    fn select_item_aliases() {
        assert_eq!(item("COUNT(*) AS cnt").alias.as_deref(), Some("cnt"));
        assert_eq!(item("name n").alias.as_deref(), Some("n"));
        assert_eq!(item("t.name").alias, None);
        assert_eq!(item("price * 2 total").alias.as_deref(), Some("total"));
    }
}
