//! Literal coercion: token(s) of a SQL value to a typed [`Scalar`].

use sqlparser::tokenizer::Token;

use super::lexer::{self, is_keyword};
use crate::models::Scalar;

/// Coerce a literal if the tokens have literal shape (string, number, signed number, NULL/TRUE/FALSE).
pub fn literal(tokens: &[Token]) -> Option<Scalar> {
    match tokens {
        [Token::SingleQuotedString(s)]
        | [Token::DoubleQuotedString(s)]
        | [Token::NationalStringLiteral(s)]
        | [Token::EscapedStringLiteral(s)] => Some(Scalar::String(s.clone())),
        [Token::Number(n, _)] => Some(number(n)),
        [Token::Plus, Token::Number(n, _)] => Some(number(n)),
        [Token::Minus, Token::Number(n, _)] => number(n).negate(),
        [t] if is_keyword(t, "NULL") => Some(Scalar::Null),
        [t] if is_keyword(t, "TRUE") => Some(Scalar::Bool(true)),
        [t] if is_keyword(t, "FALSE") => Some(Scalar::Bool(false)),
        _ => None,
    }
}

/// Coerce any value text. Non-literal text falls back to a string, identifiers keep their case.
pub fn coerce(tokens: &[Token]) -> Scalar {
    if let Some(s) = literal(tokens) {
        return s;
    }
    match tokens {
        [Token::Word(w)] => Scalar::String(w.value.clone()),
        _ => Scalar::String(lexer::render(tokens)),
    }
}

/// Convenience for callers holding plain text.
pub fn coerce_text(text: &str) -> Scalar {
    match lexer::tokenize(text) {
        Ok(tokens) => coerce(&tokens),
        Err(_) => Scalar::String(text.trim().to_string()),
    }
}

/// Numbers with a decimal point or exponent are doubles; integers that overflow i64 fall back to doubles.
pub fn number(text: &str) -> Scalar {
    let looks_float = text.contains(['.', 'e', 'E']);
    if !looks_float && let Ok(i) = text.parse::<i64>() {
        return Scalar::Integer(i);
    }
    match text.parse::<f64>() {
        Ok(d) => Scalar::Double(d),
        Err(_) => Scalar::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_each_literal_shape() {
        assert_eq!(coerce_text("'Alice'"), Scalar::String("Alice".into()));
        assert_eq!(coerce_text("NULL"), Scalar::Null);
        assert_eq!(coerce_text("true"), Scalar::Bool(true));
        assert_eq!(coerce_text("FALSE"), Scalar::Bool(false));
        assert_eq!(coerce_text("42"), Scalar::Integer(42));
        assert_eq!(coerce_text("-7"), Scalar::Integer(-7));
        assert_eq!(coerce_text("3.5"), Scalar::Double(3.5));
    }

    #[test]
    fn unquoted_words_stay_strings() {
        assert_eq!(coerce_text("active"), Scalar::String("active".into()));
        assert!(literal(&lexer::tokenize("active").unwrap()).is_none());
    }

    #[test]
    fn huge_integers_become_doubles() {
        assert!(matches!(number("99999999999999999999"), Scalar::Double(_)));
        assert_eq!(number("2147483648"), Scalar::Integer(2147483648));
    }
}
