//! Flat token stream plus the depth-tracked scanning helpers every clause splitter shares.
//!
//! Tokenizing goes through sqlparser's tokenizer so quoted literals and delimited identifiers
//! arrive as single tokens; nothing downstream ever looks inside them.

use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};

use super::errors::ParseError;

/// Tokenize `sql`, dropping whitespace/comments and folding `[bracketed identifiers]` into words.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, ParseError> {
    let dialect = GenericDialect {};
    let raw = Tokenizer::new(&dialect, sql).tokenize()?;
    let raw: Vec<Token> = raw.into_iter().filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF)).collect();

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == Token::LBracket
            && let Some(close) = raw[i + 1..].iter().position(|t| *t == Token::RBracket)
        {
            let inner = &raw[i + 1..i + 1 + close];
            if !inner.is_empty() && inner.iter().all(|t| matches!(t, Token::Word(_) | Token::Number(_, _))) {
                let value = inner.iter().map(token_text).collect::<Vec<_>>().join(" ");
                out.push(Token::Word(Word { value, quote_style: Some('['), keyword: Keyword::NoKeyword }));
                i += close + 2;
                continue;
            }
        }
        out.push(raw[i].clone());
        i += 1;
    }
    Ok(out)
}

/// Unquoted word equal (case-insensitively) to `kw`.
pub fn is_keyword(tok: &Token, kw: &str) -> bool {
    matches!(tok, Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(kw))
}

pub fn is_any_keyword(tok: &Token, kws: &[&str]) -> bool { kws.iter().any(|k| is_keyword(tok, k)) }

/// Identifier text of a word token, quoted or not.
pub fn word_value(tok: &Token) -> Option<&str> {
    match tok {
        Token::Word(w) => Some(w.value.as_str()),
        _ => None,
    }
}

/// Raw text of a token without surrounding quotes.
pub fn token_text(tok: &Token) -> String {
    match tok {
        Token::Word(w) => w.value.clone(),
        Token::Number(n, _) => n.clone(),
        Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tokens at parenthesis depth zero, with their index. Outermost parens themselves are included.
pub fn top_level(tokens: &[Token]) -> impl Iterator<Item = (usize, &Token)> + '_ {
    let mut depth = 0usize;
    tokens.iter().enumerate().filter(move |(_, t)| match t {
        Token::LParen => {
            depth += 1;
            depth == 1
        }
        Token::RParen => {
            depth = depth.saturating_sub(1);
            depth == 0
        }
        _ => depth == 0,
    })
}

pub fn find_keyword(tokens: &[Token], kw: &str) -> Option<usize> {
    top_level(tokens).find(|(_, t)| is_keyword(t, kw)).map(|(i, _)| i)
}

/// First top-level position where the keyword sequence (e.g. `GROUP BY`) starts.
pub fn find_sequence(tokens: &[Token], seq: &[&str]) -> Option<usize> {
    top_level(tokens)
        .find(|(i, _)| tokens.len() >= i + seq.len() && seq.iter().enumerate().all(|(k, kw)| is_keyword(&tokens[i + k], kw)))
        .map(|(i, _)| i)
}

pub fn split_top_level<F>(tokens: &[Token], is_sep: F) -> Vec<&[Token]>
where
    F: Fn(&Token) -> bool,
{
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, t) in top_level(tokens) {
        if is_sep(t) {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Comma split at depth zero. An empty input yields no parts.
pub fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    split_top_level(tokens, |t| *t == Token::Comma)
}

pub fn split_keyword<'a>(tokens: &'a [Token], kw: &str) -> Vec<&'a [Token]> { split_top_level(tokens, |t| is_keyword(t, kw)) }

pub fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove one pair of parentheses if it wraps the whole slice; otherwise return the slice unchanged.
pub fn strip_parens(tokens: &[Token]) -> &[Token] {
    if tokens.first() == Some(&Token::LParen) && matching_paren(tokens, 0) == Some(tokens.len() - 1) {
        &tokens[1..tokens.len() - 1]
    } else {
        tokens
    }
}

/// Contents of a parenthesised group that spans the whole slice.
pub fn paren_contents(tokens: &[Token]) -> Option<&[Token]> {
    let inner = strip_parens(tokens);
    (inner.len() + 2 == tokens.len()).then_some(inner)
}

/// Render tokens back to readable SQL for warnings and passthrough literals.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, t) in tokens.iter().enumerate() {
        if i > 0 {
            let prev = &tokens[i - 1];
            let tight = matches!(t, Token::Comma | Token::RParen | Token::Period)
                || matches!(prev, Token::LParen | Token::Period)
                || (matches!(prev, Token::Word(_)) && *t == Token::LParen);
            if !tight {
                out.push(' ');
            }
        }
        out.push_str(&t.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_literals_are_single_tokens() {
        let toks = tokenize("name = 'a, b (c) AND d'").unwrap();
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[2], Token::SingleQuotedString("a, b (c) AND d".into()));
    }

    #[test]
    fn brackets_fold_into_identifier() {
        let toks = tokenize("SELECT * FROM [order details]").unwrap();
        assert_eq!(word_value(&toks[3]), Some("order details"));
    }

    #[test]
    fn comma_split_ignores_nested_parens() {
        let toks = tokenize("a, COUNT(b, c), 'x,y'").unwrap();
        let parts = split_commas(&toks);
        assert_eq!(parts.len(), 3);
        assert_eq!(render(parts[1]), "COUNT(b, c)");
    }

    #[test]
    fn keyword_search_skips_parenthesised_text() {
        let toks = tokenize("(a OR b) AND c OR d").unwrap();
        assert_eq!(find_keyword(&toks, "OR"), Some(7));
        assert_eq!(find_sequence(&tokenize("x GROUP BY y").unwrap(), &["GROUP", "BY"]), Some(1));
    }

    #[test]
    fn strip_parens_only_when_wrapping() {
        let wrapped = tokenize("(a = 1)").unwrap();
        assert_eq!(strip_parens(&wrapped).len(), 3);
        let not_wrapped = tokenize("(a = 1) OR (b = 2)").unwrap();
        assert_eq!(strip_parens(&not_wrapped).len(), not_wrapped.len());
    }
}
