//! Statement kind detection and clause slicing.
//!
//! Works purely on the token stream: clause boundaries are keywords found at parenthesis depth
//! zero, so nested expressions and quoted text never cut a clause short.

use log::debug;
use sqlparser::tokenizer::Token;

use super::errors::ParseError;
use super::lexer::{self, find_keyword, find_sequence, is_any_keyword, is_keyword};
use crate::models::{JoinKind, StatementKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clause {
    Fields,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    Columns,
    Values,
    Set,
    Body,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawJoin {
    pub kind: JoinKind,
    pub table: String,
    pub alias: Option<String>,
    pub on: Option<Vec<Token>>,
    pub using: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawUnion {
    pub all: bool,
    pub branches: Vec<RawClauses>,
}

/// Clause token spans of one statement, before any typed parsing.
#[derive(Clone, Debug, PartialEq)]
pub struct RawClauses {
    pub kind: StatementKind,
    pub table: String,
    pub table_alias: Option<String>,
    pub distinct: bool,
    pub if_exists: bool,
    pub if_not_exists: bool,
    pub has_subquery: bool,
    pub joins: Vec<RawJoin>,
    pub union: Option<RawUnion>,
    clauses: Vec<(Clause, Vec<Token>)>,
}

impl RawClauses {
    fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            table: String::new(),
            table_alias: None,
            distinct: false,
            if_exists: false,
            if_not_exists: false,
            has_subquery: false,
            joins: Vec::new(),
            union: None,
            clauses: Vec::new(),
        }
    }

    pub fn clause(&self, which: Clause) -> Option<&[Token]> {
        self.clauses.iter().find(|(c, _)| *c == which).map(|(_, t)| t.as_slice())
    }

    fn push(&mut self, which: Clause, tokens: &[Token]) { self.clauses.push((which, tokens.to_vec())); }
}

const CLAUSE_WORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "SET", "VALUES", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL", "ON", "USING", "GROUP",
    "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "AS",
];

const SELECT_MARKERS: &[(Clause, &[&str])] = &[
    (Clause::Where, &["WHERE"]),
    (Clause::GroupBy, &["GROUP", "BY"]),
    (Clause::Having, &["HAVING"]),
    (Clause::OrderBy, &["ORDER", "BY"]),
    (Clause::Limit, &["LIMIT"]),
    (Clause::Offset, &["OFFSET"]),
];

const WHERE_MARKER: &[(Clause, &[&str])] = &[(Clause::Where, &["WHERE"])];

fn is_clause_word(word: &str) -> bool { CLAUSE_WORDS.iter().any(|k| word.eq_ignore_ascii_case(k)) }

/// Split `sql` into its clauses. Trailing semicolons are ignored; anything after an inner one is rejected.
pub fn extract(sql: &str) -> Result<RawClauses, ParseError> {
    let mut tokens = lexer::tokenize(sql)?;
    while tokens.last() == Some(&Token::SemiColon) {
        tokens.pop();
    }
    if tokens.contains(&Token::SemiColon) {
        return Err(ParseError::AmbiguousStatement("more than one statement in input".into()));
    }
    let raw = extract_tokens(&tokens)?;
    debug!("extracted {:?} on `{}` ({} clauses, {} joins)", raw.kind, raw.table, raw.clauses.len(), raw.joins.len());
    Ok(raw)
}

pub(crate) fn extract_tokens(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let Some(first) = tokens.first() else {
        return Err(ParseError::AmbiguousStatement("empty statement".into()));
    };
    let leading = match first {
        Token::Word(w) if w.quote_style.is_none() => w.value.to_ascii_uppercase(),
        other => return Err(ParseError::AmbiguousStatement(format!("statement cannot start with `{}`", other))),
    };
    match leading.as_str() {
        "SELECT" => extract_select(tokens),
        "INSERT" => extract_insert(tokens),
        "UPDATE" => extract_update(tokens),
        "DELETE" => extract_delete(tokens),
        "CREATE" => extract_create(tokens),
        "DROP" => extract_drop(tokens),
        _ => Err(ParseError::AmbiguousStatement(format!("unrecognised statement `{}`", leading))),
    }
}

fn table_name(tokens: &[Token], pos: usize) -> Option<(String, usize)> {
    let mut parts = Vec::new();
    let mut i = pos;
    loop {
        match tokens.get(i) {
            Some(Token::Word(w)) if w.quote_style.is_some() || !is_clause_word(&w.value) => parts.push(w.value.to_ascii_lowercase()),
            _ => return None,
        }
        i += 1;
        if tokens.get(i) != Some(&Token::Period) {
            break;
        }
        i += 1;
    }
    Some((parts.join("."), i))
}

fn alias(tokens: &[Token], pos: usize) -> (Option<String>, usize) {
    match tokens.get(pos) {
        Some(t) if is_keyword(t, "AS") => match tokens.get(pos + 1) {
            Some(Token::Word(w)) => (Some(w.value.to_ascii_lowercase()), pos + 2),
            _ => (None, pos + 1),
        },
        Some(Token::Word(w)) if w.quote_style.is_some() || !is_clause_word(&w.value) => (Some(w.value.to_ascii_lowercase()), pos + 1),
        _ => (None, pos),
    }
}

/// Finds clause markers at depth zero; returns where the head (text before the first marker) ends.
fn slice_clauses(tokens: &[Token], markers: &[(Clause, &[&str])]) -> (usize, Vec<(Clause, Vec<Token>)>) {
    let mut found: Vec<(usize, usize, Clause)> =
        markers.iter().filter_map(|(c, seq)| find_sequence(tokens, seq).map(|i| (i, i + seq.len(), *c))).collect();
    found.sort_by_key(|f| f.0);
    let head_end = found.first().map(|f| f.0).unwrap_or(tokens.len());
    let clauses = found
        .iter()
        .enumerate()
        .map(|(k, (_, start, c))| {
            let end = found.get(k + 1).map(|f| f.0).unwrap_or(tokens.len());
            (*c, tokens[*start..end].to_vec())
        })
        .collect();
    (head_end, clauses)
}

fn contains_subquery(tokens: &[Token]) -> bool { tokens.windows(2).any(|w| w[0] == Token::LParen && is_keyword(&w[1], "SELECT")) }

fn extract_select(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut branches = Vec::new();
    let mut all = true;
    let mut start = 0;
    let unions: Vec<usize> = lexer::top_level(tokens).filter(|(_, t)| is_keyword(t, "UNION")).map(|(i, _)| i).collect();
    if unions.is_empty() {
        return extract_select_branch(tokens);
    }
    for u in unions.iter().copied().chain(std::iter::once(tokens.len())) {
        branches.push(lexer::strip_parens(&tokens[start..u]));
        start = u + 1;
        if tokens.get(start).is_some_and(|t| is_keyword(t, "ALL")) {
            start += 1;
        } else if u < tokens.len() {
            all = false;
        }
    }
    let parts = branches.into_iter().map(extract_tokens).collect::<Result<Vec<_>, _>>()?;
    let mut main = parts[0].clone();
    main.union = Some(RawUnion { all, branches: parts });
    Ok(main)
}

fn extract_select_branch(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::Select);
    raw.has_subquery = contains_subquery(tokens);
    let mut pos = 1;
    match tokens.get(1) {
        Some(t) if is_keyword(t, "DISTINCT") => {
            raw.distinct = true;
            pos = 2;
        }
        Some(t) if is_keyword(t, "ALL") => pos = 2,
        _ => {}
    }
    // SELECT TOP n
    if tokens.get(pos).is_some_and(|t| is_keyword(t, "TOP"))
        && let Some(n) = tokens.get(pos + 1)
        && matches!(n, Token::Number(_, _))
    {
        raw.push(Clause::Limit, std::slice::from_ref(n));
        pos += 2;
    }
    let from = find_keyword(tokens, "FROM").filter(|f| *f >= pos).ok_or(ParseError::MissingTable("SELECT"))?;
    raw.push(Clause::Fields, &tokens[pos..from]);

    let rest = &tokens[from + 1..];
    let (head_end, clauses) = slice_clauses(rest, SELECT_MARKERS);
    raw.clauses.extend(clauses);
    parse_from(&rest[..head_end], &mut raw)?;
    Ok(raw)
}

/// Parenthesised source in FROM/JOIN position. A subquery's own source table stands in for the name
/// (flagging the statement); `(name)` is just the table.
fn parenthesised_source(tokens: &[Token], pos: usize, raw: &mut RawClauses) -> Result<(String, usize), ParseError> {
    let close = lexer::matching_paren(tokens, pos).ok_or_else(|| ParseError::Syntax("unbalanced parentheses in FROM clause".into()))?;
    let inner = &tokens[pos + 1..close];
    if inner.first().is_some_and(|t| is_keyword(t, "SELECT")) {
        raw.has_subquery = true;
        return Ok((extract_tokens(inner)?.table, close + 1));
    }
    let name = lexer::strip_parens(inner);
    match table_name(name, 0) {
        Some((table, end)) if end == name.len() => Ok((table, close + 1)),
        _ => Err(ParseError::Syntax(format!("unexpected `({})` in FROM clause", lexer::render(inner)))),
    }
}

fn parse_from(tokens: &[Token], raw: &mut RawClauses) -> Result<(), ParseError> {
    let (table, mut i) = if tokens.first() == Some(&Token::LParen) {
        parenthesised_source(tokens, 0, raw)?
    } else {
        table_name(tokens, 0).ok_or(ParseError::MissingTable("SELECT"))?
    };
    raw.table = table;
    let (a, next) = alias(tokens, i);
    raw.table_alias = a;
    i = next;

    while i < tokens.len() {
        let (kind, next) = join_keyword(tokens, i).ok_or_else(|| ParseError::Syntax(format!("unexpected `{}` in FROM clause", lexer::render(&tokens[i..]))))?;
        i = next;
        let (table, next) = if tokens.get(i) == Some(&Token::LParen) {
            parenthesised_source(tokens, i, raw)?
        } else {
            table_name(tokens, i).ok_or_else(|| ParseError::Syntax(format!("{} JOIN without a table", kind.as_str())))?
        };
        i = next;
        let (a, next) = alias(tokens, i);
        i = next;
        let mut join = RawJoin { kind, table, alias: a, on: None, using: Vec::new() };
        match tokens.get(i) {
            Some(t) if is_keyword(t, "ON") => {
                let end = next_join_start(tokens, i + 1);
                join.on = Some(tokens[i + 1..end].to_vec());
                i = end;
            }
            Some(t) if is_keyword(t, "USING") => {
                let close = lexer::matching_paren(tokens, i + 1).ok_or_else(|| ParseError::Syntax("USING expects a column list".into()))?;
                join.using = lexer::split_commas(&tokens[i + 2..close]).into_iter().map(|c| lexer::render(c).to_ascii_lowercase()).collect();
                i = close + 1;
            }
            _ => {}
        }
        raw.joins.push(join);
    }
    Ok(())
}

fn join_keyword(tokens: &[Token], i: usize) -> Option<(JoinKind, usize)> {
    if tokens.get(i) == Some(&Token::Comma) {
        return Some((JoinKind::Cross, i + 1));
    }
    let mut j = i;
    if tokens.get(j).is_some_and(|t| is_keyword(t, "NATURAL")) {
        j += 1;
    }
    let kind = match tokens.get(j) {
        Some(t) if is_keyword(t, "JOIN") => return Some((JoinKind::Inner, j + 1)),
        Some(t) if is_keyword(t, "INNER") => JoinKind::Inner,
        Some(t) if is_keyword(t, "LEFT") => JoinKind::Left,
        Some(t) if is_keyword(t, "RIGHT") => JoinKind::Right,
        Some(t) if is_keyword(t, "FULL") => JoinKind::Full,
        Some(t) if is_keyword(t, "CROSS") => JoinKind::Cross,
        _ => return None,
    };
    j += 1;
    if tokens.get(j).is_some_and(|t| is_keyword(t, "OUTER")) {
        j += 1;
    }
    tokens.get(j).filter(|t| is_keyword(t, "JOIN")).map(|_| (kind, j + 1))
}

/// End of an ON condition: the next top-level comma or join keyword (LEFT(...) / RIGHT(...) calls excluded).
fn next_join_start(tokens: &[Token], start: usize) -> usize {
    lexer::top_level(&tokens[start..])
        .find(|(k, t)| {
            **t == Token::Comma
                || (is_any_keyword(t, &["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL"])
                    && tokens.get(start + k + 1) != Some(&Token::LParen))
        })
        .map(|(k, _)| start + k)
        .unwrap_or(tokens.len())
}

fn extract_insert(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::Insert);
    let mut pos = 1;
    if tokens.get(pos).is_some_and(|t| is_keyword(t, "INTO")) {
        pos += 1;
    }
    let (table, mut i) = table_name(tokens, pos).ok_or(ParseError::MissingTable("INSERT"))?;
    raw.table = table;
    if tokens.get(i) == Some(&Token::LParen) {
        let close = lexer::matching_paren(tokens, i).ok_or_else(|| ParseError::Syntax("unbalanced column list".into()))?;
        raw.push(Clause::Columns, &tokens[i + 1..close]);
        i = close + 1;
    }
    match tokens.get(i) {
        Some(t) if is_any_keyword(t, &["VALUES", "VALUE"]) => raw.push(Clause::Values, &tokens[i + 1..]),
        Some(t) if is_keyword(t, "SELECT") => return Err(ParseError::Syntax("INSERT ... SELECT is not supported".into())),
        _ => return Err(ParseError::Syntax("INSERT requires a VALUES list".into())),
    }
    Ok(raw)
}

fn extract_update(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::Update);
    let (table, i) = table_name(tokens, 1).ok_or(ParseError::MissingTable("UPDATE"))?;
    raw.table = table;
    let (a, i) = alias(tokens, i);
    raw.table_alias = a;
    if !tokens.get(i).is_some_and(|t| is_keyword(t, "SET")) {
        return Err(ParseError::Syntax("UPDATE requires a SET list".into()));
    }
    let rest = &tokens[i + 1..];
    raw.has_subquery = contains_subquery(rest);
    let (head_end, clauses) = slice_clauses(rest, WHERE_MARKER);
    raw.push(Clause::Set, &rest[..head_end]);
    raw.clauses.extend(clauses);
    Ok(raw)
}

fn extract_delete(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::Delete);
    let mut pos = 1;
    if tokens.get(pos).is_some_and(|t| is_keyword(t, "FROM")) {
        pos += 1;
    }
    let (table, i) = table_name(tokens, pos).ok_or(ParseError::MissingTable("DELETE"))?;
    raw.table = table;
    let (a, i) = alias(tokens, i);
    raw.table_alias = a;
    let rest = &tokens[i..];
    raw.has_subquery = contains_subquery(rest);
    let (_, clauses) = slice_clauses(rest, WHERE_MARKER);
    raw.clauses.extend(clauses);
    Ok(raw)
}

fn extract_create(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::CreateTable);
    let mut pos = 1;
    if tokens.get(pos).is_some_and(|t| is_any_keyword(t, &["TEMPORARY", "TEMP"])) {
        pos += 1;
    }
    if !tokens.get(pos).is_some_and(|t| is_keyword(t, "TABLE")) {
        return Err(ParseError::AmbiguousStatement("only CREATE TABLE is supported".into()));
    }
    pos += 1;
    if find_sequence(&tokens[pos..], &["IF", "NOT", "EXISTS"]) == Some(0) {
        raw.if_not_exists = true;
        pos += 3;
    }
    let (table, i) = table_name(tokens, pos).ok_or(ParseError::MissingTable("CREATE TABLE"))?;
    raw.table = table;
    if tokens.get(i) != Some(&Token::LParen) {
        return Err(ParseError::Syntax("CREATE TABLE requires a column list".into()));
    }
    let close = lexer::matching_paren(tokens, i).ok_or_else(|| ParseError::Syntax("unbalanced column list".into()))?;
    raw.push(Clause::Body, &tokens[i + 1..close]);
    Ok(raw)
}

fn extract_drop(tokens: &[Token]) -> Result<RawClauses, ParseError> {
    let mut raw = RawClauses::new(StatementKind::DropTable);
    if !tokens.get(1).is_some_and(|t| is_keyword(t, "TABLE")) {
        return Err(ParseError::AmbiguousStatement("only DROP TABLE is supported".into()));
    }
    let mut pos = 2;
    if find_sequence(&tokens[pos..], &["IF", "EXISTS"]) == Some(0) {
        raw.if_exists = true;
        pos += 2;
    }
    let (table, _) = table_name(tokens, pos).ok_or(ParseError::MissingTable("DROP TABLE"))?;
    raw.table = table;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(raw: &RawClauses, c: Clause) -> Option<String> { raw.clause(c).map(lexer::render) }

    #[test]
    fn select_clauses_in_any_order() {
        let raw = extract("SELECT a, b FROM `Users` u WHERE a = 1 GROUP BY a HAVING COUNT(*) > 1 ORDER BY a DESC LIMIT 5;").unwrap();
        assert_eq!(raw.kind, StatementKind::Select);
        assert_eq!(raw.table, "users");
        assert_eq!(raw.table_alias.as_deref(), Some("u"));
        assert_eq!(text(&raw, Clause::Fields).as_deref(), Some("a, b"));
        assert_eq!(text(&raw, Clause::Where).as_deref(), Some("a = 1"));
        assert_eq!(text(&raw, Clause::GroupBy).as_deref(), Some("a"));
        assert_eq!(text(&raw, Clause::Having).as_deref(), Some("COUNT(*) > 1"));
        assert_eq!(text(&raw, Clause::OrderBy).as_deref(), Some("a DESC"));
        assert_eq!(text(&raw, Clause::Limit).as_deref(), Some("5"));
    }

    #[test]
    fn clause_keywords_inside_literals_are_ignored() {
        let raw = extract("SELECT * FROM t WHERE note = 'x ORDER BY y'").unwrap();
        assert!(raw.clause(Clause::OrderBy).is_none());
    }

    #[test]
    fn joins_are_collected() {
        let raw = extract("SELECT * FROM orders o LEFT OUTER JOIN customers c ON o.cid = c.id JOIN items i USING (order_id), regions").unwrap();
        assert_eq!(raw.joins.len(), 3);
        assert_eq!(raw.joins[0].kind, JoinKind::Left);
        assert_eq!(raw.joins[0].alias.as_deref(), Some("c"));
        assert_eq!(raw.joins[0].on.as_deref().map(lexer::render).as_deref(), Some("o.cid = c.id"));
        assert_eq!(raw.joins[1].using, vec!["order_id".to_string()]);
        assert_eq!(raw.joins[2].kind, JoinKind::Cross);
        assert_eq!(raw.joins[2].table, "regions");
    }

    #[test]
    fn statement_kind_errors() {
        assert!(matches!(extract(""), Err(ParseError::AmbiguousStatement(_))));
        assert!(matches!(extract("EXPLAIN SELECT 1"), Err(ParseError::AmbiguousStatement(_))));
        assert!(matches!(extract("SELECT 1; SELECT 2"), Err(ParseError::AmbiguousStatement(_))));
        assert!(matches!(extract("CREATE INDEX i ON t (a)"), Err(ParseError::AmbiguousStatement(_))));
        assert_eq!(extract("SELECT 1"), Err(ParseError::MissingTable("SELECT")));
        assert_eq!(extract("DELETE FROM WHERE a = 1"), Err(ParseError::MissingTable("DELETE")));
    }

    #[test]
    fn parenthesised_sources() {
        let raw = extract("SELECT * FROM (Accounts) a JOIN ((regions)) r ON a.region_id = r.id").unwrap();
        assert_eq!(raw.table, "accounts");
        assert_eq!(raw.table_alias.as_deref(), Some("a"));
        assert_eq!(raw.joins[0].table, "regions");
        assert!(!raw.has_subquery);
        let raw = extract("SELECT * FROM (SELECT id FROM users) u").unwrap();
        assert_eq!(raw.table, "users");
        assert!(raw.has_subquery);
        assert!(matches!(extract("SELECT * FROM (a b c)"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn union_branches() {
        let raw = extract("SELECT a FROM t1 UNION ALL SELECT a FROM t2").unwrap();
        let union = raw.union.unwrap();
        assert!(union.all);
        assert_eq!(union.branches.len(), 2);
        assert_eq!(union.branches[1].table, "t2");
    }

    #[test]
    fn ddl_headers() {
        let raw = extract("CREATE TABLE IF NOT EXISTS shop.Items (id INT)").unwrap();
        assert!(raw.if_not_exists);
        assert_eq!(raw.table, "shop.items");
        assert_eq!(text(&raw, Clause::Body).as_deref(), Some("id INT"));
        let raw = extract("DROP TABLE IF EXISTS items").unwrap();
        assert!(raw.if_exists);
        assert_eq!(raw.table, "items");
    }
}
