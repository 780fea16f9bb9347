//! Condition tree → query filter document.

use bson::{Bson, Document, doc};

use crate::models::{Condition, Operand, Operator, Scalar};
use crate::query_ast::functions::{ExprContext, expr_to_bson, single};

/// Lower a condition. Field leaves use query operators; expression leaves go through `$expr`.
pub fn to_filter(cond: &Condition, cx: &mut ExprContext<'_>, case_insensitive: bool) -> Document {
    match cond {
        Condition::Leaf { target: Operand::Field(f), op } => {
            let mut d = Document::new();
            d.insert((cx.resolve)(f), field_operator(op, case_insensitive));
            d
        }
        Condition::Leaf { target: Operand::Expr(e), op } => {
            let lhs = expr_to_bson(e, cx);
            doc! { "$expr": expr_operator(lhs, op, case_insensitive) }
        }
        Condition::And(children) => merge(children.iter().map(|c| to_filter(c, cx, case_insensitive)).collect()),
        Condition::Or(children) => {
            let branches: Vec<Bson> = children.iter().map(|c| Bson::Document(to_filter(c, cx, case_insensitive))).collect();
            doc! { "$or": branches }
        }
    }
}

fn regex(pattern: &str, case_insensitive: bool) -> Document {
    if case_insensitive { doc! { "$regex": pattern, "$options": "i" } } else { doc! { "$regex": pattern } }
}

fn list(values: &[Scalar]) -> Vec<Bson> { values.iter().map(Scalar::to_bson).collect() }

fn field_operator(op: &Operator, ci: bool) -> Bson {
    match op {
        Operator::Eq(v) => v.to_bson(),
        Operator::Ne(v) => single("$ne", v.to_bson()),
        Operator::Gt(v) => single("$gt", v.to_bson()),
        Operator::Gte(v) => single("$gte", v.to_bson()),
        Operator::Lt(v) => single("$lt", v.to_bson()),
        Operator::Lte(v) => single("$lte", v.to_bson()),
        Operator::In(vs) => single("$in", list(vs)),
        Operator::NotIn(vs) => single("$nin", list(vs)),
        Operator::Like { pattern, negated: false, ilike } => regex(pattern, ci || *ilike).into(),
        Operator::Like { pattern, negated: true, ilike } => doc! { "$not": regex(pattern, ci || *ilike) }.into(),
        Operator::Between { low, high } => doc! { "$gte": low.to_bson(), "$lte": high.to_bson() }.into(),
        Operator::Exists(b) => doc! { "$exists": *b }.into(),
    }
}

/// Literal inside `$expr`; strings that look like field paths must not be read as one.
fn expr_value(s: &Scalar) -> Bson {
    match s {
        Scalar::String(text) if text.starts_with('$') => doc! { "$literal": text.as_str() }.into(),
        other => other.to_bson(),
    }
}

fn expr_operator(lhs: Bson, op: &Operator, ci: bool) -> Bson {
    let cmp = |name: &str, v: &Scalar| single(name, vec![lhs.clone(), expr_value(v)]);
    match op {
        Operator::Eq(v) => cmp("$eq", v),
        Operator::Ne(v) => cmp("$ne", v),
        Operator::Gt(v) => cmp("$gt", v),
        Operator::Gte(v) => cmp("$gte", v),
        Operator::Lt(v) => cmp("$lt", v),
        Operator::Lte(v) => cmp("$lte", v),
        Operator::In(vs) => single("$in", vec![lhs.clone(), Bson::Array(vs.iter().map(expr_value).collect())]),
        Operator::NotIn(vs) => doc! { "$not": [{ "$in": [lhs.clone(), vs.iter().map(expr_value).collect::<Vec<_>>()] }] }.into(),
        Operator::Like { pattern, negated, ilike } => {
            let mut m = doc! { "input": lhs.clone(), "regex": pattern.as_str() };
            if ci || *ilike {
                m.insert("options", "i");
            }
            let matched = doc! { "$regexMatch": m };
            if *negated { doc! { "$not": [matched] }.into() } else { matched.into() }
        }
        Operator::Between { low, high } => doc! { "$and": [cmp("$gte", low), cmp("$lte", high)] }.into(),
        Operator::Exists(true) => cmp("$ne", &Scalar::Null),
        Operator::Exists(false) => cmp("$eq", &Scalar::Null),
    }
}

fn is_operator_doc(b: &Bson) -> bool {
    matches!(b, Bson::Document(d) if !d.is_empty() && d.keys().all(|k| k.starts_with('$')))
}

/// Merge AND-ed filters into one document. Operator documents on the same field merge when their
/// operators are disjoint; any other key collision keeps the branches apart under `$and`.
pub fn merge(parts: Vec<Document>) -> Document {
    let mut merged = Document::new();
    for part in &parts {
        for (key, value) in part {
            match merged.get_mut(key) {
                None => {
                    merged.insert(key.clone(), value.clone());
                }
                Some(Bson::Document(existing))
                    if !key.starts_with('$')
                        && is_operator_doc(value)
                        && existing.keys().all(|k| k.starts_with('$'))
                        && value.as_document().is_some_and(|v| v.keys().all(|k| !existing.contains_key(k))) =>
                {
                    if let Some(v) = value.as_document() {
                        for (op, operand) in v {
                            existing.insert(op.clone(), operand.clone());
                        }
                    }
                }
                Some(_) => return doc! { "$and": parts.clone() },
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_ast::condition::parse_condition;
    use crate::query_ast::errors::Warning;

    fn filter_with(sql: &str, case_insensitive: bool) -> Document {
        let cond = parse_condition(sql).unwrap();
        let resolve = |f: &str| f.to_string();
        let mut warnings: Vec<Warning> = Vec::new();
        to_filter(&cond, &mut ExprContext::new(&resolve, &mut warnings), case_insensitive)
    }

    fn filter(sql: &str) -> Document { filter_with(sql, true) }

    #[test]
    fn equality_is_bare_value() {
        assert_eq!(filter("status = 'active' AND age = 30"), doc! { "status": "active", "age": 30 });
    }

    #[test]
    fn range_on_one_field_merges() {
        assert_eq!(filter("age > 18 AND age <= 65"), doc! { "age": { "$gt": 18, "$lte": 65 } });
    }

    #[test]
    fn conflicting_keys_fall_back_to_and() {
        assert_eq!(filter("age > 18 AND age > 21"), doc! { "$and": [{ "age": { "$gt": 18 } }, { "age": { "$gt": 21 } }] });
        let both_or = filter("(a = 1 OR b = 2) AND (c = 3 OR d = 4)");
        assert!(both_or.contains_key("$and"));
    }

    #[test]
    fn or_between_like_and_null() {
        assert_eq!(filter("a = 1 OR b = 2"), doc! { "$or": [{ "a": 1 }, { "b": 2 }] });
        assert_eq!(filter("price BETWEEN 10 AND 20"), doc! { "price": { "$gte": 10, "$lte": 20 } });
        assert_eq!(filter("name LIKE 'jo%'"), doc! { "name": { "$regex": "^jo.*", "$options": "i" } });
        assert_eq!(filter("name NOT LIKE 'jo%'"), doc! { "name": { "$not": { "$regex": "^jo.*", "$options": "i" } } });
        assert_eq!(filter("deleted_at IS NULL"), doc! { "deleted_at": { "$exists": false } });
        assert_eq!(filter("id IN (1, 2)"), doc! { "id": { "$in": [1, 2] } });
    }

    #[test]
    fn ilike_ignores_case_setting() {
        assert_eq!(filter_with("name ILIKE 'jo%'", false), doc! { "name": { "$regex": "^jo.*", "$options": "i" } });
        assert_eq!(filter_with("name LIKE 'jo%'", false), doc! { "name": { "$regex": "^jo.*" } });
        assert_eq!(
            filter_with("UPPER(name) ILIKE 'JO%'", false),
            doc! { "$expr": { "$regexMatch": { "input": { "$toUpper": "$name" }, "regex": "^JO.*", "options": "i" } } }
        );
    }

    #[test]
    fn negated_compound_pushes_down() {
        assert_eq!(filter("NOT (a = 1 OR b = 2)"), doc! { "a": { "$ne": 1 }, "b": { "$ne": 2 } });
        assert_eq!(filter("x = 5 AND NOT (a = 1 AND b = 2)"), doc! { "x": 5, "$or": [{ "a": { "$ne": 1 } }, { "b": { "$ne": 2 } }] });
    }

    #[test]
    fn function_operand_uses_expr() {
        assert_eq!(filter("UPPER(name) = 'BOB'"), doc! { "$expr": { "$eq": [{ "$toUpper": "$name" }, "BOB"] } });
    }
}
