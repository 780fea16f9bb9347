//! SQL function table and translation into aggregation expressions / accumulators.

use std::collections::HashMap;

use bson::{Bson, Document, doc};
use log::warn;
use once_cell::sync::Lazy;

use super::errors::{TranslateError, Warning};
use crate::models::{Expr, FunctionCall, FunctionCategory, Scalar, WarningKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    /// `{op: arg}`
    Unary,
    /// `{op: [args...]}`
    ArgArray,
    /// `{op: {input: arg}}`
    Input,
    /// Hand-written translation keyed by name.
    Custom,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: &'static str,
    pub category: FunctionCategory,
    pub operator: &'static str,
    min_args: usize,
    max_args: usize,
    shape: Shape,
}

const VARIADIC: usize = usize::MAX;

const fn def(name: &'static str, category: FunctionCategory, operator: &'static str, min_args: usize, max_args: usize, shape: Shape) -> FunctionDef {
    FunctionDef { name, category, operator, min_args, max_args, shape }
}

use FunctionCategory as C;
use Shape as S;

const FUNCTIONS: &[FunctionDef] = &[
    def("NOW", C::DateCurrent, "$$NOW", 0, 0, S::Custom),
    def("CURRENT_DATE", C::DateCurrent, "$$NOW", 0, 0, S::Custom),
    def("CURRENT_TIMESTAMP", C::DateCurrent, "$$NOW", 0, 0, S::Custom),
    def("GETDATE", C::DateCurrent, "$$NOW", 0, 0, S::Custom),
    def("SYSDATE", C::DateCurrent, "$$NOW", 0, 0, S::Custom),
    def("YEAR", C::DateExtract, "$year", 1, 1, S::Unary),
    def("MONTH", C::DateExtract, "$month", 1, 1, S::Unary),
    def("DAY", C::DateExtract, "$dayOfMonth", 1, 1, S::Unary),
    def("DAYOFMONTH", C::DateExtract, "$dayOfMonth", 1, 1, S::Unary),
    def("HOUR", C::DateExtract, "$hour", 1, 1, S::Unary),
    def("MINUTE", C::DateExtract, "$minute", 1, 1, S::Unary),
    def("SECOND", C::DateExtract, "$second", 1, 1, S::Unary),
    def("DAYOFWEEK", C::DateExtract, "$dayOfWeek", 1, 1, S::Unary),
    def("DAYOFYEAR", C::DateExtract, "$dayOfYear", 1, 1, S::Unary),
    def("WEEK", C::DateExtract, "$week", 1, 1, S::Unary),
    def("DATE", C::DateFormat, "$dateToString", 1, 1, S::Custom),
    def("DATE_FORMAT", C::DateFormat, "$dateToString", 2, 2, S::Custom),
    def("DATEADD", C::DateArithmetic, "$dateAdd", 3, 3, S::Custom),
    def("DATEDIFF", C::DateArithmetic, "$dateDiff", 2, 3, S::Custom),
    def("UPPER", C::StringTransform, "$toUpper", 1, 1, S::Unary),
    def("UCASE", C::StringTransform, "$toUpper", 1, 1, S::Unary),
    def("LOWER", C::StringTransform, "$toLower", 1, 1, S::Unary),
    def("LCASE", C::StringTransform, "$toLower", 1, 1, S::Unary),
    def("LENGTH", C::StringInfo, "$strLenCP", 1, 1, S::Unary),
    def("LEN", C::StringInfo, "$strLenCP", 1, 1, S::Unary),
    def("CHAR_LENGTH", C::StringInfo, "$strLenCP", 1, 1, S::Unary),
    def("CONCAT", C::StringCombine, "$concat", 1, VARIADIC, S::ArgArray),
    def("SUBSTRING", C::StringExtract, "$substrCP", 2, 3, S::Custom),
    def("SUBSTR", C::StringExtract, "$substrCP", 2, 3, S::Custom),
    def("LEFT", C::StringExtract, "$substrCP", 2, 2, S::Custom),
    def("RIGHT", C::StringExtract, "$substrCP", 2, 2, S::Custom),
    def("TRIM", C::StringClean, "$trim", 1, 1, S::Input),
    def("LTRIM", C::StringClean, "$ltrim", 1, 1, S::Input),
    def("RTRIM", C::StringClean, "$rtrim", 1, 1, S::Input),
    def("REPLACE", C::StringModify, "$replaceAll", 3, 3, S::Custom),
    def("CHARINDEX", C::StringSearch, "$indexOfCP", 2, 2, S::Custom),
    def("LOCATE", C::StringSearch, "$indexOfCP", 2, 2, S::Custom),
    def("INSTR", C::StringSearch, "$indexOfCP", 2, 2, S::Custom),
    def("ABS", C::MathBasic, "$abs", 1, 1, S::Unary),
    def("ROUND", C::MathRound, "$round", 1, 2, S::Custom),
    def("CEIL", C::MathRound, "$ceil", 1, 1, S::Unary),
    def("CEILING", C::MathRound, "$ceil", 1, 1, S::Unary),
    def("FLOOR", C::MathRound, "$floor", 1, 1, S::Unary),
    def("TRUNCATE", C::MathRound, "$trunc", 1, 2, S::ArgArray),
    def("SQRT", C::MathAdvanced, "$sqrt", 1, 1, S::Unary),
    def("EXP", C::MathAdvanced, "$exp", 1, 1, S::Unary),
    def("POWER", C::MathAdvanced, "$pow", 2, 2, S::ArgArray),
    def("POW", C::MathAdvanced, "$pow", 2, 2, S::ArgArray),
    def("MOD", C::MathAdvanced, "$mod", 2, 2, S::ArgArray),
    def("SIN", C::MathTrig, "$sin", 1, 1, S::Unary),
    def("COS", C::MathTrig, "$cos", 1, 1, S::Unary),
    def("TAN", C::MathTrig, "$tan", 1, 1, S::Unary),
    def("ASIN", C::MathTrig, "$asin", 1, 1, S::Unary),
    def("ACOS", C::MathTrig, "$acos", 1, 1, S::Unary),
    def("ATAN", C::MathTrig, "$atan", 1, 1, S::Unary),
    def("LOG", C::MathLog, "$log", 1, 2, S::Custom),
    def("LN", C::MathLog, "$ln", 1, 1, S::Unary),
    def("LOG10", C::MathLog, "$log10", 1, 1, S::Unary),
    def("RAND", C::MathRandom, "$rand", 0, 0, S::Custom),
    def("RANDOM", C::MathRandom, "$rand", 0, 0, S::Custom),
    def("COUNT", C::Aggregate, "$sum", 1, 1, S::Custom),
    def("SUM", C::Aggregate, "$sum", 1, 1, S::Unary),
    def("AVG", C::Aggregate, "$avg", 1, 1, S::Unary),
    def("MIN", C::Aggregate, "$min", 1, 1, S::Unary),
    def("MAX", C::Aggregate, "$max", 1, 1, S::Unary),
];

static BY_NAME: Lazy<HashMap<&'static str, &'static FunctionDef>> = Lazy::new(|| FUNCTIONS.iter().map(|d| (d.name, d)).collect());

pub fn lookup(name: &str) -> Option<&'static FunctionDef> { BY_NAME.get(name.to_ascii_uppercase().as_str()).copied() }

pub fn category_of(name: &str) -> FunctionCategory { lookup(name).map(|d| d.category).unwrap_or(FunctionCategory::Unknown) }

/// State threaded through expression translation: how column names map to document paths,
/// and where non-fatal problems get reported.
pub struct ExprContext<'a> {
    pub resolve: &'a dyn Fn(&str) -> String,
    pub warnings: &'a mut Vec<Warning>,
}

impl<'a> ExprContext<'a> {
    pub fn new(resolve: &'a dyn Fn(&str) -> String, warnings: &'a mut Vec<Warning>) -> Self { Self { resolve, warnings } }

    pub fn field(&self, name: &str) -> Bson { Bson::String(format!("${}", (self.resolve)(name))) }
}

pub(crate) fn single(key: &str, value: impl Into<Bson>) -> Bson {
    let mut d = Document::new();
    d.insert(key, value);
    Bson::Document(d)
}

/// Translate an expression. Failures become a `$literal` of the source text plus a warning.
pub fn expr_to_bson(expr: &Expr, cx: &mut ExprContext<'_>) -> Bson {
    match expr {
        Expr::Field(f) => cx.field(f),
        Expr::Literal(Scalar::String(s)) if s.starts_with('$') => doc! { "$literal": s.as_str() }.into(),
        Expr::Literal(s) => s.to_bson(),
        Expr::Star => Bson::Int32(1),
        Expr::Call(call) => match translate(call, cx) {
            Ok(b) => b,
            Err(e) => {
                warn!("function translation failed: {}", e);
                cx.warnings.push(Warning::new(WarningKind::UnsupportedFunction, e.to_string()));
                doc! { "$literal": call.to_string() }.into()
            }
        },
        Expr::Binary { op, left, right } => {
            let l = expr_to_bson(left, cx);
            let r = expr_to_bson(right, cx);
            single(op.operator(), vec![l, r])
        }
        Expr::Raw(text) => {
            cx.warnings.push(Warning::new(WarningKind::UnsupportedFunction, format!("untranslatable expression `{}`", text)));
            doc! { "$literal": text.as_str() }.into()
        }
    }
}

fn check_arity(def: &FunctionDef, call: &FunctionCall) -> Result<(), TranslateError> {
    let got = call.args.len();
    if got >= def.min_args && got <= def.max_args {
        return Ok(());
    }
    let expected = match (def.min_args, def.max_args) {
        (0, 0) => "0",
        (1, 1) => "1",
        (2, 2) => "2",
        (3, 3) => "3",
        (1, 2) => "1 or 2",
        (2, 3) => "2 or 3",
        (_, VARIADIC) => "at least 1",
        _ => "a different number of",
    };
    Err(TranslateError::Arity { name: call.name.clone(), expected, got })
}

/// Scalar function → aggregation expression.
pub fn translate(call: &FunctionCall, cx: &mut ExprContext<'_>) -> Result<Bson, TranslateError> {
    let def = lookup(&call.name).ok_or_else(|| TranslateError::Unsupported(call.name.clone()))?;
    check_arity(def, call)?;
    if def.category == FunctionCategory::Aggregate {
        return Err(TranslateError::Argument { name: call.name.clone(), detail: "aggregate used outside a grouping context".into() });
    }
    let args: Vec<Bson> = call.args.iter().map(|a| expr_to_bson(a, cx)).collect();
    match def.shape {
        Shape::Unary => Ok(single(def.operator, args[0].clone())),
        Shape::ArgArray => Ok(single(def.operator, args)),
        Shape::Input => Ok(single(def.operator, doc! { "input": args[0].clone() })),
        Shape::Custom => translate_custom(def, call, args),
    }
}

fn translate_custom(def: &FunctionDef, call: &FunctionCall, args: Vec<Bson>) -> Result<Bson, TranslateError> {
    let out: Bson = match def.name {
        "NOW" | "CURRENT_DATE" | "CURRENT_TIMESTAMP" | "GETDATE" | "SYSDATE" => Bson::String("$$NOW".into()),
        "RAND" | "RANDOM" => doc! { "$rand": {} }.into(),
        "DATE" => doc! { "$dateToString": { "format": "%Y-%m-%d", "date": args[0].clone() } }.into(),
        "DATE_FORMAT" => {
            let format = string_arg(call, 1)?.replace("%i", "%M").replace("%s", "%S");
            doc! { "$dateToString": { "format": format, "date": args[0].clone() } }.into()
        }
        "DATEADD" => {
            let unit = date_unit(call, 0)?;
            doc! { "$dateAdd": { "startDate": args[2].clone(), "unit": unit, "amount": args[1].clone() } }.into()
        }
        "DATEDIFF" if args.len() == 3 => {
            let unit = date_unit(call, 0)?;
            doc! { "$dateDiff": { "startDate": args[1].clone(), "endDate": args[2].clone(), "unit": unit } }.into()
        }
        // two-argument form: DATEDIFF(end, start) in days
        "DATEDIFF" => doc! { "$dateDiff": { "startDate": args[1].clone(), "endDate": args[0].clone(), "unit": "day" } }.into(),
        "SUBSTRING" | "SUBSTR" => {
            let literal_start = match call.args.get(1) {
                Some(Expr::Literal(s)) => s.as_i64(),
                _ => None,
            };
            let start = match literal_start {
                Some(n) => Scalar::Integer(n.saturating_sub(1)).to_bson(),
                None => doc! { "$subtract": [args[1].clone(), 1] }.into(),
            };
            let len = args.get(2).cloned().unwrap_or_else(|| doc! { "$strLenCP": args[0].clone() }.into());
            doc! { "$substrCP": [args[0].clone(), start, len] }.into()
        }
        "LEFT" => doc! { "$substrCP": [args[0].clone(), 0, args[1].clone()] }.into(),
        "RIGHT" => {
            let from = doc! { "$subtract": [{ "$strLenCP": args[0].clone() }, args[1].clone()] };
            doc! { "$substrCP": [args[0].clone(), from, args[1].clone()] }.into()
        }
        "REPLACE" => doc! { "$replaceAll": { "input": args[0].clone(), "find": args[1].clone(), "replacement": args[2].clone() } }.into(),
        // SQL positions are 1-based with 0 for "not found"
        "CHARINDEX" | "LOCATE" => doc! { "$add": [{ "$indexOfCP": [args[1].clone(), args[0].clone()] }, 1] }.into(),
        "INSTR" => doc! { "$add": [{ "$indexOfCP": [args[0].clone(), args[1].clone()] }, 1] }.into(),
        "ROUND" => doc! { "$round": [args[0].clone(), args.get(1).cloned().unwrap_or(Bson::Int32(0))] }.into(),
        "LOG" if args.len() == 2 => doc! { "$log": [args[1].clone(), args[0].clone()] }.into(),
        "LOG" => doc! { "$ln": args[0].clone() }.into(),
        _ => return Err(TranslateError::Unsupported(call.name.clone())),
    };
    Ok(out)
}

fn string_arg(call: &FunctionCall, idx: usize) -> Result<String, TranslateError> {
    match call.args.get(idx) {
        Some(Expr::Literal(Scalar::String(s))) => Ok(s.clone()),
        _ => Err(TranslateError::Argument { name: call.name.clone(), detail: format!("argument {} must be a string literal", idx + 1) }),
    }
}

fn date_unit(call: &FunctionCall, idx: usize) -> Result<&'static str, TranslateError> {
    let raw = match call.args.get(idx) {
        Some(Expr::Field(f)) => f.to_ascii_lowercase(),
        Some(Expr::Literal(Scalar::String(s))) => s.to_ascii_lowercase(),
        _ => String::new(),
    };
    let unit = match raw.as_str() {
        "year" | "yy" | "yyyy" => "year",
        "quarter" | "qq" | "q" => "quarter",
        "month" | "mm" | "m" => "month",
        "week" | "wk" | "ww" => "week",
        "day" | "dd" | "d" => "day",
        "hour" | "hh" => "hour",
        "minute" | "mi" | "n" => "minute",
        "second" | "ss" | "s" => "second",
        "millisecond" | "ms" => "millisecond",
        _ => return Err(TranslateError::Argument { name: call.name.clone(), detail: format!("unknown date part `{}`", raw) }),
    };
    Ok(unit)
}

/// Aggregate call → group-stage accumulator.
pub fn accumulator(call: &FunctionCall, cx: &mut ExprContext<'_>) -> Result<Bson, TranslateError> {
    let def = lookup(&call.name).filter(|d| d.category == FunctionCategory::Aggregate).ok_or_else(|| TranslateError::Unsupported(call.name.clone()))?;
    check_arity(def, call)?;
    let acc = match (def.name, &call.args[0]) {
        ("COUNT", Expr::Star) => doc! { "$sum": 1 },
        ("COUNT", Expr::Literal(s)) if *s != Scalar::Null => doc! { "$sum": 1 },
        ("COUNT", arg) if call.distinct => doc! { "$addToSet": expr_to_bson(arg, cx) },
        ("COUNT", arg) => {
            let value = expr_to_bson(arg, cx);
            doc! { "$sum": { "$cond": [{ "$eq": [{ "$ifNull": [value, Bson::Null] }, Bson::Null] }, 0, 1] } }
        }
        (_, Expr::Star) => return Err(TranslateError::Argument { name: call.name.clone(), detail: "`*` is only valid for COUNT".into() }),
        (_, arg) => {
            let mut d = Document::new();
            d.insert(def.operator, expr_to_bson(arg, cx));
            d
        }
    };
    Ok(Bson::Document(acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BinaryOp;

    fn call(name: &str, args: Vec<Expr>) -> FunctionCall {
        FunctionCall { name: name.into(), category: category_of(name), args, distinct: false }
    }

    fn field(f: &str) -> Expr { Expr::Field(f.into()) }
    fn int(i: i64) -> Expr { Expr::Literal(Scalar::Integer(i)) }

    fn run(c: &FunctionCall) -> (Result<Bson, TranslateError>, Vec<Warning>) {
        let resolve = |f: &str| f.to_string();
        let mut warnings = Vec::new();
        let out = translate(c, &mut ExprContext::new(&resolve, &mut warnings));
        (out, warnings)
    }

    #[test]
    fn substring_shifts_to_zero_based() {
        let (out, _) = run(&call("SUBSTRING", vec![field("name"), int(2), int(3)]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$substrCP": ["$name", 1, 3] }));
    }

    #[test]
    fn substring_start_saturates_at_the_bounds() {
        let (out, _) = run(&call("SUBSTRING", vec![field("name"), int(i64::MIN), int(1)]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$substrCP": ["$name", i64::MIN, 1] }));
        let huge = Expr::Literal(Scalar::Double(1e30));
        let (out, _) = run(&call("SUBSTR", vec![field("name"), huge, int(1)]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$substrCP": ["$name", { "$subtract": [1e30, 1] }, 1] }));
    }

    #[test]
    fn right_takes_suffix() {
        let (out, _) = run(&call("RIGHT", vec![field("code"), int(2)]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$substrCP": ["$code", { "$subtract": [{ "$strLenCP": "$code" }, 2] }, 2] }));
    }

    #[test]
    fn nested_calls_and_arithmetic() {
        let inner = Expr::Binary { op: BinaryOp::Multiply, left: Box::new(field("price")), right: Box::new(int(2)) };
        let (out, _) = run(&call("ROUND", vec![inner]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$round": [{ "$multiply": ["$price", 2] }, 0] }));
        let (out, _) = run(&call("UPPER", vec![Expr::Call(call("TRIM", vec![field("name")]))]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$toUpper": { "$trim": { "input": "$name" } } }));
    }

    #[test]
    fn date_functions() {
        let (out, _) = run(&call("NOW", vec![]));
        assert_eq!(out.unwrap(), Bson::String("$$NOW".into()));
        let (out, _) = run(&call("DATEADD", vec![field("day"), int(5), field("created")]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$dateAdd": { "startDate": "$created", "unit": "day", "amount": 5 } }));
        let (out, _) = run(&call("YEAR", vec![field("created")]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$year": "$created" }));
    }

    #[test]
    fn log_forms() {
        let (out, _) = run(&call("LOG", vec![field("x")]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$ln": "$x" }));
        let (out, _) = run(&call("LOG", vec![int(2), field("x")]));
        assert_eq!(out.unwrap(), Bson::Document(doc! { "$log": ["$x", 2] }));
    }

    #[test]
    fn unknown_function_is_reported() {
        let (out, _) = run(&call("SOUNDEX", vec![field("x")]));
        assert_eq!(out.unwrap_err(), TranslateError::Unsupported("SOUNDEX".into()));
        let resolve = |f: &str| f.to_string();
        let mut warnings = Vec::new();
        let b = expr_to_bson(&Expr::Call(call("SOUNDEX", vec![field("x")])), &mut ExprContext::new(&resolve, &mut warnings));
        assert_eq!(b, Bson::Document(doc! { "$literal": "SOUNDEX(x)" }));
        assert_eq!(warnings[0].kind, WarningKind::UnsupportedFunction);
    }

    #[test]
    fn arity_is_checked() {
        let (out, _) = run(&call("UPPER", vec![]));
        assert!(matches!(out, Err(TranslateError::Arity { got: 0, .. })));
    }

    #[test]
    fn accumulators() {
        let resolve = |f: &str| f.to_string();
        let mut warnings = Vec::new();
        let mut cx = ExprContext::new(&resolve, &mut warnings);
        assert_eq!(accumulator(&call("COUNT", vec![Expr::Star]), &mut cx).unwrap(), Bson::Document(doc! { "$sum": 1 }));
        assert_eq!(accumulator(&call("SUM", vec![field("amount")]), &mut cx).unwrap(), Bson::Document(doc! { "$sum": "$amount" }));
        let mut distinct = call("COUNT", vec![field("user_id")]);
        distinct.distinct = true;
        assert_eq!(accumulator(&distinct, &mut cx).unwrap(), Bson::Document(doc! { "$addToSet": "$user_id" }));
    }
}
