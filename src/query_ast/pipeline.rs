//! Statement orchestration: picks the backend operation and assembles aggregation pipelines.

use bson::{Bson, Document, doc};
use log::{debug, info, warn};

use super::ddl;
use super::emitter::filter::to_filter;
use super::errors::{CompileError, Warning};
use super::functions::{self, ExprContext, expr_to_bson};
use super::joins::{self, FieldResolver, JoinPlan};
use super::logical::{CompiledOperation, CompiledQuery, Stage};
use crate::config::CompilerConfig;
use crate::models::{
    BinaryOp, Condition, DeleteSpec, Expr, FieldRef, FunctionCall, FunctionCategory, InsertSpec, Operand, Operator, ParsedStatement, Scalar,
    SelectSpec, StatementBody, UnionSpec, UpdateSpec, WarningKind,
};

pub fn compile_statement(stmt: &ParsedStatement, config: &CompilerConfig) -> Result<CompiledQuery, CompileError> {
    let mut warnings = stmt.warnings.clone();
    let operation = match &stmt.body {
        StatementBody::Select(s) => compile_select(&stmt.table, s, config, &mut warnings)?,
        StatementBody::Insert(i) => compile_insert(i, &mut warnings)?,
        StatementBody::Update(u) => compile_update(&stmt.table, u, config, &mut warnings),
        StatementBody::Delete(d) => compile_delete(&stmt.table, d, config, &mut warnings),
        StatementBody::CreateTable(c) => ddl::translate_create(&stmt.table, c, config, &mut warnings),
        StatementBody::DropTable(d) => ddl::translate_drop(&stmt.table, d)?,
    };
    info!("{:?} on `{}` compiled to {} ({} warnings)", stmt.kind, stmt.table, operation.name(), warnings.len());
    Ok(CompiledQuery { collection: stmt.table.clone(), operation, warnings })
}

fn note(warnings: &mut Vec<Warning>, kind: WarningKind, message: String) {
    warn!("{}", message);
    warnings.push(Warning::new(kind, message));
}

fn filter_doc(cond: &Condition, resolve: &dyn Fn(&str) -> String, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> Document {
    to_filter(cond, &mut ExprContext::new(resolve, warnings), config.like_case_insensitive)
}

/// Literals in `$project` must be wrapped, otherwise `1`/`0` read as inclusion flags.
fn project_value(expr: &Expr, cx: &mut ExprContext<'_>) -> Bson {
    match expr {
        Expr::Literal(s) => doc! { "$literal": s.to_bson() }.into(),
        other => expr_to_bson(other, cx),
    }
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

fn compile_select(table: &str, s: &SelectSpec, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> Result<CompiledOperation, CompileError> {
    if let Some(union) = &s.union {
        return compile_union(union, config, warnings);
    }
    if s.has_subquery {
        let reason = "subqueries have no single-operation equivalent".to_string();
        note(warnings, WarningKind::RequiresManualStrategy, reason.clone());
        return Ok(CompiledOperation::RequiresManualStrategy {
            reason,
            strategy: "split_subquery".into(),
            recommendation: "run the inner query first and inline its results into the outer one".into(),
            queries: Vec::new(),
        });
    }

    let resolver = FieldResolver::new(table, s.table_alias.as_deref(), &s.joins, &config.lookup_suffix);
    let join_stages = if s.joins.is_empty() {
        Vec::new()
    } else {
        match joins::translate_joins(table, &s.joins, &resolver, warnings)? {
            JoinPlan::Stages(stages) => stages,
            JoinPlan::Manual { reason, strategy, recommendation } => {
                return Ok(CompiledOperation::RequiresManualStrategy { reason, strategy, recommendation, queries: Vec::new() });
            }
        }
    };

    if !s.needs_pipeline() {
        return Ok(build_find(s, &resolver, config, warnings));
    }
    let pipeline = build_pipeline(s, &resolver, config, warnings, join_stages);
    debug!("pipeline: {}", pipeline.iter().map(Stage::name).collect::<Vec<_>>().join(" -> "));
    Ok(CompiledOperation::Aggregate { pipeline })
}

fn compile_union(union: &UnionSpec, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> Result<CompiledOperation, CompileError> {
    let queries = union.branches.iter().map(|b| compile_statement(b, config)).collect::<Result<Vec<_>, _>>()?;
    let (reason, strategy, recommendation) = if union.all {
        ("UNION ALL combines the results of separate queries", "execute_and_concatenate", "run each query and concatenate the results")
    } else {
        ("UNION combines the results of separate queries", "execute_and_deduplicate", "run each query, concatenate the results and drop duplicate rows")
    };
    note(warnings, WarningKind::RequiresManualStrategy, reason.to_string());
    Ok(CompiledOperation::RequiresManualStrategy { reason: reason.into(), strategy: strategy.into(), recommendation: recommendation.into(), queries })
}

/// A value the final documents carry, with the select expression that produced it.
#[derive(Debug, Clone)]
struct Output {
    expr: Expr,
    name: String,
}

fn projection(fields: &[FieldRef], cx: &mut ExprContext<'_>) -> (Document, Vec<Output>) {
    let mut doc = Document::new();
    let mut outputs = Vec::new();
    for (i, f) in fields.iter().enumerate() {
        let name = match (&f.expr, &f.alias) {
            (Expr::Star, _) => continue,
            (Expr::Field(path), None) => {
                let path = (cx.resolve)(path);
                doc.insert(path.clone(), 1);
                path
            }
            (expr, _) => {
                let name = f.output_name(i);
                doc.insert(name.clone(), project_value(expr, cx));
                name
            }
        };
        outputs.push(Output { expr: f.expr.clone(), name });
    }
    (doc, outputs)
}

fn build_find(s: &SelectSpec, resolver: &FieldResolver, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> CompiledOperation {
    let resolve = |f: &str| resolver.resolve(f);
    let filter = s.filter.as_ref().map(|c| filter_doc(c, &resolve, config, warnings)).unwrap_or_default();
    let projected = (!s.is_wildcard()).then(|| projection(&s.fields, &mut ExprContext::new(&resolve, warnings)).0);
    CompiledOperation::Find { filter, projection: projected, sort: None, limit: s.limit.or(config.default_limit), skip: s.skip }
}

/// WHERE conjuncts touching only the main collection run before the lookups.
fn split_filter(filter: Option<&Condition>, resolver: &FieldResolver) -> (Option<Condition>, Option<Condition>) {
    let Some(cond) = filter else { return (None, None) };
    let (joined, main): (Vec<_>, Vec<_>) =
        cond.clone().conjuncts().into_iter().partition(|c| c.fields().iter().any(|f| resolver.references_join(f)));
    (Condition::all(main), Condition::all(joined))
}

#[derive(Debug, Clone)]
struct GroupKey {
    /// Column as written in GROUP BY.
    path: String,
    resolved: String,
    name: String,
}

/// What ORDER BY may still add to after the shaping stages.
enum Shape {
    /// No projection; every source field is still present.
    Open,
    Projected(usize),
    Grouped(usize, Vec<GroupKey>),
    /// DISTINCT reprojection; nothing outside the select list survives.
    Closed,
}

fn build_pipeline(s: &SelectSpec, resolver: &FieldResolver, config: &CompilerConfig, warnings: &mut Vec<Warning>, join_stages: Vec<Stage>) -> Vec<Stage> {
    let resolve = |f: &str| resolver.resolve(f);
    let mut stages = Vec::new();

    let (main_filter, joined_filter) = split_filter(s.filter.as_ref(), resolver);
    if let Some(c) = &main_filter {
        stages.push(Stage::Match(filter_doc(c, &resolve, config, warnings)));
    }
    stages.extend(join_stages);
    if let Some(c) = &joined_filter {
        stages.push(Stage::Match(filter_doc(c, &resolve, config, warnings)));
    }

    let (shape, outputs) = if s.is_grouped() {
        if s.distinct {
            debug!("DISTINCT is implied by grouping");
        }
        group_stages(s, resolver, config, warnings, &mut stages)
    } else {
        if let Some(h) = &s.having {
            stages.push(Stage::Match(filter_doc(h, &resolve, config, warnings)));
        }
        if s.distinct && !s.is_wildcard() {
            distinct_stages(s, resolver, warnings, &mut stages)
        } else {
            if s.distinct {
                note(warnings, WarningKind::UnsupportedFunction, "SELECT DISTINCT * keeps duplicate documents".into());
            }
            if s.is_wildcard() {
                (Shape::Open, Vec::new())
            } else {
                let (doc, outputs) = projection(&s.fields, &mut ExprContext::new(&resolve, warnings));
                stages.push(Stage::Project(doc));
                (Shape::Projected(stages.len() - 1), outputs)
            }
        }
    };

    if !s.order_by.is_empty() {
        let sort = sort_doc(s, &shape, &outputs, &mut stages, resolver, warnings);
        if !sort.is_empty() {
            stages.push(Stage::Sort(sort));
        }
    }
    if let Some(n) = s.skip {
        stages.push(Stage::Skip(n));
    }
    if let Some(n) = s.limit.or(config.default_limit) {
        stages.push(Stage::Limit(n));
    }
    stages
}

fn group_keys(s: &SelectSpec, resolver: &FieldResolver) -> Vec<GroupKey> {
    let mut keys: Vec<GroupKey> = Vec::with_capacity(s.group_by.len());
    for path in &s.group_by {
        let resolved = resolver.resolve(path);
        let base = resolved.rsplit('.').next().unwrap_or(&resolved).to_string();
        let mut name = base.clone();
        let mut n = 2;
        while keys.iter().any(|k| k.name == name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        keys.push(GroupKey { path: path.clone(), resolved, name });
    }
    keys
}

fn key_for<'k>(keys: &'k [GroupKey], path: &str, resolver: &FieldResolver) -> Option<&'k GroupKey> {
    let resolved = resolver.resolve(path);
    keys.iter().find(|k| k.path == path || k.resolved == resolved)
}

/// Select alias whose expression is not a plain column, e.g. `GROUP BY yr` for `YEAR(d) AS yr`.
fn aliased_expr<'s>(s: &'s SelectSpec, name: &str) -> Option<&'s Expr> {
    s.fields
        .iter()
        .find(|f| f.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name)) && f.expr.as_field().is_none())
        .map(|f| &f.expr)
}

/// Replace aggregate calls inside an expression with references to hidden accumulators.
fn hoist_aggregates(expr: &Expr, group: &mut Document, hidden: &mut usize, cx: &mut ExprContext<'_>) -> Expr {
    match expr {
        Expr::Call(call) if call.is_aggregate() => match functions::accumulator(call, cx) {
            Ok(acc) => {
                *hidden += 1;
                let name = format!("_agg{}", hidden);
                group.insert(name.clone(), acc);
                Expr::Field(name)
            }
            Err(e) => {
                note(cx.warnings, WarningKind::UnsupportedFunction, e.to_string());
                Expr::Literal(Scalar::Null)
            }
        },
        Expr::Call(call) => Expr::Call(FunctionCall { args: call.args.iter().map(|a| hoist_aggregates(a, group, hidden, cx)).collect(), ..call.clone() }),
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(hoist_aggregates(left, group, hidden, cx)),
            right: Box::new(hoist_aggregates(right, group, hidden, cx)),
        },
        other => other.clone(),
    }
}

fn group_stages(s: &SelectSpec, resolver: &FieldResolver, config: &CompilerConfig, warnings: &mut Vec<Warning>, stages: &mut Vec<Stage>) -> (Shape, Vec<Output>) {
    let resolve = |f: &str| resolver.resolve(f);
    let keys = group_keys(s, resolver);
    // after $group, key columns live under `_id`
    let grouped = |p: &str| match key_for(&keys, p, resolver) {
        Some(k) => format!("_id.{}", k.name),
        None => p.to_string(),
    };

    let mut id = Document::new();
    for k in &keys {
        let value = match aliased_expr(s, &k.path) {
            Some(expr) => expr_to_bson(expr, &mut ExprContext::new(&resolve, warnings)),
            None => Bson::String(format!("${}", k.resolved)),
        };
        id.insert(k.name.clone(), value);
    }
    let mut group = doc! { "_id": if keys.is_empty() { Bson::Null } else { Bson::Document(id) } };
    let mut project = doc! { "_id": 0 };
    let mut outputs = Vec::new();
    let mut hidden = 0usize;

    for (i, f) in s.fields.iter().enumerate() {
        let name = f.output_name(i);
        match &f.expr {
            Expr::Star => {
                note(warnings, WarningKind::UnsupportedFunction, "`*` is ignored in a grouped SELECT".into());
                continue;
            }
            Expr::Field(path) => match key_for(&keys, path, resolver) {
                Some(k) => {
                    project.insert(name.clone(), format!("$_id.{}", k.name));
                }
                None => {
                    note(warnings, WarningKind::UnsupportedFunction, format!("column `{}` is not in GROUP BY; the first value of each group is used", path));
                    group.insert(name.clone(), doc! { "$first": format!("${}", resolver.resolve(path)) });
                    project.insert(name.clone(), 1);
                }
            },
            expr if aliased_expr(s, &name).is_some() && key_for(&keys, &name, resolver).is_some() => {
                debug!("`{}` is grouped by alias", expr);
                let key = key_for(&keys, &name, resolver).map(|k| k.name.clone()).unwrap_or_else(|| name.clone());
                project.insert(name.clone(), format!("$_id.{}", key));
            }
            Expr::Call(call) if call.is_aggregate() => {
                let acc = functions::accumulator(call, &mut ExprContext::new(&resolve, warnings));
                match acc {
                    Ok(acc) => {
                        group.insert(name.clone(), acc);
                        let shown: Bson =
                            if call.name == "COUNT" && call.distinct { doc! { "$size": format!("${}", name) }.into() } else { Bson::Int32(1) };
                        project.insert(name.clone(), shown);
                    }
                    Err(e) => {
                        note(warnings, WarningKind::UnsupportedFunction, e.to_string());
                        continue;
                    }
                }
            }
            expr if expr.contains_aggregate() => {
                let rewritten = hoist_aggregates(expr, &mut group, &mut hidden, &mut ExprContext::new(&resolve, warnings));
                project.insert(name.clone(), project_value(&rewritten, &mut ExprContext::new(&grouped, warnings)));
            }
            expr => {
                project.insert(name.clone(), project_value(expr, &mut ExprContext::new(&grouped, warnings)));
            }
        }
        outputs.push(Output { expr: f.expr.clone(), name });
    }

    let having = s.having.as_ref().and_then(|h| having_filter(h, s, &keys, resolver, &mut group, warnings));
    stages.push(Stage::Group(group));
    if let Some(h) = having {
        let identity = |p: &str| p.to_string();
        stages.push(Stage::Match(filter_doc(&h, &identity, config, warnings)));
    }
    stages.push(Stage::Project(project));
    (Shape::Grouped(stages.len() - 1, keys), outputs)
}

/// Rewrite HAVING against the group output: keys move under `_id`, COUNT(*) becomes its alias.
fn having_filter(
    having: &Condition,
    s: &SelectSpec,
    keys: &[GroupKey],
    resolver: &FieldResolver,
    group: &mut Document,
    warnings: &mut Vec<Warning>,
) -> Option<Condition> {
    having.clone().filter_map_leaves(&mut |target: Operand, op: Operator| match target {
        Operand::Field(f) => {
            if let Some(k) = key_for(keys, &f, resolver) {
                return Some(Condition::leaf(format!("_id.{}", k.name), op));
            }
            match s.fields.iter().find_map(|fr| fr.alias.as_ref().filter(|a| a.eq_ignore_ascii_case(&f))) {
                Some(alias) => Some(Condition::leaf(alias.clone(), op)),
                None => {
                    note(warnings, WarningKind::UnparsableCondition, format!("HAVING column `{}` is neither grouped nor selected", f));
                    None
                }
            }
        }
        Operand::Expr(Expr::Call(call)) if call.is_count_star() => {
            let selected = s.fields.iter().enumerate().find(|(_, fr)| matches!(&fr.expr, Expr::Call(c) if c.is_count_star()));
            let name = match selected {
                Some((i, fr)) => fr.output_name(i),
                None => {
                    if !group.contains_key("count_all") {
                        group.insert("count_all", doc! { "$sum": 1 });
                    }
                    "count_all".to_string()
                }
            };
            Some(Condition::leaf(name, op))
        }
        Operand::Expr(expr) => {
            note(warnings, WarningKind::UnsupportedFunction, format!("HAVING on `{}` is not supported; only COUNT(*) is rewritten", expr));
            None
        }
    })
}

fn distinct_stages(s: &SelectSpec, resolver: &FieldResolver, warnings: &mut Vec<Warning>, stages: &mut Vec<Stage>) -> (Shape, Vec<Output>) {
    let resolve = |f: &str| resolver.resolve(f);
    let mut id = Document::new();
    let mut project = doc! { "_id": 0 };
    let mut outputs = Vec::new();
    for (i, f) in s.fields.iter().enumerate() {
        let base = f.output_name(i);
        let mut name = base.clone();
        let mut n = 2;
        while id.contains_key(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        id.insert(name.clone(), expr_to_bson(&f.expr, &mut ExprContext::new(&resolve, warnings)));
        project.insert(name.clone(), format!("$_id.{}", name));
        outputs.push(Output { expr: f.expr.clone(), name });
    }
    stages.push(Stage::Group(doc! { "_id": id }));
    stages.push(Stage::Project(project));
    (Shape::Closed, outputs)
}

fn add_to_projection(stages: &mut [Stage], at: usize, name: &str, value: Bson) {
    if let Some(Stage::Project(p)) = stages.get_mut(at)
        && !p.contains_key(name)
    {
        p.insert(name, value);
    }
}

fn sort_doc(s: &SelectSpec, shape: &Shape, outputs: &[Output], stages: &mut [Stage], resolver: &FieldResolver, warnings: &mut Vec<Warning>) -> Document {
    let mut sort = Document::new();
    for item in &s.order_by {
        let dir = item.direction.as_i32();
        let by_output = outputs.iter().find(|o| {
            o.expr == item.expr || matches!(&item.expr, Expr::Field(f) if f.eq_ignore_ascii_case(&o.name))
        });
        if let Some(out) = by_output {
            sort.insert(out.name.clone(), dir);
            continue;
        }
        let key = match (&item.expr, shape) {
            (Expr::Field(f), Shape::Open) => Some(resolver.resolve(f)),
            (Expr::Field(f), Shape::Projected(at)) => {
                let path = resolver.resolve(f);
                add_to_projection(stages, *at, &path, Bson::Int32(1));
                note(warnings, WarningKind::SchemaNote, format!("ORDER BY column `{}` is not selected; added to the projection", f));
                Some(path)
            }
            (Expr::Field(f), Shape::Grouped(at, keys)) => key_for(keys, f, resolver).map(|k| {
                add_to_projection(stages, *at, &k.name, Bson::String(format!("$_id.{}", k.name)));
                k.name.clone()
            }),
            _ => None,
        };
        match key {
            Some(k) => {
                sort.insert(k, dir);
            }
            None => note(warnings, WarningKind::UnsupportedFunction, format!("ORDER BY `{}` is not part of the result and was dropped", item.expr)),
        }
    }
    sort
}

// ---------------------------------------------------------------------------
// INSERT / UPDATE / DELETE
// ---------------------------------------------------------------------------

fn compile_insert(spec: &InsertSpec, warnings: &mut Vec<Warning>) -> Result<CompiledOperation, CompileError> {
    let mut documents = Vec::with_capacity(spec.rows.len());
    let mut rejected = 0;
    for (index, row) in spec.rows.iter().enumerate() {
        let columns: Vec<String> =
            if spec.columns.is_empty() { (1..=row.len()).map(|n| format!("column_{}", n)).collect() } else { spec.columns.clone() };
        if row.len() != columns.len() {
            rejected += 1;
            note(warnings, WarningKind::RowRejected, format!("row {} has {} values for {} columns", index + 1, row.len(), columns.len()));
            continue;
        }
        let mut d = Document::new();
        for (column, value) in columns.iter().zip(row) {
            d.insert(column.clone(), value.to_bson());
        }
        documents.push(d);
    }
    if documents.is_empty() {
        return Err(CompileError::NoValidRows { rejected });
    }
    debug!("INSERT: {} documents, {} rejected", documents.len(), rejected);
    Ok(CompiledOperation::Insert { documents })
}

/// `x = x + n` / `x = x - n` as an increment.
fn increment(column: &str, value: &Expr, resolver: &FieldResolver) -> Option<Scalar> {
    let Expr::Binary { op, left, right } = value else { return None };
    let (Expr::Field(f), Expr::Literal(n)) = (left.as_ref(), right.as_ref()) else { return None };
    if resolver.resolve(f) != column || !n.is_numeric() {
        return None;
    }
    match op {
        BinaryOp::Add => Some(n.clone()),
        BinaryOp::Subtract => n.negate(),
        _ => None,
    }
}

fn where_or_all(statement: &str, filter: Option<&Condition>, resolver: &FieldResolver, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> Document {
    match filter {
        Some(c) => filter_doc(c, &|f: &str| resolver.resolve(f), config, warnings),
        None => {
            note(warnings, WarningKind::AffectsAllRows, format!("{} without WHERE affects all rows", statement));
            Document::new()
        }
    }
}

fn compile_update(table: &str, spec: &UpdateSpec, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> CompiledOperation {
    let resolver = FieldResolver::new(table, spec.table_alias.as_deref(), &[], &config.lookup_suffix);
    let mut set = Document::new();
    let mut inc = Document::new();
    let mut current_date = Document::new();
    for a in &spec.assignments {
        if let Some(step) = increment(&a.column, &a.value, &resolver) {
            inc.insert(a.column.clone(), step.to_bson());
            continue;
        }
        match &a.value {
            Expr::Literal(v) => {
                set.insert(a.column.clone(), v.to_bson());
            }
            Expr::Call(call) if call.category == FunctionCategory::DateCurrent => {
                current_date.insert(a.column.clone(), true);
            }
            other => {
                note(warnings, WarningKind::UnsupportedFunction, format!("`{} = {}` is stored as text", a.column, other));
                set.insert(a.column.clone(), other.to_string());
            }
        }
    }
    let mut update = Document::new();
    for (op, d) in [("$set", set), ("$inc", inc), ("$currentDate", current_date)] {
        if !d.is_empty() {
            update.insert(op, d);
        }
    }
    let filter = where_or_all("UPDATE", spec.filter.as_ref(), &resolver, config, warnings);
    CompiledOperation::Update { filter, update }
}

fn compile_delete(table: &str, spec: &DeleteSpec, config: &CompilerConfig, warnings: &mut Vec<Warning>) -> CompiledOperation {
    let resolver = FieldResolver::new(table, spec.table_alias.as_deref(), &[], &config.lookup_suffix);
    CompiledOperation::Delete { filter: where_or_all("DELETE", spec.filter.as_ref(), &resolver, config, warnings) }
}
