//! JOIN clauses → `$lookup` / `$unwind` stages, plus the column-name resolution joins imply.

use bson::doc;
use log::{debug, warn};

use super::errors::{CompileError, Warning};
use super::logical::Stage;
use crate::models::{JoinCondition, JoinKind, JoinSpec, WarningKind};

/// Maps SQL column references to document paths. Qualifiers naming the main table are dropped;
/// qualifiers naming a joined table point into that join's lookup array.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    main: Vec<String>,
    /// (table, alias, output array name)
    joined: Vec<(String, String, String)>,
}

impl FieldResolver {
    pub fn new(table: &str, alias: Option<&str>, joins: &[JoinSpec], suffix: &str) -> Self {
        let mut main = vec![table.to_string()];
        main.extend(alias.map(str::to_string));
        let joined = joins.iter().map(|j| (j.table.clone(), j.alias.clone(), format!("{}{}", j.alias, suffix))).collect();
        Self { main, joined }
    }

    pub fn resolve(&self, path: &str) -> String {
        let Some((qualifier, rest)) = path.split_once('.') else { return path.to_string() };
        if self.main.iter().any(|m| m == qualifier) {
            return rest.to_string();
        }
        match self.joined_as(qualifier) {
            Some(as_field) => format!("{}.{}", as_field, rest),
            None => path.to_string(),
        }
    }

    /// True when the column is qualified by a joined table or its alias.
    pub fn references_join(&self, path: &str) -> bool {
        path.split_once('.').is_some_and(|(q, _)| !self.main.iter().any(|m| m == q) && self.joined_as(q).is_some())
    }

    fn joined_as(&self, qualifier: &str) -> Option<&str> {
        self.joined.iter().find(|(t, a, _)| a == qualifier || t == qualifier).map(|(_, _, as_field)| as_field.as_str())
    }

    pub fn lookup_as(&self, join: &JoinSpec) -> String {
        self.joined_as(&join.alias).map(str::to_string).unwrap_or_else(|| join.alias.clone())
    }
}

/// Result of translating the JOIN list.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinPlan {
    Stages(Vec<Stage>),
    Manual { reason: String, strategy: String, recommendation: String },
}

pub fn translate_joins(main_table: &str, joins: &[JoinSpec], resolver: &FieldResolver, warnings: &mut Vec<Warning>) -> Result<JoinPlan, CompileError> {
    if let Some(raw) = joins.iter().find_map(|j| match &j.condition {
        JoinCondition::Complex(raw) => Some(raw.clone()),
        _ => None,
    }) {
        return Err(CompileError::UnsupportedJoinCondition(raw));
    }
    if let Some(j) = joins.iter().find(|j| matches!(j.kind, JoinKind::Right | JoinKind::Full)) {
        return Ok(manual_join(main_table, j, warnings));
    }

    let mut stages = Vec::new();
    for join in joins {
        let as_field = resolver.lookup_as(join);
        match &join.condition {
            JoinCondition::Equality { left_table, left_field, right_table, right_field } => {
                // the side qualified by the joined table is the foreign key
                let swap = join.names(left_table) && !join.names(right_table);
                let (local_q, local_f, foreign_f) =
                    if swap { (right_table, right_field, left_field) } else { (left_table, left_field, right_field) };
                let local = if local_q.is_empty() { local_f.clone() } else { format!("{}.{}", local_q, local_f) };
                stages.push(Stage::Lookup {
                    from: join.table.clone(),
                    local_field: Some(resolver.resolve(&local)),
                    foreign_field: Some(foreign_f.clone()),
                    as_field: as_field.clone(),
                });
            }
            JoinCondition::None => {
                let msg = format!("CROSS JOIN with `{}` pairs every row of both collections", join.table);
                warn!("{}", msg);
                warnings.push(Warning::new(WarningKind::ExpensiveJoin, msg));
                stages.push(Stage::Lookup { from: join.table.clone(), local_field: None, foreign_field: None, as_field: as_field.clone() });
            }
            JoinCondition::Complex(raw) => return Err(CompileError::UnsupportedJoinCondition(raw.clone())),
        }
        match join.kind {
            JoinKind::Inner => {
                let mut non_empty = bson::Document::new();
                non_empty.insert(as_field.clone(), doc! { "$ne": [] });
                stages.push(Stage::Match(non_empty));
                stages.push(Stage::Unwind { path: as_field, preserve_null_and_empty: false });
            }
            JoinKind::Left => stages.push(Stage::Unwind { path: as_field, preserve_null_and_empty: true }),
            _ => stages.push(Stage::Unwind { path: as_field, preserve_null_and_empty: false }),
        }
        debug!("{} JOIN {} translated", join.kind.as_str(), join.table);
    }
    Ok(JoinPlan::Stages(stages))
}

fn manual_join(main_table: &str, join: &JoinSpec, warnings: &mut Vec<Warning>) -> JoinPlan {
    let kind = join.kind.as_str();
    let (strategy, recommendation) = match join.kind {
        JoinKind::Right => (
            "swap_collections",
            format!("run the aggregation on `{}` with a LEFT lookup into `{}`", join.table, main_table),
        ),
        _ => (
            "union_of_left_joins",
            format!("run a LEFT lookup from `{}` into `{}` and from `{}` into `{}`, then merge the results", main_table, join.table, join.table, main_table),
        ),
    };
    let reason = format!("{} JOIN has no direct lookup equivalent", kind);
    warn!("{}", reason);
    warnings.push(Warning::new(WarningKind::RequiresManualStrategy, reason.clone()));
    JoinPlan::Manual { reason, strategy: strategy.to_string(), recommendation }
}
