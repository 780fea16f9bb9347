use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
}

impl StatementKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            // CREATE / DROP need the TABLE keyword checked by the caller
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Cross => "CROSS",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_i32(&self) -> i32 { match self { Direction::Asc => 1, Direction::Desc => -1 } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCategory {
    DateCurrent,
    DateExtract,
    DateFormat,
    DateArithmetic,
    StringTransform,
    StringInfo,
    StringExtract,
    StringCombine,
    StringClean,
    StringModify,
    StringSearch,
    MathBasic,
    MathRound,
    MathAdvanced,
    MathTrig,
    MathLog,
    MathRandom,
    Aggregate,
    Unknown,
}

/// Non-fatal diagnostics attached to a successful compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    UnparsableCondition,
    UnsupportedFunction,
    RowRejected,
    RequiresManualStrategy,
    AffectsAllRows,
    ForeignKeyNotEnforced,
    ExpensiveJoin,
    SchemaNote,
}

impl WarningKind {
    pub fn label(&self) -> &'static str {
        match self {
            WarningKind::UnparsableCondition => "unparsable condition",
            WarningKind::UnsupportedFunction => "unsupported function",
            WarningKind::RowRejected => "row rejected",
            WarningKind::RequiresManualStrategy => "requires manual strategy",
            WarningKind::AffectsAllRows => "affects all rows",
            WarningKind::ForeignKeyNotEnforced => "foreign key",
            WarningKind::ExpensiveJoin => "expensive join",
            WarningKind::SchemaNote => "schema",
        }
    }
}
