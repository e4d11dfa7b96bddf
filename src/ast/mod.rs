//! Query tree representation.
//!
//! The parser produces a [`SelectQuery`] whose `FROM` clause is a chain of
//! [`JoinExpr`] links and whose expressions are [`Expr`] nodes. Compilation
//! passes never mutate a node in place; every rewrite builds a new tree
//! (see [`visitor`]).
//!
//! Every expression node carries [`ExprMeta`]: the resolved type annotation
//! and the source location. Derived `PartialEq` compares metadata too; use
//! [`visitor::structurally_eq`] to compare shape and values only.

pub mod visitor;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a node in the original query text (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Resolved type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantType {
    Boolean,
    Integer,
    Float,
    String,
    DateTime,
    Json,
    Null,
    Unknown,
}

/// Annotations attached to an expression by earlier passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExprMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<ConstantType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl ExprMeta {
    pub fn is_empty(&self) -> bool {
        self.ty.is_none() && self.span.is_none()
    }
}

/// A typed constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Null,
}

impl Constant {
    pub fn constant_type(&self) -> ConstantType {
        match self {
            Constant::Bool(_) => ConstantType::Boolean,
            Constant::Int(_) => ConstantType::Integer,
            Constant::Float(_) => ConstantType::Float,
            Constant::String(_) => ConstantType::String,
            Constant::Null => ConstantType::Null,
        }
    }

    fn to_hogql(&self) -> String {
        match self {
            Constant::Bool(true) => "true".to_string(),
            Constant::Bool(false) => "false".to_string(),
            Constant::Int(v) => v.to_string(),
            Constant::Float(v) => v.to_string(),
            Constant::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Constant::Null => "NULL".to_string(),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    ILike,
    NotLike,
    NotILike,
    In,
    NotIn,
}

impl CompareOp {
    pub fn sql_op(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::ILike => "ILIKE",
            CompareOp::NotLike => "NOT LIKE",
            CompareOp::NotILike => "NOT ILIKE",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    /// A field reference: `["person", "properties", "email"]`.
    Field {
        chain: Vec<String>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// A literal value.
    Constant {
        value: Constant,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// `left op right`.
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// Conjunction. Operand order carries no meaning but is preserved.
    And {
        exprs: Vec<Expr>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// Disjunction. Operand order carries no meaning but is preserved.
    Or {
        exprs: Vec<Expr>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// Negation.
    Not {
        expr: Box<Expr>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// `expr AS alias`. Hidden aliases are introduced by the compiler and
    /// are invisible in the user's logical filter.
    Alias {
        alias: String,
        expr: Box<Expr>,
        #[serde(default)]
        hidden: bool,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// Function or aggregate call: `argMax(x, version)`.
    Call {
        name: String,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
    /// A scalar or set subquery, e.g. the right side of `IN`.
    Subquery {
        query: Box<SelectQuery>,
        #[serde(default, skip_serializing_if = "ExprMeta::is_empty")]
        meta: ExprMeta,
    },
}

impl Expr {
    pub fn field<S: AsRef<str>>(chain: &[S]) -> Expr {
        Expr::Field {
            chain: chain.iter().map(|s| s.as_ref().to_string()).collect(),
            meta: ExprMeta::default(),
        }
    }

    pub fn field_chain(chain: Vec<String>) -> Expr {
        Expr::Field {
            chain,
            meta: ExprMeta::default(),
        }
    }

    pub fn constant(value: Constant) -> Expr {
        Expr::Constant {
            value,
            meta: ExprMeta::default(),
        }
    }

    pub fn bool(value: bool) -> Expr {
        Expr::constant(Constant::Bool(value))
    }

    pub fn int(value: i64) -> Expr {
        Expr::constant(Constant::Int(value))
    }

    pub fn string(value: &str) -> Expr {
        Expr::constant(Constant::String(value.to_string()))
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
            meta: ExprMeta::default(),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Eq, left, right)
    }

    pub fn and(exprs: Vec<Expr>) -> Expr {
        Expr::And {
            exprs,
            meta: ExprMeta::default(),
        }
    }

    pub fn or(exprs: Vec<Expr>) -> Expr {
        Expr::Or {
            exprs,
            meta: ExprMeta::default(),
        }
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not {
            expr: Box::new(expr),
            meta: ExprMeta::default(),
        }
    }

    pub fn alias(alias: &str, expr: Expr) -> Expr {
        Expr::Alias {
            alias: alias.to_string(),
            expr: Box::new(expr),
            hidden: false,
            meta: ExprMeta::default(),
        }
    }

    pub fn hidden_alias(alias: &str, expr: Expr) -> Expr {
        Expr::Alias {
            alias: alias.to_string(),
            expr: Box::new(expr),
            hidden: true,
            meta: ExprMeta::default(),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args,
            meta: ExprMeta::default(),
        }
    }

    pub fn subquery(query: SelectQuery) -> Expr {
        Expr::Subquery {
            query: Box::new(query),
            meta: ExprMeta::default(),
        }
    }

    /// Node metadata.
    pub fn meta(&self) -> &ExprMeta {
        match self {
            Expr::Field { meta, .. }
            | Expr::Constant { meta, .. }
            | Expr::Compare { meta, .. }
            | Expr::And { meta, .. }
            | Expr::Or { meta, .. }
            | Expr::Not { meta, .. }
            | Expr::Alias { meta, .. }
            | Expr::Call { meta, .. }
            | Expr::Subquery { meta, .. } => meta,
        }
    }

    /// Return this node with its own metadata replaced.
    pub fn with_meta(mut self, new_meta: ExprMeta) -> Expr {
        match &mut self {
            Expr::Field { meta, .. }
            | Expr::Constant { meta, .. }
            | Expr::Compare { meta, .. }
            | Expr::And { meta, .. }
            | Expr::Or { meta, .. }
            | Expr::Not { meta, .. }
            | Expr::Alias { meta, .. }
            | Expr::Call { meta, .. }
            | Expr::Subquery { meta, .. } => *meta = new_meta,
        }
        self
    }

    /// Truth value of a constant usable in a boolean position.
    ///
    /// `true`/`false` and the integers `1`/`0` fold; anything else is
    /// not a boolean constant.
    pub fn as_bool_constant(&self) -> Option<bool> {
        match self {
            Expr::Constant {
                value: Constant::Bool(b),
                ..
            } => Some(*b),
            Expr::Constant {
                value: Constant::Int(1),
                ..
            } => Some(true),
            Expr::Constant {
                value: Constant::Int(0),
                ..
            } => Some(false),
            _ => None,
        }
    }

    /// The name this expression has in a select list.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Expr::Alias { alias, .. } => Some(alias),
            Expr::Field { chain, .. } => chain.last().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Render as HogQL-like text. Used for logging and tests; the real SQL
    /// printer lives outside this crate.
    pub fn to_hogql(&self) -> String {
        match self {
            Expr::Field { chain, .. } => chain
                .iter()
                .map(|s| print_identifier(s))
                .collect::<Vec<_>>()
                .join("."),
            Expr::Constant { value, .. } => value.to_hogql(),
            Expr::Compare {
                op, left, right, ..
            } => format!("{} {} {}", left.to_hogql(), op.sql_op(), right.to_hogql()),
            Expr::And { exprs, .. } => format!("and({})", join_hogql(exprs)),
            Expr::Or { exprs, .. } => format!("or({})", join_hogql(exprs)),
            Expr::Not { expr, .. } => format!("not({})", expr.to_hogql()),
            Expr::Alias { alias, expr, .. } => {
                format!("{} AS {}", expr.to_hogql(), print_identifier(alias))
            }
            Expr::Call { name, args, .. } => format!("{name}({})", join_hogql(args)),
            Expr::Subquery { query, .. } => format!("({})", query.to_hogql()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hogql())
    }
}

fn join_hogql(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_hogql())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print an identifier, backtick-quoting it when it is not a plain name.
pub fn print_identifier(name: &str) -> String {
    let plain = name == "*"
        || (!name.is_empty()
            && !name.starts_with(|c: char| c.is_ascii_digit())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'));
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One `ORDER BY` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpr {
    pub expr: Expr,
    pub order: SortOrder,
}

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Cross,
}

impl JoinType {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// What a join position reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableRef {
    /// Logical table name awaiting resolution against the schema registry.
    Named { name: String },
    /// A relation that exists in the analytical store.
    Physical { name: String },
    /// A nested select.
    Subquery { query: Box<SelectQuery> },
}

impl TableRef {
    pub fn named(name: &str) -> TableRef {
        TableRef::Named {
            name: name.to_string(),
        }
    }

    pub fn physical(name: &str) -> TableRef {
        TableRef::Physical {
            name: name.to_string(),
        }
    }

    pub fn subquery(query: SelectQuery) -> TableRef {
        TableRef::Subquery {
            query: Box::new(query),
        }
    }

    /// Table name for `Named`/`Physical`, `None` for subqueries.
    pub fn name(&self) -> Option<&str> {
        match self {
            TableRef::Named { name } | TableRef::Physical { name } => Some(name),
            TableRef::Subquery { .. } => None,
        }
    }

    fn to_hogql(&self) -> String {
        match self {
            TableRef::Named { name } | TableRef::Physical { name } => print_identifier(name),
            TableRef::Subquery { query } => format!("({})", query.to_hogql()),
        }
    }
}

/// Filter pushdown state of a join produced by the lazy resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pushdown {
    /// The joined table does not accept pushed-down filters.
    NotApplicable,
    /// Resolved, but the pushdown pass has not looked at it yet.
    Pending,
    /// The pushdown pass already processed this join.
    Done,
}

/// Semantic role of a join: which logical table it was resolved from.
///
/// Passes locate sub-entities by this tag instead of by chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOrigin {
    pub table: String,
    pub pushdown: Pushdown,
}

/// One link of the `FROM` chain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JoinExpr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableRef>,
    /// `None` for the first link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_type: Option<JoinType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// The `ON` condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_join: Option<Box<JoinExpr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<JoinOrigin>,
}

impl JoinExpr {
    pub fn new(table: TableRef) -> JoinExpr {
        JoinExpr {
            table: Some(table),
            ..JoinExpr::default()
        }
    }

    pub fn with_alias(mut self, alias: &str) -> JoinExpr {
        self.alias = Some(alias.to_string());
        self
    }

    /// The name outer expressions use for this link: the explicit alias,
    /// or the table name.
    pub fn effective_alias(&self) -> Option<&str> {
        self.alias
            .as_deref()
            .or_else(|| self.table.as_ref().and_then(|t| t.name()))
    }

    /// Iterate over this link and every following one.
    pub fn iter(&self) -> impl Iterator<Item = &JoinExpr> {
        std::iter::successors(Some(self), |j| j.next_join.as_deref())
    }

    /// Find a link by its effective alias.
    pub fn find(&self, alias: &str) -> Option<&JoinExpr> {
        self.iter().find(|j| j.effective_alias() == Some(alias))
    }

    /// Append a link at the end of the chain.
    pub fn push(&mut self, join: JoinExpr) {
        match self.next_join {
            Some(ref mut next) => next.push(join),
            None => self.next_join = Some(Box::new(join)),
        }
    }

    fn to_hogql(&self) -> String {
        let mut parts = Vec::new();
        for (i, join) in self.iter().enumerate() {
            let mut part = String::new();
            if i > 0 {
                part.push_str(join.join_type.unwrap_or(JoinType::Inner).sql_keyword());
                part.push(' ');
            }
            if let Some(table) = &join.table {
                part.push_str(&table.to_hogql());
            }
            if let Some(alias) = &join.alias {
                part.push_str(" AS ");
                part.push_str(&print_identifier(alias));
            }
            if let Some(constraint) = &join.constraint {
                part.push_str(" ON ");
                part.push_str(&constraint.to_hogql());
            }
            parts.push(part);
        }
        parts.join(" ")
    }
}

/// A `SELECT` statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectQuery {
    pub select: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_from: Option<JoinExpr>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl SelectQuery {
    /// `SELECT <select> FROM <table>`.
    pub fn from_table(select: Vec<Expr>, table: TableRef) -> SelectQuery {
        SelectQuery {
            select,
            select_from: Some(JoinExpr::new(table)),
            ..SelectQuery::default()
        }
    }

    pub fn with_where(mut self, predicate: Expr) -> SelectQuery {
        self.where_ = Some(predicate);
        self
    }

    /// Output column names, in select-list order.
    pub fn output_columns(&self) -> Vec<String> {
        self.select
            .iter()
            .filter_map(|e| e.output_name().map(|s| s.to_string()))
            .collect()
    }

    /// Whether any `FROM` link still waits for schema resolution.
    pub fn has_unresolved_tables(&self) -> bool {
        self.select_from.as_ref().is_some_and(|from| {
            from.iter().any(|j| match &j.table {
                Some(TableRef::Named { .. }) => true,
                Some(TableRef::Subquery { query }) => query.has_unresolved_tables(),
                _ => false,
            })
        })
    }

    /// Serialize for the renderer.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a parser-produced tree.
    pub fn from_json(json: &str) -> Result<SelectQuery, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Render as HogQL-like text.
    pub fn to_hogql(&self) -> String {
        let mut sql = format!("SELECT {}", join_hogql(&self.select));
        if let Some(from) = &self.select_from {
            sql.push_str(" FROM ");
            sql.push_str(&from.to_hogql());
        }
        if let Some(w) = &self.where_ {
            sql.push_str(" WHERE ");
            sql.push_str(&w.to_hogql());
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&join_hogql(&self.group_by));
        }
        if let Some(h) = &self.having {
            sql.push_str(" HAVING ");
            sql.push_str(&h.to_hogql());
        }
        if !self.order_by.is_empty() {
            let items: Vec<String> = self
                .order_by
                .iter()
                .map(|o| {
                    let dir = match o.order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    format!("{} {dir}", o.expr.to_hogql())
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&items.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}
