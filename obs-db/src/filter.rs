//! The `field__op=value` filter DSL (spec §4.B). Closed operator set;
//! unknown operators/fields fail instead of being silently ignored.

use serde_json::Value;
use std::collections::HashMap;

use crate::entity::{ColumnDef, ColumnKind};
use crate::error::{DbError, DbErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Like,
    Ilike,
    IsNull,
    NotNull,
    Between,
}

impl Op {
    fn parse(raw: &str) -> Result<Self, DbError> {
        Ok(match raw {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "in" => Op::In,
            "nin" => Op::Nin,
            "like" => Op::Like,
            "ilike" => Op::Ilike,
            "isnull" => Op::IsNull,
            "notnull" => Op::NotNull,
            "between" => Op::Between,
            other => return Err(DbErrorKind::UnknownOperator(other.to_owned()).into()),
        })
    }

    pub fn sql_symbol(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::Ilike => "ILIKE",
            Op::In => "= ANY",
            Op::Nin => "<> ALL",
            Op::IsNull => "IS NULL",
            Op::NotNull => "IS NOT NULL",
            Op::Between => "BETWEEN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: &'static str,
    pub kind: ColumnKind,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub order_by: String,
    pub order: Order,
    pub search: Option<String>,
    pub filters: HashMap<String, Value>,
    pub include_deleted: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            order_by: "id".to_owned(),
            order: Order::Asc,
            search: None,
            filters: HashMap::new(),
            include_deleted: false,
        }
    }
}

impl ListParams {
    pub fn validate_limit(&self) -> Result<(), DbError> {
        if !(1..=1000).contains(&self.limit) {
            return Err(DbErrorKind::LimitOutOfRange(self.limit).into());
        }
        Ok(())
    }
}

/// Parses `filters` (`field__op` -> value) against an entity's declared
/// columns, coercing values by column kind.
pub fn parse_predicates(
    columns: &'static [ColumnDef],
    filters: &HashMap<String, Value>,
) -> Result<Vec<Predicate>, DbError> {
    let mut out = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        let (field, op_raw) = key
            .rsplit_once("__")
            .ok_or_else(|| DbErrorKind::UnknownField(key.clone()))?;
        let col = columns
            .iter()
            .copied()
            .find(|c| c.name == field)
            .ok_or_else(|| DbErrorKind::UnknownField(field.to_owned()))?;
        let op = Op::parse(op_raw)?;
        out.push(Predicate {
            field: col.name,
            kind: col.kind,
            op,
            value: value.clone(),
        });
    }
    Ok(out)
}

pub fn validate_order_by(columns: &'static [ColumnDef], order_by: &str) -> Result<(), DbError> {
    if columns.iter().any(|c| c.name == order_by) {
        Ok(())
    } else {
        Err(DbErrorKind::InvalidOrderBy(order_by.to_owned()).into())
    }
}
