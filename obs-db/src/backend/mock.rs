//! In-memory `Backend`, mirroring the role the teacher's `db::mock` module
//! plays: a fully functional implementation used by the gateway's own unit
//! tests and by handler tests elsewhere in the workspace, with no real
//! database required.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::entity::ColumnDef;
use crate::error::DbError;
use crate::filter::{ListParams, Op, Order, Predicate};

use super::{Backend, JsonRow};

#[derive(Default)]
struct Table {
    rows: Vec<JsonRow>,
    next_id: i64,
}

#[derive(Default)]
pub struct MockBackend {
    tables: Mutex<HashMap<&'static str, Table>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(predicate: &Predicate, row: &JsonRow) -> bool {
    let field_val = row.get(predicate.field);
    match predicate.op {
        Op::IsNull => field_val.map(Value::is_null).unwrap_or(true),
        Op::NotNull => field_val.map(|v| !v.is_null()).unwrap_or(false),
        Op::Eq => field_val == Some(&predicate.value),
        Op::Ne => field_val != Some(&predicate.value),
        Op::Gt | Op::Gte | Op::Lt | Op::Lte => {
            let (a, b) = match (field_val.and_then(Value::as_f64), predicate.value.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            match predicate.op {
                Op::Gt => a > b,
                Op::Gte => a >= b,
                Op::Lt => a < b,
                Op::Lte => a <= b,
                _ => unreachable!(),
            }
        }
        Op::In => {
            let list = predicate.value.as_array().cloned().unwrap_or_default();
            field_val.map(|v| list.contains(v)).unwrap_or(false)
        }
        Op::Nin => {
            let list = predicate.value.as_array().cloned().unwrap_or_default();
            field_val.map(|v| !list.contains(v)).unwrap_or(true)
        }
        Op::Like | Op::Ilike => {
            let needle = predicate.value.as_str().unwrap_or_default().to_lowercase();
            field_val
                .and_then(Value::as_str)
                .map(|v| v.to_lowercase().contains(&needle))
                .unwrap_or(false)
        }
        Op::Between => {
            let bounds = predicate.value.as_array().cloned().unwrap_or_default();
            if bounds.len() != 2 {
                return false;
            }
            let (lo, hi) = (bounds[0].as_f64(), bounds[1].as_f64());
            match (field_val.and_then(Value::as_f64), lo, hi) {
                (Some(v), Some(lo), Some(hi)) => v >= lo && v <= hi,
                _ => false,
            }
        }
    }
}

fn cmp_value(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn list(
        &self,
        table: &'static str,
        _columns: &'static [ColumnDef],
        predicates: &[Predicate],
        params: &ListParams,
    ) -> Result<(Vec<JsonRow>, i64), DbError> {
        let tables = self.tables.lock().unwrap();
        let rows = tables.get(table).map(|t| t.rows.clone()).unwrap_or_default();

        let mut filtered: Vec<JsonRow> = rows
            .into_iter()
            .filter(|row| {
                if !params.include_deleted
                    && row.get("deleted_at").map(|v| !v.is_null()).unwrap_or(false)
                {
                    return false;
                }
                predicates.iter().all(|p| matches(p, row))
            })
            .collect();

        if let Some(search) = &params.search {
            let needle = search.to_lowercase();
            filtered.retain(|row| {
                row.values().any(|v| {
                    v.as_str()
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            });
        }

        filtered.sort_by(|a, b| {
            let primary = cmp_value(a.get(&params.order_by), b.get(&params.order_by));
            let primary = if params.order == Order::Desc {
                primary.reverse()
            } else {
                primary
            };
            primary.then_with(|| cmp_value(a.get("id"), b.get("id")))
        });

        let total = filtered.len() as i64;
        let page = filtered
            .into_iter()
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn get(
        &self,
        table: &'static str,
        _columns: &'static [ColumnDef],
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<JsonRow>, DbError> {
        let tables = self.tables.lock().unwrap();
        let row = tables.get(table).and_then(|t| {
            t.rows
                .iter()
                .find(|r| r.get("id").and_then(Value::as_i64) == Some(id))
        });
        Ok(row
            .filter(|r| {
                include_deleted || r.get("deleted_at").map(Value::is_null).unwrap_or(true)
            })
            .cloned())
    }

    async fn get_first(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        predicates: &[Predicate],
        order_by: &str,
        order: Order,
        include_deleted: bool,
    ) -> Result<Option<JsonRow>, DbError> {
        let params = ListParams {
            limit: 1,
            offset: 0,
            order_by: order_by.to_owned(),
            order,
            search: None,
            filters: Default::default(),
            include_deleted,
        };
        let (mut rows, _) = self.list(table, columns, predicates, &params).await?;
        Ok(rows.pop())
    }

    async fn insert(&self, table: &'static str, mut values: JsonRow) -> Result<JsonRow, DbError> {
        let mut tables = self.tables.lock().unwrap();
        let entry = tables.entry(table).or_default();
        entry.next_id += 1;
        let id = entry.next_id;
        let now = Utc::now().naive_utc();
        values.insert("id".to_owned(), Value::from(id));
        values.insert("created_at".to_owned(), Value::from(now.to_string()));
        values.insert("updated_at".to_owned(), Value::from(now.to_string()));
        values.entry("deleted_at".to_owned()).or_insert(Value::Null);
        entry.rows.push(values.clone());
        Ok(values)
    }

    async fn update(
        &self,
        table: &'static str,
        id: i64,
        values: JsonRow,
    ) -> Result<Option<JsonRow>, DbError> {
        let mut tables = self.tables.lock().unwrap();
        let entry = match tables.get_mut(table) {
            Some(e) => e,
            None => return Ok(None),
        };
        let row = entry
            .rows
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_i64) == Some(id));
        match row {
            Some(row) => {
                for (k, v) in values {
                    row.insert(k, v);
                }
                row.insert(
                    "updated_at".to_owned(),
                    Value::from(Utc::now().naive_utc().to_string()),
                );
                Ok(Some(row.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete(
        &self,
        table: &'static str,
        id: i64,
        soft: bool,
    ) -> Result<Option<JsonRow>, DbError> {
        let mut tables = self.tables.lock().unwrap();
        let entry = match tables.get_mut(table) {
            Some(e) => e,
            None => return Ok(None),
        };
        if soft {
            let row = entry
                .rows
                .iter_mut()
                .find(|r| r.get("id").and_then(Value::as_i64) == Some(id));
            match row {
                Some(row) => {
                    let prior = row.clone();
                    row.insert(
                        "deleted_at".to_owned(),
                        Value::from(Utc::now().naive_utc().to_string()),
                    );
                    Ok(Some(prior))
                }
                None => Ok(None),
            }
        } else {
            let pos = entry
                .rows
                .iter()
                .position(|r| r.get("id").and_then(Value::as_i64) == Some(id));
            match pos {
                Some(pos) => Ok(Some(entry.rows.remove(pos))),
                None => Ok(None),
            }
        }
    }

    async fn hard_delete_older_than(
        &self,
        table: &'static str,
        timestamp_column: &str,
        cutoff: NaiveDateTime,
        batch_size: i64,
    ) -> Result<i64, DbError> {
        let mut tables = self.tables.lock().unwrap();
        let entry = match tables.get_mut(table) {
            Some(e) => e,
            None => return Ok(0),
        };
        let mut removed = 0i64;
        let mut i = 0;
        while i < entry.rows.len() && removed < batch_size {
            let older = entry.rows[i]
                .get(timestamp_column)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<NaiveDateTime>().ok())
                .map(|ts| ts < cutoff)
                .unwrap_or(false);
            let not_deleted = entry.rows[i]
                .get("deleted_at")
                .map(Value::is_null)
                .unwrap_or(true);
            if older && not_deleted {
                entry.rows.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }
}
