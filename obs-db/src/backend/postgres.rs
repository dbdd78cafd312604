//! Postgres `Backend`. The SQL ORM and the database engine itself are named
//! out-of-scope collaborators by spec §1 ("specified only by the interfaces
//! the core consumes") — this module is that interface's one concrete
//! implementation. It intentionally skips an ORM layer (diesel's dynamic
//! query support is awkward for a field-count-unknown-at-compile-time filter
//! DSL) in favor of `bb8-postgres` + `tokio-postgres`, binding predicate
//! values through `&[&(dyn ToSql + Sync)]` parameter slices, which is the
//! idiomatic way to build a query whose parameter count isn't known until
//! request time.

use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use chrono::{NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::entity::{ColumnDef, ColumnKind};
use crate::error::{DbError, DbErrorKind};
use crate::filter::{ListParams, Op, Order, Predicate};

use super::{Backend, JsonRow};

pub struct PgBackend {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PgBackend {
    pub async fn new(database_url: &str, max_size: u32) -> Result<Self, DbError> {
        let config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| DbErrorKind::Execution(e.to_string()))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .await
            .map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        Ok(Self { pool })
    }
}

fn owned_param(kind: ColumnKind, value: &Value) -> Box<dyn ToSql + Sync + Send> {
    match kind {
        ColumnKind::Integer => Box::new(value.as_i64().unwrap_or_default() as i32),
        ColumnKind::BigInt => Box::new(value.as_i64().unwrap_or_default()),
        ColumnKind::Real => Box::new(value.as_f64().unwrap_or_default()),
        ColumnKind::Bool => Box::new(value.as_bool().unwrap_or_default()),
        ColumnKind::Timestamp => Box::new(
            value
                .as_str()
                .and_then(|s| s.parse::<NaiveDateTime>().ok())
                .unwrap_or_else(|| Utc::now().naive_utc()),
        ),
        ColumnKind::Json => Box::new(value.clone()),
        ColumnKind::Text => Box::new(value.as_str().unwrap_or_default().to_owned()),
    }
}

fn row_to_json(row: &tokio_postgres::Row, columns: &[ColumnDef]) -> JsonRow {
    let mut map = Map::new();
    for col in columns {
        let value = match col.kind {
            ColumnKind::Integer => row
                .try_get::<_, Option<i32>>(col.name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnKind::BigInt => row
                .try_get::<_, Option<i64>>(col.name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnKind::Real => row
                .try_get::<_, Option<f64>>(col.name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnKind::Bool => row
                .try_get::<_, Option<bool>>(col.name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnKind::Timestamp => row
                .try_get::<_, Option<NaiveDateTime>>(col.name)
                .ok()
                .flatten()
                .map(|t| Value::from(t.to_string()))
                .unwrap_or(Value::Null),
            ColumnKind::Json => row
                .try_get::<_, Option<Value>>(col.name)
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
            ColumnKind::Text => row
                .try_get::<_, Option<String>>(col.name)
                .ok()
                .flatten()
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        map.insert(col.name.to_owned(), value);
    }
    map
}

fn build_where(predicates: &[Predicate], include_deleted: bool) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let mut clauses = Vec::new();
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();

    if !include_deleted {
        clauses.push("deleted_at IS NULL".to_owned());
    }

    for p in predicates {
        match p.op {
            Op::IsNull => clauses.push(format!("{} IS NULL", p.field)),
            Op::NotNull => clauses.push(format!("{} IS NOT NULL", p.field)),
            Op::In | Op::Nin => {
                // Represented as `= ANY($n)`/`<> ALL($n)` over a Json array
                // parameter; callers needing true typed array binds should
                // narrow by column kind, kept generic here for simplicity.
                params.push(Box::new(p.value.clone()));
                let op = if p.op == Op::In { "= ANY" } else { "<> ALL" };
                clauses.push(format!(
                    "{} {}(SELECT jsonb_array_elements_text(${}::jsonb)::text)",
                    p.field,
                    op,
                    params.len()
                ));
            }
            Op::Between => {
                let bounds = p.value.as_array().cloned().unwrap_or_default();
                if bounds.len() == 2 {
                    params.push(owned_param(p.kind, &bounds[0]));
                    let lo = params.len();
                    params.push(owned_param(p.kind, &bounds[1]));
                    let hi = params.len();
                    clauses.push(format!("{} BETWEEN ${} AND ${}", p.field, lo, hi));
                }
            }
            _ => {
                params.push(owned_param(p.kind, &p.value));
                clauses.push(format!("{} {} ${}", p.field, p.op.sql_symbol(), params.len()));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

#[async_trait]
impl Backend for PgBackend {
    async fn list(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        predicates: &[Predicate],
        params: &ListParams,
    ) -> Result<(Vec<JsonRow>, i64), DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let (mut where_sql, mut binds) = build_where(predicates, params.include_deleted);

        if let Some(search) = &params.search {
            let text_cols = crate::models::text_search_columns(table);
            if !text_cols.is_empty() {
                binds.push(Box::new(format!("%{}%", search)));
                let idx = binds.len();
                let ors: Vec<String> = text_cols
                    .iter()
                    .map(|c| format!("{} ILIKE ${}", c, idx))
                    .collect();
                let frag = format!("({})", ors.join(" OR "));
                where_sql = if where_sql.is_empty() {
                    format!("WHERE {}", frag)
                } else {
                    format!("{} AND {}", where_sql, frag)
                };
            }
        }

        let col_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let count_sql = format!("SELECT COUNT(*) FROM {} {}", table, where_sql);
        let refs: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let total: i64 = conn
            .query_one(count_sql.as_str(), &refs)
            .await
            .map_err(DbError::from)?
            .get(0);

        let list_sql = format!(
            "SELECT {} FROM {} {} ORDER BY {} {}, id ASC LIMIT {} OFFSET {}",
            col_list,
            table,
            where_sql,
            params.order_by,
            params.order.sql(),
            params.limit,
            params.offset
        );
        let rows = conn
            .query(list_sql.as_str(), &refs)
            .await
            .map_err(DbError::from)?;
        Ok((rows.iter().map(|r| row_to_json(r, columns)).collect(), total))
    }

    async fn get(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<JsonRow>, DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let col_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let deleted_clause = if include_deleted { "" } else { "AND deleted_at IS NULL" };
        let sql = format!("SELECT {} FROM {} WHERE id = $1 {}", col_list, table, deleted_clause);
        let row = conn.query_opt(sql.as_str(), &[&id]).await.map_err(DbError::from)?;
        Ok(row.map(|r| row_to_json(&r, columns)))
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

    async fn insert(&self, table: &'static str, values: JsonRow) -> Result<JsonRow, DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let columns = crate::models::columns_for(table);
        let cols: Vec<&str> = values.keys().map(|k| k.as_str()).collect();
        let binds: Vec<Box<dyn ToSql + Sync + Send>> = values
            .iter()
            .map(|(k, v)| {
                let kind = columns
                    .iter()
                    .find(|c| c.name == k)
                    .map(|c| c.kind)
                    .unwrap_or(ColumnKind::Text);
                owned_param(kind, v)
            })
            .collect();
        let placeholders: Vec<String> = (1..=binds.len()).map(|i| format!("${}", i)).collect();
        let col_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            col_list
        );
        let refs: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let row = conn.query_one(sql.as_str(), &refs).await.map_err(DbError::from)?;
        Ok(row_to_json(&row, columns))
    }

    async fn update(
        &self,
        table: &'static str,
        id: i64,
        values: JsonRow,
    ) -> Result<Option<JsonRow>, DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let columns = crate::models::columns_for(table);
        let mut binds: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        let mut sets = Vec::new();
        for (k, v) in &values {
            let kind = columns
                .iter()
                .find(|c| &c.name == k)
                .map(|c| c.kind)
                .unwrap_or(ColumnKind::Text);
            binds.push(owned_param(kind, v));
            sets.push(format!("{} = ${}", k, binds.len()));
        }
        binds.push(Box::new(id));
        let id_idx = binds.len();
        let col_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${} RETURNING {}",
            table,
            sets.join(", "),
            id_idx,
            col_list
        );
        let refs: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b.as_ref() as &(dyn ToSql + Sync)).collect();
        let row = conn.query_opt(sql.as_str(), &refs).await.map_err(DbError::from)?;
        Ok(row.map(|r| row_to_json(&r, columns)))
    }

    async fn delete(
        &self,
        table: &'static str,
        id: i64,
        soft: bool,
    ) -> Result<Option<JsonRow>, DbError> {
        let mut conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let columns = crate::models::columns_for(table);
        let col_list = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        if soft {
            // `Gateway::delete`'s contract (spec §4.B) returns the prior row, not
            // the post-update one, so the pre-image is locked and captured in the
            // same transaction as the mutation rather than read back out of
            // `RETURNING`, which would already carry the new `deleted_at`.
            let txn = conn.transaction().await.map_err(DbError::from)?;
            let select_sql = format!(
                "SELECT {} FROM {} WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
                col_list, table
            );
            let prior = txn
                .query_opt(select_sql.as_str(), &[&id])
                .await
                .map_err(DbError::from)?;
            let prior = match prior {
                Some(row) => row_to_json(&row, columns),
                None => return Ok(None),
            };
            let update_sql = format!(
                "UPDATE {} SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
                table
            );
            txn.execute(update_sql.as_str(), &[&id])
                .await
                .map_err(DbError::from)?;
            txn.commit().await.map_err(DbError::from)?;
            Ok(Some(prior))
        } else {
            let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING {}", table, col_list);
            let row = conn
                .query_opt(sql.as_str(), &[&id])
                .await
                .map_err(DbError::from)?;
            Ok(row.map(|r| row_to_json(&r, columns)))
        }
    }

    async fn hard_delete_older_than(
        &self,
        table: &'static str,
        timestamp_column: &str,
        cutoff: NaiveDateTime,
        batch_size: i64,
    ) -> Result<i64, DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        let sql = format!(
            "DELETE FROM {table} WHERE ctid IN (
                SELECT ctid FROM {table}
                WHERE {col} < $1 AND deleted_at IS NULL
                LIMIT $2
             )",
            table = table,
            col = timestamp_column
        );
        let affected = conn
            .execute(sql.as_str(), &[&cutoff, &batch_size])
            .await
            .map_err(DbError::from)?;
        Ok(affected as i64)
    }

    async fn ping(&self) -> Result<(), DbError> {
        let conn = self.pool.get().await.map_err(|e| DbErrorKind::Pool(e.to_string()))?;
        conn.query_one("SELECT 1", &[]).await.map_err(DbError::from)?;
        Ok(())
    }
}
