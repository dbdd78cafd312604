#[macro_use]
extern crate slog_scope;

pub mod backend;
pub mod entity;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod hasher;
pub mod models;

pub use backend::{mock::MockBackend, postgres::PgBackend, Backend};
pub use entity::{ColumnDef, ColumnKind, Entity};
pub use error::{DbError, DbErrorKind};
pub use filter::{ListParams, Op, Order, Predicate};
pub use gateway::Gateway;
pub use hasher::{PasswordHasher, Sha256PasswordHasher};

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{LogEntity, LogLevel, NewLog};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn gateway() -> Gateway<LogEntity> {
        Gateway::new(Arc::new(MockBackend::new()))
    }

    #[tokio::test]
    async fn soft_delete_hides_row_from_default_list_and_get() {
        let gw = gateway();
        let created: models::Log = gw
            .create(NewLog {
                source: "api".into(),
                level: LogLevel::Info,
                message: "hello".into(),
                attributes: serde_json::json!({}),
            })
            .await
            .unwrap();

        let deleted: Option<models::Log> = gw.delete(created.base.id, true).await.unwrap();
        assert!(deleted.is_some());

        let fetched: Option<models::Log> = gw.get(created.base.id).await.unwrap();
        assert!(fetched.is_none());

        let (rows, total) = gw
            .list::<models::Log>(ListParams::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn list_respects_limit_and_reports_total_under_filter() {
        let gw = gateway();
        for i in 0..5 {
            gw.create::<_, models::Log>(NewLog {
                source: "api".into(),
                level: LogLevel::Info,
                message: format!("msg-{}", i),
                attributes: serde_json::json!({}),
            })
            .await
            .unwrap();
        }
        let mut params = ListParams::default();
        params.limit = 2;
        let (rows, total) = gw.list::<models::Log>(params).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn unknown_filter_operator_is_rejected() {
        let gw = gateway();
        let mut params = ListParams::default();
        params
            .filters
            .insert("message__bogus".to_owned(), serde_json::json!("x"));
        let result = gw.list::<models::Log>(params).await;
        assert!(result.is_err());
    }

    /// spec §8 general invariant: results are ordered by `(order_by, order)`
    /// with a stable tie-break on `id` — rows sharing the same `level` must
    /// still come back in ascending `id` order.
    #[tokio::test]
    async fn equal_order_by_values_tie_break_on_id_ascending() {
        let gw = gateway();
        for i in 0..3 {
            gw.create::<_, models::Log>(NewLog {
                source: "api".into(),
                level: LogLevel::Warn,
                message: format!("msg-{}", i),
                attributes: serde_json::json!({}),
            })
            .await
            .unwrap();
        }
        let mut params = ListParams::default();
        params.order_by = "level".to_owned();
        let (rows, _) = gw.list::<models::Log>(params).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.base.id).collect();
        let mut sorted_ids = ids.clone();
        sorted_ids.sort_unstable();
        assert_eq!(ids, sorted_ids);
    }

    #[tokio::test]
    async fn hard_delete_older_than_retention_cutoff() {
        let backend = MockBackend::new();
        let gw = Gateway::<LogEntity>::new(Arc::new(backend));
        gw.create::<_, models::Log>(NewLog {
            source: "api".into(),
            level: LogLevel::Info,
            message: "old".into(),
            attributes: serde_json::json!({}),
        })
        .await
        .unwrap();
        // Exercises the retention helper directly against the backend, since
        // `hard_delete_older_than` is a maintenance operation, not part of
        // the handler-facing CRUD surface.
        let cutoff = (Utc::now() + Duration::days(1)).naive_utc();
        let backend = MockBackend::new();
        backend
            .insert(
                "logs",
                serde_json::from_value(serde_json::json!({
                    "source": "api", "level": "info", "message": "old", "attributes": {}
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        let removed = backend
            .hard_delete_older_than("logs", "created_at", cutoff, 1000)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
