//! `Gateway<E>`: the one `list/get/getFirst/create/update/delete` surface
//! every handler in the system composes against (spec §4.B). Generic over
//! an `Entity` schema descriptor and a `dyn Backend` so the same code path
//! serves every table in spec §3 without string-concatenated SQL ever
//! reaching a handler.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::backend::Backend;
use crate::entity::{encode_embedding, Entity};
use crate::error::DbError;
use crate::filter::{parse_predicates, validate_order_by, ListParams, Order, Predicate};
use crate::hasher::PasswordHasher;

pub struct Gateway<E: Entity> {
    backend: Arc<dyn Backend>,
    hasher: Option<Arc<dyn PasswordHasher>>,
    _entity: PhantomData<E>,
}

impl<E: Entity> Gateway<E> {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            hasher: None,
            _entity: PhantomData,
        }
    }

    pub fn with_hasher(backend: Arc<dyn Backend>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            backend,
            hasher: Some(hasher),
            _entity: PhantomData,
        }
    }

    fn predicates(&self, params: &ListParams) -> Result<Vec<Predicate>, DbError> {
        validate_order_by(E::COLUMNS, &params.order_by)?;
        parse_predicates(E::COLUMNS, &params.filters)
    }

    pub async fn list<R: DeserializeOwned>(
        &self,
        params: ListParams,
    ) -> Result<(Vec<R>, i64), DbError> {
        params.validate_limit()?;
        let predicates = self.predicates(&params)?;
        let (rows, total) = self
            .backend
            .list(E::TABLE, E::COLUMNS, &predicates, &params)
            .await?;
        let data = rows
            .into_iter()
            .map(|r| serde_json::from_value(Value::Object(r)).map_err(DbError::from))
            .collect::<Result<Vec<R>, DbError>>()?;
        Ok((data, total))
    }

    pub async fn get<R: DeserializeOwned>(&self, id: i64) -> Result<Option<R>, DbError> {
        let row = self.backend.get(E::TABLE, E::COLUMNS, id, false).await?;
        row.map(|r| serde_json::from_value(Value::Object(r)).map_err(DbError::from))
            .transpose()
    }

    pub async fn get_first<R: DeserializeOwned>(
        &self,
        filters: std::collections::HashMap<String, Value>,
        order_by: &str,
        order: Order,
    ) -> Result<Option<R>, DbError> {
        validate_order_by(E::COLUMNS, order_by)?;
        let predicates = parse_predicates(E::COLUMNS, &filters)?;
        let row = self
            .backend
            .get_first(E::TABLE, E::COLUMNS, &predicates, order_by, order, false)
            .await?;
        row.map(|r| serde_json::from_value(Value::Object(r)).map_err(DbError::from))
            .transpose()
    }

    /// `create(values) -> row`. Drops any caller-supplied base fields,
    /// hashes the password shadow field if the entity declares one, and
    /// always recomputes `embedding` from the resulting row.
    pub async fn create<N: Serialize, R: DeserializeOwned>(&self, values: N) -> Result<R, DbError> {
        let mut map = match serde_json::to_value(values)? {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for forbidden in ["id", "created_at", "updated_at", "deleted_at", "embedding"] {
            map.remove(forbidden);
        }
        if let Some((shadow, stored)) = E::PASSWORD_SHADOW {
            if let Some(Value::String(plaintext)) = map.remove(shadow) {
                let hasher = self
                    .hasher
                    .as_ref()
                    .expect("entity declares a password shadow field but no hasher was configured");
                map.insert(stored.to_owned(), Value::String(hasher.hash(&plaintext)));
            }
        }
        let embedding = encode_embedding(&map);
        map.insert(
            "embedding".to_owned(),
            serde_json::to_value(embedding.to_vec())?,
        );
        let row = self.backend.insert(E::TABLE, map).await?;
        serde_json::from_value(Value::Object(row)).map_err(DbError::from)
    }

    /// `update(id, values) -> row | null`. Bumps `updated_at` (handled by
    /// the backend), hashes the password shadow field when present, and
    /// recomputes `embedding` from the merged row.
    pub async fn update<N: Serialize, R: DeserializeOwned>(
        &self,
        id: i64,
        values: N,
    ) -> Result<Option<R>, DbError> {
        let mut map = match serde_json::to_value(values)? {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        for forbidden in ["id", "created_at", "updated_at", "deleted_at", "embedding"] {
            map.remove(forbidden);
        }
        if let Some((shadow, stored)) = E::PASSWORD_SHADOW {
            if let Some(Value::String(plaintext)) = map.remove(shadow) {
                let hasher = self
                    .hasher
                    .as_ref()
                    .expect("entity declares a password shadow field but no hasher was configured");
                map.insert(stored.to_owned(), Value::String(hasher.hash(&plaintext)));
            }
        }
        if map.is_empty() {
            return self.get(id).await;
        }
        let existing = self.backend.get(E::TABLE, E::COLUMNS, id, true).await?;
        if let Some(mut merged) = existing {
            for (k, v) in &map {
                merged.insert(k.clone(), v.clone());
            }
            let embedding = encode_embedding(&merged);
            map.insert("embedding".to_owned(), serde_json::to_value(embedding.to_vec())?);
        }
        let row = self.backend.update(E::TABLE, id, map).await?;
        row.map(|r| serde_json::from_value(Value::Object(r)).map_err(DbError::from))
            .transpose()
    }

    pub async fn delete<R: DeserializeOwned>(
        &self,
        id: i64,
        soft: bool,
    ) -> Result<Option<R>, DbError> {
        let row = self.backend.delete(E::TABLE, id, soft).await?;
        row.map(|r| serde_json::from_value(Value::Object(r)).map_err(DbError::from))
            .transpose()
    }
}

impl<E: Entity> Clone for Gateway<E> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            hasher: self.hasher.clone(),
            _entity: PhantomData,
        }
    }
}
