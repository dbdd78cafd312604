//! Public user CRUD (`GET/POST /api/v1/users`, `GET/PUT/PATCH/DELETE
//! /api/v1/users/{id}`). The only surface under `/api/v1`, so it's the only
//! surface the `Capture` middleware instruments.

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use obs_common::{ApiEnvelope, Metadata};
use obs_db::models::{NewUser, User};
use serde::{Deserialize, Serialize};
use validator::Validate;

use obs_web::{ApiError, ApiErrorKind};

use crate::server::ServerState;

/// `User` with `password_hash` stripped — never echo a hash back to a client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
    pub email: String,
    pub role: obs_db::models::Role,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.base.id,
            created_at: u.base.created_at,
            updated_at: u.base.updated_at,
            email: u.email,
            role: u.role,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: Option<obs_db::models::Role>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8))]
    pub password: Option<String>,
    pub role: Option<obs_db::models::Role>,
}

const SHORTCUTS: &[(&str, &str)] = &[("role", "role__eq"), ("email", "email__eq")];

fn validation_error(e: validator::ValidationErrors) -> ApiError {
    let issues = e
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| obs_common::ValidationIssue {
                code: err.code.to_string(),
                path: field.to_owned(),
                message: err
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{} is invalid", field)),
            })
        })
        .collect();
    ApiError::new(ApiErrorKind::Validation(issues))
}

pub async fn list(
    state: web::Data<ServerState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let params = super::list_params(&query, SHORTCUTS);
    let limit = params.limit;
    let offset = params.offset;
    let (rows, total) = state.users.list::<User>(params).await?;
    let data: Vec<PublicUser> = rows.into_iter().map(PublicUser::from).collect();
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok_paginated(
        data,
        Metadata { limit, offset, total },
    )))
}

pub async fn get(
    state: web::Data<ServerState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user: Option<User> = state.users.get(path.into_inner()).await?;
    match user {
        Some(u) => Ok(HttpResponse::Ok().json(ApiEnvelope::ok(PublicUser::from(u)))),
        None => Err(ApiError::new(ApiErrorKind::NotFound)),
    }
}

pub async fn create(
    state: web::Data<ServerState>,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate().map_err(validation_error)?;
    let values = NewUser {
        email: body.email.clone(),
        password: body.password.clone(),
        role: body.role.unwrap_or(obs_db::models::Role::User),
    };
    let created: User = state.users.create(values).await?;
    Ok(HttpResponse::Created().json(ApiEnvelope::ok(PublicUser::from(created))))
}

pub async fn update(
    state: web::Data<ServerState>,
    path: web::Path<i64>,
    body: web::Json<UpdateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate().map_err(validation_error)?;
    let mut values = serde_json::Map::new();
    if let Some(email) = &body.email {
        values.insert("email".to_owned(), serde_json::json!(email));
    }
    if let Some(password) = &body.password {
        values.insert("password".to_owned(), serde_json::json!(password));
    }
    if let Some(role) = body.role {
        values.insert("role".to_owned(), serde_json::json!(role));
    }
    let updated: Option<User> = state
        .users
        .update(path.into_inner(), serde_json::Value::Object(values))
        .await?;
    match updated {
        Some(u) => Ok(HttpResponse::Ok().json(ApiEnvelope::ok(PublicUser::from(u)))),
        None => Err(ApiError::new(ApiErrorKind::NotFound)),
    }
}

pub async fn delete(
    state: web::Data<ServerState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let deleted: Option<User> = state.users.delete(path.into_inner(), true).await?;
    match deleted {
        Some(_) => Ok(HttpResponse::Ok().json(ApiEnvelope::ok(()))),
        None => Err(ApiError::new(ApiErrorKind::NotFound)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use obs_db::{Backend, MockBackend, Sha256PasswordHasher};
    use std::sync::Arc;

    fn gateway() -> obs_db::Gateway<obs_db::models::UserEntity> {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        obs_db::Gateway::with_hasher(backend, Arc::new(Sha256PasswordHasher))
    }

    /// spec §8 scenario 4: create a user, soft-delete it, then confirm
    /// `email__eq` no longer finds it and reports `total == 0`.
    #[tokio::test]
    async fn soft_deleted_user_is_invisible_to_email_filter() {
        let users = gateway();
        let created: User = users
            .create(NewUser {
                email: "a@b.com".to_owned(),
                password: "password123".to_owned(),
                role: obs_db::models::Role::User,
            })
            .await
            .unwrap();

        let deleted: Option<User> = users.delete(created.base.id, true).await.unwrap();
        assert!(deleted.is_some());

        let mut filters = HashMap::new();
        filters.insert("email__eq".to_owned(), serde_json::json!("a@b.com"));
        let params = obs_db::ListParams {
            filters,
            ..Default::default()
        };
        let (rows, total) = users.list::<User>(params).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn public_user_never_carries_a_password_hash_field() {
        let user = User {
            base: obs_db::models::Base {
                id: 1,
                created_at: chrono::Utc::now().naive_utc(),
                updated_at: chrono::Utc::now().naive_utc(),
                deleted_at: None,
                embedding: None,
            },
            email: "a@b.com".to_owned(),
            password_hash: "secret-hash".to_owned(),
            role: obs_db::models::Role::User,
        };
        let public = PublicUser::from(user);
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("password").is_none());
    }
}
