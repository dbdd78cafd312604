//! The `{data, error, metadata}` response envelope every HTTP response body
//! uses (spec: EXTERNAL INTERFACES).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorMessage {
    Text(String),
    Issues(Vec<ValidationIssue>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub name: String,
    #[serde(flatten)]
    pub message: ErrorMessageField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Structured detail for kinds whose message text is pinned exact by
    /// the spec (e.g. the body-size guard's "Payload Too Large") but that
    /// still need to surface extra data — received/allowed byte counts and
    /// the like — without appending it onto `message`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessageField {
    pub message: ErrorMessage,
}

impl ErrorBody {
    pub fn new(name: &str, message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            message: ErrorMessageField {
                message: ErrorMessage::Text(message.into()),
            },
            stack,
            detail: None,
        }
    }

    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self {
            name: "ValidationError".to_owned(),
            message: ErrorMessageField {
                message: ErrorMessage::Issues(issues),
            },
            stack: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Metadata {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
    pub metadata: Option<Metadata>,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn ok_paginated(data: T, metadata: Metadata) -> Self {
        Self {
            data: Some(data),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            data: None,
            error: Some(error),
            metadata: None,
        }
    }
}
