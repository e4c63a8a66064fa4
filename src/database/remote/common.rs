// Shared types and utilities for remote Supabase operations

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Normalized failure kinds reported by the remote gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced table or row does not exist remotely
    NotFound,
    /// Credentials rejected or row-level security denied the call
    PermissionDenied,
    /// Network failure, timeout or an overloaded/unavailable endpoint
    ConnectivityFailure,
    /// Remote schema lacks a column or shape the payload needs
    SchemaMismatch,
    /// Payload rejected by a constraint or type check
    ValidationFailure,
    Unknown,
}

impl ErrorKind {
    /// Permanent failures are parked instead of retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::SchemaMismatch
                | ErrorKind::ValidationFailure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::ConnectivityFailure => "connectivity_failure",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "not_found" => Ok(ErrorKind::NotFound),
            "permission_denied" => Ok(ErrorKind::PermissionDenied),
            "connectivity_failure" => Ok(ErrorKind::ConnectivityFailure),
            "schema_mismatch" => Ok(ErrorKind::SchemaMismatch),
            "validation_failure" => Ok(ErrorKind::ValidationFailure),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(format!("Unknown error kind: {}", other)),
        }
    }
}

/// Error type for Supabase sync operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    pub kind: ErrorKind,
    /// HTTP status, when the remote answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectivityFailure, message)
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::connectivity(format!("Request timed out: {}", err))
        } else if err.is_builder() {
            Self::new(ErrorKind::ValidationFailure, format!("Invalid request: {}", err))
        } else {
            Self::connectivity(format!("Request failed: {}", err))
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SyncError {}

/// Error body returned by PostgREST
#[derive(Debug, Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Map a non-success PostgREST response onto an `ErrorKind`.
pub fn classify_response(status: u16, body: &str) -> SyncError {
    let parsed = serde_json::from_str::<PostgrestError>(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|e| e.code.clone())
        .unwrap_or_default();

    let kind = match (status, code.as_str()) {
        (_, "42501") | (401, _) | (403, _) => ErrorKind::PermissionDenied,
        // undefined table / relation missing from the schema cache
        (_, "42P01") | (_, "PGRST205") | (_, "PGRST106") => ErrorKind::NotFound,
        // undefined column
        (_, "PGRST204") | (_, "42703") => ErrorKind::SchemaMismatch,
        (404, _) => ErrorKind::NotFound,
        (408, _) | (429, _) | (502, _) | (503, _) | (504, _) => ErrorKind::ConnectivityFailure,
        (400..=499, _) => ErrorKind::ValidationFailure,
        _ => ErrorKind::Unknown,
    };

    let message = match parsed {
        Some(PostgrestError {
            message: Some(message),
            details,
            ..
        }) => match details {
            Some(details) if !details.is_empty() => format!("{} ({})", message, details),
            _ => message,
        },
        _ if body.trim().is_empty() => format!("HTTP {}", status),
        _ => body.trim().to_string(),
    };

    SyncError {
        kind,
        status: Some(status),
        message,
    }
}

/// Supabase client configuration
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl SupabaseClient {
    /// Create a new Supabase client whose requests give up after `timeout`
    pub fn new(
        base_url: String,
        anon_key: String,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::new(ErrorKind::Unknown, e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            access_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        // Without a user session the anon key doubles as the bearer token
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, SyncError> {
        let res = self
            .authorized(request)
            .send()
            .await
            .map_err(SyncError::from_transport)?;

        let status = res.status();
        let text = res.text().await.map_err(SyncError::from_transport)?;

        if !status.is_success() {
            return Err(classify_response(status.as_u16(), &text));
        }

        Ok(text)
    }

    fn parse_rows(body: &str) -> Result<Vec<Value>, SyncError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(body).map_err(|e| {
            SyncError::new(
                ErrorKind::SchemaMismatch,
                format!("Failed to parse response: {}", e),
            )
        })
    }

    /// Fetch every row of a table
    pub async fn select_all(&self, table: &str) -> Result<Vec<Value>, SyncError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")]);

        let body = self.send(request).await?;
        Self::parse_rows(&body)
    }

    /// Insert a record, merging into an existing row with the same primary key.
    /// Returns the stored row.
    pub async fn insert(&self, table: &str, payload: &Value) -> Result<Value, SyncError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(payload);

        let body = self.send(request).await?;

        // Response is an array with one element
        Ok(Self::parse_rows(&body)?
            .pop()
            .unwrap_or_else(|| payload.clone()))
    }

    /// Update an existing record by ID. Returns the number of rows changed.
    pub async fn update(&self, table: &str, id: &str, payload: &Value) -> Result<usize, SyncError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(payload);

        let body = self.send(request).await?;
        Ok(Self::parse_rows(&body)?.len())
    }

    /// Delete a record by ID. Deleting a missing row succeeds.
    pub async fn delete(&self, table: &str, id: &str) -> Result<(), SyncError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))]);

        self.send(request).await?;
        Ok(())
    }

    /// Reachability probe. Any HTTP answer counts as reachable.
    pub async fn health_check(&self) -> Result<(), SyncError> {
        let request = self.client.get(format!("{}/rest/v1/", self.base_url));
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind == ErrorKind::ConnectivityFailure && e.status.is_none() => Err(e),
            Err(_) => Ok(()),
        }
    }
}
