//! Resource Client: outbound REST calls to the admin API.
//!
//! Every call attaches the bearer credential, unwraps the `{success,
//! message, data}` envelope and maps failures onto [`SyncError`]. A 401 is
//! handed to the [`SessionGuard`] before the error reaches the caller.

use std::sync::Arc;

use adminsync_core::types::{ApiEnvelope, ApiErrorBody};
use adminsync_core::{SyncError, SyncResult, ValidationError};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AdminSyncConfig;
use crate::credentials::CredentialStore;
use crate::session::SessionGuard;

pub use reqwest::Method;

const GENERIC_ERROR: &str = "An error occurred";

/// Throwaway origin used only to run segments through `Url`'s path encoder.
const PATH_ORIGIN: &str = "http://adminsync.invalid/";

/// Join `segments` into an absolute API path, percent-encoding each one so
/// an id holding `/`, `?`, `#` or spaces stays a single segment.
/// `.` and `..` would be resolved away by the server, so they are refused.
pub fn api_path(segments: &[&str]) -> SyncResult<String> {
    if segments.iter().any(|s| matches!(*s, "." | "..")) {
        return Err(ValidationError::invalid("path", "dot segments are not allowed").into());
    }
    let mut url = Url::parse(PATH_ORIGIN)
        .map_err(|e| SyncError::client(format!("Invalid path origin: {}", e)))?;
    url.path_segments_mut()
        .map_err(|()| SyncError::client("Path origin cannot hold segments"))?
        .clear()
        .extend(segments);
    Ok(url.path().to_string())
}

#[derive(Clone)]
pub struct ResourceClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    session: Arc<SessionGuard>,
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ResourceClient {
    pub fn new(
        config: &AdminSyncConfig,
        credentials: Arc<dyn CredentialStore>,
        session: Arc<SessionGuard>,
    ) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim().trim_end_matches('/').to_string(),
            credentials,
            session,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.session
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// Issue `method path` with optional query parameters and JSON body and
    /// decode the envelope's `data` into `T`.
    ///
    /// `T = ()` accepts `204 No Content`, empty bodies and envelopes without
    /// data.
    pub async fn request<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: Option<&Q>,
        body: Option<&B>,
    ) -> SyncResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = self.credentials.token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| SyncError::client(format!("Invalid credential header: {}", e)))?;
            request = request.header(AUTHORIZATION, value);
        }
        if let Some(query) = query {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!(method = %method, path, "Sending request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let err = transport_error(&err);
                tracing::warn!(method = %method, path, kind = err.kind(), error = %err, "Request failed");
                return Err(err);
            }
        };

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            let err = transport_error(&e);
            tracing::warn!(method = %method, path, status = status.as_u16(), error = %err, "Failed to read response body");
            err
        })?;

        let result = decode_body(status, &bytes);
        if let Err(err) = &result {
            tracing::warn!(
                method = %method,
                path,
                status = status.as_u16(),
                kind = err.kind(),
                error = %err,
                "Request failed"
            );
            if err.is_unauthorized() {
                self.session.handle_unauthorized(path);
            }
        }
        result
    }

    pub async fn get<T, Q>(&self, path: &str, query: Option<&Q>) -> SyncResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.request::<T, Q, ()>(Method::GET, path, query, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: Option<&B>) -> SyncResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, (), B>(Method::POST, path, None, body).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> SyncResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request::<T, (), B>(Method::PUT, path, None, Some(body)).await
    }

    pub async fn delete<T>(&self, path: &str) -> SyncResult<T>
    where
        T: DeserializeOwned,
    {
        self.request::<T, (), ()>(Method::DELETE, path, None, None).await
    }
}

/// Map a response onto the data it carries or the failure it reports.
pub fn decode_body<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> SyncResult<T> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ApiErrorBody>(bytes)
            .ok()
            .and_then(|body| body.reason().map(str::to_string))
            .unwrap_or_else(|| GENERIC_ERROR.to_string());
        return Err(SyncError::server(status.as_u16(), message));
    }

    if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
        return decode_data(serde_json::Value::Null);
    }

    let envelope: ApiEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::client(format!("Malformed response envelope: {}", e)))?;
    if !envelope.success {
        let message = envelope
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_ERROR.to_string());
        return Err(SyncError::server(status.as_u16(), message));
    }
    decode_data(envelope.data)
}

fn decode_data<T: DeserializeOwned>(data: serde_json::Value) -> SyncResult<T> {
    serde_json::from_value(data)
        .map_err(|e| SyncError::client(format!("Failed to decode response data: {}", e)))
}

/// Failures before a full response arrived.
fn transport_error(err: &reqwest::Error) -> SyncError {
    if err.is_builder() {
        SyncError::client(err.to_string())
    } else if err.is_timeout() {
        SyncError::network(format!("Request timed out: {}", err))
    } else {
        SyncError::network(format!(
            "No response from server. Please check your connection. ({})",
            err
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adminsync_core::types::School;
    use serde_json::json;

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_api_path_encodes_each_segment() {
        assert_eq!(api_path(&["admin", "users", "u1"]).unwrap(), "/admin/users/u1");
        assert_eq!(
            api_path(&["admin", "users", "a/b?c#d", "tokens"]).unwrap(),
            "/admin/users/a%2Fb%3Fc%23d/tokens"
        );
        assert_eq!(api_path(&["admin", "users", "ayu putri"]).unwrap(), "/admin/users/ayu%20putri");
        assert!(matches!(
            api_path(&["admin", "users", ".."]),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn test_decodes_envelope_data() {
        let body = bytes(json!({
            "success": true,
            "data": { "id": 3, "name": "SMA 1", "created_at": "2024-01-05T00:00:00Z" }
        }));
        let school: School = decode_body(StatusCode::OK, &body).unwrap();
        assert_eq!(school.id, 3);
    }

    #[test]
    fn test_unit_accepts_no_content_and_empty() {
        decode_body::<()>(StatusCode::NO_CONTENT, b"").unwrap();
        decode_body::<()>(StatusCode::OK, b"  ").unwrap();
        decode_body::<()>(StatusCode::OK, &bytes(json!({ "success": true, "message": "deleted" })))
            .unwrap();
    }

    #[test]
    fn test_error_message_precedence() {
        let err = decode_body::<()>(
            StatusCode::BAD_REQUEST,
            &bytes(json!({ "message": "Invalid amount", "error": "Bad Request" })),
        )
        .unwrap_err();
        assert_eq!(err, SyncError::server(400, "Invalid amount"));

        let err =
            decode_body::<()>(StatusCode::FORBIDDEN, &bytes(json!({ "error": "Forbidden" }))).unwrap_err();
        assert_eq!(err, SyncError::server(403, "Forbidden"));

        let err = decode_body::<()>(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>").unwrap_err();
        assert_eq!(err, SyncError::server(502, GENERIC_ERROR));
    }

    #[test]
    fn test_unsuccessful_envelope_is_server_error() {
        let err = decode_body::<()>(
            StatusCode::OK,
            &bytes(json!({ "success": false, "message": "School has users" })),
        )
        .unwrap_err();
        assert_eq!(err, SyncError::server(200, "School has users"));
    }

    #[test]
    fn test_malformed_bodies_are_client_errors() {
        let err = decode_body::<School>(StatusCode::OK, b"{not json").unwrap_err();
        assert_eq!(err.kind(), "client");

        let err = decode_body::<School>(StatusCode::OK, &bytes(json!({ "success": true, "data": [1, 2] })))
            .unwrap_err();
        assert_eq!(err.kind(), "client");
    }
}
