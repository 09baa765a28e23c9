//! reqwest-backed [`VideoStreamingApi`]

use super::*;
use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for API requests (5 minutes, chunks can be large)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest raw error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Keys that make up a `{ success, data, message }` envelope
const ENVELOPE_KEYS: &[&str] = &["success", "data", "message", "statusCode"];

/// HTTP implementation of the upload endpoints
pub struct HttpVideoStreamingApi {
    base_url: String,
    client: reqwest::Client,
    token: Arc<dyn TokenProvider>,
}

impl HttpVideoStreamingApi {
    /// Create a client for `base_url` with the given per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
        token: Arc<dyn TokenProvider>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token,
        })
    }

    /// Create a client from the `api` config section
    pub fn from_config(config: &ApiConfig, token: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
        Self::new(config.base_url.clone(), Some(config.timeout()), token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and return the unwrapped JSON answer
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        let token = self.token.token().ok_or(ApiError::MissingToken)?;
        let request_id = uuid::Uuid::new_v4().to_string();

        tracing::debug!(path = path, request_id = %request_id, "Sending API request");

        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .header("X-Request-Id", &request_id)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &text));
        }

        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("{} returned invalid JSON: {}", path, e)))?
        };

        // Some handlers answer 200 with `{ "success": false, ... }`
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(decode_error_value(status.as_u16(), &value));
        }

        Ok(unwrap_envelope(value))
    }

    async fn post_typed<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let value = self.post(path, body).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("{} returned unexpected body: {}", path, e)))
    }
}

fn map_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

/// Strip a `{ success, data }` envelope around an object payload
pub(crate) fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.get("data").map(Value::is_object).unwrap_or(false)
                && map.keys().all(|k| ENVELOPE_KEYS.contains(&k.as_str())) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Build an [`ApiError`] from a non-success answer
pub(crate) fn decode_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.is_object() => decode_error_value(status, &value),
        _ => {
            let mut message = body.trim().to_string();
            if message.is_empty() {
                message = format!("request failed with status {}", status);
            }
            if message.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| message.is_char_boundary(*i))
                    .unwrap_or(0);
                message.truncate(cut);
            }
            ApiError::Status {
                status,
                code: None,
                message,
            }
        }
    }
}

fn decode_error_value(status: u16, value: &Value) -> ApiError {
    // `{ "error": { "code": .., "message": .. } }` or flat fields
    let inner = value.get("error").filter(|e| e.is_object()).unwrap_or(value);

    let text = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| inner.get(*n).and_then(Value::as_str))
            .map(str::to_string)
    };

    let code = text(&["code", "errorCode", "Code"]);
    let message = text(&["message", "Message", "details"])
        .or_else(|| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("request failed with status {}", status));

    ApiError::Status {
        status,
        code,
        message,
    }
}

#[async_trait]
impl VideoStreamingApi for HttpVideoStreamingApi {
    #[tracing::instrument(
        name = "api.initialize_upload",
        skip(self, request),
        fields(file.size = request.file_size, course_id = %request.course_id),
        err
    )]
    async fn initialize_upload(&self, request: &InitializeUploadRequest) -> Result<Value, ApiError> {
        self.post(INITIALIZE_UPLOAD_PATH, request).await
    }

    #[tracing::instrument(
        name = "api.upload_chunk",
        skip(self, request),
        fields(upload_id = %request.upload_session.upload_id, part_number = request.part_number),
        err
    )]
    async fn upload_chunk(&self, request: &UploadChunkRequest) -> Result<UploadChunkResponse, ApiError> {
        self.post_typed(UPLOAD_CHUNK_PATH, request).await
    }

    #[tracing::instrument(
        name = "api.upload_chunk_compat",
        skip(self, request),
        fields(upload_id = %request.upload_id, part_number = request.part_number),
        err
    )]
    async fn upload_chunk_compat(
        &self,
        request: &CompatUploadChunkRequest,
    ) -> Result<UploadChunkResponse, ApiError> {
        self.post_typed(UPLOAD_CHUNK_PATH, request).await
    }

    #[tracing::instrument(
        name = "api.complete_upload",
        skip(self, request),
        fields(upload_id = %request.upload_session.upload_id, parts_count = request.parts.len()),
        err
    )]
    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse, ApiError> {
        self.post_typed(COMPLETE_UPLOAD_PATH, request).await
    }

    #[tracing::instrument(
        name = "api.recover_session",
        skip(self, request),
        fields(expired_video_id = %request.expired_session.video_id),
        err
    )]
    async fn recover_session(
        &self,
        request: &RecoverSessionRequest,
    ) -> Result<RecoverSessionResponse, ApiError> {
        self.post_typed(RECOVER_SESSION_PATH, request).await
    }

    #[tracing::instrument(
        name = "api.abort_upload",
        skip(self, request),
        fields(upload_id = %request.upload_session.upload_id),
        err
    )]
    async fn abort_upload(&self, request: &AbortUploadRequest) -> Result<AbortUploadResponse, ApiError> {
        let value = self.post(ABORT_UPLOAD_PATH, request).await?;
        if value.is_null() {
            return Ok(AbortUploadResponse {
                success: true,
                message: None,
            });
        }
        serde_json::from_value(value)
            .map_err(|e| ApiError::InvalidResponse(format!("abort returned unexpected body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use serde_json::json;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpVideoStreamingApi::new("http://localhost:3000/api/", None, Arc::new(StaticToken::new("t")))
            .unwrap();
        assert_eq!(api.base_url(), "http://localhost:3000/api");
        assert_eq!(
            api.url(UPLOAD_CHUNK_PATH),
            "http://localhost:3000/api/video-streaming/upload-chunk"
        );
    }

    #[test]
    fn test_unwrap_envelope() {
        let wrapped = json!({"success": true, "data": {"etag": "e1"}});
        assert_eq!(unwrap_envelope(wrapped), json!({"etag": "e1"}));

        // A payload that merely has a `data` field is left alone
        let payload = json!({"videoId": "v", "data": {"x": 1}});
        assert_eq!(unwrap_envelope(payload.clone()), payload);
    }

    #[test]
    fn test_decode_error_nested_and_flat() {
        let nested = decode_error(400, r#"{"error": {"code": "SESSION_EXPIRED", "message": "gone"}}"#);
        assert!(nested.is_session_expired());

        let flat = decode_error(403, r#"{"message": "not enrolled"}"#);
        assert_eq!(flat.to_string(), "HTTP 403: not enrolled");

        let string_error = decode_error(500, r#"{"error": "Multipart: Boundary not found"}"#);
        assert!(string_error.is_backend_config_error());

        let html = decode_error(502, "<html>Bad Gateway</html>");
        assert_eq!(html.status(), Some(502));

        let empty = decode_error(503, "");
        assert_eq!(empty.to_string(), "HTTP 503: request failed with status 503");
    }

    #[test]
    fn test_decode_error_truncates_multibyte_body() {
        let body = "€".repeat(300);
        let err = decode_error(502, &body);

        match err {
            ApiError::Status { status, message, .. } => {
                assert_eq!(status, 502);
                assert!(message.len() <= MAX_ERROR_BODY);
                assert!(message.len() > MAX_ERROR_BODY - 3);
                assert!(message.chars().all(|c| c == '€'));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
