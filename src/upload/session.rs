//! Upload session value objects
//!
//! The server hands out an upload session when a multipart upload is opened.
//! It may later be replaced wholesale by session recovery; the
//! [`RecoveryData`] captured at initialization outlives every replacement.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum nesting depth searched by [`normalize_init_response`]
pub const INIT_RESPONSE_SEARCH_DEPTH: usize = 3;

/// Server-issued context of one in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_id: String,
    pub video_id: String,
    pub key: String,
    pub bucket: String,
    pub original_file_name: String,
    pub course_id: String,
    pub content_type: String,
}

impl UploadSession {
    /// Build a session, defaulting `key` and `bucket` when the server left
    /// them out
    pub fn from_parts(
        upload_id: impl Into<String>,
        video_id: impl Into<String>,
        key: Option<String>,
        bucket: Option<String>,
        recovery: &RecoveryData,
        default_bucket: &str,
    ) -> Self {
        let video_id = video_id.into();
        let key = key
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| default_key(&video_id, &recovery.original_file_name));
        let bucket = bucket
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| default_bucket.to_string());

        Self {
            upload_id: upload_id.into(),
            video_id,
            key,
            bucket,
            original_file_name: recovery.original_file_name.clone(),
            course_id: recovery.course_id.clone(),
            content_type: recovery.content_type.clone(),
        }
    }

    /// Chunk operations need both server handles
    pub fn is_usable(&self) -> bool {
        !self.upload_id.trim().is_empty() && !self.video_id.trim().is_empty()
    }

    /// Recovery and completion additionally need the storage location and
    /// the recovery fields
    pub fn is_complete(&self) -> bool {
        self.is_usable()
            && !self.key.trim().is_empty()
            && !self.bucket.trim().is_empty()
            && self.recovery_data().is_complete()
    }

    pub fn recovery_data(&self) -> RecoveryData {
        RecoveryData {
            original_file_name: self.original_file_name.clone(),
            course_id: self.course_id.clone(),
            content_type: self.content_type.clone(),
        }
    }

    /// Whether `other` is a different server session
    pub fn differs_from(&self, other: &UploadSession) -> bool {
        self.upload_id != other.upload_id || self.video_id != other.video_id
    }
}

/// Storage key used when the server omits one
pub fn default_key(video_id: &str, original_file_name: &str) -> String {
    format!("videos/{}/{}", video_id, original_file_name)
}

/// Minimal request metadata needed to mint a replacement session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryData {
    pub original_file_name: String,
    pub course_id: String,
    pub content_type: String,
}

impl RecoveryData {
    pub fn is_complete(&self) -> bool {
        !self.original_file_name.trim().is_empty()
            && !self.course_id.trim().is_empty()
            && !self.content_type.trim().is_empty()
    }
}

/// Completed part info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPart {
    pub part_number: u32,
    pub etag: String,
}

/// A session replaced by recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecovery {
    pub session: UploadSession,
    pub previous_video_id: String,
    pub new_video_id: String,
}

/// The fields of an initialize-upload response the client relies on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitResponse {
    pub upload_id: String,
    pub video_id: String,
    pub key: Option<String>,
    pub bucket: Option<String>,
    pub chunk_size: Option<u64>,
    pub total_chunks: Option<u64>,
}

/// Find the upload session in an initialize-upload response
///
/// Servers wrap the payload differently (`data`, `body`, `result`, a JSON
/// string body, ...). Objects are searched depth-first up to
/// [`INIT_RESPONSE_SEARCH_DEPTH`] levels below the root for an
/// `uploadId`/`videoId` pair; camelCase and snake_case keys are accepted.
/// Fields missing on the matching object are inherited from enclosing ones.
///
/// Returns `None` when no pair is found.
pub fn normalize_init_response(raw: &Value) -> Option<InitResponse> {
    search(raw, 0, &InitResponse::default())
}

fn search(value: &Value, depth: usize, inherited: &InitResponse) -> Option<InitResponse> {
    if depth > INIT_RESPONSE_SEARCH_DEPTH {
        return None;
    }

    let map = match value {
        Value::Object(map) => map,
        // Lambda-style `"body": "{...}"`
        Value::String(s) if s.trim_start().starts_with('{') => {
            let parsed: Value = serde_json::from_str(s).ok()?;
            return search(&parsed, depth, inherited);
        }
        _ => return None,
    };

    let merged = merge_fields(map, inherited);
    if !merged.upload_id.is_empty() && !merged.video_id.is_empty() {
        return Some(merged);
    }

    map.values()
        .filter(|v| v.is_object() || v.is_string())
        .find_map(|child| search(child, depth + 1, &merged))
}

fn merge_fields(map: &Map<String, Value>, inherited: &InitResponse) -> InitResponse {
    InitResponse {
        upload_id: string_field(map, &["uploadId", "upload_id", "UploadId"])
            .unwrap_or_else(|| inherited.upload_id.clone()),
        video_id: string_field(map, &["videoId", "video_id"])
            .unwrap_or_else(|| inherited.video_id.clone()),
        key: string_field(map, &["key", "Key"]).or_else(|| inherited.key.clone()),
        bucket: string_field(map, &["bucket", "Bucket"]).or_else(|| inherited.bucket.clone()),
        chunk_size: u64_field(map, &["chunkSize", "chunk_size"]).or(inherited.chunk_size),
        total_chunks: u64_field(map, &["totalChunks", "total_chunks"]).or(inherited.total_chunks),
    }
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match map.get(*name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn u64_field(map: &Map<String, Value>, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| match map.get(*name) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recovery() -> RecoveryData {
        RecoveryData {
            original_file_name: "lecture-01.mp4".into(),
            course_id: "course-42".into(),
            content_type: "video/mp4".into(),
        }
    }

    #[test]
    fn test_session_defaults_key_and_bucket() {
        let session = UploadSession::from_parts("up-1", "vid-1", None, Some("".into()), &recovery(), "videos");
        assert_eq!(session.key, "videos/vid-1/lecture-01.mp4");
        assert_eq!(session.bucket, "videos");
        assert!(session.is_complete());
    }

    #[test]
    fn test_session_keeps_server_key_and_bucket() {
        let session = UploadSession::from_parts(
            "up-1",
            "vid-1",
            Some("raw/abc.mp4".into()),
            Some("media".into()),
            &recovery(),
            "videos",
        );
        assert_eq!(session.key, "raw/abc.mp4");
        assert_eq!(session.bucket, "media");
        assert_eq!(session.recovery_data(), recovery());
    }

    #[test]
    fn test_session_usability() {
        let mut session = UploadSession::from_parts("up-1", "vid-1", None, None, &recovery(), "videos");
        assert!(session.is_usable());
        session.upload_id.clear();
        assert!(!session.is_usable());
        assert!(!session.is_complete());
    }

    #[test]
    fn test_normalize_flat_camel_case() {
        let raw = json!({"uploadId": "u1", "videoId": "v1", "chunkSize": 5242880, "totalChunks": 3});
        let resp = normalize_init_response(&raw).unwrap();
        assert_eq!(resp.upload_id, "u1");
        assert_eq!(resp.video_id, "v1");
        assert_eq!(resp.chunk_size, Some(5242880));
        assert_eq!(resp.total_chunks, Some(3));
    }

    #[test]
    fn test_normalize_nested_snake_case() {
        let raw = json!({
            "success": true,
            "data": {"upload_id": "u2", "video_id": "v2", "chunk_size": "1048576", "key": "k", "bucket": "b"}
        });
        let resp = normalize_init_response(&raw).unwrap();
        assert_eq!(resp.upload_id, "u2");
        assert_eq!(resp.chunk_size, Some(1048576));
        assert_eq!(resp.key.as_deref(), Some("k"));
        assert_eq!(resp.bucket.as_deref(), Some("b"));
    }

    #[test]
    fn test_normalize_inherits_from_enclosing_object() {
        let raw = json!({
            "chunkSize": 10485760,
            "data": {"videoId": "v3", "uploadSession": {"uploadId": "u3", "key": "videos/v3/a.mp4"}}
        });
        let resp = normalize_init_response(&raw).unwrap();
        assert_eq!(resp.upload_id, "u3");
        assert_eq!(resp.video_id, "v3");
        assert_eq!(resp.chunk_size, Some(10485760));
        assert_eq!(resp.key.as_deref(), Some("videos/v3/a.mp4"));
    }

    #[test]
    fn test_normalize_json_string_body() {
        let raw = json!({"statusCode": 200, "body": "{\"uploadId\":\"u4\",\"videoId\":\"v4\"}"});
        let resp = normalize_init_response(&raw).unwrap();
        assert_eq!(resp.upload_id, "u4");
        assert_eq!(resp.video_id, "v4");
    }

    #[test]
    fn test_normalize_depth_limit() {
        let at_limit = json!({"a": {"b": {"c": {"uploadId": "u", "videoId": "v"}}}});
        assert!(normalize_init_response(&at_limit).is_some());

        let too_deep = json!({"a": {"b": {"c": {"d": {"uploadId": "u", "videoId": "v"}}}}});
        assert!(normalize_init_response(&too_deep).is_none());
    }

    #[test]
    fn test_normalize_missing_pair() {
        assert!(normalize_init_response(&json!({"uploadId": "u"})).is_none());
        assert!(normalize_init_response(&json!({"uploadId": "", "videoId": "v"})).is_none());
        assert!(normalize_init_response(&json!(null)).is_none());
        assert!(normalize_init_response(&json!("plain text")).is_none());
    }
}
