//! Upload Flow Integration Tests
//!
//! Drives `VideoUploadClient` over HTTP against a mock video-streaming API.

use course_video_uploadr::api::HttpVideoStreamingApi;
use course_video_uploadr::auth::{EnvToken, StaticToken, TokenProvider};
use course_video_uploadr::upload::{
    AbortOutcome, FailureReason, MemorySource, RecoveryEvent, RecoveryKind, RetryPolicy,
    UploadError, UploadMetadata, UploadObserver, UploadProgress, UploadSettings, UploadSource,
    UploadStatus, VideoUploadClient,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MIB: usize = 1024 * 1024;

/// Observer that records everything it sees
#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<UploadStatus>>,
    progress: Mutex<Vec<UploadProgress>>,
    errors: Mutex<Vec<FailureReason>>,
    recoveries: Mutex<Vec<RecoveryEvent>>,
}

impl UploadObserver for Recorder {
    fn on_progress(&self, progress: &UploadProgress) {
        self.progress.lock().unwrap().push(*progress);
    }

    fn on_status(&self, status: UploadStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_error(&self, error: &UploadError) {
        self.errors.lock().unwrap().push(error.reason());
    }

    fn on_recovery(&self, event: &RecoveryEvent) {
        self.recoveries.lock().unwrap().push(event.clone());
    }
}

/// Helper to create a client pointed at a mock server
fn create_client(mock_server: &MockServer, token: Arc<dyn TokenProvider>) -> (VideoUploadClient, Arc<Recorder>) {
    let api = HttpVideoStreamingApi::new(mock_server.uri(), Some(Duration::from_secs(10)), token).unwrap();
    let settings = UploadSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        },
        ..UploadSettings::default()
    };
    let recorder = Arc::new(Recorder::default());
    let client = VideoUploadClient::new(Arc::new(api), settings).with_observer(recorder.clone());
    (client, recorder)
}

fn test_token() -> Arc<dyn TokenProvider> {
    Arc::new(StaticToken::new("test-token"))
}

fn video(len: usize) -> Arc<dyn UploadSource> {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    Arc::new(MemorySource::new("lecture-01.mp4", data))
}

fn metadata() -> UploadMetadata {
    UploadMetadata::for_course("course-42").with_title("Lecture 1")
}

/// Mount an initialize-upload answer wrapped in the usual envelope
async fn mount_initialize(mock_server: &MockServer, upload_id: &str, video_id: &str, chunk_size: usize) {
    Mock::given(method("POST"))
        .and(path("/video-streaming/initialize-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "uploadId": upload_id,
                "videoId": video_id,
                "chunkSize": chunk_size,
                "key": format!("videos/{}/lecture-01.mp4", video_id),
                "bucket": "course-videos"
            }
        })))
        .mount(mock_server)
        .await;
}

/// Mount a successful chunk answer for one part of one session
async fn mount_chunk(mock_server: &MockServer, upload_id: &str, part_number: u32, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/video-streaming/upload-chunk"))
        .and(body_partial_json(json!({
            "uploadSession": {"uploadId": upload_id},
            "partNumber": part_number
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"etag": format!("\"etag-{}\"", part_number), "partNumber": part_number}
        })))
        .expect(expected_calls)
        .mount(mock_server)
        .await;
}

fn session_expired() -> ResponseTemplate {
    ResponseTemplate::new(410).set_body_json(json!({
        "error": {"code": "SESSION_EXPIRED", "message": "Upload session expired"}
    }))
}

fn parts_manifest(count: u32) -> Value {
    let parts: Vec<Value> = (1..=count)
        .map(|n| json!({"partNumber": n, "etag": format!("\"etag-{}\"", n)}))
        .collect();
    json!({ "parts": parts })
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_twelve_mib_file_uploads_in_three_chunks() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 5 * MIB).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .and(header("authorization", "Bearer test-token"))
            .and(header_exists("x-request-id"))
            .and(body_partial_json(json!({
                "uploadSession": {"uploadId": "upload-1", "bucket": "course-videos"},
                "partNumber": 1,
                "courseId": "course-42",
                "originalFileName": "lecture-01.mp4",
                "contentType": "video/mp4"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"etag": "\"etag-1\""})))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_chunk(&mock_server, "upload-1", 2, 1).await;
        mount_chunk(&mock_server, "upload-1", 3, 1).await;

        let mut manifest = parts_manifest(3);
        manifest["uploadSession"] = json!({"uploadId": "upload-1", "videoId": "video-1"});
        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .and(body_partial_json(manifest))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "videoId": "video-1",
                "status": "processing",
                "processingJobId": "job-7",
                "estimatedProcessingTime": 120
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        client.initialize(video(12 * MIB), metadata()).await.unwrap();
        assert_eq!(client.total_chunks(), Some(3));
        assert_eq!(client.chunk_size(), Some(5 * MIB as u64));

        let result = client.upload().await.unwrap();
        assert_eq!(result.video_id, "video-1");
        assert_eq!(result.processing_job_id.as_deref(), Some("job-7"));
        assert_eq!(result.estimated_processing_time, Some(json!(120)));
        assert_eq!(client.status(), UploadStatus::Completed);

        let progress = recorder.progress.lock().unwrap();
        let bytes: Vec<u64> = progress.iter().map(|p| p.uploaded_bytes).collect();
        assert_eq!(bytes, vec![5 * MIB as u64, 10 * MIB as u64, 12 * MIB as u64]);
        assert_eq!(progress.last().unwrap().percent, 100);
    }

    #[tokio::test]
    async fn test_expired_session_is_recovered_mid_upload() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;
        mount_chunk(&mock_server, "upload-1", 1, 1).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .and(body_partial_json(json!({"uploadSession": {"uploadId": "upload-1"}, "partNumber": 2})))
            .respond_with(session_expired())
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/recover-session"))
            .and(body_partial_json(json!({
                "expiredSession": {"uploadId": "upload-1", "videoId": "video-1"},
                "originalFileName": "lecture-01.mp4",
                "courseId": "course-42",
                "contentType": "video/mp4"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "newUploadSession": {"uploadId": "upload-2", "videoId": "video-2"},
                    "recovery": {"previousVideoId": "video-1", "newVideoId": "video-2", "sessionRecovered": true}
                }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        mount_chunk(&mock_server, "upload-2", 2, 1).await;
        mount_chunk(&mock_server, "upload-2", 3, 1).await;
        mount_chunk(&mock_server, "upload-2", 1, 0).await;

        let mut manifest = parts_manifest(3);
        manifest["uploadSession"] = json!({"uploadId": "upload-2", "videoId": "video-2"});
        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .and(body_partial_json(manifest))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"videoId": "video-2"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        let result = client.upload_file(video(3000), metadata()).await.unwrap();

        assert_eq!(result.video_id, "video-2");
        assert_eq!(result.status, "processing");
        assert_eq!(client.recovery_attempts(), 1);

        let recoveries = recorder.recoveries.lock().unwrap();
        assert_eq!(recoveries.len(), 1);
        assert_eq!(recoveries[0].kind, RecoveryKind::Manual);
        assert_eq!(recoveries[0].previous_video_id, "video-1");
        assert_eq!(recoveries[0].new_video_id, "video-2");
    }

    #[tokio::test]
    async fn test_automatic_recovery_from_chunk_response() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .and(body_partial_json(json!({"uploadSession": {"uploadId": "upload-1"}, "partNumber": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "etag": "\"stale\"",
                "sessionRecovered": true,
                "newUploadSession": {"uploadId": "upload-9", "videoId": "video-9", "bucket": "course-videos"},
                "recovery": {"previousVideoId": "video-1", "newVideoId": "video-9"}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_chunk(&mock_server, "upload-9", 1, 1).await;
        mount_chunk(&mock_server, "upload-9", 2, 1).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/recover-session"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut manifest = parts_manifest(2);
        manifest["uploadSession"] = json!({"uploadId": "upload-9"});
        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .and(body_partial_json(manifest))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"videoId": "video-9"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        client.upload_file(video(2000), metadata()).await.unwrap();

        let recoveries = recorder.recoveries.lock().unwrap();
        assert_eq!(recoveries[0].kind, RecoveryKind::Automatic);
        assert!(recoveries[0].recovered);
    }

    #[tokio::test]
    async fn test_repeated_expiry_hits_recovery_limit() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .respond_with(session_expired())
            .expect(3)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/recover-session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "newUploadSession": {"uploadId": "upload-2", "videoId": "video-2"}
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/video-streaming/abort-upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        let err = client.upload_file(video(3000), metadata()).await.unwrap_err();

        assert!(matches!(err, UploadError::RecoveryLimitReached { attempts: 2 }));
        assert_eq!(client.status(), UploadStatus::Failed);
        assert_eq!(
            recorder.statuses.lock().unwrap().last(),
            Some(&UploadStatus::Failed)
        );
        assert_eq!(
            recorder.errors.lock().unwrap().as_slice(),
            &[FailureReason::RecoveryLimitReached]
        );
    }

    #[tokio::test]
    async fn test_abort_with_not_found_still_resets() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/abort-upload"))
            .and(body_partial_json(json!({"uploadSession": {"uploadId": "upload-1", "videoId": "video-1"}})))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Upload not found"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        client.initialize(video(2000), metadata()).await.unwrap();

        let outcome = client.abort().await;
        assert_eq!(outcome, AbortOutcome::AlreadyReleased);
        assert_eq!(client.status(), UploadStatus::Aborted);
        assert!(client.session().is_none());
        assert!(client.parts().is_empty());

        let statuses = recorder.statuses.lock().unwrap();
        assert_eq!(statuses.last(), Some(&UploadStatus::Aborted));
        assert!(!statuses.contains(&UploadStatus::Failed));
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_never_calls_abort() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .expect(3)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/video-streaming/abort-upload"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let (mut client, _recorder) = create_client(&mock_server, test_token());
        let err = client.upload_file(video(2000), metadata()).await.unwrap_err();

        assert_eq!(err.reason(), FailureReason::ServerUnavailable);
        assert_eq!(client.status(), UploadStatus::Failed);
        assert_eq!(client.session().unwrap().upload_id, "upload-1");
    }

    #[tokio::test]
    async fn test_missing_course_id_makes_no_requests() {
        let mock_server = MockServer::start().await;

        let (mut client, recorder) = create_client(&mock_server, test_token());
        let err = client
            .upload_file(video(2000), UploadMetadata::default())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::MissingCourseId));
        assert_eq!(client.status(), UploadStatus::Failed);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_makes_no_requests() {
        let mock_server = MockServer::start().await;

        let token = Arc::new(EnvToken::new("CVU_INTEGRATION_TOKEN_THAT_IS_NEVER_SET"));
        let (mut client, _recorder) = create_client(&mock_server, token);
        let err = client.initialize(video(2000), metadata()).await.unwrap_err();

        assert_eq!(err.reason(), FailureReason::Unauthorized);
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_request_falls_back_to_compat_payload() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .and(body_partial_json(json!({"uploadSession": {"uploadId": "upload-1"}})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "\"uploadSession\" is not allowed"})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .and(body_partial_json(json!({"uploadId": "upload-1", "videoId": "video-1", "partNumber": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ETag": "\"etag-1\""})))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .and(body_partial_json(parts_manifest(1)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"videoId": "video-1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, _recorder) = create_client(&mock_server, test_token());
        let result = client.upload_file(video(800), metadata()).await.unwrap();
        assert_eq!(result.video_id, "video-1");
    }

    #[tokio::test]
    async fn test_backend_config_error_is_terminal() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false,
                "error": "Multipart: Boundary not found"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, _recorder) = create_client(&mock_server, test_token());
        let err = client.upload_file(video(3000), metadata()).await.unwrap_err();

        assert!(matches!(err, UploadError::BackendConfiguration(_)));
        assert!(err.user_message().contains("contact support"));
        assert_eq!(client.status(), UploadStatus::Failed);
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/upload-chunk"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&mock_server)
            .await;
        mount_chunk(&mock_server, "upload-1", 1, 1).await;
        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"videoId": "video-1"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, _recorder) = create_client(&mock_server, test_token());
        client.upload_file(video(500), metadata()).await.unwrap();
        assert_eq!(client.status(), UploadStatus::Completed);
    }

    #[tokio::test]
    async fn test_completion_bad_request_asks_for_restart() {
        let mock_server = MockServer::start().await;
        mount_initialize(&mock_server, "upload-1", "video-1", 1024).await;
        mount_chunk(&mock_server, "upload-1", 1, 1).await;

        Mock::given(method("POST"))
            .and(path("/video-streaming/complete-upload"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid part list"})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (mut client, _recorder) = create_client(&mock_server, test_token());
        let err = client.upload_file(video(500), metadata()).await.unwrap_err();

        assert!(matches!(err, UploadError::Completion { .. }));
        assert!(err.user_message().contains("restart"));
    }
}
