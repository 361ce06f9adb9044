use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use umpire_replay::api;
use umpire_replay::capture::{CaptureAck, CaptureSource};
use umpire_replay::clip::{Camera, Clip, UploadState};
use umpire_replay::config::{ControllerSettings, StorageLayout};
use umpire_replay::extractor::{ClipExtractor, ClipRequest};
use umpire_replay::s3_uploader::UploadSink;
use umpire_replay::{ReplayError, SessionController};

struct StubCapture;

#[async_trait]
impl CaptureSource for StubCapture {
    async fn start_capture(&self, cameras: &[Camera], _label: &str) -> Result<CaptureAck, ReplayError> {
        Ok(CaptureAck {
            confirmed: cameras.iter().map(|c| c.id.clone()).collect(),
            missing: Vec::new(),
        })
    }

    async fn stop_capture(&self) -> Result<CaptureAck, ReplayError> {
        Ok(CaptureAck::default())
    }
}

/// Writes a small patterned file per clip; cam2 always fails.
struct FileExtractor {
    dir: PathBuf,
}

#[async_trait]
impl ClipExtractor for FileExtractor {
    async fn extract(&self, request: &ClipRequest) -> Result<Clip, ReplayError> {
        if request.camera.as_str() == "cam2" {
            return Err(ReplayError::extraction(&request.camera, "no signal"));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let filename = format!("{}_{}_{}.mp4", request.ball_label, request.camera, id);
        let local_path = self.dir.join(&filename);
        let data: Vec<u8> = (0..4096u32).map(|n| (n % 256) as u8).collect();
        tokio::fs::write(&local_path, &data).await?;
        Ok(Clip {
            id,
            filename,
            local_path,
            ball_number: request.ball_label.clone(),
            camera: request.camera.clone(),
            segment: request.segment,
            duration: request.segment.duration(),
            size: data.len() as u64,
            timestamp: Utc::now(),
            upload_state: UploadState::NotUploaded,
            s3_url: None,
        })
    }
}

struct StubUploader;

#[async_trait]
impl UploadSink for StubUploader {
    async fn upload(&self, clip: &Clip) -> Result<String, ReplayError> {
        Ok(format!("https://replays.example/clips/{}", clip.filename))
    }
}

fn controller(dir: &TempDir) -> web::Data<SessionController> {
    let settings = ControllerSettings {
        cameras: vec![
            "cam1=http://cam1/video".parse().unwrap(),
            "cam2=http://cam2/video".parse().unwrap(),
        ],
        buffer_capacity: 4,
        max_ball_index: 120,
        extraction_timeout_base: Duration::from_secs(30),
        extraction_timeout_factor: 4.0,
        layout: StorageLayout::new(dir.path().join("buffer"), dir.path().join("clips")),
    };
    web::Data::new(SessionController::new(
        settings,
        Arc::new(StubCapture),
        Arc::new(FileExtractor {
            dir: dir.path().to_path_buf(),
        }),
        Arc::new(StubUploader),
    ))
}

#[actix_web::test]
async fn recording_flow_over_http() {
    let dir = TempDir::new().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(controller(&dir))
            .configure(api::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/recording/mark-ball")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "NOT_RECORDING");

    let req = test::TestRequest::post()
        .uri("/api/recording/start")
        .set_json(serde_json::json!({ "matchName": "" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/recording/start")
        .set_json(serde_json::json!({ "matchName": "final" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["status"]["isRecording"], true);

    let req = test::TestRequest::post()
        .uri("/api/recording/mark-ball")
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(first["ballLabel"], "0.1");
    assert!(first["segment"].is_null());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let req = test::TestRequest::post()
        .uri("/api/recording/mark-ball")
        .to_request();
    let marked: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(marked["success"], true);
    assert_eq!(marked["message"], "Ball 0.2 marked");
    assert_eq!(marked["ball"], 2);
    assert_eq!(marked["clips"].as_array().unwrap().len(), 1);
    assert_eq!(marked["failures"][0]["camera"], "cam2");
    assert_eq!(marked["status"]["currentBall"], 2);
    assert_eq!(marked["status"]["bufferedClips"], 1);

    let req = test::TestRequest::get().uri("/api/buffer/clips").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let clips = body["clips"].as_array().unwrap();
    assert_eq!(clips.len(), 1);
    assert_eq!(clips[0]["camera"], "cam1");
    let clip_id = clips[0]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri("/api/buffer/status").to_request();
    let status: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["currentBall"], 2);
    assert_eq!(status["currentBallLabel"], "0.2");
    assert_eq!(status["bufferedClips"], 1);
    assert_eq!(status["bufferCapacity"], 4);

    let req = test::TestRequest::get()
        .uri(&format!("/api/video/stream/{}", clip_id))
        .insert_header((header::RANGE, "bytes=100-199"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 100-199/4096"
    );
    let bytes = test::read_body(resp).await;
    assert_eq!(bytes.len(), 100);
    assert_eq!(bytes[0], 100);

    let req = test::TestRequest::get()
        .uri(&format!("/api/video/stream/{}", clip_id))
        .insert_header((header::RANGE, "bytes=5000-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);

    let req = test::TestRequest::post()
        .uri("/api/clips/select")
        .set_json(serde_json::json!({ "clipId": clip_id }))
        .to_request();
    let selected: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(selected["success"], true);
    assert_eq!(selected["clip"]["uploadState"], "uploaded");
    assert!(selected["clip"]["s3Url"]
        .as_str()
        .unwrap()
        .starts_with("https://replays.example/clips/"));
    assert_eq!(selected["status"]["archivedClips"], 1);
    assert_eq!(selected["status"]["bufferedClips"], 0);

    let req = test::TestRequest::get().uri("/api/clips/uploaded").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["clips"].as_array().unwrap().len(), 1);

    // Archived clips still stream in full.
    let req = test::TestRequest::get()
        .uri(&format!("/api/video/stream/{}", clip_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.len(), 4096);

    let req = test::TestRequest::get()
        .uri("/api/video/stream/does-not-exist")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post().uri("/api/recording/stop").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"]["isRecording"], false);
}

#[actix_web::test]
async fn health_check() {
    let dir = TempDir::new().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(controller(&dir))
            .configure(api::configure),
    )
    .await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "OK");
}

#[actix_web::test]
async fn browser_origins_are_allowed() {
    let dir = TempDir::new().unwrap();
    let app = test::init_service(
        App::new()
            .wrap(api::cors())
            .app_data(controller(&dir))
            .configure(api::configure),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/buffer/status")
        .insert_header((header::ORIGIN, "http://umpire-console.local"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));

    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/recording/mark-ball")
        .insert_header((header::ORIGIN, "http://umpire-console.local"))
        .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "POST"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert!(resp
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}
