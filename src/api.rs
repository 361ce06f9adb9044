use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clip::Clip;
use crate::delivery::{file_stream, parse_range};
use crate::error::ReplayError;
use crate::session::{MarkOutcome, SelectOutcome, SessionController, SessionStatus};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub match_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub clip_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
    pub status: SessionStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub outcome: MarkOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectResponse {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub outcome: SelectOutcome,
}

#[derive(Serialize)]
pub struct ClipsResponse {
    pub clips: Vec<Clip>,
}

fn ok(message: impl Into<String>, status: SessionStatus) -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        success: true,
        message: message.into(),
        status,
    })
}

/// Start recording both cameras
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:3000/api/recording/start \
///     -H 'Content-Type: application/json' -d '{"matchName": "final"}'
/// ```
#[post("/recording/start")]
pub async fn start_recording(
    controller: web::Data<SessionController>,
    body: web::Json<StartRequest>,
) -> Result<HttpResponse, ReplayError> {
    let status = controller.start(&body.match_name).await?;
    Ok(ok("Recording started", status))
}

#[post("/recording/stop")]
pub async fn stop_recording(
    controller: web::Data<SessionController>,
) -> Result<HttpResponse, ReplayError> {
    let status = controller.stop().await?;
    Ok(ok("Recording stopped", status))
}

#[post("/recording/pause")]
pub async fn pause_recording(
    controller: web::Data<SessionController>,
) -> Result<HttpResponse, ReplayError> {
    let status = controller.pause().await?;
    Ok(ok("Recording paused", status))
}

#[post("/recording/resume")]
pub async fn resume_recording(
    controller: web::Data<SessionController>,
) -> Result<HttpResponse, ReplayError> {
    let status = controller.resume().await?;
    Ok(ok("Recording resumed", status))
}

/// Mark the end of a ball and cut clips for every camera
///
/// # Returns
/// ```json
/// {
///   "success": true,
///   "message": "Ball 0.3 marked",
///   "ball": 3,
///   "ballLabel": "0.3",
///   "segment": { "start": 20.0, "end": 35.0 },
///   "clips": [...],
///   "failures": [...],
///   "status": {...}
/// }
/// ```
#[post("/recording/mark-ball")]
pub async fn mark_ball(
    controller: web::Data<SessionController>,
) -> Result<HttpResponse, ReplayError> {
    let outcome = controller.mark_ball().await?;
    Ok(HttpResponse::Ok().json(MarkResponse {
        success: true,
        message: format!("Ball {} marked", outcome.ball_label),
        outcome,
    }))
}

#[get("/buffer/status")]
pub async fn buffer_status(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(controller.status().await)
}

#[get("/buffer/clips")]
pub async fn buffered_clips(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(ClipsResponse {
        clips: controller.buffered_clips().await,
    })
}

/// Upload a buffered clip for permanent review
///
/// # Example
/// ```shell
/// curl -X POST http://localhost:3000/api/clips/select \
///     -H 'Content-Type: application/json' -d '{"clipId": "<uuid>"}'
/// ```
#[post("/clips/select")]
pub async fn select_clip(
    controller: web::Data<SessionController>,
    body: web::Json<SelectRequest>,
) -> Result<HttpResponse, ReplayError> {
    let outcome = controller.select_clip(&body.clip_id).await?;
    Ok(HttpResponse::Ok().json(SelectResponse {
        success: true,
        message: format!("Clip {} uploaded", outcome.clip.filename),
        outcome,
    }))
}

#[get("/clips/uploaded")]
pub async fn uploaded_clips(controller: web::Data<SessionController>) -> impl Responder {
    HttpResponse::Ok().json(ClipsResponse {
        clips: controller.archived_clips().await,
    })
}

/// Progressive playback of a buffered or archived clip, honouring `Range`.
#[get("/video/stream/{clip_id}")]
pub async fn stream_video(
    req: HttpRequest,
    controller: web::Data<SessionController>,
    path: web::Path<String>,
) -> Result<HttpResponse, ReplayError> {
    let clip = controller.resolve_clip(&path).await?;
    let size = match tokio::fs::metadata(&clip.local_path).await {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ReplayError::ClipNotFound(clip.id));
        }
        Err(err) => return Err(err.into()),
    };

    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    debug!("Streaming {} (range {:?})", clip.local_path.display(), range_header);

    let response = match parse_range(range_header, size)? {
        Some(range) => HttpResponse::PartialContent()
            .insert_header((header::CONTENT_RANGE, range.content_range(size)))
            .insert_header((header::ACCEPT_RANGES, "bytes"))
            .content_type("video/mp4")
            .no_chunking(range.len())
            .streaming(file_stream(clip.local_path, range.start, range.len())),
        None => HttpResponse::Ok()
            .insert_header((header::ACCEPT_RANGES, "bytes"))
            .content_type("video/mp4")
            .no_chunking(size)
            .streaming(file_stream(clip.local_path, 0, size)),
    };
    Ok(response)
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "OK",
        "message": "Server is running",
    }))
}

/// Registers every route; shared by the server and tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health).service(
        web::scope("/api")
            .service(start_recording)
            .service(stop_recording)
            .service(pause_recording)
            .service(resume_recording)
            .service(mark_ball)
            .service(buffer_status)
            .service(buffered_clips)
            .service(select_clip)
            .service(uploaded_clips)
            .service(stream_video),
    );
}

/// The operator UI is served from another origin.
pub fn cors() -> Cors {
    Cors::permissive()
}

/// Run the API server
pub async fn run_api_server(controller: Arc<SessionController>, host: &str, port: u16) -> std::io::Result<()> {
    let data = web::Data::from(controller);
    HttpServer::new(move || {
        App::new()
            .wrap(cors())
            .app_data(data.clone())
            .configure(configure)
    })
        .bind((host, port))?
        .run()
        .await
}
