//! Studio control endpoints

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiResult;
use super::extract::ApiJson;
use crate::studio::{Studio, StudioStatus};
use crate::workers::StopReport;

#[derive(Debug, Serialize)]
pub struct DepsResponse {
    pub ffmpeg: bool,
}

#[derive(Debug, Serialize)]
pub struct TunnelResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct LocalIpResponse {
    pub ip: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SdpMessage {
    pub sdp: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    #[serde(default)]
    pub filename: String,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub started: bool,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<StopReport>,
}

impl From<Option<StopReport>> for StopResponse {
    fn from(report: Option<StopReport>) -> Self {
        StopResponse {
            stopped: report.is_some(),
            report,
        }
    }
}

pub async fn deps(State(studio): State<Arc<Studio>>) -> Json<DepsResponse> {
    Json(DepsResponse {
        ffmpeg: studio.ffmpeg_available().await,
    })
}

pub async fn tunnel(State(studio): State<Arc<Studio>>) -> ApiResult<Json<TunnelResponse>> {
    let url = studio.toggle_tunnel().await?;
    Ok(Json(TunnelResponse { url }))
}

pub async fn local_ip(State(studio): State<Arc<Studio>>) -> Json<LocalIpResponse> {
    Json(LocalIpResponse {
        ip: studio.local_ip(),
    })
}

pub async fn offer(
    State(studio): State<Arc<Studio>>,
    ApiJson(request): ApiJson<SdpMessage>,
) -> ApiResult<Json<SdpMessage>> {
    let sdp = studio.negotiate(request.sdp).await?;
    Ok(Json(SdpMessage { sdp }))
}

pub async fn start_stream(
    State(studio): State<Arc<Studio>>,
    ApiJson(request): ApiJson<StreamRequest>,
) -> ApiResult<Json<StartResponse>> {
    studio.start_stream(&request.url).await?;
    Ok(Json(StartResponse { started: true }))
}

pub async fn stop_stream(State(studio): State<Arc<Studio>>) -> ApiResult<Json<StopResponse>> {
    Ok(Json(studio.stop_stream().await?.into()))
}

pub async fn start_recording(
    State(studio): State<Arc<Studio>>,
    ApiJson(request): ApiJson<RecordRequest>,
) -> ApiResult<Json<RecordResponse>> {
    let started = studio.start_recording(&request.filename).await?;
    Ok(Json(RecordResponse {
        path: started.path.display().to_string(),
    }))
}

pub async fn stop_recording(State(studio): State<Arc<Studio>>) -> ApiResult<Json<StopResponse>> {
    Ok(Json(studio.stop_recording().await?.into()))
}

pub async fn status(State(studio): State<Arc<Studio>>) -> Json<StudioStatus> {
    Json(studio.status().await)
}
