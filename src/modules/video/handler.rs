use super::dto::FormatResponse;
use super::model::VideoJob;
use super::service::VideoService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

/// Get the transcoding status of one video
#[utoipa::path(
    get,
    path = "/api/v1/videos/{key}",
    params(
        ("key" = String, Path, description = "Source object key of the video")
    ),
    responses(
        (status = 200, description = "Job record", body = ApiResponse<VideoJob>),
        (status = 404, description = "Video not found"),
        (status = 503, description = "Record store unavailable")
    ),
    tag = "Videos"
)]
pub async fn get_video(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match VideoService::get_video(&state, &key).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Video retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// List the resolution variants every upload is transcoded into
#[utoipa::path(
    get,
    path = "/api/v1/formats",
    responses(
        (status = 200, description = "Target format table", body = ApiResponse<Vec<FormatResponse>>)
    ),
    tag = "Videos"
)]
pub async fn list_formats(State(state): State<AppState>) -> impl IntoResponse {
    ApiSuccess(
        ApiResponse::success(VideoService::list_formats(&state), "Formats retrieved successfully"),
        StatusCode::OK,
    )
}
