use super::dto::FormatResponse;
use super::model::VideoJob;
use super::repository::RecordError;
use crate::state::AppState;

pub struct VideoService;

impl VideoService {
    pub async fn get_video(state: &AppState, key: &str) -> Result<VideoJob, RecordError> {
        let key = key.trim_matches('/');
        state
            .jobs
            .find(key)
            .await?
            .ok_or_else(|| RecordError::NotFound(key.to_string()))
    }

    pub fn list_formats(state: &AppState) -> Vec<FormatResponse> {
        state.formats.iter().map(FormatResponse::from).collect()
    }
}
