use crate::config::formats::TargetFormat;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct FormatResponse {
    pub label: String,
    /// `W:H`
    pub geometry: String,
}

impl From<&TargetFormat> for FormatResponse {
    fn from(f: &TargetFormat) -> Self {
        Self {
            label: f.label.clone(),
            geometry: f.geometry(),
        }
    }
}
