use crate::modules::video::dto::FormatResponse;
use crate::modules::video::model::{JobStatus, VideoJob};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::get_video,
        crate::modules::video::handler::list_formats,
    ),
    components(schemas(VideoJob, JobStatus, FormatResponse)),
    tags(
        (name = "Videos", description = "Transcoding job status")
    )
)]
pub struct ApiDoc;
