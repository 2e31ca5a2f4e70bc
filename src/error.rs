use warp::http::StatusCode;

/// Failure modes of a pipeline invocation, each with a user-facing status.
#[derive(Debug, Fail, PartialEq)]
pub enum PipelineError {
    /// Bad upload: wrong type, empty name, undecodable bytes, bad region.
    #[fail(display = "{}", _0)]
    Input(String),
    #[fail(display = "No license plate detected")]
    NotFound,
    #[fail(display = "{}", _0)]
    Recognition(String),
    #[fail(display = "{}", _0)]
    Unexpected(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Input(_) | PipelineError::Recognition(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound => StatusCode::NOT_FOUND,
            PipelineError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn unexpected(e: failure::Error) -> PipelineError {
        PipelineError::Unexpected(e.to_string())
    }
}
