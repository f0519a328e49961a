use thiserror::Error;

#[derive(Debug, Error)]
pub enum NutrioError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("metric {name} is registered as {existing}, not {requested}")]
    MetricTypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, NutrioError>;
