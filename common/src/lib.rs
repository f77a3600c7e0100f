use arrow::error::ArrowError;
use aws_smithy_runtime_api::client::result::CreateUnhandledError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use datafusion::error::DataFusionError;
use parquet::errors::ParquetError;
use thiserror::Error;
use url::ParseError;

pub mod config;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] rquest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("S3 error: {0}")]
    S3(#[from] aws_sdk_s3::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("{0}")]
    Other(String),
}

// Implement From for various SdkError types
impl<E: std::fmt::Debug + CreateUnhandledError> From<SdkError<E, Response>> for Error {
    fn from(err: SdkError<E, Response>) -> Self {
        Error::AwsSdk(format!("{:?}", err))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidInput(format!("URL parse error: {}", err))
    }
}
