use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TeahouseError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(teahouse::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(teahouse::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(teahouse::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(teahouse::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Bad request: {0}")]
    #[diagnostic(code(teahouse::bad_request))]
    BadRequest(String),

    #[error("{0}")]
    #[diagnostic(code(teahouse::conflict))]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(code(teahouse::other))]
    Other(String),
}
