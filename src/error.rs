//! Error type shared by the import pipeline, the data layer and the web layer.

use axum::extract::multipart::MultipartError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A CSV row could not be turned into a Person. `row` counts data rows from 1.
    #[error("Invalid record on row {row}: {message}")]
    Validation { row: usize, message: String },

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),
}

impl Error {
    pub fn validation(row: usize, message: impl Into<String>) -> Self {
        Error::Validation {
            row,
            message: message.into(),
        }
    }
}
