//! Error types shared by the classification pipelines.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The taxonomy table could not be read or has an unusable layout.
    #[error("taxonomy error: {0}")]
    Taxonomy(String),

    /// An input spreadsheet could not be opened or parsed.
    #[error("spreadsheet error in {path}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    /// Transport or protocol failure talking to the text-generation service.
    #[error("oracle error: {0}")]
    Oracle(String),

    /// Bibliographic service failure that survived the retry policy.
    #[error("bibliographic fetch error: {0}")]
    Scholar(String),

    /// Writing the output workbook failed.
    #[error("artifact error: {0}")]
    Artifact(#[from] rust_xlsxwriter::XlsxError),

    /// The input carried no annotation or abstract text.
    #[error("nothing to classify: {0}")]
    NothingToClassify(String),

    /// Bot API call failed after retries or returned `ok: false`.
    #[error("telegram error: {0}")]
    Telegram(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn spreadsheet(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Spreadsheet {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
