use thiserror::Error;

use crate::class_file::ClassFileError;

#[derive(Error, Debug)]
pub enum RelocationError {
    #[error("Invalid archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed class file {entry}: {source}")]
    MalformedClass {
        entry: String,
        #[source]
        source: ClassFileError,
    },

    #[error("Entry {entry} collides with an existing entry after relocation")]
    DuplicateEntry { entry: String },

    #[error("Invalid relocation rule {pattern} -> {relocated}: {reason}")]
    InvalidRule {
        pattern: String,
        relocated: String,
        reason: String,
    },

    #[error("Invalid class pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

pub type Result<T> = std::result::Result<T, RelocationError>;
