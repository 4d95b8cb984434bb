use thiserror::Error;

#[derive(Debug, Error)]
pub enum MathError {
    #[error("no active binary matches job pattern {0}")]
    NoBinaryForJob(String),

    #[error("no active binary is compatible with both agent pattern {agent} and job pattern {job}")]
    Incompatible { agent: String, job: String },

    #[error("invalid mask token: {0}")]
    InvalidMask(String),

    #[error("unknown custom charset placeholder ?{0}")]
    UnknownCustomCharset(char),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("version string is not well-formed: {0}")]
    MalformedVersion(String),
}
