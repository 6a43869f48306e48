use oci_spec::OciSpecError;
use std::{fmt, io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Invalid user input
    //
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
    #[error("Invalid name for repository: {0}")]
    InvalidName(String),
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
    #[error("Invalid reference to image: {0}")]
    InvalidReference(String),
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    //
    // Invalid manifest
    //
    #[error("Invalid field `{field}` in manifest: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Manifest has `{field}` field which is not allowed for {media_type}")]
    AmbiguousManifest { media_type: String, field: String },
    #[error("Invalid signature of manifest: {0}")]
    InvalidSignature(String),
    #[error("Manifest is not initialized: {0}")]
    NotInitialized(String),
    #[error(transparent)]
    InvalidJson(#[from] serde_json::error::Error),
    #[error(transparent)]
    InvalidToml(#[from] toml::de::Error),

    //
    // Missing entities
    //
    #[error("No schema is registered for media type `{0}`")]
    SchemaNotFound(String),
    #[error("No storage driver is registered for `{0}`")]
    DriverNotFound(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Image reference `{0}` is ambiguous")]
    AmbiguousReference(String),

    //
    // Unsupported operation or format
    //
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("`{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("Cycle detected in layer chain at {0}")]
    LayerCycle(String),

    //
    // Error from OCI registry
    //
    #[error(transparent)]
    NetworkError(Box<ureq::Transport>),
    #[error("Registry returned status {status} for {url}")]
    RegistryStatus { status: u16, url: String },
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(url::Url),
    #[error("Unsupported WWW-Authentication header: {0}")]
    UnSupportedAuthHeader(String),

    //
    // System error
    //
    #[error("Operation cancelled")]
    Cancelled,
    #[error("{}", DisplayAggregate(.0))]
    Aggregate(Vec<Error>),
    #[error("{path}: {source}")]
    Path { path: PathBuf, source: io::Error },
    #[error(transparent)]
    UnknownIo(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an I/O error with the path on which it happened
    pub fn path(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Path {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_field(field: &str, reason: impl fmt::Display) -> Self {
        Error::InvalidField {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `true` when the error says something does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::SchemaNotFound(_) | Error::DriverNotFound(_) | Error::NotFound(_) => true,
            Error::Path { source, .. } | Error::UnknownIo(source) => {
                source.kind() == io::ErrorKind::NotFound
            }
            Error::Aggregate(errors) => errors.iter().any(Error::is_not_found),
            _ => false,
        }
    }

    /// `true` when the error comes from a malformed name, tag, digest or reference
    pub fn is_bad_name(&self) -> bool {
        matches!(
            self,
            Error::InvalidDigest(_)
                | Error::InvalidName(_)
                | Error::InvalidTag(_)
                | Error::InvalidReference(_)
        )
    }
}

struct DisplayAggregate<'a>(&'a [Error]);

impl fmt::Display for DisplayAggregate<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl From<OciSpecError> for Error {
    fn from(e: OciSpecError) -> Self {
        match e {
            OciSpecError::SerDe(e) => Error::InvalidJson(e),
            OciSpecError::Io(e) => Error::UnknownIo(e),
            OciSpecError::Builder(e) => Error::NotInitialized(e.to_string()),
            OciSpecError::Other(e) => Error::Unsupported(e),
        }
    }
}

impl From<walkdir::Error> for Error {
    fn from(e: walkdir::Error) -> Self {
        match e.path().map(|p| p.to_owned()) {
            Some(path) => Self::path(path, e.into()),
            None => Self::UnknownIo(e.into()),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::Status(status, res) => {
                let url = res.get_url().to_string();
                if status == 404 {
                    Error::NotFound(url)
                } else {
                    Error::RegistryStatus { status, url }
                }
            }
            ureq::Error::Transport(e) => Error::NetworkError(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(Error::NotFound("x".to_string()).is_not_found());
        assert!(Error::path("/a", io::Error::from(io::ErrorKind::NotFound)).is_not_found());
        assert!(!Error::path("/a", io::Error::from(io::ErrorKind::PermissionDenied)).is_not_found());
        assert!(!Error::Unsupported("x".to_string()).is_not_found());
    }

    #[test]
    fn aggregate_message() {
        let e = Error::Aggregate(vec![
            Error::NotFound("diff".to_string()),
            Error::NotFound("size".to_string()),
        ]);
        assert_eq!(e.to_string(), "Not found: diff; Not found: size");
        assert!(e.is_not_found());
    }
}
