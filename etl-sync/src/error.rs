//! Error types and result definitions for sync operations.
//!
//! [`EtlError`] carries a classification, a static description, optional dynamic detail,
//! the originating error, and the callsite it was created at. Several errors can be
//! aggregated into one, e.g. when more than one file of a run fails.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sync operations using [`EtlError`] as the error type.
pub type EtlResult<T> = Result<T, EtlError>;

/// Main error type for sync operations.
#[derive(Debug, Clone)]
pub struct EtlError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(Box<Failure>),
    Many {
        errors: Vec<EtlError>,
        location: &'static Location<'static>,
    },
}

#[derive(Debug, Clone)]
struct Failure {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Categories of failures that can occur while syncing exports.
///
/// Callers decide between retrying, skipping and aborting based on the kind, see
/// [`EtlError::is_retryable`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source files
    SourceIoError,
    SourceError,
    InvalidData,

    // Batches handed to the engine
    InvalidBatch,
    InvalidKeyFields,
    ConversionError,

    // Destination database
    DestinationConnectionFailed,
    DestinationIoError,
    DestinationQueryFailed,
    DestinationLockTimeout,
    DestinationSchemaError,
    DestinationTableNameInvalid,
    DestinationConstraintViolation,
    DestinationError,
    MigrationFailed,

    ConfigError,
    IoError,
    Unknown,
}

impl EtlError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of their first error, or [`ErrorKind::Unknown`]
    /// when empty.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::Single(failure) => failure.kind,
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map_or(ErrorKind::Unknown, EtlError::kind),
        }
    }

    /// Returns the kinds of every contained error in order.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        let mut kinds = Vec::new();
        self.collect_kinds(&mut kinds);
        kinds
    }

    fn collect_kinds(&self, kinds: &mut Vec<ErrorKind>) {
        match &self.repr {
            ErrorRepr::Single(failure) => kinds.push(failure.kind),
            ErrorRepr::Many { errors, .. } => {
                for error in errors {
                    error.collect_kinds(kinds);
                }
            }
        }
    }

    /// Returns the first dynamic detail found.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::Single(failure) => failure.detail.as_deref(),
            ErrorRepr::Many { errors, .. } => errors.iter().find_map(EtlError::detail),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.repr {
            ErrorRepr::Single(failure) => Some(failure.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match &self.repr {
            ErrorRepr::Single(failure) => failure.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns whether the failure is transient I/O that may succeed when tried again.
    ///
    /// Aggregated errors are retryable only if every contained error is.
    pub fn is_retryable(&self) -> bool {
        let kinds = self.kinds();

        !kinds.is_empty()
            && kinds.iter().all(|kind| {
                matches!(
                    kind,
                    ErrorKind::IoError
                        | ErrorKind::SourceIoError
                        | ErrorKind::DestinationIoError
                        | ErrorKind::DestinationConnectionFailed
                )
            })
    }

    /// Attaches the originating error. Aggregated errors are left unchanged.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(failure) = &mut self.repr {
            failure.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn single(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
    ) -> Self {
        EtlError {
            repr: ErrorRepr::Single(Box::new(Failure {
                kind,
                description,
                detail,
                source: None,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            })),
        }
    }

    /// Wraps `err`, using its message as the detail.
    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::single(kind, Cow::Borrowed(description), Some(Cow::Owned(detail))).with_source(err)
    }
}

/// Errors compare equal when their kinds match, element wise for aggregates.
impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        self.kinds() == other.kinds()
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(failure) => {
                write!(
                    f,
                    "[{:?}] {} @ {}",
                    failure.kind, failure.description, failure.location
                )?;

                if let Some(detail) = &failure.detail {
                    write_section(f, "Detail", detail)?;
                }

                let backtrace = failure.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_section(f, "Backtrace", &backtrace)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let suffix = if errors.len() == 1 { "" } else { "s" };
                write!(
                    f,
                    "[Many] {} error{suffix} aggregated @ {location}",
                    errors.len()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(failure) => failure
                .source
                .as_deref()
                .map(|source| source as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes a labelled block of text indented under the headline.
fn write_section(f: &mut fmt::Formatter<'_>, label: &str, text: &str) -> fmt::Result {
    write!(f, "\n  {label}:")?;
    for line in text.lines() {
        write!(f, "\n    {}", line.trim_end())?;
    }

    Ok(())
}

/// Creates an [`EtlError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::single(kind, Cow::Borrowed(desc), None)
    }
}

/// Creates an [`EtlError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::single(kind, Cow::Borrowed(desc), Some(detail.into()))
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for EtlError
where
    E: Into<EtlError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> EtlError {
        let location = Location::caller();

        let mut errors: Vec<EtlError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        EtlError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<std::num::ParseIntError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<std::num::ParseFloatError> for EtlError {
    #[track_caller]
    fn from(err: std::num::ParseFloatError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Float parsing failed", err)
    }
}

impl From<chrono::ParseError> for EtlError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> EtlError {
        EtlError::from_source(ErrorKind::ConversionError, "Datetime parsing failed", err)
    }
}

impl From<etl_postgres::types::TableNameError> for EtlError {
    #[track_caller]
    fn from(err: etl_postgres::types::TableNameError) -> EtlError {
        EtlError::from_source(
            ErrorKind::DestinationTableNameInvalid,
            "Table name is invalid",
            err,
        )
    }
}

impl From<sqlx::migrate::MigrateError> for EtlError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> EtlError {
        EtlError::from_source(
            ErrorKind::MigrationFailed,
            "Applying etl migrations failed",
            err,
        )
    }
}

/// Converts [`sqlx::Error`] to [`EtlError`], classifying database errors by SQLSTATE class.
impl From<sqlx::Error> for EtlError {
    #[track_caller]
    fn from(err: sqlx::Error) -> EtlError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) => classify_sqlstate(db_err.code().as_deref()),
            sqlx::Error::Io(_) => (ErrorKind::DestinationIoError, "PostgreSQL I/O error"),
            sqlx::Error::Tls(_) => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL TLS negotiation failed",
            ),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection pool unavailable",
            ),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
                ErrorKind::ConversionError,
                "PostgreSQL value decoding failed",
            ),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "PostgreSQL configuration invalid")
            }
            _ => (ErrorKind::DestinationQueryFailed, "Database operation failed"),
        };

        EtlError::from_source(kind, description, err)
    }
}

fn classify_sqlstate(code: Option<&str>) -> (ErrorKind, &'static str) {
    let Some(code) = code else {
        return (ErrorKind::DestinationQueryFailed, "PostgreSQL error");
    };

    match code {
        "42P01" | "42703" | "3F000" | "42704" => (
            ErrorKind::DestinationSchemaError,
            "PostgreSQL schema object not found",
        ),
        "42P07" | "42701" => (
            ErrorKind::DestinationSchemaError,
            "PostgreSQL schema object already exists",
        ),
        "55P03" => (
            ErrorKind::DestinationLockTimeout,
            "PostgreSQL lock not available",
        ),
        "57014" => (
            ErrorKind::DestinationQueryFailed,
            "PostgreSQL query canceled",
        ),
        _ => match code.get(..2) {
            Some("08") | Some("53") => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection failed",
            ),
            Some("22") => (
                ErrorKind::ConversionError,
                "PostgreSQL data conversion failed",
            ),
            Some("23") => (
                ErrorKind::DestinationConstraintViolation,
                "PostgreSQL constraint violation",
            ),
            Some("25") | Some("40") => (ErrorKind::DestinationQueryFailed, "PostgreSQL transaction failed"),
            Some("42") => (
                ErrorKind::DestinationQueryFailed,
                "PostgreSQL syntax or access error",
            ),
            Some("58") | Some("XX") => (ErrorKind::DestinationIoError, "PostgreSQL system error"),
            _ => (ErrorKind::DestinationError, "PostgreSQL error"),
        },
    }
}
