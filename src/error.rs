/// Errors surfaced synchronously from construction and registration (spec.md
/// §7 "Configuration" and "Database I/O" tiers). Steady-state delivery
/// failures (malformed envelope, unknown table, big-columns side-load) are
/// deliberately *not* representable here: they are logged and dropped by the
/// notifier/table handler, never returned to a caller.
#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "table `{}` is already registered", _0)]
    AlreadyRegistered(String),

    #[fail(display = "invalid binding configuration: {}", _0)]
    Configuration(String),

    #[fail(display = "database error: {}", _0)]
    Database(#[fail(cause)] postgres::error::Error),

    #[fail(display = "connection pool error: {}", _0)]
    Pool(#[fail(cause)] r2d2::Error),

    #[fail(display = "could not decode row payload: {}", _0)]
    Decode(#[fail(cause)] serde_json::Error),

    #[fail(display = "{}", _0)]
    Other(String),
}

impl From<postgres::error::Error> for Error {
    fn from(e: postgres::error::Error) -> Self {
        Error::Database(e)
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Pool(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}
