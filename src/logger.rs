//! The logger contract from spec.md §6 (`Error`/`Errorf`), plus a concrete
//! adapter onto `slog`, matching the teacher's `slog`/`slog-term`/
//! `slog-async` stack. Steady-state failures (malformed envelopes, unknown
//! tables, failed reloads) all flow through this trait rather than being
//! returned as `Error`s.

use std::fmt;
use std::sync::Arc;

/// A sink for the errors this crate cannot usefully return to a caller.
pub trait Logger: Send + Sync {
    fn error(&self, message: &dyn fmt::Display);

    fn errorf(&self, args: fmt::Arguments<'_>) {
        self.error(&args);
    }
}

/// Wraps a `slog::Logger`, the same logger type the teacher threads through
/// its components via `LoggerFactory`.
#[derive(Clone)]
pub struct SlogLogger(pub slog::Logger);

impl SlogLogger {
    pub fn new(component: &'static str) -> Self {
        use slog::Drain;
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        SlogLogger(slog::Logger::root(drain, slog::o!("component" => component)))
    }

    pub fn root(logger: slog::Logger) -> Self {
        SlogLogger(logger)
    }
}

impl Logger for SlogLogger {
    fn error(&self, message: &dyn fmt::Display) {
        slog::error!(self.0, "{}", message);
    }
}

/// Convenience so `Arc<dyn Logger>` can be handed around without callers
/// needing to box things themselves.
pub fn shared(logger: impl Logger + 'static) -> Arc<dyn Logger> {
    Arc::new(logger)
}

/// A logger that records messages instead of printing them, shared by this
/// crate's own tests for asserting on dropped/logged steady-state failures.
#[cfg(test)]
pub mod test_support {
    use super::Logger;
    use std::fmt;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingLogger(pub Mutex<Vec<String>>);

    impl Logger for RecordingLogger {
        fn error(&self, message: &dyn fmt::Display) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    impl RecordingLogger {
        pub fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingLogger;
    use super::*;

    #[test]
    fn errorf_formats_through_error() {
        let logger = RecordingLogger::default();
        logger.errorf(format_args!("lost {} events for {}", 3, "students"));
        assert_eq!(
            logger.messages(),
            vec!["lost 3 events for students".to_string()]
        );
    }
}
