//! The diagnostic sink collaborator (§6): where the core reports sanity
//! failures, topology errors, and debug traces instead of writing to stderr
//! directly.

/// Severity of a message sent to the diagnostic sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A recoverable-looking but noteworthy event (a round took an unusual
    /// path, a fallback k was chosen).
    Debug,
    /// A fatal error that is about to abort the in-flight compose.
    Error,
}

/// A host application's hook for receiving diagnostics raised by the core.
///
/// Mirrors `raise_error(msg, code)` / `raise_debug(msg)` from §6. A default,
/// `log`-backed implementation is provided via [`LogSink`] for hosts that
/// just want the messages in their log stream.
pub trait DiagnosticSink: Send + Sync {
    /// Report a fatal error with an associated error code. The compose that
    /// produced this call is about to abort.
    fn raise_error(&self, message: &str, code: i32);

    /// Report a non-fatal debug trace.
    fn raise_debug(&self, message: &str) {
        let _ = message;
    }
}

/// A [`DiagnosticSink`] that forwards everything to the `log` facade.
///
/// This is the default sink used when a host doesn't supply its own; it
/// routes connection lifecycle events through `log::info!`/`log::error!`
/// rather than printing directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn raise_error(&self, message: &str, code: i32) {
        log::error!("compose aborted (code {code}): {message}");
    }

    fn raise_debug(&self, message: &str) {
        log::debug!("{message}");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{DiagnosticLevel, DiagnosticSink};
    use std::sync::Mutex;

    /// A sink that records every call for assertions in tests.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<(DiagnosticLevel, String)>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn raise_error(&self, message: &str, _code: i32) {
            self.events
                .lock()
                .unwrap()
                .push((DiagnosticLevel::Error, message.to_string()));
        }

        fn raise_debug(&self, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push((DiagnosticLevel::Debug, message.to_string()));
        }
    }
}
