/// Category of a component error. Lets the pipeline decide what to do
/// with it: skip the line, pause and retry, or stop the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fails at startup.
    Config,
    /// I/O or network error (source read, broker connection).
    Io,
    /// Data format/parse error. The line is skipped.
    Format,
    /// Logical error (invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for every component trait method
/// (line sources, parsers, broker clients).
///
/// `From` impls assign the kind automatically so implementations can use `?`.
#[derive(Clone, PartialEq, Eq)]
pub struct PluginError {
    kind: ErrorKind,
    message: String,
}

impl PluginError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Bad data in a single line: count it, skip it, keep streaming.
    pub fn is_skippable(&self) -> bool {
        self.kind == ErrorKind::Format
    }

    /// Retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Config
    }

    /// Prefix the message with `ctx`, keeping the kind.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }
}

impl std::fmt::Debug for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<String> for PluginError {
    fn from(s: String) -> Self { Self::new(s) }
}

impl From<&str> for PluginError {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self { Self::io(e.to_string()) }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::str::Utf8Error> for PluginError {
    fn from(e: std::str::Utf8Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::string::FromUtf8Error> for PluginError {
    fn from(e: std::string::FromUtf8Error) -> Self { Self::format_err(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_impls_assign_kind() {
        let io: PluginError = std::io::Error::other("reset").into();
        assert_eq!(io.kind(), ErrorKind::Io);

        let json: PluginError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(json.kind(), ErrorKind::Format);

        let logic: PluginError = "boom".into();
        assert_eq!(logic.kind(), ErrorKind::Logic);
        assert_eq!(format!("{logic:?}"), "[logic] boom");
        assert_eq!(logic.to_string(), "boom");
    }

    #[test]
    fn context_keeps_kind() {
        let err = PluginError::from(std::io::Error::from(std::io::ErrorKind::NotFound)).context("cannot open access.json");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.message().starts_with("cannot open access.json: "));
        assert!(!err.is_skippable());
        assert!(PluginError::format_err("line too long").is_skippable());
        assert!(PluginError::config("bad url").is_permanent());
    }
}
