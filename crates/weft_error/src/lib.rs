use std::error::Error;
use std::fmt;

pub type Result<T, E = WeftError> = std::result::Result<T, E>;

/// Error type used throughout the engine.
///
/// Errors are fatal to the operation that produced them. There is no retry
/// machinery at this level.
#[derive(Debug)]
pub struct WeftError {
    msg: String,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl WeftError {
    pub fn new(msg: impl Into<String>) -> Self {
        WeftError {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        WeftError {
            msg: msg.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for WeftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for WeftError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<fmt::Error> for WeftError {
    fn from(value: fmt::Error) -> Self {
        WeftError::with_source("Formatting error", Box::new(value))
    }
}

/// Return early with a "not yet implemented" error.
///
/// Used for features that are recognized but intentionally unsupported.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        return Err($crate::WeftError::new(format!("Not yet implemented: {msg}")));
    }};
}

pub trait ResultExt<T, E> {
    /// Wrap an error with additional context.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with additional context built lazily.
    fn context_fn(self, f: impl FnOnce() -> String) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(WeftError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn(self, f: impl FnOnce() -> String) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(WeftError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Unwrap an option, returning an error with the field name if `None`.
    fn required(self, field: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, field: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(WeftError::new(format!("Missing required field: {field}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let err = res.context("failed to open config").unwrap_err();
        let s = err.to_string();
        assert!(s.contains("failed to open config"), "{s}");
        assert!(s.contains("no such file"), "{s}");
    }

    #[test]
    fn required_on_none() {
        let opt: Option<usize> = None;
        let err = opt.required("partition count").unwrap_err();
        assert_eq!("Missing required field: partition count", err.to_string());
    }

    #[test]
    fn required_on_some() {
        assert_eq!(4, Some(4).required("partition count").unwrap());
    }
}
