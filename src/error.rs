use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use static_assertions::assert_impl_all;

/// Failure carried from a task, coroutine or session to whoever waits on it.
pub(crate) enum PanicError {
    /// Failure raised by runtime, e.g. "runtime stopped".
    Static(&'static str),
    /// Panic payload caught at task boundary.
    Unwind(Box<dyn Any + Send + 'static>),
}

/// Returns textual message of panic payload if any.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some(s)
    } else {
        payload.downcast_ref::<String>().map(|s| s.as_str())
    }
}

impl PanicError {
    fn as_str(&self) -> Option<&str> {
        match self {
            PanicError::Static(s) => Some(s),
            PanicError::Unwind(payload) => panic_message(payload.as_ref()),
        }
    }

    pub(crate) fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match self {
            PanicError::Static(s) => Box::new(s),
            PanicError::Unwind(payload) => payload,
        }
    }

    /// Raises this error as panic in calling coroutine.
    pub(crate) fn resume(self) -> ! {
        match self {
            PanicError::Static(s) => std::panic::panic_any(s),
            PanicError::Unwind(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// Failure of a joined task: either its body panicked or runtime gave it up.
pub struct JoinError {
    err: PanicError,
}

assert_impl_all!(JoinError: Send);

impl JoinError {
    pub(crate) fn new(err: PanicError) -> Self {
        JoinError { err }
    }

    /// Returns panic message if there is a textual one.
    pub fn message(&self) -> Option<&str> {
        self.err.as_str()
    }

    /// Converts this error to panicked object, so callers could re-raise it with
    /// [std::panic::resume_unwind].
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        self.err.into_panic()
    }
}

impl fmt::Debug for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.err {
            PanicError::Static(s) => write!(f, "JoinError::Static({:?})", s),
            PanicError::Unwind(payload) => match self.message() {
                Some(s) => write!(f, "JoinError::Panic({:?})", s),
                None => write!(f, "JoinError::Panic({:?})", payload.as_ref().type_id()),
            },
        }
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic({:?})", self.message().unwrap_or(".."))
    }
}

impl std::error::Error for JoinError {}

/// Errors from loading [crate::config::Config].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid { name: &'static str, value: String, reason: String },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn join_error_static() {
        let err = JoinError::new(PanicError::Static("runtime stopped"));
        assert_eq!(err.message(), Some("runtime stopped"));
        assert_eq!(err.to_string(), r#"panic("runtime stopped")"#);
        assert_eq!(format!("{:?}", err), r#"JoinError::Static("runtime stopped")"#);
    }

    #[test]
    fn join_error_unwind_string() {
        let err = JoinError::new(PanicError::Unwind(Box::new(String::from("oops"))));
        assert_eq!(err.message(), Some("oops"));
        let payload = err.into_panic();
        assert_eq!(payload.downcast_ref::<String>().map(|s| s.as_str()), Some("oops"));
    }

    #[test]
    fn join_error_unwind_opaque() {
        let err = JoinError::new(PanicError::Unwind(Box::new(5u32)));
        assert_eq!(err.message(), None);
        assert_eq!(err.to_string(), r#"panic("..")"#);
    }
}
