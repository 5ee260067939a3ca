use std::any::Any;
use std::fmt;
use std::sync::Arc;

use static_assertions::assert_impl_all;

/// Wraps a panic captured at a future boundary as [std::error::Error].
///
/// Every holder of a future observes the same failure, so the panicked object
/// is shared instead of consumed on first read.
#[derive(Clone)]
pub struct TaskError {
    panicked: Arc<Box<dyn Any + Send + 'static>>,
}

// Payload is only read through downcast_ref after construction.
unsafe impl Send for TaskError {}
unsafe impl Sync for TaskError {}

assert_impl_all!(TaskError: Send, Sync);

impl TaskError {
    pub(crate) fn new(err: Box<dyn Any + Send + 'static>) -> Self {
        match err.downcast::<TaskError>() {
            Ok(err) => *err,
            Err(err) => TaskError { panicked: Arc::new(err) },
        }
    }

    fn payload(&self) -> &dyn Any {
        self.panicked.as_ref().as_ref()
    }

    fn as_str(&self) -> Option<&str> {
        if let Some(s) = self.payload().downcast_ref::<&str>() {
            Some(s)
        } else if let Some(s) = self.payload().downcast_ref::<String>() {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Converts this error to panicked object.
    pub fn into_panic(self) -> Box<dyn Any + Send + 'static> {
        match Arc::try_unwrap(self.panicked) {
            Ok(panicked) => panicked,
            Err(panicked) => Box::new(TaskError { panicked }),
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            None => write!(f, "TaskError::Panic({:?})", self.payload().type_id()),
            Some(s) => write!(f, "TaskError::Panic({:?})", s),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic({:?})", self.as_str().unwrap_or(".."))
    }
}

impl std::error::Error for TaskError {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn task_error_str() {
        let err = TaskError::new(Box::new("oops"));
        assert_eq!(err.to_string(), "panic(\"oops\")");
        assert_eq!(err.clone().to_string(), "panic(\"oops\")");
    }

    #[test]
    fn task_error_unnests() {
        let inner = TaskError::new(Box::new("deep".to_string()));
        let outer = TaskError::new(Box::new(inner));
        assert_eq!(outer.to_string(), "panic(\"deep\")");
    }

    #[test]
    fn task_error_into_panic() {
        let err = TaskError::new(Box::new("boom"));
        let panicked = err.into_panic();
        assert_eq!(*panicked.downcast_ref::<&str>().unwrap(), "boom");
    }
}
