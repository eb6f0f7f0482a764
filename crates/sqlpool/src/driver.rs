//! Driver capability consumed by the pool.
//!
//! The pool never speaks a wire protocol itself. Everything it needs from a
//! database client is expressed by [`Driver`]: open a handle, close it, run
//! a statement on it, and report the name the handle identifies as.

use async_trait::async_trait;

use crate::config::ConnectionSettings;

/// A parameter bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// String value.
    Text(String),
    /// Binary value.
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as an i64, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Database client capability the pool is built on.
///
/// `execute` is the only operation expected to suspend for real I/O. The
/// pool keeps all of its own bookkeeping outside of driver calls.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Native connection handle. Exclusively owned by one pool member.
    type Handle: Send + 'static;

    /// Result of a successful statement.
    type Output: Send + 'static;

    /// Driver-specific error. The pool propagates it without interpretation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a handle for the named connection.
    async fn connect(
        &self,
        name: &str,
        settings: &ConnectionSettings,
    ) -> Result<Self::Handle, Self::Error>;

    /// Close a handle.
    async fn disconnect(&self, handle: Self::Handle) -> Result<(), Self::Error>;

    /// Run a statement on a handle.
    async fn execute(
        &self,
        handle: &mut Self::Handle,
        query: &str,
        bindings: &[Value],
    ) -> Result<Self::Output, Self::Error>;

    /// Name the handle reports for itself, if the driver tracks one.
    fn resolve_name(&self, handle: &Self::Handle) -> Option<String> {
        let _ = handle;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(7), Value::Int(7));
        assert_eq!(Value::from("Zac"), Value::Text("Zac".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Text("a".into()).as_i64(), None);
        assert_eq!(Value::Text("a".into()).as_str(), Some("a"));
    }
}
