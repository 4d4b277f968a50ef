use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A stable, cheaply-clonable string handle identifying a registered unit.
///
/// Every cross-reference in the graph (a task's dependency, a hook's `on`,
/// a middleware attachment) is expressed as an `Id` rather than a live
/// reference. That keeps the store free of reference cycles: the `Store`
/// owns every entry, and everything else just holds its `id`.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Arc<str>);

impl Id {
    /// Builds a new id from any stringly value.
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    /// Borrows the id as a plain `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(Arc::from(value.as_str()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_with_equal_text_compare_equal() {
        assert_eq!(Id::new("db"), Id::from("db".to_string()));
    }

    #[test]
    fn id_clone_is_cheap_and_shares_text() {
        let a = Id::new("db");
        let b = a.clone();
        assert_eq!(a.as_str(), b.as_str());
    }
}
