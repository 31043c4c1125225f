//! # Shared Authorization Vocabulary
//!
//! Types and constants shared by clients and the server when talking about
//! who is calling and what they are allowed to do with the log.
//!
//! - [`Subject`] - The caller identity derived from the transport session
//! - [`Action`] - The two operations the access policy governs
//! - [`OBJECT_WILDCARD`] - The single resource value, meaning "the whole log"
//! - [`Offset`] - Position of a record in the log

use core::fmt;
use std::sync::Arc;

/// Position of a record within the log. Assigned by the log on append.
pub type Offset = u64;

/// Resource name used in every policy check: the log as a whole.
pub const OBJECT_WILDCARD: &str = "*";

/// The operation being authorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Produce,
    Consume,
}

impl Action {
    /// Policy vocabulary string for this action.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Produce => "produce",
            Self::Consume => "consume",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the caller for the lifetime of one call or stream.
///
/// For mutually authenticated sessions this is the common name of the
/// verified client certificate. The empty string is the anonymous subject:
/// the peer was reachable but presented no verified certificate. Anonymous
/// callers are still subject to authorization.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subject(Arc<str>);

impl Subject {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Subject {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_is_empty_string() {
        let anon = Subject::anonymous();
        assert!(anon.is_anonymous());
        assert_eq!(anon.as_str(), "");
        assert_eq!(anon, Subject::new(""));
        assert!(!Subject::new("root").is_anonymous());
    }

    #[test]
    fn actions_use_policy_vocabulary() {
        assert_eq!(Action::Produce.to_string(), "produce");
        assert_eq!(Action::Consume.to_string(), "consume");
    }
}
