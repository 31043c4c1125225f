//! Policy-file authorizer.
//!
//! Policies use the casbin CSV form, one rule per line:
//!
//! ```text
//! # subject, object, action
//! p, root, *, produce
//! p, root, *, consume
//! p, , *, consume
//! ```
//!
//! A request is permitted only when a rule matches subject, object, and
//! action exactly. An empty subject field matches the anonymous caller.

use super::Authorizer;
use anyhow::{Context, bail};
use commitlog_tonic_core::{Error, Result};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Default)]
pub struct AclAuthorizer {
    rules: HashSet<(String, String, String)>,
}

impl AclAuthorizer {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ACL policy {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid ACL policy {}", path.display()))
    }

    pub fn parse(policy: &str) -> anyhow::Result<Self> {
        let mut rules = HashSet::new();
        for (lineno, line) in policy.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match fields.as_slice() {
                ["p", subject, object, action] => {
                    rules.insert((subject.to_string(), object.to_string(), action.to_string()));
                }
                _ => bail!(
                    "line {}: expected `p, subject, object, action`, got `{line}`",
                    lineno + 1
                ),
            }
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Authorizer for AclAuthorizer {
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<()> {
        let key = (subject.to_string(), object.to_string(), action.to_string());
        if self.rules.contains(&key) {
            Ok(())
        } else {
            Err(Error::PermissionDenied {
                subject: subject.to_string(),
                object: object.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// Permits every request. Used when no policy file is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _subject: &str, _object: &str, _action: &str) -> Result<()> {
        Ok(())
    }
}
