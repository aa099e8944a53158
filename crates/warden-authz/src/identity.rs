use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A principal attempting access: a name plus an unordered, deduplicated set
/// of groups.
///
/// Groups are kept in a `BTreeSet` so equality and hashing ignore input order
/// and duplicates. Identities are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    name: String,
    groups: BTreeSet<String>,
}

impl Identity {
    pub fn new<I, S>(name: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.groups.is_empty() {
            return write!(f, "{}", self.name);
        }
        let groups = self.groups.iter().cloned().collect::<Vec<_>>().join(",");
        write!(f, "{} (groups: {groups})", self.name)
    }
}
