/*!
Protected-entity identities.

An [`EntityId`] names a protected entity by `(type, id)` and, optionally, one
point in time through a [`SnapshotId`]. The textual form is

```text
<type>:<id>            live entity
<type>:<id>:<snapshot> snapshotted entity
```

where each segment is escaped so that `%` becomes `%25` and `:` becomes
`%3A`. Parsing accepts exactly those two escapes, so every identity survives
`parse(to_string(id)) == id`.
*/

use crate::{CustodyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const SEPARATOR: char = ':';

/// Opaque token naming one snapshot of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Wrap an existing snapshot token
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Mint a fresh random snapshot token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a protected entity, live or snapshotted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    entity_type: String,
    id: String,
    snapshot: Option<SnapshotId>,
}

impl EntityId {
    /// Identity of the live entity `id` of type `entity_type`
    pub fn new<T, I>(entity_type: T, id: I) -> Self
    where
        T: Into<String>,
        I: Into<String>,
    {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            snapshot: None,
        }
    }

    /// Parse the textual form produced by `Display`
    pub fn parse(input: &str) -> Result<Self> {
        let segments: Vec<&str> = input.split(SEPARATOR).collect();
        let (entity_type, id, snapshot) = match segments.as_slice() {
            [entity_type, id] => (*entity_type, *id, None),
            [entity_type, id, snapshot] => (*entity_type, *id, Some(*snapshot)),
            _ => {
                return Err(CustodyError::MalformedIdentity(format!(
                    "expected <type>:<id>[:<snapshot>], got {input:?}"
                )))
            }
        };

        let entity_type = unescape(entity_type, input)?;
        let id = unescape(id, input)?;
        if entity_type.is_empty() || id.is_empty() {
            return Err(CustodyError::MalformedIdentity(format!(
                "type and id must be non-empty in {input:?}"
            )));
        }

        let snapshot = match snapshot {
            Some(raw) => {
                let snapshot = unescape(raw, input)?;
                if snapshot.is_empty() {
                    return Err(CustodyError::MalformedIdentity(format!(
                        "empty snapshot segment in {input:?}"
                    )));
                }
                Some(SnapshotId(snapshot))
            }
            None => None,
        };

        Ok(Self {
            entity_type,
            id,
            snapshot,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Option<&SnapshotId> {
        self.snapshot.as_ref()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Freeze this identity at `snapshot`
    ///
    /// An identity denotes at most one point in time, so freezing an already
    /// snapshotted identity fails with `AlreadySnapshotted`.
    pub fn with_snapshot(&self, snapshot: SnapshotId) -> Result<Self> {
        if self.has_snapshot() {
            return Err(CustodyError::AlreadySnapshotted(self.to_string()));
        }
        Ok(Self {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            snapshot: Some(snapshot),
        })
    }

    /// The live identity this snapshot was taken of
    pub fn without_snapshot(&self) -> Self {
        Self::new(self.entity_type.clone(), self.id.clone())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", escape(&self.entity_type), escape(&self.id))?;
        if let Some(snapshot) = &self.snapshot {
            write!(f, ":{}", escape(snapshot.as_str()))?;
        }
        Ok(())
    }
}

impl FromStr for EntityId {
    type Err = CustodyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = CustodyError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(segment: &str, input: &str) -> Result<String> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.to_ascii_uppercase().as_str() {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            _ => {
                return Err(CustodyError::MalformedIdentity(format!(
                    "unknown escape %{code} in {input:?}"
                )))
            }
        }
    }
    Ok(out)
}
