//! Data operations and their read/write classification.

use std::fmt;

/// An ORM operation name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    // Reads
    FindUnique,
    FindUniqueOrThrow,
    FindFirst,
    FindFirstOrThrow,
    FindMany,
    Count,
    Aggregate,
    GroupBy,

    // Writes
    Create,
    CreateMany,
    Update,
    UpdateMany,
    Upsert,
    Delete,
    DeleteMany,

    /// Anything else; never served from cache.
    Other(String),
}

impl Operation {
    pub const READS: [Self; 8] = [
        Self::FindUnique,
        Self::FindUniqueOrThrow,
        Self::FindFirst,
        Self::FindFirstOrThrow,
        Self::FindMany,
        Self::Count,
        Self::Aggregate,
        Self::GroupBy,
    ];

    pub const WRITES: [Self; 7] = [
        Self::Create,
        Self::CreateMany,
        Self::Update,
        Self::UpdateMany,
        Self::Upsert,
        Self::Delete,
        Self::DeleteMany,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::FindUnique => "findUnique",
            Self::FindUniqueOrThrow => "findUniqueOrThrow",
            Self::FindFirst => "findFirst",
            Self::FindFirstOrThrow => "findFirstOrThrow",
            Self::FindMany => "findMany",
            Self::Count => "count",
            Self::Aggregate => "aggregate",
            Self::GroupBy => "groupBy",
            Self::Create => "create",
            Self::CreateMany => "createMany",
            Self::Update => "update",
            Self::UpdateMany => "updateMany",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::DeleteMany => "deleteMany",
            Self::Other(name) => name,
        }
    }

    /// Whether results of this operation may be served through the cache.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::FindUnique
                | Self::FindUniqueOrThrow
                | Self::FindFirst
                | Self::FindFirstOrThrow
                | Self::FindMany
                | Self::Count
                | Self::Aggregate
                | Self::GroupBy
        )
    }

    /// Whether this operation mutates rows.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Create
                | Self::CreateMany
                | Self::Update
                | Self::UpdateMany
                | Self::Upsert
                | Self::Delete
                | Self::DeleteMany
        )
    }
}

impl From<&str> for Operation {
    fn from(name: &str) -> Self {
        Self::READS
            .into_iter()
            .chain(Self::WRITES)
            .find(|operation| operation.as_str() == name)
            .unwrap_or_else(|| Self::Other(name.to_string()))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
