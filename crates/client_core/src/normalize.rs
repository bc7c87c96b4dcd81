use std::sync::Arc;

use serde::{Serialize, Serializer};
use shared::{
    domain::ProjectId,
    protocol::{ProjectMap, ProjectRecord},
};

use crate::error::InvalidRecordError;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectEntry {
    pub id: ProjectId,
    pub record: ProjectRecord,
}

/// Serialized as an `[id, record]` pair.
impl Serialize for ProjectEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.id, &self.record).serialize(serializer)
    }
}

/// Projects in ascending `extras.sort_index` order.
///
/// Only [`normalize`] produces a non-empty list, so holding one means the
/// order has already been established. Cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedProjectList(Arc<[ProjectEntry]>);

impl Default for OrderedProjectList {
    fn default() -> Self {
        Self(Arc::from(Vec::new()))
    }
}

impl OrderedProjectList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProjectEntry> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ProjectEntry] {
        &self.0
    }

    pub fn get(&self, id: &ProjectId) -> Option<&ProjectRecord> {
        self.0
            .iter()
            .find(|entry| &entry.id == id)
            .map(|entry| &entry.record)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ProjectId> {
        self.0.iter().map(|entry| &entry.id)
    }
}

impl<'a> IntoIterator for &'a OrderedProjectList {
    type Item = &'a ProjectEntry;
    type IntoIter = std::slice::Iter<'a, ProjectEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for OrderedProjectList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

/// Orders a server project map by each record's `extras.sort_index`.
///
/// Every key is extracted before anything is sorted, so a single unusable
/// record fails the whole map. Equal keys keep map order (ascending id).
pub fn normalize(raw: ProjectMap) -> Result<OrderedProjectList, InvalidRecordError> {
    let mut keyed = raw
        .into_iter()
        .map(|(id, record)| match record.sort_index() {
            Ok(key) => Ok((key, ProjectEntry { id, record })),
            Err(problem) => Err(InvalidRecordError {
                identifier: id,
                problem,
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));

    Ok(OrderedProjectList(
        keyed.into_iter().map(|(_, entry)| entry).collect(),
    ))
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
