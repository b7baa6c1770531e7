//! Ordered id sets shared by every matrix of a run

/// Sorted, duplicate-free ids mapping row/column positions to real ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSet {
    ids: Vec<i64>,
}

impl IndexSet {
    pub fn from_ids<I: IntoIterator<Item = i64>>(ids: I) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    pub fn union(&self, other: &IndexSet) -> IndexSet {
        IndexSet::from_ids(self.ids.iter().chain(other.ids.iter()).copied())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Position of an id, if present
    pub fn position(&self, id: i64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.get(position).copied()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }
}
