use std::collections::{HashMap, HashSet};

use super::{Revision, RevisionError};

/// Revisions ordered from base to head, checked to form a single line.
#[derive(Debug, Clone)]
pub struct RevisionChain {
    revisions: Vec<Revision>,
}

impl RevisionChain {
    /// Order `revisions` by their predecessor links.
    ///
    /// The input order does not matter. Rejects duplicate ids, zero or
    /// several bases, dangling predecessors, branches and cycles.
    pub fn new(revisions: Vec<Revision>) -> Result<Self, RevisionError> {
        if revisions.is_empty() {
            return Ok(Self { revisions });
        }

        let mut ids = HashSet::new();
        for revision in &revisions {
            if !ids.insert(revision.id.as_str()) {
                return Err(RevisionError::Duplicate(revision.id.clone()));
            }
        }

        let bases: Vec<&Revision> = revisions
            .iter()
            .filter(|r| r.down_revision.is_none())
            .collect();
        let base = match bases.as_slice() {
            [] => return Err(RevisionError::NoBase),
            [base] => base.id.clone(),
            many => {
                return Err(RevisionError::MultipleBases(
                    many.iter().map(|r| r.id.clone()).collect(),
                ))
            }
        };

        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        for revision in &revisions {
            if let Some(parent) = revision.down_revision.as_deref() {
                if !ids.contains(parent) {
                    return Err(RevisionError::MissingPredecessor {
                        revision: revision.id.clone(),
                        predecessor: parent.to_string(),
                    });
                }
                successors.entry(parent).or_default().push(revision.id.as_str());
            }
        }
        if let Some((parent, children)) = successors.iter().find(|(_, c)| c.len() > 1) {
            let mut children: Vec<String> = children.iter().map(|c| c.to_string()).collect();
            children.sort();
            return Err(RevisionError::Branch {
                parent: parent.to_string(),
                children,
            });
        }

        let mut order = vec![base];
        while let Some(next) = successors
            .get(order[order.len() - 1].as_str())
            .and_then(|children| children.first())
        {
            order.push(next.to_string());
        }

        if order.len() != revisions.len() {
            // Every node has one parent and no branches, so whatever the walk
            // from the base missed hangs off a cycle.
            let reached: HashSet<&str> = order.iter().map(String::as_str).collect();
            let mut stranded: Vec<String> = revisions
                .iter()
                .filter(|r| !reached.contains(r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            stranded.sort();
            return Err(RevisionError::Cycle(stranded));
        }

        let mut by_id: HashMap<String, Revision> =
            revisions.into_iter().map(|r| (r.id.clone(), r)).collect();
        let revisions = order
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();

        Ok(Self { revisions })
    }

    pub fn base(&self) -> Option<&Revision> {
        self.revisions.first()
    }

    pub fn head(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    pub fn get(&self, id: &str) -> Option<&Revision> {
        self.position(id).map(|index| &self.revisions[index])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.revisions.iter().position(|r| r.id == id)
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}
