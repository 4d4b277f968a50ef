//! [`VisibilityTracker`] — the bookkeeping validates against:
//! ownership, transitive subtree membership, export allowlists, access
//! policies, and tag membership.

use std::collections::HashSet;

use dashmap::DashMap;
use dashmap::DashSet;
use kiln_core::Id;
use kiln_definitions::AccessPolicy;

/// Tracks the bookkeeping needed to answer "can consumer C see target T"
/// and "does some ancestor policy deny C access to T".
#[derive(Default)]
pub struct VisibilityTracker {
    /// `id -> owner resource id`. The root owns itself.
    ownership: DashMap<Id, Id>,
    /// `resource id -> transitive descendant ids` registered through it.
    subtrees: DashMap<Id, HashSet<Id>>,
    /// `resource id -> explicit export allowlist`, when declared.
    export_sets: DashMap<Id, HashSet<Id>>,
    /// `resource id -> dependencyAccessPolicy`, when declared.
    access_policies: DashMap<Id, AccessPolicy>,
    /// `unit id -> tag ids` attached to it.
    tag_ids: DashMap<Id, HashSet<Id>>,
    /// The set of ids known to be resources (vs. tasks/events/...), since
    /// only resources can own a subtree / export set / access policy.
    known_resources: DashSet<Id>,
}

impl VisibilityTracker {
    /// Records that `id`'s direct owner is `owner`.
    pub fn record_ownership(&self, id: Id, owner: Id) {
        self.ownership.insert(id, owner);
    }

    /// The direct owner of `id`, if tracked.
    #[must_use]
    pub fn owner_of(&self, id: &Id) -> Option<Id> {
        self.ownership.get(id).map(|e| e.clone())
    }

    /// Marks `id` as a known resource (eligible to own a subtree / export
    /// set / access policy).
    pub fn mark_known_resource(&self, id: Id) {
        self.known_resources.insert(id);
    }

    /// Whether `id` is a known resource.
    #[must_use]
    pub fn is_known_resource(&self, id: &Id) -> bool {
        self.known_resources.contains(id)
    }

    /// Adds `id` to the transitive subtree of every ancestor starting at
    /// `owner` (inclusive), walking the ownership chain to the root.
    pub fn bubble_subtree_membership(&self, owner: &Id, id: &Id) {
        let mut current = Some(owner.clone());
        let mut guard = HashSet::new();
        while let Some(resource_id) = current {
            if !guard.insert(resource_id.clone()) {
                break; // ownership cycle guard; invariant 2 says this can't happen
            }
            self.subtrees
                .entry(resource_id.clone())
                .or_default()
                .insert(id.clone());
            current = if resource_id == *owner && self.ownership.get(&resource_id).map(|o| o.clone()) == Some(resource_id.clone()) {
                None // reached the root, which owns itself
            } else {
                self.ownership.get(&resource_id).map(|o| o.clone())
            };
        }
    }

    /// Whether `id` is in `resource_id`'s transitive subtree.
    #[must_use]
    pub fn is_in_subtree(&self, resource_id: &Id, id: &Id) -> bool {
        self.subtrees
            .get(resource_id)
            .is_some_and(|set| set.contains(id))
    }

    /// Records an explicit export allowlist for `resource_id`.
    pub fn record_export_set(&self, resource_id: Id, allowed: Vec<Id>) {
        self.export_sets
            .insert(resource_id, allowed.into_iter().collect());
    }

    /// The export allowlist for `resource_id`, if one was declared.
    #[must_use]
    pub fn export_set(&self, resource_id: &Id) -> Option<HashSet<Id>> {
        self.export_sets.get(resource_id).map(|e| e.clone())
    }

    /// Records a dependency access policy for `resource_id`.
    pub fn record_access_policy(&self, resource_id: Id, policy: AccessPolicy) {
        self.access_policies.insert(resource_id, policy);
    }

    /// The access policy for `resource_id`, if one was declared.
    #[must_use]
    pub fn access_policy(&self, resource_id: &Id) -> Option<AccessPolicy> {
        self.access_policies.get(resource_id).map(|e| e.clone())
    }

    /// Records the tag ids attached to `id`.
    pub fn record_tags(&self, id: &Id, tag_ids: impl IntoIterator<Item = Id>) {
        self.tag_ids.entry(id.clone()).or_default().extend(tag_ids);
    }

    /// The tag ids attached to `id`.
    #[must_use]
    pub fn tags_of(&self, id: &Id) -> HashSet<Id> {
        self.tag_ids.get(id).map(|e| e.clone()).unwrap_or_default()
    }

    /// Walks `id`'s ancestor chain (inclusive), innermost first, to the root.
    #[must_use]
    pub fn ancestor_chain(&self, id: &Id) -> Vec<Id> {
        let mut chain = Vec::new();
        let mut current = Some(id.clone());
        let mut guard = HashSet::new();
        while let Some(owner) = current {
            if !guard.insert(owner.clone()) {
                break;
            }
            chain.push(owner.clone());
            let next = self.ownership.get(&owner).map(|o| o.clone());
            current = match next {
                Some(n) if n != owner => Some(n),
                _ => None,
            };
        }
        chain
    }
}
