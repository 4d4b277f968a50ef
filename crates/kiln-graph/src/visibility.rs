//! Export-visibility and dependency-access-policy validation.

use std::collections::HashSet;

use kiln_core::Id;
use kiln_error::KilnError;
use kiln_store::Store;

/// Runs `getAccessViolation(target_id, consumer_id)` against `store`'s
/// recorded ownership/export/policy bookkeeping.
///
/// Returns `None` when the access is allowed, or `Some(err)` naming the
/// rule that rejected it. Never returns `Err` itself — this is a pure
/// predicate, not a fallible operation.
#[must_use]
pub fn get_access_violation(target_id: &Id, consumer_id: &Id, store: &Store) -> Option<KilnError> {
    let tracker = &store.visibility;

    // Step 1: untracked targets (built-ins) skip visibility entirely.
    let Some(mut owner) = tracker.owner_of(target_id) else {
        return None;
    };

    // Step 2: walk the owner chain upward; stop at the first ancestor whose
    // subtree already contains the consumer (allowed by subtree membership).
    let mut visited_owners = HashSet::new();
    loop {
        if !visited_owners.insert(owner.clone()) {
            break; // ownership cycle guard, shouldn't happen (invariant 2)
        }
        if tracker.is_in_subtree(&owner, consumer_id) || owner == *consumer_id {
            break;
        }

        if let Some(export_set) = tracker.export_set(&owner) {
            let visible = export_set.contains(target_id)
            || export_set
                .iter()
                .any(|exported| is_transitively_visible(exported, target_id, tracker, &mut HashSet::new()));
            if !visible {
                return Some(KilnError::VisibilityViolation {
                    consumer_id: consumer_id.to_string(),
                    target_id: target_id.to_string(),
                    gating_owner_id: owner.to_string(),
                    export_set: export_set.iter().map(ToString::to_string).collect(),
                });
            }
        }

        let Some(next_owner) = tracker.owner_of(&owner) else {
            break;
        };
        if next_owner == owner {
            break; // root owns itself
        }
        owner = next_owner;
    }

    // Step 3: walk the consumer's ancestor chain checking deny rules.
    let target_tags = tracker.tags_of(target_id);
    for ancestor in tracker.ancestor_chain(consumer_id) {
        let Some(policy) = tracker.access_policy(&ancestor) else {
            continue;
        };
        if let Some(matched) = policy.deny_ids.iter().find(|denied| *denied == target_id) {
            return Some(KilnError::DependencyAccessPolicyViolation {
                consumer_id: consumer_id.to_string(),
                target_id: target_id.to_string(),
                policy_owner_id: ancestor.to_string(),
                matched_rule: matched.to_string(),
            });
        }
        if let Some(matched) = policy.deny_tags.iter().find(|tag| target_tags.contains(*tag)) {
            return Some(KilnError::DependencyAccessPolicyViolation {
                consumer_id: consumer_id.to_string(),
                target_id: target_id.to_string(),
                policy_owner_id: ancestor.to_string(),
                matched_rule: matched.to_string(),
            });
        }
    }

    None
}

/// Whether `target` lies within `exported`'s own transitive subtree,
/// bounded by `seen` to stop cycles through repeated exported resources.
fn is_transitively_visible(
    exported: &Id,
    target: &Id,
    tracker: &kiln_store::VisibilityTracker,
    seen: &mut HashSet<Id>,
) -> bool {
    if !seen.insert(exported.clone()) {
        return false;
    }
    if tracker.is_in_subtree(exported, target) {
        return true;
    }
    tracker
        .export_set(exported)
        .is_some_and(|set| set.iter().any(|next| is_transitively_visible(next, target, tracker, seen)))
}

/// Validates every declared dependency, hook subscription, and middleware
/// attachment currently known to `store`.
///
/// # Errors
/// Returns the first [`KilnError::VisibilityViolation`] or
/// [`KilnError::DependencyAccessPolicyViolation`] found.
pub fn validate_all(store: &Store) -> Result<(), KilnError> {
    for entry in &store.resources {
        let resource_entry = entry.value();
        let consumer = &resource_entry.definition.id;
        if let Some(deps) = &resource_entry.definition.dependencies {
            for target in deps.resolve(&resource_entry.config).values() {
                if let Some(err) = get_access_violation(target, consumer, store) {
                    return Err(err);
                }
            }
        }
        for attachment in &resource_entry.definition.middleware {
            if let Some(err) = get_access_violation(attachment.id(), consumer, store) {
                return Err(err);
            }
        }
    }

    for entry in &store.tasks {
        let task = entry.value();
        if let Some(deps) = &task.dependencies {
            for target in deps.resolve(&serde_json::Value::Null).values() {
                if let Some(err) = get_access_violation(target, &task.id, store) {
                    return Err(err);
                }
            }
        }
        for attachment in &task.middleware {
            if let Some(err) = get_access_violation(attachment.id(), &task.id, store) {
                return Err(err);
            }
        }
    }

    for entry in &store.hooks {
        let hook = entry.value();
        for event_id in hook.on.explicit_ids() {
            if let Some(err) = get_access_violation(&event_id, &hook.id, store) {
                return Err(err);
            }
        }
        if let Some(deps) = &hook.dependencies {
            for target in deps.resolve(&serde_json::Value::Null).values() {
                if let Some(err) = get_access_violation(target, &hook.id, store) {
                    return Err(err);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::{AccessPolicy, Item, Resource, Task};
    use serde_json::Value;
    use std::sync::Arc;

    fn noop_resource(id: &str) -> Resource {
        Resource::new(id, |_cfg, _deps| {
            Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) })
        })
    }

    #[test]
    fn unexported_target_outside_subtree_is_denied() {
        let secret = Arc::new(noop_resource("secret"));
        let outsider = Arc::new(Task::new("outsider", |i, _| Box::pin(async move { Ok(i) })));
        let owner = Arc::new(
            noop_resource("owner")
                .with_register(vec![Item::Resource(Arc::clone(&secret), Some(Value::Null))])
                .with_exports(Vec::<String>::new()),
        );
        let root = Arc::new(noop_resource("root").with_register(vec![
            Item::Resource(owner, Some(Value::Null)),
            Item::Task(Arc::clone(&outsider)),
        ]));
        let store = Store::build(root, Value::Null).unwrap();

        let violation = get_access_violation(&Id::new("secret"), &Id::new("outsider"), &store);
        assert!(matches!(violation, Some(KilnError::VisibilityViolation { .. })));
    }

    #[test]
    fn sibling_inside_owner_subtree_is_allowed() {
        let db = Arc::new(noop_resource("db"));
        let consumer = Arc::new(Task::new("consumer", |i, _| Box::pin(async move { Ok(i) })));
        let owner = Arc::new(noop_resource("owner").with_register(vec![
            Item::Resource(Arc::clone(&db), Some(Value::Null)),
            Item::Task(Arc::clone(&consumer)),
        ]));
        let store = Store::build(owner, Value::Null).unwrap();

        assert!(get_access_violation(&Id::new("db"), &Id::new("consumer"), &store).is_none());
    }

    #[test]
    fn deny_policy_overrides_export() {
        let secret = Arc::new(noop_resource("secret"));
        let consumer = Arc::new(Task::new("consumer", |i, _| Box::pin(async move { Ok(i) })));
        let owner = Arc::new(
            noop_resource("owner")
                .with_register(vec![
                    Item::Resource(Arc::clone(&secret), Some(Value::Null)),
                    Item::Task(Arc::clone(&consumer)),
                ])
                .with_access_policy(AccessPolicy::deny_ids(["secret"])),
        );
        let store = Store::build(owner, Value::Null).unwrap();

        let violation = get_access_violation(&Id::new("secret"), &Id::new("consumer"), &store);
        assert!(matches!(
            violation,
            Some(KilnError::DependencyAccessPolicyViolation { .. })
        ));
    }
}
