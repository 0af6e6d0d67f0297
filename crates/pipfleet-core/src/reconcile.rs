use pipfleet_schema::{DesiredEnvironment, DesiredState, Library, Operation, UnitId, VirtualEnvironment};
use serde::Serialize;
use std::collections::HashSet;

/// Library changes needed to bring one existing environment to its desired
/// set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvironmentChange {
    pub name: String,
    pub libraries_to_install: Vec<Library>,
    pub libraries_to_remove: Vec<Library>,
}

/// Difference between a desired-state snapshot and what is persisted for a
/// unit.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_create: Vec<DesiredEnvironment>,
    pub to_change: Vec<EnvironmentChange>,
    pub to_remove: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_change.is_empty() && self.to_remove.is_empty()
    }

    /// Operations that carry out the plan: creations first, then removals,
    /// then changes.
    pub fn into_operations(self, unit_id: &UnitId) -> Vec<Operation> {
        let creations = self.to_create.into_iter().map(|env| {
            Operation::synchronize(unit_id.clone(), &env.name, env.libraries, Vec::new())
        });
        let removals = self
            .to_remove
            .into_iter()
            .map(|name| Operation::delete_virtual_env(unit_id.clone(), &name));
        let changes = self.to_change.into_iter().map(|change| {
            Operation::synchronize(
                unit_id.clone(),
                &change.name,
                change.libraries_to_install,
                change.libraries_to_remove,
            )
        });
        creations.chain(removals).chain(changes).collect()
    }
}

/// Compare desired environments against persisted ones. Libraries match
/// only on the exact (name, version) pair.
pub fn plan(desired: &DesiredState, persisted: &[VirtualEnvironment]) -> ReconciliationPlan {
    let mut result = ReconciliationPlan::default();

    for env in persisted {
        let Some(wanted) = desired.environment(&env.name) else {
            result.to_remove.push(env.name.clone());
            continue;
        };
        let libraries_to_remove = difference(&env.installed_libraries, &wanted.libraries);
        let libraries_to_install = difference(&wanted.libraries, &env.installed_libraries);
        if !libraries_to_install.is_empty() || !libraries_to_remove.is_empty() {
            result.to_change.push(EnvironmentChange {
                name: env.name.clone(),
                libraries_to_install,
                libraries_to_remove,
            });
        }
    }

    let existing: HashSet<&str> = persisted.iter().map(|e| e.name.as_str()).collect();
    result.to_create = desired
        .virtual_environments
        .iter()
        .filter(|env| !existing.contains(env.name.as_str()))
        .cloned()
        .collect();

    result
}

/// Entries of `left` with no equal entry in `right`, in `left` order.
fn difference(left: &[Library], right: &[Library]) -> Vec<Library> {
    let right: HashSet<&Library> = right.iter().collect();
    left.iter().filter(|lib| !right.contains(lib)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipfleet_schema::OperationKind;

    fn lib(name: &str, version: &str) -> Library {
        Library::new(name, version)
    }

    fn persisted(name: &str, libs: Vec<Library>) -> VirtualEnvironment {
        let mut env = VirtualEnvironment::new(name);
        env.installed_libraries = libs;
        env
    }

    fn desired(envs: Vec<(&str, Vec<Library>)>) -> DesiredState {
        DesiredState {
            virtual_environments: envs
                .into_iter()
                .map(|(name, libraries)| DesiredEnvironment {
                    name: name.to_owned(),
                    libraries,
                })
                .collect(),
        }
    }

    #[test]
    fn pure_removal() {
        let p = plan(
            &DesiredState::default(),
            &[persisted("envA", vec![lib("x", "1")])],
        );
        assert_eq!(p.to_remove, vec!["envA"]);
        assert!(p.to_create.is_empty());
        assert!(p.to_change.is_empty());
    }

    #[test]
    fn identical_state_plans_nothing() {
        let p = plan(
            &desired(vec![("ml", vec![lib("numpy", "1.0"), lib("pandas", "2.0")])]),
            &[persisted("ml", vec![lib("pandas", "2.0"), lib("numpy", "1.0")])],
        );
        assert!(p.is_empty());
        assert!(p.into_operations(&UnitId::new("u")).is_empty());
    }

    #[test]
    fn version_change_is_remove_plus_install() {
        let p = plan(
            &desired(vec![("web", vec![lib("flask", "2.0")])]),
            &[persisted("web", vec![lib("flask", "1.0")])],
        );
        assert_eq!(
            p.to_change,
            vec![EnvironmentChange {
                name: "web".to_owned(),
                libraries_to_install: vec![lib("flask", "2.0")],
                libraries_to_remove: vec![lib("flask", "1.0")],
            }]
        );
    }

    #[test]
    fn new_env_is_created_with_all_libraries() {
        let p = plan(&desired(vec![("ml", vec![lib("numpy", "1.0")])]), &[]);
        assert_eq!(p.to_create.len(), 1);
        assert_eq!(p.to_create[0].libraries, vec![lib("numpy", "1.0")]);
    }

    #[test]
    fn empty_desired_env_against_populated_one_removes_libraries() {
        let p = plan(
            &desired(vec![("ml", vec![])]),
            &[persisted("ml", vec![lib("numpy", "1.0")])],
        );
        assert!(p.to_remove.is_empty());
        assert_eq!(p.to_change[0].libraries_to_remove, vec![lib("numpy", "1.0")]);
        assert!(p.to_change[0].libraries_to_install.is_empty());
    }

    #[test]
    fn operations_are_ordered_creations_removals_changes() {
        let p = plan(
            &desired(vec![
                ("changed", vec![lib("a", "2")]),
                ("new", vec![lib("b", "1")]),
            ]),
            &[
                persisted("changed", vec![lib("a", "1")]),
                persisted("gone", vec![]),
            ],
        );
        let ops = p.into_operations(&UnitId::new("u"));
        let summary: Vec<_> = ops
            .iter()
            .map(|o| (o.kind(), o.virtual_env_name.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (OperationKind::Synchronize, "new"),
                (OperationKind::DeleteVirtualEnv, "gone"),
                (OperationKind::Synchronize, "changed"),
            ]
        );
        assert!(ops.iter().all(|o| o.unit_id == "u"));
    }
}
