//! Structured validation results and collection-wide invariant checks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    PolicyViolation,
    model::{Edge, EdgeKind, EdgeState},
};

/// `{is_valid, errors}` result for checks that must not throw.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<PolicyViolation>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn fail(violation: PolicyViolation) -> Self {
        Self {
            is_valid: false,
            errors: vec![violation],
        }
    }

    pub fn from_errors(errors: Vec<PolicyViolation>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn push(
        &mut self,
        violation: PolicyViolation,
    ) {
        self.is_valid = false;
        self.errors.push(violation);
    }

    pub fn merge(
        &mut self,
        other: ValidationReport,
    ) {
        for e in other.errors {
            self.push(e);
        }
    }

    pub fn first_error(&self) -> Option<&PolicyViolation> {
        self.errors.first()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// One broken collection invariant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum InvariantViolation {
    DuplicateConnectionKey {
        key: String,
        edge_ids: Vec<String>,
    },
    TargetCoupling {
        edge_id: String,
        kind: EdgeKind,
    },
    PortConflict {
        slot: String,
        edge_ids: Vec<String>,
    },
    StateOutOfSet {
        edge_id: String,
        state: EdgeState,
    },
    IllegalTransition {
        edge_id: String,
        from: EdgeState,
        to: EdgeState,
    },
}

/// Check the collection invariants over `edges`: unique connection keys, preview/target
/// coupling, exclusive port slots and recorded transitions within the table.
pub fn check_invariants<'a>(edges: impl IntoIterator<Item = &'a Edge>) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();
    let mut keys: HashMap<String, Vec<String>> = HashMap::new();
    let mut slots: HashMap<String, Vec<String>> = HashMap::new();

    for edge in edges {
        let coupled = match edge.kind {
            EdgeKind::Preview | EdgeKind::Temporary => edge.target.is_none(),
            EdgeKind::Connection => edge.target.is_some(),
        };
        if !coupled {
            violations.push(InvariantViolation::TargetCoupling {
                edge_id: edge.id.clone(),
                kind: edge.kind,
            });
        }
        if !edge.state.belongs_to(edge.kind) {
            violations.push(InvariantViolation::StateOutOfSet {
                edge_id: edge.id.clone(),
                state: edge.state,
            });
        }
        for t in edge.history() {
            if !t.from.can_transition_to(t.to) {
                violations.push(InvariantViolation::IllegalTransition {
                    edge_id: edge.id.clone(),
                    from: t.from,
                    to: t.to,
                });
            }
        }
        if edge.is_connection() {
            keys.entry(edge.connection_key()).or_default().push(edge.id.clone());
        }
        for slot in edge.port_slots() {
            slots.entry(slot).or_default().push(edge.id.clone());
        }
    }

    let mut dup_keys: Vec<_> = keys.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
    dup_keys.sort();
    for (key, edge_ids) in dup_keys {
        violations.push(InvariantViolation::DuplicateConnectionKey {
            key,
            edge_ids,
        });
    }
    let mut conflicts: Vec<_> = slots.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
    conflicts.sort();
    for (slot, edge_ids) in conflicts {
        violations.push(InvariantViolation::PortConflict {
            slot,
            edge_ids,
        });
    }
    violations
}
