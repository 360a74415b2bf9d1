//! Port configuration contract.
//!
//! Every connection runs from the source node's `out` port to the target node's `in` port.
//! [`PortContract::create_port_configuration`] builds that pair and refuses anything else in
//! strict mode; [`PortContract::validate_node_port_compatibility`] performs the same check on
//! live nodes without failing, for drag feedback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    FlowlinesError, PolicyViolation, Result,
    common::MemCache,
    model::{IN_PORT, NodeId, NodeInfo, OUT_PORT, PortDirection},
    utils,
    validation::ValidationReport,
};

/// A `cell` + `port` pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub cell: NodeId,
    pub port: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PortMetadata {
    pub created_at: i64,
    pub strict: bool,
    pub branch_id: Option<String>,
    pub created_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PortConfiguration {
    pub source: PortRef,
    pub target: PortRef,
    pub metadata: PortMetadata,
}

/// Caller overrides for [`PortContract::create_port_configuration`].
#[derive(Debug, Clone, Default)]
pub struct PortOptions {
    pub source_port: Option<String>,
    pub target_port: Option<String>,
    pub branch_id: Option<String>,
    pub created_by: Option<String>,
    /// Overrides the contract's strict flag for this call.
    pub strict: Option<bool>,
}

/// Result of a node compatibility check.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompatibilityReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub struct PortContract {
    strict: bool,
    compatibility: MemCache<(NodeId, NodeId), CompatibilityReport>,
}

impl Default for PortContract {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PortContract {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            compatibility: MemCache::default(),
        }
    }

    pub fn with_cache(
        strict: bool,
        capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            strict,
            compatibility: MemCache::new(capacity, ttl),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Build the `out` -> `in` port pair for a connection.
    ///
    /// Fails with [`FlowlinesError::PortMismatch`] when a caller asks for any other port in
    /// strict mode. Outside strict mode a custom port name is taken as given.
    pub fn create_port_configuration(
        &self,
        source_node_id: &str,
        target_node_id: &str,
        options: &PortOptions,
    ) -> Result<PortConfiguration> {
        trace!("ports::create_port_configuration({}, {})", source_node_id, target_node_id);
        if source_node_id.is_empty() {
            return Err(FlowlinesError::MissingId("source node id".to_string()));
        }
        if target_node_id.is_empty() {
            return Err(FlowlinesError::MissingId("target node id".to_string()));
        }
        let strict = options.strict.unwrap_or(self.strict);
        let source_port = resolve_port(options.source_port.as_deref(), OUT_PORT, "source", strict)?;
        let target_port = resolve_port(options.target_port.as_deref(), IN_PORT, "target", strict)?;

        Ok(PortConfiguration {
            source: PortRef {
                cell: source_node_id.to_string(),
                port: source_port,
            },
            target: PortRef {
                cell: target_node_id.to_string(),
                port: target_port,
            },
            metadata: PortMetadata {
                created_at: utils::time::time_millis(),
                strict,
                branch_id: options.branch_id.clone(),
                created_by: options.created_by.clone().unwrap_or_else(|| "port-contract".to_string()),
            },
        })
    }

    /// Check a configuration built elsewhere against the contract.
    pub fn validate_port_configuration(
        &self,
        config: &PortConfiguration,
    ) -> ValidationReport {
        let mut report = ValidationReport::ok();
        if config.source.port != OUT_PORT {
            report.push(PolicyViolation::PortIncompatible {
                reason: format!("source port must be '{}', got '{}'", OUT_PORT, config.source.port),
            });
        }
        if config.target.port != IN_PORT {
            report.push(PolicyViolation::PortIncompatible {
                reason: format!("target port must be '{}', got '{}'", IN_PORT, config.target.port),
            });
        }
        if config.source.cell == config.target.cell {
            report.push(PolicyViolation::SelfLoop {
                node_id: config.source.cell.clone(),
            });
        }
        report
    }

    /// Check that `source` exposes an `out` port and `target` an `in` port. Never fails; results
    /// are memoized per node pair.
    pub fn validate_node_port_compatibility(
        &self,
        source: &NodeInfo,
        target: &NodeInfo,
    ) -> CompatibilityReport {
        let key = (source.id.clone(), target.id.clone());
        self.compatibility.get_or_insert_with(key, || {
            let mut errors = Vec::new();
            if !source.has_port(OUT_PORT, PortDirection::Out) {
                errors.push(format!("source node {} has no '{}' port", source.id, OUT_PORT));
            }
            if !target.has_port(IN_PORT, PortDirection::In) {
                errors.push(format!("target node {} has no '{}' port", target.id, IN_PORT));
            }
            if !errors.is_empty() {
                debug!("ports::incompatible({}, {}): {:?}", source.id, target.id, errors);
            }
            CompatibilityReport {
                is_valid: errors.is_empty(),
                errors,
            }
        })
    }

    /// Forget memoized compatibility results, e.g. after node ports changed.
    pub fn invalidate(&self) {
        self.compatibility.invalidate_all();
    }
}

fn resolve_port(
    requested: Option<&str>,
    expected: &str,
    role: &str,
    strict: bool,
) -> Result<String> {
    match requested {
        None => Ok(expected.to_string()),
        Some(p) if p == expected => Ok(expected.to_string()),
        Some(p) if !strict && !p.is_empty() => Ok(p.to_string()),
        Some(p) => Err(FlowlinesError::PortMismatch {
            role: role.to_string(),
            expected: expected.to_string(),
            port: p.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, PortInfo, Size};

    fn node(id: &str) -> NodeInfo {
        NodeInfo::new(id, Point::default(), Size::new(100.0, 40.0))
    }

    #[test]
    fn test_default_configuration_is_out_to_in() {
        let contract = PortContract::default();
        let cfg = contract.create_port_configuration("a", "b", &PortOptions::default()).unwrap();
        assert_eq!(
            cfg.source,
            PortRef {
                cell: "a".to_string(),
                port: "out".to_string(),
            }
        );
        assert_eq!(cfg.target.port, "in");
        assert!(cfg.metadata.strict);
        assert!(contract.validate_port_configuration(&cfg).is_valid);
    }

    #[test]
    fn test_strict_mode_rejects_custom_port() {
        let contract = PortContract::default();
        let opts = PortOptions {
            target_port: Some("left".to_string()),
            ..Default::default()
        };
        let err = contract.create_port_configuration("a", "b", &opts).unwrap_err();
        assert!(matches!(err, FlowlinesError::PortMismatch { ref role, .. } if role == "target"));
    }

    #[test]
    fn test_lenient_mode_accepts_custom_port() {
        let contract = PortContract::new(false);
        let opts = PortOptions {
            source_port: Some("bottom".to_string()),
            ..Default::default()
        };
        let cfg = contract.create_port_configuration("a", "b", &opts).unwrap();
        assert_eq!(cfg.source.port, "bottom");
        assert!(!contract.validate_port_configuration(&cfg).is_valid);
    }

    #[test]
    fn test_missing_ids_fail_fast() {
        let contract = PortContract::default();
        assert_eq!(
            contract.create_port_configuration("", "b", &PortOptions::default()).unwrap_err(),
            FlowlinesError::MissingId("source node id".to_string())
        );
    }

    #[test]
    fn test_compatibility_reports_missing_ports() {
        let contract = PortContract::default();
        let ok = contract.validate_node_port_compatibility(&node("a"), &node("b"));
        assert!(ok.is_valid);

        let sink = node("c").with_ports(vec![PortInfo::input()]);
        let report = contract.validate_node_port_compatibility(&sink, &node("b").with_ports(vec![]));
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_compatibility_is_memoized_until_invalidated() {
        let contract = PortContract::default();
        assert!(contract.validate_node_port_compatibility(&node("a"), &node("b")).is_valid);
        let changed = node("b").with_ports(vec![]);
        assert!(contract.validate_node_port_compatibility(&node("a"), &changed).is_valid);
        contract.invalidate();
        assert!(!contract.validate_node_port_compatibility(&node("a"), &changed).is_valid);
    }
}
