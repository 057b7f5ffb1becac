//! Policy and workload fixtures for dataplane scenarios

use bpf_counters::{Hook, RuleAction};

/// A policy applied to every workload (`all()` selector)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySpec {
    /// Namespace of the policy
    pub namespace: String,
    /// Policy name within the namespace
    pub name: String,
    /// Ingress rule verdicts, in evaluation order
    pub ingress: Vec<RuleAction>,
    /// Egress rule verdicts, in evaluation order
    pub egress: Vec<RuleAction>,
}

impl PolicySpec {
    /// Create a policy with no rules
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    /// Replace the ingress rules
    pub fn with_ingress(mut self, rules: impl IntoIterator<Item = RuleAction>) -> Self {
        self.ingress = rules.into_iter().collect();
        self
    }

    /// Replace the egress rules
    pub fn with_egress(mut self, rules: impl IntoIterator<Item = RuleAction>) -> Self {
        self.egress = rules.into_iter().collect();
        self
    }

    /// Namespace-qualified name, as used in rule counter keys
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Rules attached to `hook`
    pub fn rules(&self, hook: Hook) -> &[RuleAction] {
        match hook {
            Hook::Ingress => &self.ingress,
            Hook::Egress => &self.egress,
        }
    }
}

/// One deny rule in each direction
pub fn deny_both(namespace: &str, name: &str) -> PolicySpec {
    PolicySpec::new(namespace, name)
        .with_ingress([RuleAction::Deny])
        .with_egress([RuleAction::Deny])
}

/// One allow rule in each direction
pub fn allow_both(namespace: &str, name: &str) -> PolicySpec {
    PolicySpec::new(namespace, name)
        .with_ingress([RuleAction::Allow])
        .with_egress([RuleAction::Allow])
}

/// A UDP flow between two workload interfaces
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Flow {
    /// Interface of the sending workload
    pub src_iface: String,
    /// Interface of the receiving workload
    pub dst_iface: String,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
}

impl Flow {
    /// Create a flow between two interfaces
    pub fn udp(src_iface: &str, dst_iface: &str, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_iface: src_iface.to_string(),
            dst_iface: dst_iface.to_string(),
            src_port,
            dst_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        assert_eq!(
            deny_both("default", "policy-test").qualified_name(),
            "default.policy-test"
        );
    }

    #[test]
    fn test_rules_per_hook() {
        let policy = PolicySpec::new("fv", "p")
            .with_ingress([RuleAction::Allow, RuleAction::Deny])
            .with_egress([]);
        assert_eq!(policy.rules(Hook::Ingress).len(), 2);
        assert!(policy.rules(Hook::Egress).is_empty());
    }
}
