//! Call-graph node payloads and call sites.

use std::fmt;

use crate::{
    bytecode::InvokeKind,
    ir::InstrId,
    model::MethodId,
};

/// One invoke site inside a method's IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// The invoke instruction's stable id.
    pub instr: InstrId,
    /// Dispatch kind at the site.
    pub kind: InvokeKind,
    /// The referenced (pre-resolution) target.
    pub target: MethodId,
}

/// Payload of one call-graph node.
#[derive(Debug, Clone)]
pub struct CallGraphNode {
    method: MethodId,
    force_inline: bool,
    call_sites: Vec<CallSite>,
}

impl CallGraphNode {
    /// Creates a node for a method.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            force_inline: false,
            call_sites: Vec::new(),
        }
    }

    /// The method this node represents.
    #[must_use]
    pub const fn method(&self) -> MethodId {
        self.method
    }

    /// Whether the method is required to be inlined at all call sites.
    #[must_use]
    pub const fn is_force_inline(&self) -> bool {
        self.force_inline
    }

    /// Marks the method as force-inline.
    pub fn mark_force_inline(&mut self) {
        self.force_inline = true;
    }

    /// The invoke sites recorded for this method.
    #[must_use]
    pub fn call_sites(&self) -> &[CallSite] {
        &self.call_sites
    }

    /// Records an invoke site.
    pub fn add_call_site(&mut self, site: CallSite) {
        self.call_sites.push(site);
    }
}

impl fmt::Display for CallGraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method)?;
        if self.force_inline {
            write!(f, " [force-inline]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_flags() {
        let mut node = CallGraphNode::new(MethodId::new(3));
        assert!(!node.is_force_inline());
        node.mark_force_inline();
        assert!(node.is_force_inline());
        assert_eq!(node.method(), MethodId::new(3));
    }

    #[test]
    fn test_call_site_recording() {
        let mut node = CallGraphNode::new(MethodId::new(0));
        node.add_call_site(CallSite {
            instr: InstrId::new(5),
            kind: InvokeKind::Static,
            target: MethodId::new(9),
        });
        assert_eq!(node.call_sites().len(), 1);
        assert_eq!(node.call_sites()[0].target, MethodId::new(9));
    }
}
