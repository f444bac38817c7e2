//! The hierarchical model tree.
//!
//! Models (atomic leaves and coupled shells) live in a single `SlotMap`
//! arena; parents hold child id lists and the three coupling categories:
//!
//! - **IC** (internal): child output -> sibling child input
//! - **EIC** (external input): parent input -> child input
//! - **EOC** (external output): child output -> parent output
//!
//! [`ModelTree::attach`] classifies a coupling automatically from the two
//! port hosts and rejects feedback loops and non-sibling links. Couplings
//! are immutable once a simulation is running.
//!
//! Message routing is a transitive closure over couplings: from an atomic
//! output port, IC edges move sideways, EOC edges climb into the parent,
//! EIC edges descend into children, and the walk terminates at atomic input
//! ports. Duplicate arrivals along distinct paths are preserved; fan-out
//! multiplicity is part of the semantics. [`ModelTree::flatten`] bakes that
//! closure into direct leaf-to-leaf links and discards the shells.

use crate::id::{ModelId, Name, PortId};
use crate::message::Value;
use crate::model::AtomicModel;
use crate::schedule::ScheduleKind;
use slotmap::{SecondaryMap, SlotMap};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from port lookup, posting, and observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("model `{model}` has no {mode} port named `{name}`")]
    NoSuchPort { model: Name, mode: PortMode, name: Name },

    #[error("port `{port}` is hosted by `{host}`, not by `{model}`")]
    InvalidHost { model: Name, host: Name, port: Name },

    #[error("port `{port}` on `{model}` is not an output port")]
    NotAnOutput { model: Name, port: Name },

    #[error("port `{port}` on `{model}` is not observable")]
    Unobservable { model: Name, port: Name },

    #[error("port id does not belong to this model tree")]
    Dangling,
}

/// Errors from assembling the model hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouplingError {
    #[error("cannot couple `{port}` back into its own model")]
    Feedback { port: Name },

    #[error("invalid coupling from `{src}` to `{dst}`: {reason}")]
    Invalid {
        src: Name,
        dst: Name,
        reason: &'static str,
    },

    #[error("model id does not belong to this tree")]
    ForeignModel,

    #[error("`{model}` is not a coupled model")]
    NotCoupled { model: Name },

    #[error("port id does not belong to this tree")]
    DanglingPort,
}

// ---------------------------------------------------------------------------
// Ports and couplings
// ---------------------------------------------------------------------------

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortMode {
    Input,
    Output,
}

impl std::fmt::Display for PortMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortMode::Input => f.write_str("input"),
            PortMode::Output => f.write_str("output"),
        }
    }
}

/// A declared port. Identity is the `PortId`; a model never carries two
/// ports of the same mode and name.
#[derive(Debug, Clone)]
pub struct PortData {
    pub host: ModelId,
    pub mode: PortMode,
    pub name: Name,
}

/// Category of a directed coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplingKind {
    Internal,
    ExternalInput,
    ExternalOutput,
}

/// A directed link between two ports, stored on the owning coupled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coupling {
    pub kind: CouplingKind,
    pub src: PortId,
    pub dst: PortId,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Data specific to a coupled model.
#[derive(Debug, Default)]
pub struct CoupledData {
    pub children: Vec<ModelId>,
    pub couplings: Vec<Coupling>,
    /// Event-set discipline this model asks for; the simulation's explicit
    /// configuration wins over it.
    pub preferred_schedule: Option<ScheduleKind>,
}

/// Tagged variant over the two model kinds.
#[derive(Debug)]
pub enum NodeKind {
    Atomic,
    Coupled(CoupledData),
}

/// One model in the arena.
#[derive(Debug)]
pub struct ModelNode {
    pub name: Name,
    pub parent: Option<ModelId>,
    pub kind: NodeKind,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
}

// ---------------------------------------------------------------------------
// ModelTree
// ---------------------------------------------------------------------------

/// The hierarchical model arena: structure, ports, and atomic behaviors.
///
/// Structure and behavior are stored in separate maps so the kernel can
/// split borrows between them while dispatching λ and δ calls.
#[derive(Debug)]
pub struct ModelTree {
    pub(crate) nodes: SlotMap<ModelId, ModelNode>,
    pub(crate) ports: SlotMap<PortId, PortData>,
    pub(crate) behaviors: SecondaryMap<ModelId, Box<dyn AtomicModel>>,
    pub(crate) root: ModelId,
}

impl ModelTree {
    /// Create a tree with an empty coupled model at the root.
    pub fn new(root_name: impl Into<Name>) -> ModelTree {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(ModelNode {
            name: root_name.into(),
            parent: None,
            kind: NodeKind::Coupled(CoupledData::default()),
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        ModelTree {
            nodes,
            ports: SlotMap::with_key(),
            behaviors: SecondaryMap::new(),
            root,
        }
    }

    #[inline]
    pub fn root(&self) -> ModelId {
        self.root
    }

    #[inline]
    pub fn contains(&self, model: ModelId) -> bool {
        self.nodes.contains_key(model)
    }

    pub fn name(&self, model: ModelId) -> Option<&Name> {
        self.nodes.get(model).map(|n| &n.name)
    }

    pub fn parent(&self, model: ModelId) -> Option<ModelId> {
        self.nodes.get(model).and_then(|n| n.parent)
    }

    pub fn is_atomic(&self, model: ModelId) -> bool {
        matches!(
            self.nodes.get(model),
            Some(ModelNode {
                kind: NodeKind::Atomic,
                ..
            })
        )
    }

    pub fn is_coupled(&self, model: ModelId) -> bool {
        matches!(
            self.nodes.get(model),
            Some(ModelNode {
                kind: NodeKind::Coupled(_),
                ..
            })
        )
    }

    /// Children of a coupled model, in insertion order. Empty for atomics.
    pub fn children(&self, model: ModelId) -> &[ModelId] {
        match self.nodes.get(model) {
            Some(ModelNode {
                kind: NodeKind::Coupled(data),
                ..
            }) => &data.children,
            _ => &[],
        }
    }

    pub fn behavior(&self, model: ModelId) -> Option<&dyn AtomicModel> {
        self.behaviors.get(model).map(|b| b.as_ref())
    }

    pub fn behavior_mut(&mut self, model: ModelId) -> Option<&mut (dyn AtomicModel + 'static)> {
        self.behaviors.get_mut(model).map(|b| b.as_mut())
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Add a coupled child under `parent`.
    pub fn add_coupled(
        &mut self,
        parent: ModelId,
        name: impl Into<Name>,
    ) -> Result<ModelId, CouplingError> {
        self.add_node(parent, name.into(), NodeKind::Coupled(CoupledData::default()))
    }

    /// Add an atomic child under `parent` with its behavior.
    pub fn add_atomic(
        &mut self,
        parent: ModelId,
        name: impl Into<Name>,
        behavior: Box<dyn AtomicModel>,
    ) -> Result<ModelId, CouplingError> {
        let id = self.add_node(parent, name.into(), NodeKind::Atomic)?;
        self.behaviors.insert(id, behavior);
        Ok(id)
    }

    fn add_node(
        &mut self,
        parent: ModelId,
        name: Name,
        kind: NodeKind,
    ) -> Result<ModelId, CouplingError> {
        match self.nodes.get(parent) {
            None => return Err(CouplingError::ForeignModel),
            Some(node) if !matches!(node.kind, NodeKind::Coupled(_)) => {
                return Err(CouplingError::NotCoupled {
                    model: node.name.clone(),
                });
            }
            Some(_) => {}
        }
        let id = self.nodes.insert(ModelNode {
            name,
            parent: Some(parent),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        if let Some(node) = self.nodes.get_mut(parent)
            && let NodeKind::Coupled(data) = &mut node.kind
        {
            data.children.push(id);
        }
        Ok(id)
    }

    /// Declare an input port. Re-declaring an existing name returns the
    /// original port.
    pub fn add_input_port(
        &mut self,
        model: ModelId,
        name: impl Into<Name>,
    ) -> Result<PortId, CouplingError> {
        self.add_port(model, PortMode::Input, name.into())
    }

    /// Declare an output port. Re-declaring an existing name returns the
    /// original port.
    pub fn add_output_port(
        &mut self,
        model: ModelId,
        name: impl Into<Name>,
    ) -> Result<PortId, CouplingError> {
        self.add_port(model, PortMode::Output, name.into())
    }

    fn add_port(
        &mut self,
        model: ModelId,
        mode: PortMode,
        name: Name,
    ) -> Result<PortId, CouplingError> {
        let node = self.nodes.get(model).ok_or(CouplingError::ForeignModel)?;
        let list = match mode {
            PortMode::Input => &node.inputs,
            PortMode::Output => &node.outputs,
        };
        for &pid in list {
            if let Some(pd) = self.ports.get(pid)
                && pd.name == name
            {
                return Ok(pid);
            }
        }
        let pid = self.ports.insert(PortData {
            host: model,
            mode,
            name,
        });
        if let Some(node) = self.nodes.get_mut(model) {
            match mode {
                PortMode::Input => node.inputs.push(pid),
                PortMode::Output => node.outputs.push(pid),
            }
        }
        Ok(pid)
    }

    /// Look up an input port by name.
    pub fn input_port(&self, model: ModelId, name: &str) -> Result<PortId, PortError> {
        self.find_port(model, PortMode::Input, name)
    }

    /// Look up an output port by name.
    pub fn output_port(&self, model: ModelId, name: &str) -> Result<PortId, PortError> {
        self.find_port(model, PortMode::Output, name)
    }

    fn find_port(&self, model: ModelId, mode: PortMode, name: &str) -> Result<PortId, PortError> {
        let node = self.nodes.get(model).ok_or(PortError::Dangling)?;
        let list = match mode {
            PortMode::Input => &node.inputs,
            PortMode::Output => &node.outputs,
        };
        for &pid in list {
            if let Some(pd) = self.ports.get(pid)
                && pd.name == name
            {
                return Ok(pid);
            }
        }
        Err(PortError::NoSuchPort {
            model: node.name.clone(),
            mode,
            name: Name::from(name),
        })
    }

    pub fn port(&self, port: PortId) -> Option<&PortData> {
        self.ports.get(port)
    }

    pub fn port_host(&self, port: PortId) -> Option<ModelId> {
        self.ports.get(port).map(|p| p.host)
    }

    pub fn port_name(&self, port: PortId) -> Option<&Name> {
        self.ports.get(port).map(|p| &p.name)
    }

    /// Ask for an event-set discipline on a coupled model.
    pub fn set_preferred_schedule(
        &mut self,
        model: ModelId,
        kind: ScheduleKind,
    ) -> Result<(), CouplingError> {
        let node = self.nodes.get_mut(model).ok_or(CouplingError::ForeignModel)?;
        match &mut node.kind {
            NodeKind::Coupled(data) => {
                data.preferred_schedule = Some(kind);
                Ok(())
            }
            NodeKind::Atomic => Err(CouplingError::NotCoupled {
                model: node.name.clone(),
            }),
        }
    }

    pub fn preferred_schedule(&self, model: ModelId) -> Option<ScheduleKind> {
        match self.nodes.get(model) {
            Some(ModelNode {
                kind: NodeKind::Coupled(data),
                ..
            }) => data.preferred_schedule,
            _ => None,
        }
    }

    /// All couplings owned by a coupled model, in insertion order. Empty
    /// for atomics.
    pub fn couplings(&self, model: ModelId) -> &[Coupling] {
        match self.nodes.get(model) {
            Some(ModelNode {
                kind: NodeKind::Coupled(data),
                ..
            }) => &data.couplings,
            _ => &[],
        }
    }

    /// Couplings of `model` whose source is `port`, in insertion order.
    pub fn couplings_from(
        &self,
        model: ModelId,
        port: PortId,
    ) -> impl Iterator<Item = &Coupling> {
        self.couplings(model)
            .iter()
            .filter(move |c| c.src == port)
    }

    // -----------------------------------------------------------------------
    // Coupling
    // -----------------------------------------------------------------------

    /// Install a coupling, classifying it from the two hosts:
    /// sibling children -> IC, parent input -> child input -> EIC, child
    /// output -> parent output -> EOC. Feedback into the same model and links
    /// across non-sibling boundaries are rejected. Duplicates are
    /// idempotent.
    pub fn attach(&mut self, src: PortId, dst: PortId) -> Result<CouplingKind, CouplingError> {
        let sp = self.ports.get(src).ok_or(CouplingError::DanglingPort)?;
        let dp = self.ports.get(dst).ok_or(CouplingError::DanglingPort)?;
        if src == dst || sp.host == dp.host {
            return Err(CouplingError::Feedback {
                port: sp.name.clone(),
            });
        }
        let (s_host, s_mode, s_name) = (sp.host, sp.mode, sp.name.clone());
        let (d_host, d_mode, d_name) = (dp.host, dp.mode, dp.name.clone());
        let s_parent = self.nodes.get(s_host).ok_or(CouplingError::ForeignModel)?.parent;
        let d_parent = self.nodes.get(d_host).ok_or(CouplingError::ForeignModel)?.parent;

        let invalid = |reason| CouplingError::Invalid {
            src: s_name.clone(),
            dst: d_name.clone(),
            reason,
        };

        let (owner, kind) = if s_parent.is_some() && s_parent == d_parent {
            if s_mode != PortMode::Output || d_mode != PortMode::Input {
                return Err(invalid(
                    "internal couplings connect a child output to a sibling input",
                ));
            }
            (s_parent.ok_or(CouplingError::ForeignModel)?, CouplingKind::Internal)
        } else if d_parent == Some(s_host) {
            if s_mode != PortMode::Input || d_mode != PortMode::Input {
                return Err(invalid(
                    "external input couplings connect a parent input to a child input",
                ));
            }
            (s_host, CouplingKind::ExternalInput)
        } else if s_parent == Some(d_host) {
            if s_mode != PortMode::Output || d_mode != PortMode::Output {
                return Err(invalid(
                    "external output couplings connect a child output to a parent output",
                ));
            }
            (d_host, CouplingKind::ExternalOutput)
        } else {
            return Err(invalid("hosts are neither siblings nor parent and child"));
        };

        self.push_coupling(owner, kind, src, dst)?;
        Ok(kind)
    }

    /// Attach, then require the resolved category to be IC.
    pub fn attach_internal(&mut self, src: PortId, dst: PortId) -> Result<(), CouplingError> {
        self.attach_expecting(src, dst, CouplingKind::Internal)
    }

    /// Attach, then require the resolved category to be EIC.
    pub fn attach_input(&mut self, src: PortId, dst: PortId) -> Result<(), CouplingError> {
        self.attach_expecting(src, dst, CouplingKind::ExternalInput)
    }

    /// Attach, then require the resolved category to be EOC.
    pub fn attach_output(&mut self, src: PortId, dst: PortId) -> Result<(), CouplingError> {
        self.attach_expecting(src, dst, CouplingKind::ExternalOutput)
    }

    fn attach_expecting(
        &mut self,
        src: PortId,
        dst: PortId,
        expected: CouplingKind,
    ) -> Result<(), CouplingError> {
        let kind = self.attach(src, dst)?;
        if kind != expected {
            let s_name = self
                .ports
                .get(src)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| Name::from("?"));
            let d_name = self
                .ports
                .get(dst)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| Name::from("?"));
            return Err(CouplingError::Invalid {
                src: s_name,
                dst: d_name,
                reason: "coupling resolved to a different category than requested",
            });
        }
        Ok(())
    }

    fn push_coupling(
        &mut self,
        owner: ModelId,
        kind: CouplingKind,
        src: PortId,
        dst: PortId,
    ) -> Result<(), CouplingError> {
        let node = self.nodes.get_mut(owner).ok_or(CouplingError::ForeignModel)?;
        let NodeKind::Coupled(data) = &mut node.kind else {
            return Err(CouplingError::NotCoupled {
                model: node.name.clone(),
            });
        };
        if !data
            .couplings
            .iter()
            .any(|c| c.src == src && c.dst == dst)
        {
            data.couplings.push(Coupling { kind, src, dst });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Atomic leaves in depth-first, child-insertion order. This order is
    /// the deterministic baseline for initialization and tie-breaking.
    pub fn atomics(&self) -> Vec<ModelId> {
        let mut out = Vec::new();
        self.collect_atomics(self.root, &mut out);
        out
    }

    fn collect_atomics(&self, id: ModelId, out: &mut Vec<ModelId>) {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(NodeKind::Atomic) => out.push(id),
            Some(NodeKind::Coupled(data)) => {
                for &child in &data.children {
                    self.collect_atomics(child, out);
                }
            }
            None => {}
        }
    }

    /// Coupled models, children before parents (the root comes last).
    pub fn coupleds_postorder(&self) -> Vec<ModelId> {
        let mut out = Vec::new();
        self.collect_coupleds(self.root, &mut out);
        out
    }

    fn collect_coupleds(&self, id: ModelId, out: &mut Vec<ModelId>) {
        if let Some(ModelNode {
            kind: NodeKind::Coupled(data),
            ..
        }) = self.nodes.get(id)
        {
            for &child in &data.children {
                self.collect_coupleds(child, out);
            }
            out.push(id);
        }
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Transitive-closure destinations of an atomic output port: every
    /// atomic input port reachable through IC/EOC/EIC chains, in
    /// depth-first coupling-insertion order, with one entry per distinct
    /// path (multiplicity preserved). Values reaching a root output port
    /// leave the observable system and are dropped.
    pub fn route(&self, origin: PortId) -> Vec<PortId> {
        let mut out = Vec::new();
        self.route_into(origin, &mut out);
        out
    }

    fn route_into(&self, port: PortId, out: &mut Vec<PortId>) {
        let Some(pd) = self.ports.get(port) else {
            return;
        };
        let Some(host) = self.nodes.get(pd.host) else {
            return;
        };
        match pd.mode {
            PortMode::Input => match &host.kind {
                NodeKind::Atomic => out.push(port),
                NodeKind::Coupled(data) => {
                    for c in &data.couplings {
                        if c.src == port {
                            self.route_into(c.dst, out);
                        }
                    }
                }
            },
            PortMode::Output => {
                let Some(parent) = host.parent else {
                    return;
                };
                if let Some(ModelNode {
                    kind: NodeKind::Coupled(data),
                    ..
                }) = self.nodes.get(parent)
                {
                    for c in &data.couplings {
                        if c.src == port {
                            self.route_into(c.dst, out);
                        }
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Flattening
    // -----------------------------------------------------------------------

    /// Collapse the hierarchy: every multi-hop path between atomic ports
    /// becomes a direct internal coupling under the root, intermediate
    /// coupled shells and their ports are removed, and all atomic leaves
    /// are reparented to the root in depth-first order. The set of
    /// delivered `(source output, destination input)` pairs and their
    /// multiplicities are preserved exactly.
    pub fn flatten(&mut self) {
        let atomics = self.atomics();

        let mut pairs: Vec<(PortId, PortId)> = Vec::new();
        for &a in &atomics {
            let outputs = match self.nodes.get(a) {
                Some(node) => node.outputs.clone(),
                None => continue,
            };
            for op in outputs {
                for dst in self.route(op) {
                    pairs.push((op, dst));
                }
            }
        }

        let doomed: Vec<ModelId> = self
            .nodes
            .iter()
            .filter(|(id, node)| *id != self.root && matches!(node.kind, NodeKind::Coupled(_)))
            .map(|(id, _)| id)
            .collect();
        for id in doomed {
            if let Some(node) = self.nodes.remove(id) {
                for pid in node.inputs.into_iter().chain(node.outputs) {
                    self.ports.remove(pid);
                }
            }
        }

        for &a in &atomics {
            if let Some(node) = self.nodes.get_mut(a) {
                node.parent = Some(self.root);
            }
        }

        if let Some(node) = self.nodes.get_mut(self.root)
            && let NodeKind::Coupled(data) = &mut node.kind
        {
            data.children = atomics;
            data.couplings = pairs
                .into_iter()
                .map(|(src, dst)| Coupling {
                    kind: CouplingKind::Internal,
                    src,
                    dst,
                })
                .collect();
        }
    }
}

// ---------------------------------------------------------------------------
// OutputCollector
// ---------------------------------------------------------------------------

/// Scoped sink handed to a model's output function. Validates that every
/// post targets an output port of the posting model before staging it for
/// routing.
pub struct OutputCollector<'a> {
    host: ModelId,
    host_name: Name,
    nodes: &'a SlotMap<ModelId, ModelNode>,
    ports: &'a SlotMap<PortId, PortData>,
    staged: Vec<(PortId, Value)>,
}

impl<'a> OutputCollector<'a> {
    pub(crate) fn new(
        host: ModelId,
        nodes: &'a SlotMap<ModelId, ModelNode>,
        ports: &'a SlotMap<PortId, PortData>,
    ) -> OutputCollector<'a> {
        let host_name = nodes
            .get(host)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| Name::from("?"));
        OutputCollector {
            host,
            host_name,
            nodes,
            ports,
            staged: Vec::new(),
        }
    }

    /// Post a value to a port held by handle. The port must be an output
    /// port of the posting model.
    pub fn post(&mut self, value: Value, port: PortId) -> Result<(), PortError> {
        let pd = self.ports.get(port).ok_or(PortError::Dangling)?;
        if pd.host != self.host {
            let host_name = self
                .nodes
                .get(pd.host)
                .map(|n| n.name.clone())
                .unwrap_or_else(|| Name::from("?"));
            return Err(PortError::InvalidHost {
                model: self.host_name.clone(),
                host: host_name,
                port: pd.name.clone(),
            });
        }
        if pd.mode != PortMode::Output {
            return Err(PortError::NotAnOutput {
                model: self.host_name.clone(),
                port: pd.name.clone(),
            });
        }
        self.staged.push((port, value));
        Ok(())
    }

    /// Post a value to one of the model's own output ports by name.
    pub fn post_named(&mut self, value: Value, port: &str) -> Result<(), PortError> {
        let node = self.nodes.get(self.host).ok_or(PortError::Dangling)?;
        for &pid in &node.outputs {
            if let Some(pd) = self.ports.get(pid)
                && pd.name == port
            {
                self.staged.push((pid, value));
                return Ok(());
            }
        }
        Err(PortError::NoSuchPort {
            model: self.host_name.clone(),
            mode: PortMode::Output,
            name: Name::from(port),
        })
    }

    pub(crate) fn into_staged(self) -> Vec<(PortId, Value)> {
        self.staged
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::Duration;
    use crate::message::Bag;
    use crate::model::ModelError;

    /// Inert leaf used to populate trees under test.
    #[derive(Debug)]
    struct Passive;

    impl AtomicModel for Passive {
        fn time_advance(&self) -> Duration {
            Duration::INFINITY
        }

        fn internal_transition(&mut self) -> Result<(), ModelError> {
            Ok(())
        }

        fn external_transition(&mut self, _: Duration, _: &Bag) -> Result<(), ModelError> {
            Ok(())
        }

        fn output(&mut self, _: &mut OutputCollector<'_>) -> Result<(), ModelError> {
            Ok(())
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn leaf() -> Box<dyn AtomicModel> {
        Box::new(Passive)
    }

    // -----------------------------------------------------------------------
    // Test: attach classifies the three categories
    // -----------------------------------------------------------------------
    #[test]
    fn attach_classifies_categories() {
        let mut tree = ModelTree::new("top");
        let shell = tree.add_coupled(tree.root(), "shell").unwrap();
        let a = tree.add_atomic(shell, "a", leaf()).unwrap();
        let b = tree.add_atomic(shell, "b", leaf()).unwrap();

        let a_out = tree.add_output_port(a, "out").unwrap();
        let b_in = tree.add_input_port(b, "in").unwrap();
        let shell_in = tree.add_input_port(shell, "in").unwrap();
        let shell_out = tree.add_output_port(shell, "out").unwrap();

        assert_eq!(tree.attach(a_out, b_in).unwrap(), CouplingKind::Internal);
        assert_eq!(
            tree.attach(shell_in, b_in).unwrap(),
            CouplingKind::ExternalInput
        );
        assert_eq!(
            tree.attach(a_out, shell_out).unwrap(),
            CouplingKind::ExternalOutput
        );

        // All three land on the shell, and source-port iteration sees the
        // two couplings leaving `a.out`.
        assert_eq!(tree.couplings(shell).len(), 3);
        let from_a: Vec<CouplingKind> =
            tree.couplings_from(shell, a_out).map(|c| c.kind).collect();
        assert_eq!(
            from_a,
            vec![CouplingKind::Internal, CouplingKind::ExternalOutput]
        );
    }

    // -----------------------------------------------------------------------
    // Test: feedback and cross-boundary couplings rejected
    // -----------------------------------------------------------------------
    #[test]
    fn attach_rejects_feedback_and_cross_boundary() {
        let mut tree = ModelTree::new("top");
        let shell = tree.add_coupled(tree.root(), "shell").unwrap();
        let a = tree.add_atomic(shell, "a", leaf()).unwrap();
        let outsider = tree.add_atomic(tree.root(), "outsider", leaf()).unwrap();

        let a_out = tree.add_output_port(a, "out").unwrap();
        let a_in = tree.add_input_port(a, "in").unwrap();
        let outsider_in = tree.add_input_port(outsider, "in").unwrap();

        assert!(matches!(
            tree.attach(a_out, a_in),
            Err(CouplingError::Feedback { .. })
        ));
        assert!(matches!(
            tree.attach(a_out, a_out),
            Err(CouplingError::Feedback { .. })
        ));
        // `a` and `outsider` live under different parents.
        assert!(matches!(
            tree.attach(a_out, outsider_in),
            Err(CouplingError::Invalid { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Test: wrong polarity rejected
    // -----------------------------------------------------------------------
    #[test]
    fn attach_rejects_wrong_polarity() {
        let mut tree = ModelTree::new("top");
        let a = tree.add_atomic(tree.root(), "a", leaf()).unwrap();
        let b = tree.add_atomic(tree.root(), "b", leaf()).unwrap();
        let a_in = tree.add_input_port(a, "in").unwrap();
        let b_in = tree.add_input_port(b, "in").unwrap();

        assert!(matches!(
            tree.attach(a_in, b_in),
            Err(CouplingError::Invalid { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Test: duplicate couplings are idempotent
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_couplings_idempotent() {
        let mut tree = ModelTree::new("top");
        let a = tree.add_atomic(tree.root(), "a", leaf()).unwrap();
        let b = tree.add_atomic(tree.root(), "b", leaf()).unwrap();
        let a_out = tree.add_output_port(a, "out").unwrap();
        let b_in = tree.add_input_port(b, "in").unwrap();

        tree.attach(a_out, b_in).unwrap();
        tree.attach(a_out, b_in).unwrap();
        assert_eq!(tree.route(a_out), vec![b_in]);
    }

    // -----------------------------------------------------------------------
    // Test: port redeclaration returns the original id
    // -----------------------------------------------------------------------
    #[test]
    fn port_redeclaration_is_idempotent() {
        let mut tree = ModelTree::new("top");
        let a = tree.add_atomic(tree.root(), "a", leaf()).unwrap();
        let p1 = tree.add_output_port(a, "out").unwrap();
        let p2 = tree.add_output_port(a, "out").unwrap();
        assert_eq!(p1, p2);
        // Same name, other mode, is a distinct port.
        let p3 = tree.add_input_port(a, "out").unwrap();
        assert_ne!(p1, p3);
    }

    // -----------------------------------------------------------------------
    // Test: routing crosses EOC then IC then EIC
    // -----------------------------------------------------------------------
    #[test]
    fn routing_crosses_shells() {
        let mut tree = ModelTree::new("top");
        let gen_shell = tree.add_coupled(tree.root(), "gen").unwrap();
        let recv_shell = tree.add_coupled(tree.root(), "recv").unwrap();
        let g = tree.add_atomic(gen_shell, "g", leaf()).unwrap();
        let r = tree.add_atomic(recv_shell, "r", leaf()).unwrap();

        let g_out = tree.add_output_port(g, "out").unwrap();
        let gen_out = tree.add_output_port(gen_shell, "out").unwrap();
        let recv_in = tree.add_input_port(recv_shell, "in").unwrap();
        let r_in = tree.add_input_port(r, "in").unwrap();

        tree.attach_output(g_out, gen_out).unwrap();
        tree.attach_internal(gen_out, recv_in).unwrap();
        tree.attach_input(recv_in, r_in).unwrap();

        assert_eq!(tree.route(g_out), vec![r_in]);
    }

    // -----------------------------------------------------------------------
    // Test: fan-out multiplicity preserved along distinct paths
    // -----------------------------------------------------------------------
    #[test]
    fn routing_preserves_multiplicity() {
        let mut tree = ModelTree::new("top");
        let g = tree.add_atomic(tree.root(), "g", leaf()).unwrap();
        let r = tree.add_atomic(tree.root(), "r", leaf()).unwrap();
        let s = tree.add_atomic(tree.root(), "s", leaf()).unwrap();

        let g_out = tree.add_output_port(g, "out").unwrap();
        let r_in = tree.add_input_port(r, "in").unwrap();
        let s_in = tree.add_input_port(s, "in").unwrap();

        tree.attach(g_out, r_in).unwrap();
        tree.attach(g_out, s_in).unwrap();

        assert_eq!(tree.route(g_out), vec![r_in, s_in]);
    }

    // -----------------------------------------------------------------------
    // Test: flattening preserves delivered pairs and leaves only atomics
    // -----------------------------------------------------------------------
    #[test]
    fn flatten_preserves_pairs() {
        let mut tree = ModelTree::new("top");
        let gen_shell = tree.add_coupled(tree.root(), "gen").unwrap();
        let g1 = tree.add_atomic(gen_shell, "g1", leaf()).unwrap();
        let g2 = tree.add_atomic(gen_shell, "g2", leaf()).unwrap();
        let r = tree.add_atomic(tree.root(), "r", leaf()).unwrap();

        let g1_out = tree.add_output_port(g1, "out").unwrap();
        let g2_out = tree.add_output_port(g2, "out").unwrap();
        let gen_out = tree.add_output_port(gen_shell, "out").unwrap();
        let r_in = tree.add_input_port(r, "in").unwrap();

        tree.attach(g1_out, gen_out).unwrap();
        tree.attach(g2_out, gen_out).unwrap();
        tree.attach(gen_out, r_in).unwrap();

        let before_g1 = tree.route(g1_out);
        let before_g2 = tree.route(g2_out);

        tree.flatten();

        assert!(!tree.contains(gen_shell));
        assert_eq!(tree.children(tree.root()), &[g1, g2, r]);
        assert_eq!(tree.route(g1_out), before_g1);
        assert_eq!(tree.route(g2_out), before_g2);
        assert_eq!(tree.route(g1_out), vec![r_in]);
    }

    // -----------------------------------------------------------------------
    // Test: collector rejects foreign hosts and non-output ports
    // -----------------------------------------------------------------------
    #[test]
    fn collector_validates_posts() {
        let mut tree = ModelTree::new("top");
        let a = tree.add_atomic(tree.root(), "a", leaf()).unwrap();
        let b = tree.add_atomic(tree.root(), "b", leaf()).unwrap();
        let a_out = tree.add_output_port(a, "out").unwrap();
        let a_in = tree.add_input_port(a, "in").unwrap();
        let b_out = tree.add_output_port(b, "out").unwrap();

        let mut collector = OutputCollector::new(a, &tree.nodes, &tree.ports);
        collector.post(Value::from(1i64), a_out).unwrap();
        assert!(matches!(
            collector.post(Value::from(2i64), b_out),
            Err(PortError::InvalidHost { .. })
        ));
        assert!(matches!(
            collector.post(Value::from(3i64), a_in),
            Err(PortError::NotAnOutput { .. })
        ));
        assert!(matches!(
            collector.post_named(Value::from(4i64), "missing"),
            Err(PortError::NoSuchPort { .. })
        ));

        collector.post_named(Value::from(5i64), "out").unwrap();
        assert_eq!(collector.into_staged().len(), 2);
    }

    // -----------------------------------------------------------------------
    // Test: children cannot be added under an atomic
    // -----------------------------------------------------------------------
    #[test]
    fn atomic_cannot_have_children() {
        let mut tree = ModelTree::new("top");
        let a = tree.add_atomic(tree.root(), "a", leaf()).unwrap();
        assert!(matches!(
            tree.add_atomic(a, "child", leaf()),
            Err(CouplingError::NotCoupled { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Test: traversal orders are deterministic
    // -----------------------------------------------------------------------
    #[test]
    fn traversal_orders() {
        let mut tree = ModelTree::new("top");
        let shell = tree.add_coupled(tree.root(), "shell").unwrap();
        let a = tree.add_atomic(shell, "a", leaf()).unwrap();
        let b = tree.add_atomic(tree.root(), "b", leaf()).unwrap();
        let c = tree.add_atomic(shell, "c", leaf()).unwrap();

        assert_eq!(tree.atomics(), vec![a, c, b]);
        assert_eq!(tree.coupleds_postorder(), vec![shell, tree.root()]);
    }
}
