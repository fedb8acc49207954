//! The directed graph of nodes, variables and procedures.
//!
//! A `Topology` owns every node's variables in a dense `Registry`. Derived and
//! interpolated variables keep lookup-only links to their origins and are
//! re-synthesized from current origin data on every read.

use crate::compute::synthesis;
use crate::error::ConfigurationError;
use crate::plan::Procedure;
use crate::store::{
    Node, NodeId, Registry, SlotId, TimeGrid, TimeSeries, VarId, VariableKind, VariableMetadata, VariableRef,
    VariableSpecKind,
};
use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Identity and location of a node; its variables live in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    pub location: Option<(f64, f64)>,
    pub grid: TimeGrid,
    pub variables: IndexMap<VarId, SlotId>,
}

/// Vertex of the exported dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphVertex {
    Variable { reference: VariableRef, kind: &'static str },
    Procedure { id: String, function: &'static str },
}

/// Edge of the exported dependency graph, pointing from data source to
/// consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEdge {
    /// Origin variable feeds a derived/interpolated variable.
    Origin,
    /// Variable feeds the named boundary of a procedure.
    Boundary(String),
    /// Procedure writes the named output into a variable.
    Output(String),
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: IndexMap<NodeId, NodeInfo>,
    registry: Registry,
}

impl Topology {
    /// Builds the topology and resolves every origin reference. Fails fast on
    /// the first unresolvable reference or origin cycle.
    pub fn new(nodes: Vec<Node>) -> Result<Self, ConfigurationError> {
        let mut topo = Topology::default();

        // 1. Allocate one slot per declared variable.
        for node in &nodes {
            if topo.nodes.contains_key(&node.id) {
                return Err(ConfigurationError::DuplicateNode(node.id));
            }
            let mut vars = IndexMap::new();
            for (var_id, spec) in &node.variables {
                let kind = match &spec.kind {
                    VariableSpecKind::Observed { sources } => VariableKind::Observed { sources: sources.clone() },
                    VariableSpecKind::Derived { offset, .. } => VariableKind::Derived { origin: *offset },
                    VariableSpecKind::Interpolated { first, second, coefficient } => {
                        if !(0.0..=1.0).contains(coefficient) {
                            return Err(ConfigurationError::InvalidFunctionConfig {
                                function: format!("{}/{}", node.id, var_id),
                                reason: format!("interpolation coefficient {} outside [0, 1]", coefficient),
                            });
                        }
                        VariableKind::Interpolated { first: first.1, second: second.1, coefficient: *coefficient }
                    }
                };
                let meta = VariableMetadata {
                    reference: VariableRef { node_id: node.id, var_id: var_id.clone() },
                    name: spec.name.clone(),
                    unit: spec.unit.clone(),
                };
                let slot = topo.registry.add_slot(kind, meta, node.grid);
                vars.insert(var_id.clone(), slot);
            }
            topo.nodes.insert(node.id, NodeInfo {
                id: node.id,
                name: node.name.clone(),
                location: node.location,
                grid: node.grid,
                variables: vars,
            });
        }

        // 2. Resolve origins into non-owning slot links.
        for node in &nodes {
            for (var_id, spec) in &node.variables {
                let origins: Vec<&VariableRef> = match &spec.kind {
                    VariableSpecKind::Observed { .. } => continue,
                    VariableSpecKind::Derived { origin, .. } => vec![origin],
                    VariableSpecKind::Interpolated { first, second, .. } => vec![&first.0, &second.0],
                };
                let referrer = format!("{}/{}", node.id, var_id);
                let parents = origins
                    .into_iter()
                    .map(|r| topo.resolve_for(r, &referrer))
                    .collect::<Result<Vec<_>, _>>()?;
                let slot = topo.nodes[&node.id].variables[var_id];
                topo.registry.set_parents(slot, &parents);
            }
        }

        // 3. Synthesized variables must not (transitively) originate from themselves.
        topo.check_origin_cycles()?;
        debug!(nodes = topo.nodes.len(), variables = topo.registry.count(), "topology resolved");
        Ok(topo)
    }

    fn resolve_for(&self, reference: &VariableRef, referrer: &str) -> Result<SlotId, ConfigurationError> {
        if let Some(slot) = self.registry.lookup(reference) {
            return Ok(slot);
        }
        if self.nodes.contains_key(&reference.node_id) {
            Err(ConfigurationError::VariableNotFound { node_id: reference.node_id, var_id: reference.var_id.clone() })
        } else {
            Err(ConfigurationError::OriginNotFound { node_id: reference.node_id, referrer: referrer.to_string() })
        }
    }

    /// Looks up the slot of `(node_id, var_id)`.
    pub fn slot(&self, reference: &VariableRef) -> Result<SlotId, ConfigurationError> {
        self.resolve_for(reference, &reference.to_string())
    }

    fn check_origin_cycles(&self) -> Result<(), ConfigurationError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum VisitState {
            None,
            Visiting,
            Visited,
        }

        fn visit(reg: &Registry, slot: SlotId, state: &mut [VisitState], stack: &mut Vec<SlotId>) -> Result<(), Vec<SlotId>> {
            match state[slot.index()] {
                VisitState::Visited => return Ok(()),
                VisitState::Visiting => {
                    let start = stack.iter().position(|s| *s == slot).unwrap_or(0);
                    return Err(stack[start..].to_vec());
                }
                VisitState::None => state[slot.index()] = VisitState::Visiting,
            }
            stack.push(slot);
            for &parent in reg.get_parents(slot) {
                visit(reg, parent, state, stack)?;
            }
            stack.pop();
            state[slot.index()] = VisitState::Visited;
            Ok(())
        }

        let mut state = vec![VisitState::None; self.registry.count()];
        let mut stack = Vec::new();
        for i in 0..self.registry.count() {
            if let Err(cycle) = visit(&self.registry, SlotId::new(i), &mut state, &mut stack) {
                return Err(ConfigurationError::CyclicDependency(cycle.into_iter().map(|s| self.label(s)).collect()));
            }
        }
        Ok(())
    }

    // --- Accessors ---

    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> { self.nodes.values() }
    pub fn node(&self, id: NodeId) -> Option<&NodeInfo> { self.nodes.get(&id) }
    pub fn kind(&self, slot: SlotId) -> &VariableKind { &self.registry.kinds[slot.index()] }
    pub fn grid(&self, slot: SlotId) -> &TimeGrid { &self.registry.grids[slot.index()] }
    pub fn reference(&self, slot: SlotId) -> &VariableRef { &self.registry.meta[slot.index()].reference }
    pub fn label(&self, slot: SlotId) -> String { self.reference(slot).to_string() }
    pub fn origins(&self, slot: SlotId) -> &[SlotId] { self.registry.get_parents(slot) }

    /// Whether an observed slot has received data.
    pub fn is_loaded(&self, slot: SlotId) -> bool { self.registry.data[slot.index()].is_some() }

    // --- Data flow ---

    /// Current data of a variable on its node's grid. Synthesized variables
    /// are recomputed from their origins' current data on every call.
    pub fn series(&self, slot: SlotId) -> TimeSeries {
        let grid = self.grid(slot);
        match self.kind(slot) {
            VariableKind::Observed { .. } => match &self.registry.data[slot.index()] {
                Some(s) => s.clone(),
                None => grid.empty_series(),
            },
            VariableKind::Derived { origin } => {
                let source = self.series(self.origins(slot)[0]);
                synthesis::derive(&source, origin, grid)
            }
            VariableKind::Interpolated { first, second, coefficient } => {
                let parents = self.origins(slot);
                let a = self.series(parents[0]);
                let b = self.series(parents[1]);
                synthesis::interpolate((&a, first), (&b, second), *coefficient, grid)
            }
        }
    }

    pub fn series_of(&self, reference: &VariableRef) -> Result<TimeSeries, ConfigurationError> {
        Ok(self.series(self.slot(reference)?))
    }

    /// Replaces an observed variable's data, re-sampled onto its node grid.
    pub fn store(&mut self, slot: SlotId, series: &TimeSeries) -> Result<(), ConfigurationError> {
        if self.kind(slot).is_synthesized() {
            return Err(ConfigurationError::NotWritable(self.label(slot)));
        }
        let aligned = series.aligned_to(self.grid(slot));
        self.registry.data[slot.index()] = Some(aligned);
        Ok(())
    }

    pub fn store_ref(&mut self, reference: &VariableRef, series: &TimeSeries) -> Result<(), ConfigurationError> {
        let slot = self.slot(reference)?;
        self.store(slot, series)
    }

    // --- Graph algorithms ---

    /// All slots the given slots read from, transitively, including themselves.
    pub fn upstream_from(&self, start: &[SlotId]) -> HashSet<SlotId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from(start.to_vec());
        while let Some(slot) = queue.pop_front() {
            if visited.insert(slot) {
                queue.extend(self.registry.get_parents(slot).iter().copied());
            }
        }
        visited
    }

    /// All slots synthesized (transitively) from the given slots, including
    /// themselves.
    pub fn downstream_from(&self, start: &[SlotId]) -> HashSet<SlotId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from(start.to_vec());
        while let Some(slot) = queue.pop_front() {
            if visited.insert(slot) {
                queue.extend(self.registry.children(slot));
            }
        }
        visited
    }

    /// Procedure-to-procedure dependencies: `(a, b)` means `b` reads, through
    /// its boundaries and their origins, a variable `a` writes.
    pub fn procedure_edges(&self, procedures: &[Procedure]) -> Vec<(usize, usize)> {
        let mut writers: HashMap<SlotId, Vec<usize>> = HashMap::new();
        for (i, p) in procedures.iter().enumerate() {
            for slot in p.writes() {
                writers.entry(slot).or_default().push(i);
            }
        }
        let mut edges = BTreeSet::new();
        for (b, p) in procedures.iter().enumerate() {
            let reads: Vec<SlotId> = p.reads().collect();
            for slot in self.upstream_from(&reads) {
                for &a in writers.get(&slot).map(Vec::as_slice).unwrap_or(&[]) {
                    edges.insert((a, b));
                }
            }
        }
        edges.into_iter().collect()
    }

    /// Returns procedure indices in a valid execution order. Among procedures
    /// that are ready at the same time, declaration order wins.
    pub fn execution_order(&self, procedures: &[Procedure]) -> Result<Vec<usize>, ConfigurationError> {
        let count = procedures.len();
        let edges = self.procedure_edges(procedures);
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for &(a, b) in &edges {
            in_degree[b] += 1;
            dependents[a].push(b);
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &d in &dependents[next] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        if order.len() != count {
            return Err(ConfigurationError::CyclicDependency(Self::cycle_members(procedures, &edges)));
        }
        Ok(order)
    }

    fn cycle_members(procedures: &[Procedure], edges: &[(usize, usize)]) -> Vec<String> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let idx: Vec<NodeIndex> = (0..procedures.len()).map(|i| graph.add_node(i)).collect();
        for &(a, b) in edges {
            graph.add_edge(idx[a], idx[b], ());
        }
        let mut members: Vec<usize> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || edges.iter().any(|&(a, b)| a == b && idx[a] == scc[0]))
            .flatten()
            .map(|n| graph[n])
            .collect();
        members.sort_unstable();
        members.into_iter().map(|i| procedures[i].id.clone()).collect()
    }

    /// Exports variables and procedures as a typed directed graph.
    pub fn dependency_graph(&self, procedures: &[Procedure]) -> DiGraph<GraphVertex, GraphEdge> {
        let mut graph = DiGraph::new();
        let slots: Vec<NodeIndex> = (0..self.registry.count())
            .map(|i| {
                let slot = SlotId::new(i);
                graph.add_node(GraphVertex::Variable { reference: self.reference(slot).clone(), kind: self.kind(slot).label() })
            })
            .collect();

        for (i, &vertex) in slots.iter().enumerate() {
            for parent in self.registry.get_parents(SlotId::new(i)) {
                graph.add_edge(slots[parent.index()], vertex, GraphEdge::Origin);
            }
        }

        for p in procedures {
            let v = graph.add_node(GraphVertex::Procedure { id: p.id.clone(), function: p.function.type_tag() });
            for (name, slot) in p.boundary_wiring() {
                graph.add_edge(slots[slot.index()], v, GraphEdge::Boundary(name.to_string()));
            }
            for (name, slot) in p.output_wiring() {
                graph.add_edge(v, slots[slot.index()], GraphEdge::Output(name.to_string()));
            }
        }
        graph
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{Offset, VariableRef as V};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub(crate) fn day(d: i64) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d) }

    pub(crate) fn ten_days() -> TimeGrid { TimeGrid::new(day(0), day(9), Duration::days(1)).unwrap() }

    fn basin() -> Vec<Node> {
        vec![
            Node::new(1, "upstream", ten_days()).observed("Q"),
            Node::new(2, "downstream", ten_days())
                .observed("Q")
                .derived("Qlag", V::new(1, "Q"), Offset { x_offset: Duration::days(1), y_offset: 0.5 })
                .interpolated("Qmix", (V::new(1, "Q"), Offset::zero()), (V::new(2, "Q"), Offset::zero()), 0.5),
        ]
    }

    #[test]
    fn test_missing_origin_node() {
        let nodes = vec![Node::new(2, "d", ten_days()).derived("Qlag", V::new(9, "Q"), Offset::zero())];
        let err = Topology::new(nodes).unwrap_err();
        assert!(matches!(err, ConfigurationError::OriginNotFound { node_id: NodeId(9), .. }));
    }

    #[test]
    fn test_missing_origin_variable() {
        let nodes = vec![
            Node::new(1, "u", ten_days()).observed("Q"),
            Node::new(2, "d", ten_days()).derived("Hlag", V::new(1, "H"), Offset::zero()),
        ];
        let err = Topology::new(nodes).unwrap_err();
        assert!(matches!(err, ConfigurationError::VariableNotFound { .. }));
    }

    #[test]
    fn test_origin_cycle_rejected() {
        let nodes = vec![Node::new(1, "n", ten_days())
            .derived("A", V::new(1, "B"), Offset::zero())
            .derived("B", V::new(1, "A"), Offset::zero())];
        assert!(matches!(Topology::new(nodes), Err(ConfigurationError::CyclicDependency(_))));
    }

    #[test]
    fn test_coefficient_out_of_range() {
        let nodes = vec![Node::new(1, "n", ten_days()).observed("A").interpolated(
            "C",
            (V::new(1, "A"), Offset::zero()),
            (V::new(1, "A"), Offset::zero()),
            1.5,
        )];
        assert!(Topology::new(nodes).is_err());
    }

    #[test]
    fn test_synthesized_reads_follow_origin_updates() {
        let mut topo = Topology::new(basin()).unwrap();
        let grid = ten_days();
        topo.store_ref(&V::new(1, "Q"), &grid.series(vec![1.0; 10])).unwrap();

        let lagged = topo.series_of(&V::new(2, "Qlag")).unwrap();
        assert_eq!(lagged.get(day(0)), None);
        assert_eq!(lagged.get(day(1)), Some(1.5));

        // Upstream update is visible on the next read.
        topo.store_ref(&V::new(1, "Q"), &grid.series(vec![3.0; 10])).unwrap();
        assert_eq!(topo.series_of(&V::new(2, "Qlag")).unwrap().get(day(1)), Some(3.5));

        // Mix is missing until the second origin has data.
        assert_eq!(topo.series_of(&V::new(2, "Qmix")).unwrap().missing_count(), 10);
        topo.store_ref(&V::new(2, "Q"), &grid.series(vec![1.0; 10])).unwrap();
        assert_eq!(topo.series_of(&V::new(2, "Qmix")).unwrap().get(day(4)), Some(2.0));
    }

    #[test]
    fn test_synthesized_variables_not_writable() {
        let mut topo = Topology::new(basin()).unwrap();
        let err = topo.store_ref(&V::new(2, "Qlag"), &ten_days().empty_series()).unwrap_err();
        assert!(matches!(err, ConfigurationError::NotWritable(_)));
    }

    #[test]
    fn test_upstream_and_downstream() {
        let topo = Topology::new(basin()).unwrap();
        let up_q = topo.slot(&V::new(1, "Q")).unwrap();
        let mix = topo.slot(&V::new(2, "Qmix")).unwrap();
        let down_q = topo.slot(&V::new(2, "Q")).unwrap();

        let up = topo.upstream_from(&[mix]);
        assert!(up.contains(&up_q) && up.contains(&down_q) && up.contains(&mix));

        let down = topo.downstream_from(&[up_q]);
        assert_eq!(down.len(), 3);
    }
}
