use super::series::{TimeGrid, TimeSeries};
use super::types::*;
use std::collections::HashMap;

/// Columnar storage for every variable slot of a topology.
///
/// Origins are kept as a CSR parent list of `SlotId`s: lookup-only relations,
/// the registry owns every slot and no slot owns another.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    // Columnar arrays
    pub kinds: Vec<VariableKind>,
    pub meta: Vec<VariableMetadata>,
    pub grids: Vec<TimeGrid>,

    // Origins (CSR)
    pub parents_flat: Vec<SlotId>,
    pub parents_ranges: Vec<(u32, u32)>, // (start, count)

    // Downstream traversal helpers
    pub first_child: Vec<u32>,
    pub child_targets: Vec<SlotId>,
    pub next_child: Vec<u32>,

    // Materialized data for observed slots
    pub data: Vec<Option<TimeSeries>>,

    lookup: HashMap<VariableRef, SlotId>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.kinds.len() }

    /// Appends a slot. Origins are attached later with `set_parents`, once
    /// every slot exists and references can be resolved.
    pub fn add_slot(&mut self, kind: VariableKind, meta: VariableMetadata, grid: TimeGrid) -> SlotId {
        let id = SlotId::new(self.kinds.len());
        self.lookup.insert(meta.reference.clone(), id);
        self.kinds.push(kind);
        self.meta.push(meta);
        self.grids.push(grid);
        self.parents_ranges.push((0, 0));
        self.first_child.push(u32::MAX);
        self.data.push(None);
        id
    }

    pub fn set_parents(&mut self, id: SlotId, parents: &[SlotId]) {
        let start = self.parents_flat.len() as u32;
        self.parents_flat.extend_from_slice(parents);
        self.parents_ranges[id.index()] = (start, parents.len() as u32);

        for &parent in parents {
            let p_idx = parent.index();
            let head = self.first_child[p_idx];
            let new_edge = self.child_targets.len() as u32;
            self.child_targets.push(id);
            self.next_child.push(head);
            self.first_child[p_idx] = new_edge;
        }
    }

    pub fn lookup(&self, reference: &VariableRef) -> Option<SlotId> {
        self.lookup.get(reference).copied()
    }

    #[inline(always)]
    pub fn get_parents(&self, id: SlotId) -> &[SlotId] {
        let (start, count) = self.parents_ranges[id.index()];
        &self.parents_flat[start as usize..(start + count) as usize]
    }

    pub fn children(&self, id: SlotId) -> Vec<SlotId> {
        let mut out = Vec::new();
        let mut edge_idx = self.first_child[id.index()];
        while edge_idx != u32::MAX {
            out.push(self.child_targets[edge_idx as usize]);
            edge_idx = self.next_child[edge_idx as usize];
        }
        out
    }
}
