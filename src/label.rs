//! Bytecode position markers and the control-flow edges hung off them.
//!
//! Labels and edges form a graph that's naturally cyclic once exception
//! handlers and backward jumps enter the picture, which is awkward to express
//! with `Rc<RefCell<_>>` in safe Rust. Instead a `MethodWriter` owns a single
//! `LabelArena`; every `Label` a caller holds is just an index into it, and
//! `Edge`s chain through the arena by index rather than by pointer.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Default)]
    pub struct LabelFlags: u8 {
        /// Marks a label used only for carrying line-number/debug info, never
        /// targeted by a jump or exception range.
        const DEBUG_ONLY = 0x01;
        const JUMP_TARGET = 0x02;
        const RESOLVED = 0x04;
        const REACHABLE = 0x08;
    }
}

/// A pending forward jump: the bytecode offset of the 2- or 4-byte operand
/// slot still waiting on this label's resolved offset, and whether the slot
/// is wide (`goto_w`/`jsr_w`, 4 bytes) or short (2 bytes).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ForwardReference {
    pub operand_offset: u32,
    pub wide: bool,
}

/// Opaque handle into a `LabelArena`. Cheap to copy, compares by identity.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Label(u32);

impl Label {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
struct LabelData {
    flags: LabelFlags,
    bytecode_offset: u32,
    line_numbers: Vec<u16>,
    forward_references: Vec<ForwardReference>,
}

/// Exception-handling edges use this reserved `info` value to distinguish
/// themselves from ordinary control-flow jumps when the frame analyzer walks
/// the successor chain.
pub const EDGE_EXCEPTION: i32 = -1;

#[derive(Debug, Clone)]
pub struct Edge {
    pub info: i32,
    pub successor: Label,
    pub next_edge: Option<u32>,
}

#[derive(Debug, Default)]
pub struct LabelArena {
    labels: Vec<LabelData>,
    edges: Vec<Edge>,
    /// Head of each label's outgoing-edge list, indexed by `Label`.
    edge_heads: Vec<Option<u32>>,
}

impl LabelArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelData::default());
        self.edge_heads.push(None);
        Label((self.labels.len() - 1) as u32)
    }

    pub fn is_resolved(&self, label: Label) -> bool {
        self.labels[label.index()].flags.contains(LabelFlags::RESOLVED)
    }

    pub fn offset(&self, label: Label) -> Option<u32> {
        self.is_resolved(label)
            .then(|| self.labels[label.index()].bytecode_offset)
    }

    /// Binds `label` to `offset`, marking it resolved. Returns the forward
    /// references that were waiting on it so the caller can patch them into
    /// the code buffer.
    pub fn resolve(&mut self, label: Label, offset: u32) -> Vec<ForwardReference> {
        let data = &mut self.labels[label.index()];
        data.bytecode_offset = offset;
        data.flags.insert(LabelFlags::RESOLVED);
        std::mem::take(&mut data.forward_references)
    }

    pub fn add_forward_reference(&mut self, label: Label, reference: ForwardReference) {
        self.labels[label.index()]
            .forward_references
            .push(reference);
    }

    pub fn mark_jump_target(&mut self, label: Label) {
        self.labels[label.index()]
            .flags
            .insert(LabelFlags::JUMP_TARGET);
    }

    pub fn is_jump_target(&self, label: Label) -> bool {
        self.labels[label.index()]
            .flags
            .contains(LabelFlags::JUMP_TARGET)
    }

    pub fn mark_reachable(&mut self, label: Label) {
        self.labels[label.index()]
            .flags
            .insert(LabelFlags::REACHABLE);
    }

    pub fn is_reachable(&self, label: Label) -> bool {
        self.labels[label.index()]
            .flags
            .contains(LabelFlags::REACHABLE)
    }

    pub fn add_line_number(&mut self, label: Label, line_number: u16) {
        self.labels[label.index()].line_numbers.push(line_number);
    }

    pub fn line_numbers(&self, label: Label) -> &[u16] {
        &self.labels[label.index()].line_numbers
    }

    /// Adds a control-flow edge from `source` to `successor`, threading it
    /// onto `source`'s existing outgoing-edge list.
    pub fn add_edge(&mut self, source: Label, successor: Label, info: i32) {
        let next = self.edge_heads[source.index()];
        self.edges.push(Edge {
            info,
            successor,
            next_edge: next,
        });
        self.edge_heads[source.index()] = Some((self.edges.len() - 1) as u32);
    }

    /// Iterates the outgoing edges of `source` in the order they were added
    /// (oldest first), the order the frame analyzer's fix-point work list
    /// expects.
    pub fn edges_from(&self, source: Label) -> Vec<&Edge> {
        let mut out = Vec::new();
        let mut cursor = self.edge_heads[source.index()];
        while let Some(index) = cursor {
            let edge = &self.edges[index as usize];
            out.push(edge);
            cursor = edge.next_edge;
        }
        out.reverse();
        out
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolving_a_label_returns_pending_forward_references() {
        let mut arena = LabelArena::new();
        let label = arena.new_label();
        arena.add_forward_reference(
            label,
            ForwardReference {
                operand_offset: 4,
                wide: false,
            },
        );
        let pending = arena.resolve(label, 10);
        assert_eq!(pending.len(), 1);
        assert!(arena.is_resolved(label));
        assert_eq!(arena.offset(label), Some(10));
    }

    #[test]
    fn edges_preserve_insertion_order() {
        let mut arena = LabelArena::new();
        let source = arena.new_label();
        let a = arena.new_label();
        let b = arena.new_label();
        arena.add_edge(source, a, 0);
        arena.add_edge(source, b, 0);
        let successors: Vec<_> = arena
            .edges_from(source)
            .into_iter()
            .map(|edge| edge.successor)
            .collect();
        assert_eq!(successors, vec![a, b]);
    }
}
