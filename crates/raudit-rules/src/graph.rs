//! The compiled decision graph: an arena of reference-counted nodes.
//!
//! Rule chaining produces a DAG, not a tree — grafting makes one rule's
//! root reachable from the previous rule's false frontier and, under
//! `continue`, from its true leaf as well — so nodes carry explicit
//! reference counts and a slot is reclaimed only when the last incoming
//! edge disappears. The grammar never creates a back-edge, so release
//! cannot cycle.

/// Handle to a node slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Handle to a test instance owned by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestId(pub(crate) u32);

/// Handle to an action instance owned by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub(crate) u32);

/// The flags and ordered actions attached to a rule's match leaf.
#[derive(Debug, Default, Clone)]
pub struct RuleBody {
    pub deny: bool,
    pub drop: bool,
    pub cont: bool,
    pub actions: Vec<ActionId>,
}

/// One decision node.
///
/// Evaluation applies `body` (if any), then branches through `test` to
/// `on_true`/`on_false`; a node without a test follows `jump` — the
/// graft edge to the next rule — or terminates.
#[derive(Debug, Default)]
pub struct RuleNode {
    pub test: Option<TestId>,
    pub on_true: Option<NodeId>,
    pub on_false: Option<NodeId>,
    pub jump: Option<NodeId>,
    pub body: Option<RuleBody>,
    pub(crate) refs: u32,
}

/// Node storage with a free list for slot reuse.
#[derive(Debug, Default)]
pub struct NodeArena {
    slots: Vec<Option<RuleNode>>,
    free: Vec<u32>,
}

impl NodeArena {
    pub fn new() -> NodeArena {
        NodeArena::default()
    }

    /// Allocate a slot for `node` with a reference count of zero; the
    /// count rises as edges (or chain-root ownership) attach.
    pub fn alloc(&mut self, node: RuleNode) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Allocate an empty leaf (no test, no edges, no body).
    pub fn alloc_leaf(&mut self) -> NodeId {
        self.alloc(RuleNode::default())
    }

    pub fn get(&self, id: NodeId) -> &RuleNode {
        self.slots[id.0 as usize].as_ref().expect("live node")
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut RuleNode {
        self.slots[id.0 as usize].as_mut().expect("live node")
    }

    pub fn refs(&self, id: NodeId) -> u32 {
        self.get(id).refs
    }

    pub fn incref(&mut self, id: NodeId) {
        self.get_mut(id).refs += 1;
    }

    /// Drop one reference; when the count reaches zero the slot is
    /// released and the node's outgoing edges are dropped in turn.
    /// Iterative so a long chain cannot blow the stack.
    pub fn decref(&mut self, id: NodeId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let node = self.get_mut(id);
            debug_assert!(node.refs > 0, "decref of unreferenced node");
            node.refs -= 1;
            if node.refs == 0 {
                let node = self.slots[id.0 as usize].take().expect("live node");
                self.free.push(id.0);
                pending.extend([node.on_true, node.on_false, node.jump].into_iter().flatten());
            }
        }
    }

    /// Graft `target` onto a frontier leaf: the leaf's continuation edge
    /// is pointed at `target`, which gains a reference. This is what
    /// makes a grafted rule root shared — and refcounted — rather than
    /// copied.
    pub fn graft(&mut self, leaf: NodeId, target: NodeId) {
        debug_assert!(self.get(leaf).test.is_none(), "graft onto a test node");
        debug_assert!(self.get(leaf).jump.is_none(), "leaf already grafted");
        self.get_mut(leaf).jump = Some(target);
        self.incref(target);
    }

    /// Number of live nodes.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Release every slot unconditionally. Teardown path: refcounts on
    /// an abandoned half-built graph no longer describe reachability.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(arena: &mut NodeArena, t: NodeId, f: NodeId) -> NodeId {
        let id = arena.alloc(RuleNode {
            test: Some(TestId(0)),
            on_true: Some(t),
            on_false: Some(f),
            ..Default::default()
        });
        arena.incref(t);
        arena.incref(f);
        id
    }

    #[test]
    fn test_alloc_and_release() {
        let mut arena = NodeArena::new();
        let t = arena.alloc_leaf();
        let f = arena.alloc_leaf();
        let root = test_node(&mut arena, t, f);
        arena.incref(root);
        assert_eq!(arena.live(), 3);

        arena.decref(root);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_shared_node_survives_one_release() {
        let mut arena = NodeArena::new();
        let t = arena.alloc_leaf();
        let f = arena.alloc_leaf();
        // Two parents over the same true leaf.
        let a = test_node(&mut arena, t, f);
        let b = test_node(&mut arena, t, f);
        arena.incref(a);
        arena.incref(b);
        assert_eq!(arena.refs(t), 2);

        arena.decref(a);
        // t and f are still held by b.
        assert_eq!(arena.refs(t), 1);
        assert_eq!(arena.live(), 3);

        arena.decref(b);
        assert_eq!(arena.live(), 0);
    }

    #[test]
    fn test_slot_reuse() {
        let mut arena = NodeArena::new();
        let a = arena.alloc_leaf();
        arena.incref(a);
        arena.decref(a);
        let b = arena.alloc_leaf();
        // The freed slot is reused.
        assert_eq!(a, b);
        assert_eq!(arena.live(), 1);
    }

    #[test]
    fn test_graft_shares_target() {
        let mut arena = NodeArena::new();
        let leaf_a = arena.alloc_leaf();
        let leaf_b = arena.alloc_leaf();
        let next = arena.alloc_leaf();
        arena.graft(leaf_a, next);
        arena.graft(leaf_b, next);
        assert_eq!(arena.refs(next), 2);
        assert_eq!(arena.get(leaf_a).jump, Some(next));
    }

    #[test]
    fn test_deep_chain_release_is_iterative() {
        let mut arena = NodeArena::new();
        let mut head = arena.alloc_leaf();
        arena.incref(head);
        for _ in 0..100_000 {
            let leaf = arena.alloc_leaf();
            let node = test_node(&mut arena, leaf, head);
            // transfer ownership of head to the new node's edge
            arena.decref(head);
            arena.incref(node);
            head = node;
        }
        arena.decref(head);
        assert_eq!(arena.live(), 0);
    }
}
