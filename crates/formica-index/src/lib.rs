//! Spatial indexing for the formica colony simulation.
//!
//! [`Bvh`] maintains a binary tree of fat AABBs over inserted shapes and
//! answers broad-phase "potential collision" queries. Branches live in an
//! arena addressed by index, with explicit parent/child links and a free
//! list, so removal recycles nodes instead of allocating.
//!
//! The pheromone pool uses the same tree algorithm over flat numeric buffers;
//! see [`field`].

use formica_geom::{Aabb, Shape};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use thiserror::Error;

pub mod field;

pub use field::{FieldIndex, FieldLayout, TrailKind};

new_key_type! {
    /// Stable handle for shapes tracked by a [`Bvh`].
    pub struct ShapeKey;
}

/// Errors emitted by the spatial indices.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates a violated tree invariant detected by [`Bvh::validate`].
    #[error("tree invariant violated: {0}")]
    Corrupt(&'static str),
}

/// A tree node reference: either an internal branch or a leaf shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Child {
    Branch(u32),
    Leaf(ShapeKey),
}

#[derive(Debug, Clone)]
struct Branch {
    parent: Option<u32>,
    children: [Child; 2],
    aabb: Aabb,
}

#[derive(Debug, Clone, Copy)]
struct LeafState {
    parent: Option<u32>,
    fat: Aabb,
}

/// Dynamic bounding-volume hierarchy over owned shapes.
///
/// Shapes are stored fat (tight AABB inflated by the shape's padding) so
/// small movements do not touch the tree; [`Bvh::update`] reinserts only
/// bodies whose true AABB escaped their fat bounds.
#[derive(Debug, Default)]
pub struct Bvh {
    shapes: SlotMap<ShapeKey, Shape>,
    leaves: SecondaryMap<ShapeKey, LeafState>,
    branches: Vec<Branch>,
    free: Vec<u32>,
    root: Option<Child>,
    update_scratch: Vec<ShapeKey>,
}

impl Bvh {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns true when no shapes are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Whether `key` refers to a tracked shape.
    #[must_use]
    pub fn contains(&self, key: ShapeKey) -> bool {
        self.shapes.contains_key(key)
    }

    /// Borrow a tracked shape.
    ///
    /// # Panics
    /// Panics when `key` is not tracked; querying a foreign key is a
    /// programmer error.
    #[must_use]
    pub fn get(&self, key: ShapeKey) -> &Shape {
        self.shapes.get(key).expect("shape not tracked by index")
    }

    /// Mutably borrow a tracked shape. Position/angle/scale mutations mark
    /// the shape dirty; the next [`Bvh::update`] folds them into the tree.
    ///
    /// # Panics
    /// Panics when `key` is not tracked.
    #[must_use]
    pub fn get_mut(&mut self, key: ShapeKey) -> &mut Shape {
        self.shapes
            .get_mut(key)
            .expect("shape not tracked by index")
    }

    /// Iterate over tracked shapes.
    pub fn iter(&self) -> impl Iterator<Item = (ShapeKey, &Shape)> {
        self.shapes.iter()
    }

    /// Insert a shape, taking ownership, and return its handle.
    pub fn insert(&mut self, mut shape: Shape) -> ShapeKey {
        shape.refresh();
        let fat = shape.aabb().inflate(shape.padding());
        let key = self.shapes.insert(shape);
        self.leaves.insert(key, LeafState { parent: None, fat });
        self.attach(key, fat);
        key
    }

    /// Remove a shape, returning it.
    ///
    /// # Panics
    /// Panics when `key` is not tracked; removing an already-removed shape
    /// would corrupt tree invariants, so it fails loudly.
    pub fn remove(&mut self, key: ShapeKey) -> Shape {
        assert!(
            self.shapes.contains_key(key),
            "remove of a shape not tracked by index"
        );
        self.detach(key);
        self.leaves.remove(key);
        self.shapes
            .remove(key)
            .expect("shape present per assertion above")
    }

    /// Remove every shape and recycle all branches.
    pub fn clear(&mut self) {
        self.shapes.clear();
        self.leaves.clear();
        self.branches.clear();
        self.free.clear();
        self.root = None;
    }

    /// Refresh tracked shapes and reinsert the ones whose true AABB no
    /// longer fits inside their stored fat AABB.
    pub fn update(&mut self) {
        let mut keys = std::mem::take(&mut self.update_scratch);
        keys.clear();
        keys.extend(self.shapes.keys());
        for key in &keys {
            let shape = &mut self.shapes[*key];
            if shape.is_dirty() {
                shape.refresh();
            }
            let tight = *shape.aabb();
            let padding = shape.padding();
            if !self.leaves[*key].fat.contains(&tight) {
                self.detach(*key);
                let fat = tight.inflate(padding);
                self.leaves[*key].fat = fat;
                self.attach(*key, fat);
            }
        }
        self.update_scratch = keys;
    }

    /// Collect candidate shapes whose AABB overlaps the tracked shape's
    /// AABB, excluding the shape itself. Results are appended to `out`.
    pub fn potentials(&self, key: ShapeKey, out: &mut Vec<ShapeKey>) {
        let query = *self.get(key).aabb();
        self.collect(&query, Some(key), out);
    }

    /// Collect candidate shapes whose AABB overlaps `query`.
    pub fn potentials_in(&self, query: &Aabb, out: &mut Vec<ShapeKey>) {
        self.collect(query, None, out);
    }

    fn collect(&self, query: &Aabb, exclude: Option<ShapeKey>, out: &mut Vec<ShapeKey>) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            match node {
                Child::Branch(b) => {
                    let branch = &self.branches[b as usize];
                    if branch.aabb.overlaps(query) {
                        stack.push(branch.children[0]);
                        stack.push(branch.children[1]);
                    }
                }
                Child::Leaf(leaf) => {
                    if Some(leaf) == exclude {
                        continue;
                    }
                    if self.leaves[leaf].fat.overlaps(query)
                        && self.shapes[leaf].aabb().overlaps(query)
                    {
                        out.push(leaf);
                    }
                }
            }
        }
    }

    fn child_aabb(&self, child: Child) -> Aabb {
        match child {
            Child::Branch(b) => self.branches[b as usize].aabb,
            Child::Leaf(leaf) => self.leaves[leaf].fat,
        }
    }

    fn set_parent(&mut self, child: Child, parent: Option<u32>) {
        match child {
            Child::Branch(b) => self.branches[b as usize].parent = parent,
            Child::Leaf(leaf) => self.leaves[leaf].parent = parent,
        }
    }

    fn alloc_branch(&mut self, branch: Branch) -> u32 {
        if let Some(slot) = self.free.pop() {
            self.branches[slot as usize] = branch;
            slot
        } else {
            let slot = self.branches.len() as u32;
            self.branches.push(branch);
            slot
        }
    }

    fn replace_child(&mut self, parent: u32, old: Child, new: Child) {
        let children = &mut self.branches[parent as usize].children;
        if children[0] == old {
            children[0] = new;
        } else {
            debug_assert_eq!(children[1], old, "stale parent link");
            children[1] = new;
        }
    }

    /// Recompute ancestor AABBs from `from` up to the root.
    fn refit(&mut self, mut from: Option<u32>) {
        while let Some(branch) = from {
            let [left, right] = self.branches[branch as usize].children;
            let aabb = self.child_aabb(left).union(&self.child_aabb(right));
            let node = &mut self.branches[branch as usize];
            node.aabb = aabb;
            from = node.parent;
        }
    }

    fn attach(&mut self, key: ShapeKey, fat: Aabb) {
        let new_leaf = Child::Leaf(key);
        let Some(mut cursor) = self.root else {
            self.root = Some(new_leaf);
            self.leaves[key].parent = None;
            return;
        };

        // Descend toward the child whose AABB grows least from absorbing
        // the new leaf, splitting once a leaf is reached.
        let mut parent: Option<u32> = None;
        loop {
            match cursor {
                Child::Branch(b) => {
                    let [left, right] = self.branches[b as usize].children;
                    let left_aabb = self.child_aabb(left);
                    let right_aabb = self.child_aabb(right);
                    let left_growth = left_aabb.union(&fat).area() - left_aabb.area();
                    let right_growth = right_aabb.union(&fat).area() - right_aabb.area();
                    parent = Some(b);
                    cursor = if left_growth <= right_growth {
                        left
                    } else {
                        right
                    };
                }
                Child::Leaf(existing) => {
                    let existing_fat = self.leaves[existing].fat;
                    let branch = self.alloc_branch(Branch {
                        parent,
                        children: [Child::Leaf(existing), new_leaf],
                        aabb: existing_fat.union(&fat),
                    });
                    self.leaves[existing].parent = Some(branch);
                    self.leaves[key].parent = Some(branch);
                    match parent {
                        None => self.root = Some(Child::Branch(branch)),
                        Some(p) => {
                            self.replace_child(p, Child::Leaf(existing), Child::Branch(branch));
                            self.refit(Some(p));
                        }
                    }
                    return;
                }
            }
        }
    }

    fn detach(&mut self, key: ShapeKey) {
        let Some(parent) = self.leaves[key].parent else {
            debug_assert_eq!(self.root, Some(Child::Leaf(key)), "stale root");
            self.root = None;
            return;
        };

        let [left, right] = self.branches[parent as usize].children;
        let sibling = if left == Child::Leaf(key) { right } else { left };
        let grandparent = self.branches[parent as usize].parent;
        self.set_parent(sibling, grandparent);
        match grandparent {
            None => self.root = Some(sibling),
            Some(gp) => {
                self.replace_child(gp, Child::Branch(parent), sibling);
                self.refit(Some(gp));
            }
        }
        self.free.push(parent);
        self.leaves[key].parent = None;
    }

    /// Walk the whole tree checking structural invariants: every branch AABB
    /// is the union of its children's AABBs, parent links are consistent,
    /// and every tracked shape is reachable exactly once.
    pub fn validate(&self) -> Result<(), IndexError> {
        let mut reached = 0usize;
        let Some(root) = self.root else {
            if self.shapes.is_empty() {
                return Ok(());
            }
            return Err(IndexError::Corrupt("tracked shapes but no root"));
        };
        let mut stack = vec![(root, None::<u32>)];
        while let Some((node, parent)) = stack.pop() {
            match node {
                Child::Branch(b) => {
                    let branch = &self.branches[b as usize];
                    if branch.parent != parent {
                        return Err(IndexError::Corrupt("branch parent link mismatch"));
                    }
                    let union = self
                        .child_aabb(branch.children[0])
                        .union(&self.child_aabb(branch.children[1]));
                    if union != branch.aabb {
                        return Err(IndexError::Corrupt("branch AABB is not its children union"));
                    }
                    stack.push((branch.children[0], Some(b)));
                    stack.push((branch.children[1], Some(b)));
                }
                Child::Leaf(leaf) => {
                    let Some(state) = self.leaves.get(leaf) else {
                        return Err(IndexError::Corrupt("leaf without state"));
                    };
                    if state.parent != parent {
                        return Err(IndexError::Corrupt("leaf parent link mismatch"));
                    }
                    reached += 1;
                }
            }
        }
        if reached != self.shapes.len() {
            return Err(IndexError::Corrupt("unreachable tracked shapes"));
        }
        Ok(())
    }
}
