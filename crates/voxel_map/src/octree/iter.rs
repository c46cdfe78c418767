//! Depth-first octree iteration.
//!
//! One traversal engine with an emit filter and a subtree-pruning
//! predicate; the public constructors on [`Octree`] cover the all / nodes /
//! blocks / leaves / updated-since / in-frustum variants.

use glam::Vec3;

use super::block::BlockStorage;
use super::octant::OctantRef;
use super::tree::Octree;

enum Emit {
  All,
  Nodes,
  Blocks,
  Leaves,
}

/// Depth-first pre-order iterator over octants.
pub struct DfsIter<'a, B: BlockStorage, P = fn(&Octree<B>, OctantRef) -> bool> {
  octree: &'a Octree<B>,
  stack: Vec<OctantRef>,
  emit: Emit,
  /// Subtrees for which this returns true are not entered (and their root
  /// octant is not yielded).
  prune: P,
}

impl<'a, B: BlockStorage, P: Fn(&Octree<B>, OctantRef) -> bool> DfsIter<'a, B, P> {
  fn new(octree: &'a Octree<B>, emit: Emit, prune: P) -> Self {
    Self {
      octree,
      stack: vec![OctantRef::Node(octree.root())],
      emit,
      prune,
    }
  }

  fn wants(&self, octant: OctantRef) -> bool {
    match self.emit {
      Emit::All => true,
      Emit::Nodes => !octant.is_block(),
      Emit::Blocks => octant.is_block(),
      Emit::Leaves => match octant {
        OctantRef::Block(_) => true,
        OctantRef::Node(id) => self.octree.node(id).is_leaf(),
      },
    }
  }
}

impl<'a, B: BlockStorage, P: Fn(&Octree<B>, OctantRef) -> bool> Iterator for DfsIter<'a, B, P> {
  type Item = OctantRef;

  fn next(&mut self) -> Option<OctantRef> {
    while let Some(octant) = self.stack.pop() {
      if (self.prune)(self.octree, octant) {
        continue;
      }
      if let OctantRef::Node(id) = octant {
        // Push in reverse slot order so traversal visits slot 0 first.
        let node = self.octree.node(id);
        for slot in (0..8).rev() {
          if let Some(child) = node.child(slot) {
            self.stack.push(child);
          }
        }
      }
      if self.wants(octant) {
        return Some(octant);
      }
    }
    None
  }
}

fn no_prune<B: BlockStorage>(_: &Octree<B>, _: OctantRef) -> bool {
  false
}

impl<B: BlockStorage> Octree<B> {
  /// Every octant, depth-first.
  pub fn iter(&self) -> impl Iterator<Item = OctantRef> + '_ {
    DfsIter::new(self, Emit::All, no_prune::<B>)
  }

  /// Interior nodes only.
  pub fn iter_nodes(&self) -> impl Iterator<Item = OctantRef> + '_ {
    DfsIter::new(self, Emit::Nodes, no_prune::<B>)
  }

  /// Leaf blocks only.
  pub fn iter_blocks(&self) -> impl Iterator<Item = OctantRef> + '_ {
    DfsIter::new(self, Emit::Blocks, no_prune::<B>)
  }

  /// Leaves: blocks and childless nodes.
  pub fn iter_leaves(&self) -> impl Iterator<Item = OctantRef> + '_ {
    DfsIter::new(self, Emit::Leaves, no_prune::<B>)
  }

  /// Blocks whose timestamp is at least `frame`. Subtrees whose root
  /// predates `frame` are skipped entirely, which is what makes the
  /// timestamp monotonicity invariant load-bearing.
  pub fn iter_updated_since(&self, frame: u64) -> impl Iterator<Item = OctantRef> + '_ {
    DfsIter::new(
      self,
      Emit::Blocks,
      move |octree: &Octree<B>, octant: OctantRef| octree.timestamp_of(octant) < frame,
    )
  }

  /// Blocks whose bounding sphere passes the supplied frustum test. The
  /// predicate receives the octant's centre (in voxel units) and its
  /// circumscribed radius.
  pub fn iter_in_frustum<'a, F>(&'a self, in_frustum: F) -> impl Iterator<Item = OctantRef> + 'a
  where
    F: Fn(Vec3, f32) -> bool + 'a,
  {
    DfsIter::new(
      self,
      Emit::Blocks,
      move |octree: &Octree<B>, octant: OctantRef| {
        let size = octree.size_of(octant) as f32;
        let centre = octree.coord_of(octant).as_vec3() + Vec3::splat(size / 2.0);
        let radius = 3.0f32.sqrt() / 2.0 * size;
        !in_frustum(centre, radius)
      },
    )
  }
}

#[cfg(test)]
#[path = "iter_test.rs"]
mod iter_test;
