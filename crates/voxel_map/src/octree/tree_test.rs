use glam::IVec3;

use super::*;
use crate::data::TsdfData;
use crate::octree::block::SingleResBlock;
use crate::octree::octant::{BLOCK_SIZE, BLOCK_SIZE_CB};

type TestTree = Octree<SingleResBlock<TsdfData>>;

#[test]
fn test_new_rounds_size_up() {
  let octree = TestTree::new(100);
  assert_eq!(octree.size(), 128);
  assert_eq!(octree.max_scale(), 7);
  assert_eq!(octree.block_depth(), 4);
}

#[test]
fn test_root_spans_the_map() {
  let octree = TestTree::new(64);
  let root = octree.node(octree.root());
  assert_eq!(root.coord, IVec3::ZERO);
  assert_eq!(root.size, 64);
  assert!(root.parent.is_none());
}

#[test]
fn test_children_mask_matches_slots() {
  // Property: after any allocation sequence the mask equals the indicator
  // of non-null slots.
  let mut octree = TestTree::new(64);
  let root = octree.root();
  octree.allocate(root, 3).unwrap();
  octree.allocate(root, 6).unwrap();
  let node = octree.node(root);
  for slot in 0..8 {
    assert_eq!(
      node.children_mask & (1 << slot) != 0,
      node.child(slot).is_some()
    );
  }
}

#[test]
fn test_allocate_all_children_fills_every_slot() {
  let mut octree = TestTree::new(64);
  let root = octree.root();
  // Pre-allocate one child; the bulk call fills in the rest.
  octree.allocate(root, 2).unwrap();
  octree.allocate_all_children(root).unwrap();
  assert_eq!(octree.node(root).children_mask, 0xff);
  assert_eq!(octree.node(root).children().count(), 8);
}

#[test]
fn test_allocate_is_idempotent() {
  let mut octree = TestTree::new(64);
  let root = octree.root();
  let (first, fresh_first) = octree.allocate(root, 0).unwrap();
  let (second, fresh_second) = octree.allocate(root, 0).unwrap();
  assert_eq!(first, second);
  assert!(fresh_first);
  assert!(!fresh_second);
}

#[test]
fn test_blocks_are_aligned_and_block_sized() {
  // Property: every allocated block's minimum corner is a multiple of the
  // block edge.
  let mut octree = TestTree::new(64);
  for voxel in [
    IVec3::new(0, 0, 0),
    IVec3::new(13, 27, 41),
    IVec3::new(63, 63, 63),
  ] {
    let (id, _) = octree.allocate_block_at(voxel).unwrap();
    let coord = octree.block(id).coord();
    assert_eq!(coord % BLOCK_SIZE, IVec3::ZERO);
    let rel = voxel - coord;
    assert!(rel.min_element() >= 0 && rel.max_element() < BLOCK_SIZE);
  }
}

#[test]
fn test_child_seeded_from_parent_data() {
  let mut octree = TestTree::new(64);
  let root = octree.root();
  octree.node_mut(root).data.tsdf = -0.75;
  let (child, _) = octree.allocate(root, 0).unwrap();
  let child_id = child.as_node().unwrap();
  assert_eq!(octree.node(child_id).data.tsdf, -0.75);
}

#[test]
fn test_find_block_descends_to_leaf() {
  let mut octree = TestTree::new(64);
  let (id, _) = octree.allocate_block_at(IVec3::new(20, 20, 20)).unwrap();
  assert_eq!(octree.find_block(IVec3::new(23, 16, 22)), Some(id));
  assert_eq!(octree.find_block(IVec3::new(40, 40, 40)), None);
  assert_eq!(octree.find_block(IVec3::new(-1, 0, 0)), None);
}

#[test]
fn test_aabb_contains_every_block() {
  // Scenario: blocks at the two opposite map corners span the whole cube.
  let mut octree = TestTree::new(64);
  assert!(octree.aabb().is_none());
  octree.allocate_block_at(IVec3::ZERO).unwrap();
  octree
    .allocate_block_at(IVec3::splat(64 - BLOCK_SIZE))
    .unwrap();
  let aabb = octree.aabb().unwrap();
  assert_eq!(aabb.min, IVec3::ZERO);
  assert_eq!(aabb.max, IVec3::splat(63));
}

#[test]
fn test_delete_children_recycles_octants() {
  let mut octree = TestTree::new(64);
  octree.allocate_block_at(IVec3::new(5, 5, 5)).unwrap();
  let count_before = octree.octant_count();
  let root = octree.root();
  octree.delete_children(root);
  assert_eq!(octree.octant_count(), 1);
  assert!(octree.node(root).is_leaf());

  // Recycled slots are reused by later allocations.
  octree.allocate_block_at(IVec3::new(60, 5, 5)).unwrap();
  assert_eq!(octree.octant_count(), count_before);
}

#[test]
fn test_octant_limit_is_fatal() {
  let mut octree = TestTree::new(64).with_octant_limit(3);
  let err = octree.allocate_block_at(IVec3::ZERO).unwrap_err();
  assert_eq!(err, crate::error::MapError::ResourceExhausted);
}

#[test]
fn test_blocks_mut_returns_disjoint_refs() {
  let mut octree = TestTree::new(64);
  let (a, _) = octree.allocate_block_at(IVec3::new(0, 0, 0)).unwrap();
  let (b, _) = octree.allocate_block_at(IVec3::new(32, 0, 0)).unwrap();
  let (c, _) = octree.allocate_block_at(IVec3::new(0, 32, 0)).unwrap();
  // Request out of allocation order on purpose.
  let mut refs = octree.blocks_mut(&[c, a, b]);
  for (i, block) in refs.iter_mut().enumerate() {
    block.voxel_mut(0).weight = (i + 1) as u32;
  }
  assert_eq!(octree.block(c).voxel(0).weight, 1);
  assert_eq!(octree.block(a).voxel(0).weight, 2);
  assert_eq!(octree.block(b).voxel(0).weight, 3);
  assert_eq!(BLOCK_SIZE_CB, 512);
}

#[test]
fn test_random_allocations_keep_structural_invariants() {
  use rand::{Rng, SeedableRng};
  let mut rng = rand::rngs::StdRng::seed_from_u64(42);
  let mut octree = TestTree::new(128);

  for _ in 0..200 {
    let voxel = IVec3::new(
      rng.gen_range(0..128),
      rng.gen_range(0..128),
      rng.gen_range(0..128),
    );
    octree.allocate_block_at(voxel).unwrap();
  }

  let aabb = octree.aabb().unwrap();
  for octant in octree.iter().collect::<Vec<_>>() {
    match octant {
      OctantRef::Node(id) => {
        let node = octree.node(id);
        // Mask matches slots, and every child halves the edge.
        for slot in 0..8 {
          assert_eq!(
            node.children_mask & (1 << slot) != 0,
            node.child(slot).is_some()
          );
          if let Some(child) = node.child(slot) {
            assert_eq!(octree.size_of(child), node.size / 2);
          }
        }
      }
      OctantRef::Block(id) => {
        let coord = octree.block(id).coord();
        assert_eq!(coord % BLOCK_SIZE, IVec3::ZERO);
        assert!(aabb.contains(coord));
        assert!(aabb.contains(coord + IVec3::splat(BLOCK_SIZE - 1)));
      }
    }
  }
}

#[test]
fn test_find_octant_at_scale_stops_at_coarse_node() {
  let mut octree = TestTree::new(64);
  octree.allocate_block_at(IVec3::new(0, 0, 0)).unwrap();
  // At scale 5 (size 32) the walk stops at the size-32 node.
  match octree.find_octant_at_scale(IVec3::new(3, 3, 3), 5) {
    OctantRef::Node(id) => assert_eq!(octree.node(id).size, 32),
    OctantRef::Block(_) => panic!("expected a node at scale 5"),
  }
  // At scale 0 it reaches the block.
  assert!(octree.find_octant_at_scale(IVec3::new(3, 3, 3), 0).is_block());
}
