//! voxel_map - adaptive multi-resolution volumetric mapping
//!
//! An occupancy / signed-distance mapping engine organised as an octree of
//! fixed-size voxel blocks. Depth frames (pinhole camera or LiDAR) fuse
//! into a persistent reconstruction; isosurfaces, normals and colour are
//! sampled back out by ray-casting or meshing.
//!
//! # Map flavours
//!
//! - [`TsdfMap`]: single-resolution truncated signed distance
//! - [`TsdfMultiMap`]: multi-resolution TSDF with adaptive integration
//!   scales
//! - [`OccupancyMap`]: multi-resolution log-odds occupancy with volume
//!   carving, free-space pruning and coarse-summary ray skipping
//!
//! # Frame flow
//!
//! ```text
//!   allocate ──► update ──► propagate blocks ──► propagate to root
//!   (carver)    (fusion)    (pyramid up)         (summaries, pruning)
//! ```
//!
//! Phases run strictly in order; within a phase, work shards over
//! independent octants on the rayon pool.
//!
//! # Example
//!
//! ```ignore
//! use glam::{Affine3A, Vec3};
//! use voxel_map::{MapConfig, Measurements, OccupancyMap};
//! use voxel_sensor::{Image, PinholeCamera};
//!
//! let camera = PinholeCamera::new(640, 480, 525.0, 525.0, 319.5, 239.5);
//! let mut map = OccupancyMap::new(MapConfig::new(0.05, 512))?;
//!
//! for (frame, (depth, t_ws)) in frames.enumerate() {
//!   let m = Measurements::depth_only(&camera, &depth, t_ws);
//!   let stats = map.integrate_depth(&m, frame as u64, None)?;
//!   println!("allocated {} blocks", stats.allocated_blocks);
//! }
//!
//! let surfaces = map.raycast_volume(&camera, t_ws);
//! let mesh = map.extract_mesh_dual();
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod integrator;
pub mod map;
pub mod mesher;
pub mod metrics;
pub mod octree;
pub mod raycaster;
pub mod sampling;

pub use config::{MapConfig, OccupancyConfig, TsdfConfig};
pub use data::{OccupancyData, Rgba, TsdfData, VoxelData};
pub use error::MapError;
pub use integrator::{ColourMeasurement, DepthMeasurement, Measurements};
pub use map::{OccupancyMap, TsdfMap, TsdfMultiMap, VoxelMap};
pub use mesher::{SurfaceMesh, Triangle};
pub use metrics::{FrameStats, MapMetrics};
pub use octree::{BlockId, NodeId, OctantRef, Octree, BLOCK_MAX_SCALE, BLOCK_SIZE};
pub use raycaster::{SurfaceImages, INVALID_NORMAL};
