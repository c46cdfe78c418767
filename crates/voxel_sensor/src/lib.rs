//! voxel_sensor - sensor models and image buffers for volumetric mapping
//!
//! This crate is the sensor-side collaborator of the `voxel_map` engine. It
//! owns the depth/colour image type and the projection models the map
//! integrators and the ray-caster talk to:
//!
//! - [`Image`]: a rectangular row-major pixel buffer
//! - [`SensorModel`]: the projection/frustum/scale contract
//! - [`PinholeCamera`]: perspective depth cameras
//! - [`RotatingLidar`]: spinning LiDAR producing range images
//!
//! Frames: `S` is the sensor frame, `W` the world frame. Poses are rigid
//! `glam::Affine3A` transforms named after the frames they map between
//! (`T_WS` maps sensor-frame points into the world frame).

pub mod image;
pub mod lidar;
pub mod model;
pub mod pinhole;

pub use image::Image;
pub use lidar::RotatingLidar;
pub use model::{ProjectionStatus, SensorModel};
pub use pinhole::PinholeCamera;
