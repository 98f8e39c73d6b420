//! Strata engine crate.
//!
//! Rendering core of a 2D/3D game engine: scenes build display lists, the
//! renderer replays them against a narrow graphics api.

pub mod device;
pub mod time;
pub mod arena;
pub mod config;

pub mod logging;
pub mod coords;
pub mod render;
pub mod scene;
