//! Client, local cache and incremental sync for the Visual Board image
//! board.

pub mod api;
pub mod cache;
pub mod config;
pub mod feed;
pub mod identity;
pub mod logging;
