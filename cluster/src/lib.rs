#[macro_use]
extern crate tracing;

mod client;
mod control_plane;
mod error;
pub mod objects;

pub use client::KubeClient;
pub use control_plane::{
    ClusterFuture,
    ControlPlane,
};
pub use error::{
    ClusterError,
    INTERNAL_ERROR_MARKER,
};
