//! Vascular network state for discrete red blood cell transport.
//!
//! The network is a single owning structure: topology lives in a petgraph
//! graph, simulation state in parallel arrays indexed by stable edge and
//! vertex ids. Components of the simulation borrow it mutably in sequence;
//! there are no back-pointers.

pub mod builder;
pub mod network;
pub mod rheology;

pub use builder::{InitialHematocrit, NetworkBuilder};
pub use network::{EdgeId, EdgeState, VascularNetwork, VertexId, VertexState, VertexType};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Invalid edge geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unknown vertex id {0}")]
    UnknownVertex(usize),

    #[error("Unknown edge id {0}")]
    UnknownEdge(usize),

    #[error("Invalid boundary condition: {0}")]
    InvalidBoundaryCondition(String),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
