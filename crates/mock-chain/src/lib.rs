//! Mock chain for local runs of committee creation.
//!
//! Provides in-memory implementations of every collaborator the protocol
//! core reads from or sends through, and a [`Simulation`] that drives a set
//! of nodes block by block without a real blockchain or network.

mod chain;
mod mempool;
mod simulation;

pub use chain::{MockChain, NodeMiners};
pub use mempool::{Batch, Mempool, MempoolSender};
pub use simulation::{EraReport, Node, Simulation, SimulationConfig};
