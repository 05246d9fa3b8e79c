//! # Algorithms
//!
//! Snapshot archive, object graph walk and the persistence codec.

pub mod archive;
pub mod codec;
pub mod graph;

pub use archive::{SnapshotReader, SnapshotWriter};
pub use codec::{decode_snapshot, encode_snapshot, SnapshotHeader, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use graph::{
    load_graph, save_graph, GraphWalk, ObjectImage, ObjectSink, ObjectSource, StagedGraph,
    StagedObject,
};
