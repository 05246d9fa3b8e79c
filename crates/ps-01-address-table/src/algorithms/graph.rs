//! # Object Graph Walk
//!
//! Serializes arbitrary, possibly cyclic, object graphs into a snapshot and
//! stages them back out.
//!
//! ## Traversal
//!
//! ```text
//! roots ──► worklist ──► read_object ──► links ──► (not visited?) ──► worklist
//!                              │
//!                              ▼
//!                     begin_object + payload + link indices
//! ```
//!
//! The walk is an explicit worklist plus visited set, so depth is bounded by
//! heap memory rather than the call stack, and each object is emitted once.
//!
//! ## Staged Load
//!
//! `load_graph` decodes and resolves every object before anything touches
//! live state. Only a fully staged graph can be handed to an `ObjectSink`.

use super::archive::{SnapshotReader, SnapshotWriter};
use crate::domain::Snapshot;
use shared_types::{Reference, SnapshotError, SpaceError, TimeStamp};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// One object as the heap presents it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectImage {
    /// Encoded object contents.
    pub data: Vec<u8>,
    /// Outgoing references (objects or their elements).
    pub links: Vec<Reference>,
}

/// Read access to live objects.
pub trait ObjectSource {
    /// Contents of `object`.
    fn read_object(&self, object: &Reference) -> Result<ObjectImage, SpaceError>;
}

/// Write access to live objects.
pub trait ObjectSink {
    /// Install a fully staged graph.
    fn install(&mut self, objects: Vec<StagedObject>) -> Result<(), SpaceError>;
}

/// Iterator over a graph, one object at a time.
///
/// `next()` yields each reachable object once; `done()` reports whether the
/// walk has nothing left (or has failed).
pub struct GraphWalk<'a, S: ObjectSource + ?Sized> {
    source: &'a S,
    worklist: VecDeque<Reference>,
    visited: HashSet<Reference>,
    failed: bool,
}

impl<'a, S: ObjectSource + ?Sized> GraphWalk<'a, S> {
    /// Start a walk at `roots`.
    pub fn new(source: &'a S, roots: &[Reference]) -> Result<Self, SpaceError> {
        let mut walk = Self {
            source,
            worklist: VecDeque::new(),
            visited: HashSet::new(),
            failed: false,
        };
        for root in roots {
            walk.enqueue(root)?;
        }
        Ok(walk)
    }

    /// True when no object remains.
    pub fn done(&self) -> bool {
        self.failed || self.worklist.is_empty()
    }

    /// Objects seen so far, queued or emitted.
    pub fn visited(&self) -> usize {
        self.visited.len()
    }

    fn enqueue(&mut self, link: &Reference) -> Result<(), SpaceError> {
        let object = link.object_address()?;
        if self.visited.insert(object) {
            self.worklist.push_back(object);
        }
        Ok(())
    }

    fn step(&mut self, object: Reference) -> Result<(Reference, ObjectImage), SpaceError> {
        let image = self.source.read_object(&object)?;
        for link in &image.links {
            self.enqueue(link)?;
        }
        Ok((object, image))
    }
}

impl<'a, S: ObjectSource + ?Sized> Iterator for GraphWalk<'a, S> {
    type Item = Result<(Reference, ObjectImage), SpaceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let object = self.worklist.pop_front()?;
        let item = self.step(object);
        self.failed = item.is_err();
        Some(item)
    }
}

/// Serialize everything reachable from `roots`.
///
/// Buffer layout per object: `data`, link count (u32), link indices.
pub fn save_graph<S: ObjectSource + ?Sized>(
    source: &S,
    roots: &[Reference],
    timestamp: TimeStamp,
) -> Result<Snapshot, SpaceError> {
    let mut snapshot = Snapshot::new(timestamp);
    let walk = GraphWalk::new(source, roots)?;
    let mut writer = SnapshotWriter::new(&mut snapshot);

    for item in walk {
        let (object, image) = item?;
        writer.begin_object(&object)?;
        writer.write(&image.data)?;
        writer.write(&(image.links.len() as u32))?;
        for link in &image.links {
            writer.write_reference(link)?;
        }
    }

    debug!(
        objects = snapshot.roots().len(),
        references = snapshot.table().len(),
        bytes = snapshot.buffer().len(),
        "[ps-01] object graph saved"
    );
    Ok(snapshot)
}

/// One decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    /// Object address.
    pub address: Reference,
    /// Encoded contents.
    pub data: Vec<u8>,
    /// Resolved links.
    pub links: Vec<Reference>,
}

/// A snapshot decoded in isolation, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedGraph {
    /// Snapshot timestamp.
    pub timestamp: TimeStamp,
    /// Objects in save order.
    pub objects: Vec<StagedObject>,
}

impl StagedGraph {
    /// Hand the staged objects to `sink` in one call.
    pub fn apply<K: ObjectSink + ?Sized>(self, sink: &mut K) -> Result<(), SpaceError> {
        sink.install(self.objects)
    }
}

/// Decode every object of `snapshot` without touching live state.
pub fn load_graph(snapshot: &Snapshot) -> Result<StagedGraph, SnapshotError> {
    snapshot.validate()?;
    let mut reader = SnapshotReader::new(snapshot);
    let mut objects = Vec::with_capacity(snapshot.roots().len());

    for &root in snapshot.roots() {
        let address = snapshot
            .index_to_ref(root)
            .map_err(|_| SnapshotError::UnresolvedIndex {
                index: root,
                len: snapshot.table().len(),
            })?;
        let data: Vec<u8> = reader.read()?;
        let count: u32 = reader.read()?;
        let mut links = Vec::new();
        for _ in 0..count {
            links.push(reader.read_reference()?);
        }
        objects.push(StagedObject {
            address,
            data,
            links,
        });
    }

    if !reader.is_finished() {
        return Err(SnapshotError::Corrupt(format!(
            "{} trailing bytes after last object",
            reader.remaining()
        )));
    }
    Ok(StagedGraph {
        timestamp: snapshot.timestamp(),
        objects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{TypeId, TypeInstance, MPO};
    use std::collections::HashMap;

    fn obj(allocation: u16) -> Reference {
        Reference::network(
            TypeInstance::new(TypeId::make_context(3, 0), 0),
            MPO::new(0, 0, 1),
            allocation,
        )
    }

    fn field_of(allocation: u16) -> Reference {
        Reference::network(
            TypeInstance::new(TypeId::make_context(3, 2), 0),
            MPO::new(0, 0, 1),
            allocation,
        )
    }

    #[derive(Default)]
    struct Heap(HashMap<Reference, ObjectImage>);

    impl Heap {
        fn with(mut self, allocation: u16, links: Vec<Reference>) -> Self {
            self.0.insert(
                obj(allocation),
                ObjectImage {
                    data: vec![allocation as u8; 3],
                    links,
                },
            );
            self
        }
    }

    impl ObjectSource for Heap {
        fn read_object(&self, object: &Reference) -> Result<ObjectImage, SpaceError> {
            self.0.get(object).cloned().ok_or_else(|| {
                SpaceError::from(shared_types::AddressError::NotAllocated(object.to_string()))
            })
        }
    }

    #[derive(Default)]
    struct Sink(Vec<StagedObject>);

    impl ObjectSink for Sink {
        fn install(&mut self, objects: Vec<StagedObject>) -> Result<(), SpaceError> {
            self.0 = objects;
            Ok(())
        }
    }

    #[test]
    fn test_cycle_saved_once_per_object() {
        let heap = Heap::default()
            .with(1, vec![obj(2)])
            .with(2, vec![field_of(3)])
            .with(3, vec![obj(1), obj(1)]);

        let snapshot = save_graph(&heap, &[obj(1)], 9).unwrap();
        assert_eq!(snapshot.roots().len(), 3);

        let staged = load_graph(&snapshot).unwrap();
        assert_eq!(staged.timestamp, 9);
        let addresses: Vec<_> = staged.objects.iter().map(|o| o.address).collect();
        assert_eq!(addresses, vec![obj(1), obj(2), obj(3)]);
        assert_eq!(staged.objects[1].links, vec![field_of(3)]);
        assert_eq!(staged.objects[2].links, vec![obj(1), obj(1)]);

        let mut sink = Sink::default();
        staged.apply(&mut sink).unwrap();
        assert_eq!(sink.0.len(), 3);
    }

    #[test]
    fn test_self_reference() {
        let heap = Heap::default().with(7, vec![obj(7)]);
        let snapshot = save_graph(&heap, &[obj(7)], 0).unwrap();
        let staged = load_graph(&snapshot).unwrap();
        assert_eq!(staged.objects.len(), 1);
        assert_eq!(staged.objects[0].links, vec![obj(7)]);
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let mut heap = Heap::default();
        for allocation in 0..5_000u16 {
            heap = heap.with(allocation, vec![obj(allocation + 1)]);
        }
        heap = heap.with(5_000, Vec::new());
        let snapshot = save_graph(&heap, &[obj(0)], 0).unwrap();
        assert_eq!(snapshot.roots().len(), 5_001);
    }

    #[test]
    fn test_walk_state_machine() {
        let heap = Heap::default().with(1, vec![obj(2)]).with(2, Vec::new());
        let mut walk = GraphWalk::new(&heap, &[obj(1)]).unwrap();
        assert!(!walk.done());
        assert!(walk.next().unwrap().is_ok());
        assert!(!walk.done());
        assert!(walk.next().unwrap().is_ok());
        assert!(walk.done());
        assert!(walk.next().is_none());
        assert_eq!(walk.visited(), 2);
    }

    #[test]
    fn test_walk_stops_after_error() {
        let heap = Heap::default().with(1, vec![obj(2), obj(3)]).with(3, Vec::new());
        let mut walk = GraphWalk::new(&heap, &[obj(1)]).unwrap();
        assert!(walk.next().unwrap().is_ok());
        assert!(walk.next().unwrap().is_err());
        assert!(walk.done());
        assert!(walk.next().is_none());
    }

    #[test]
    fn test_truncated_buffer_leaves_sink_untouched() {
        let heap = Heap::default().with(1, vec![obj(2)]).with(2, Vec::new());
        let mut snapshot = save_graph(&heap, &[obj(1)], 0).unwrap();
        let mut bytes = snapshot.buffer().to_vec();
        bytes.truncate(bytes.len() - 2);
        snapshot.set_buffer(bytes);

        let sink = Sink::default();
        assert!(load_graph(&snapshot).is_err());
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let heap = Heap::default().with(1, Vec::new());
        let mut snapshot = save_graph(&heap, &[obj(1)], 0).unwrap();
        let mut bytes = snapshot.buffer().to_vec();
        bytes.push(0);
        snapshot.set_buffer(bytes);
        assert!(matches!(
            load_graph(&snapshot),
            Err(SnapshotError::Corrupt(_))
        ));
    }
}
