//! Owners of one process working against a live Root.

use async_trait::async_trait;
use ps_01_address_table::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
use ps_02_lock_tracking::LockKind;
use ps_04_node_roles::{ExecutorContext, NodeHandler, OwnerContext, ProcessHeap, RootNode, Tool};
use shared_conversation::{memory, ConnectionId, Conversation, RequestHandler, Router};
use shared_types::{
    AddressError, ErrorKind, NodeRole, Reference, Request, Response, SpaceError, TypeId, TypeInstance, MP,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NODE: TypeId = TypeId::make_context(4, 0);

fn element(object: &Reference, object_id: u8, sub: u8) -> Reference {
    object.with_type_instance(TypeInstance::new(TypeId::make_context(object_id, sub), 0))
}

fn counter(root: &Reference) -> Reference {
    element(root, 1, 1)
}

/// Root handler that refuses allocations once `allocations` runs out.
struct AllocationBudget {
    root: NodeHandler<RootNode>,
    allocations: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestHandler for AllocationBudget {
    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        if matches!(request, Request::AllocateNetworkAddress { .. })
            && self
                .allocations
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_err()
        {
            return Err(AddressError::Exhausted {
                what: "test allocation budget".to_string(),
                capacity: 0,
            }
            .into());
        }
        self.root.handle(conversation, from, request).await
    }
}

struct Space {
    root: Arc<RootNode>,
    root_router: Router,
    tool: Tool,
    allocations: Arc<AtomicUsize>,
}

impl Space {
    fn new(store: Arc<dyn SnapshotStore>) -> Self {
        let root = Arc::new(RootNode::new("root", store));
        let allocations = Arc::new(AtomicUsize::new(usize::MAX));
        let handler = AllocationBudget {
            root: NodeHandler::new(root.clone()),
            allocations: allocations.clone(),
        };
        let root_router = Router::start(NodeRole::Root, Arc::new(handler));
        let tool = Tool::start("tool");
        let (_, upstream) = memory::link(&root_router, tool.router());
        tool.attach(upstream);
        Self {
            root,
            root_router,
            tool,
            allocations,
        }
    }

    async fn process(&self) -> MP {
        let Response::DaemonEnroled { machine } = self.tool.call(Request::EnroleDaemon).await.unwrap() else {
            panic!("expected DaemonEnroled");
        };
        match self.tool.call(Request::EnroleLeaf { machine }).await.unwrap() {
            Response::LeafEnroled { mp } => mp,
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Two owners sharing one process heap.
    async fn pair(&self) -> (OwnerContext, OwnerContext, Router) {
        let heap = Arc::new(ProcessHeap::new(self.process().await));
        let context = Arc::new(ExecutorContext::new("executor", heap.clone()));
        let router = Router::start(NodeRole::Executor, Arc::new(NodeHandler::new(context)));
        let (_, upstream) = memory::link(&self.root_router, &router);
        let a = OwnerContext::construct(&router, upstream, heap.clone())
            .await
            .unwrap();
        let b = OwnerContext::construct(&router, upstream, heap).await.unwrap();
        (a, b, router)
    }
}

#[tokio::test]
async fn test_cross_owner_write_lands_next_cycle() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let (mut a, mut b, _router) = space.pair().await;
    let b_mpo = b.mpo();

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let target = cycle.get_root(b_mpo).await.unwrap();
        assert!(target.is_heap_address());
        cycle.write(&counter(&target), vec![42]).await.unwrap();
        assert_eq!(cycle.locks().tracker().lock_cycle(b_mpo), 1);
    }
    assert_eq!(a.state().pending_releases(), 1);
    assert_eq!(
        space.root.lock_holders(b_mpo),
        Some((LockKind::Write, vec![a.mpo()]))
    );

    // Not visible until the release is sent and B opens a cycle.
    {
        let mut cycle = b.begin_cycle().await.unwrap();
        let root = cycle.root();
        assert!(cycle.read(&counter(&root)).await.unwrap().is_empty());
    }

    assert_eq!(a.finish().await.unwrap(), 1);
    assert_eq!(space.root.lock_holders(b_mpo), None);
    assert_eq!(space.root.pending_transactions(b_mpo), 1);

    let mut cycle = b.begin_cycle().await.unwrap();
    let root = cycle.root();
    assert_eq!(cycle.read(&counter(&root)).await.unwrap(), vec![42]);
    assert_eq!(space.root.pending_transactions(b_mpo), 0);
}

#[tokio::test]
async fn test_locks_held_until_next_cycle_begins() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let (mut a, b, _router) = space.pair().await;
    let b_mpo = b.mpo();

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let target = cycle.get_root(b_mpo).await.unwrap();
        cycle.write(&counter(&target), vec![8]).await.unwrap();
    }
    // Between ticks Root still sees the lock and has no transaction yet.
    assert_eq!(a.state().pending_releases(), 1);
    assert_eq!(
        space.root.lock_holders(b_mpo),
        Some((LockKind::Write, vec![a.mpo()]))
    );
    assert_eq!(space.root.pending_transactions(b_mpo), 0);

    let cycle = a.begin_cycle().await.unwrap();
    assert_eq!(cycle.cycle(), 2);
    assert_eq!(cycle.pending_releases(), 0);
    assert_eq!(space.root.lock_holders(b_mpo), None);
    assert_eq!(space.root.pending_transactions(b_mpo), 1);
}

#[tokio::test]
async fn test_read_of_neighbour_takes_read_lock() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let (mut a, b, _router) = space.pair().await;
    b.state().heap().write(&counter(&b.state().root()), vec![9]).unwrap();

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let target = cycle.get_root(b.mpo()).await.unwrap();
        assert_eq!(cycle.read(&counter(&target)).await.unwrap(), vec![9]);
        assert!(cycle.ping_owner(b.mpo()).await.unwrap());
    }
    assert_eq!(
        space.root.lock_holders(b.mpo()),
        Some((LockKind::Read, vec![a.mpo()]))
    );
    a.finish().await.unwrap();
    assert_eq!(space.root.lock_holders(b.mpo()), None);
}

#[tokio::test]
async fn test_destroy_releases_and_evicts() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let (mut a, b, _router) = space.pair().await;
    let (a_mpo, b_mpo) = (a.mpo(), b.mpo());
    let heap = a.state().heap().clone();

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let target = cycle.get_root(b_mpo).await.unwrap();
        cycle.write(&counter(&target), vec![1]).await.unwrap();
    }
    a.destroy().await.unwrap();

    assert!(!space.root.is_constructed(a_mpo));
    assert!(!heap.is_hosted(a_mpo));
    assert_eq!(space.root.lock_holders(b_mpo), None);
    assert!(space.root.is_constructed(b_mpo));
}

#[tokio::test]
async fn test_snapshot_round_trip_relocates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::new(dir.path().join("stash"), dir.path()));
    let space = Space::new(store);
    let (mut a, mut b, _router) = space.pair().await;

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let root = cycle.root();
        let child = cycle.allocate(NODE).await.unwrap();
        cycle.write(&counter(&root), vec![3]).await.unwrap();
        cycle.write(&element(&child, 4, 1), vec![7, 7]).await.unwrap();
        cycle.add_link(&root, child).unwrap();
        cycle.add_link(&child, root).unwrap();
        cycle.save_snapshot("graph.snap").await.unwrap();
    }
    assert!(dir.path().join("graph.snap").exists());

    let mut cycle = b.begin_cycle().await.unwrap();
    let stale = cycle.allocate(NODE).await.unwrap();
    assert_eq!(cycle.load_snapshot("graph.snap").await.unwrap(), 2);

    let root = cycle.root();
    let heap = cycle.heap().clone();
    assert!(heap.resolve(&stale).is_err());
    assert_eq!(cycle.read(&counter(&root)).await.unwrap(), vec![3]);
    let links = heap.links(&root).unwrap();
    assert_eq!(links.len(), 1);
    let child = links[0];
    assert_eq!(heap.resolve(&child).unwrap().mpo, cycle.mpo());
    assert_eq!(cycle.read(&element(&child, 4, 1)).await.unwrap(), vec![7, 7]);
    assert_eq!(heap.links(&child).unwrap(), vec![root]);
    assert_eq!(heap.object_count(cycle.mpo()), 2);
}

#[tokio::test]
async fn test_failed_snapshot_load_keeps_previous_objects() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let (mut a, mut b, _router) = space.pair().await;
    let b_mpo = b.mpo();

    {
        let mut cycle = a.begin_cycle().await.unwrap();
        let root = cycle.root();
        for _ in 0..2 {
            let child = cycle.allocate(NODE).await.unwrap();
            cycle.add_link(&root, child).unwrap();
        }
        cycle.save_snapshot("three.snap").await.unwrap();
    }

    let mut cycle = b.begin_cycle().await.unwrap();
    let kept = cycle.allocate(NODE).await.unwrap();
    cycle.write(&element(&kept, 4, 1), vec![5]).await.unwrap();
    assert_eq!(space.root.object_count(b_mpo), 2);

    // The first child gets a home, the second does not.
    space.allocations.store(1, Ordering::SeqCst);
    let err = cycle.load_snapshot("three.snap").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Address);
    assert!(err.to_string().contains("test allocation budget"));

    let heap = cycle.heap().clone();
    assert_eq!(heap.object_count(b_mpo), 2);
    assert_eq!(cycle.read(&element(&kept, 4, 1)).await.unwrap(), vec![5]);
    assert_eq!(space.root.object_count(b_mpo), 2);

    space.allocations.store(usize::MAX, Ordering::SeqCst);
    cycle.deallocate(&kept).await.unwrap();
    assert_eq!(space.root.object_count(b_mpo), 1);
    assert_eq!(cycle.load_snapshot("three.snap").await.unwrap(), 3);
    assert_eq!(space.root.object_count(b_mpo), 3);
    assert_eq!(heap.object_count(b_mpo), 3);
}

#[tokio::test]
async fn test_tool_hosts_one_owner() {
    let space = Space::new(Arc::new(InMemorySnapshotStore::new()));
    let Response::DaemonEnroled { machine } = space.tool.call(Request::EnroleDaemon).await.unwrap() else {
        panic!("expected DaemonEnroled");
    };
    let mut owner = space.tool.host_owner(machine).await.unwrap();
    let mpo = owner.mpo();

    for expected in 1..=3u32 {
        let cycle = owner.begin_cycle().await.unwrap();
        assert_eq!(cycle.cycle(), expected);
    }

    let status = space.tool.ping_node().await.unwrap();
    assert_eq!(status.role, NodeRole::Root);
    let nodes = space.tool.list_nodes().await.unwrap();
    assert_eq!(nodes[0].role, NodeRole::Root);

    space.tool.set_project("demo/project").await.unwrap();
    let program = space.tool.program().await.unwrap().unwrap();
    assert_eq!(program.project.path, "demo/project");

    owner.destroy().await.unwrap();
    assert!(!space.root.is_constructed(mpo));
}
