//! # Executor
//!
//! Runs the owners of one process. Every owner gets its own task and its
//! own [`OwnerContext`]; all of them share the process heap and the
//! process clock.
//!
//! ```text
//! loop {
//!     request_clock(mpo)          wait until every owner is ready
//!     begin_cycle()               flush releases, apply transactions
//!     program.step(owner, tick)   reads, writes, allocations
//!     drop(cycle)                 queue releases, advance
//! }
//! finish(); destroy(); unregister(mpo)
//! ```

use crate::domain::ProcessHeap;
use crate::owner::{OwnerContext, OwnerProgram, Step};
use crate::ports::NodeContext;
use crate::roles::{reject, NodeHandler};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ps_03_clock::{ClockError, ProcessClock};
use shared_conversation::{ConnectionId, Conversation, Router};
use shared_types::{ConversationError, NodeRole, Request, Response, SpaceError, MP, MPO};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors raised while running owners.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Request or heap failure.
    #[error(transparent)]
    Space(#[from] SpaceError),

    /// Process clock failure.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// No task runs the owner.
    #[error("Owner {0} does not run on this executor")]
    UnknownOwner(MPO),

    /// The owner's task panicked or was aborted.
    #[error("Owner {0} task ended abnormally")]
    Panicked(MPO),
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Executor node context. Owners answer nothing; they only ask.
pub struct ExecutorContext {
    name: String,
    upstream: RwLock<Option<ConnectionId>>,
    heap: Arc<ProcessHeap>,
}

impl ExecutorContext {
    /// Context for the owners living in `heap`.
    pub fn new(name: impl Into<String>, heap: Arc<ProcessHeap>) -> Self {
        Self {
            name: name.into(),
            upstream: RwLock::new(None),
            heap,
        }
    }
}

#[async_trait]
impl NodeContext for ExecutorContext {
    fn role(&self) -> NodeRole {
        NodeRole::Executor
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn upstream(&self) -> Option<ConnectionId> {
        *self.upstream.read()
    }

    fn downstream(&self) -> Vec<ConnectionId> {
        Vec::new()
    }

    fn owners(&self) -> Vec<MPO> {
        self.heap.hosted()
    }

    async fn handle(
        &self,
        _conversation: &mut Conversation,
        _from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        Err(reject(self, &request))
    }
}

// =============================================================================
// EXECUTOR
// =============================================================================

type OwnerTask = JoinHandle<Result<(), ExecutorError>>;

/// Owner runner of one process.
pub struct Executor {
    router: Router,
    context: Arc<ExecutorContext>,
    heap: Arc<ProcessHeap>,
    clock: ProcessClock,
    tasks: Mutex<HashMap<MPO, OwnerTask>>,
}

impl Executor {
    /// Start an executor for process `mp` ticking at most every `tick`.
    pub fn start(name: impl Into<String>, mp: MP, tick: Duration) -> Self {
        let heap = Arc::new(ProcessHeap::new(mp));
        let context = Arc::new(ExecutorContext::new(name, heap.clone()));
        let router = Router::start(NodeRole::Executor, Arc::new(NodeHandler::new(context.clone())));
        info!(name = %context.name, %mp, "[ps-04] executor started");
        Self {
            router,
            context,
            heap,
            clock: ProcessClock::spawn(tick),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Conversation router of this executor.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Use `upstream` for every owner constructed from now on.
    pub fn attach(&self, upstream: ConnectionId) {
        *self.context.upstream.write() = Some(upstream);
    }

    /// Heap shared by this executor's owners.
    pub fn heap(&self) -> &Arc<ProcessHeap> {
        &self.heap
    }

    /// Owners with a running task.
    pub fn owners(&self) -> Vec<MPO> {
        let mut owners: Vec<_> = self.tasks.lock().keys().copied().collect();
        owners.sort();
        owners
    }

    /// Construct an owner and run `program` on it until it stops.
    pub async fn spawn_owner(
        &self,
        program: Box<dyn OwnerProgram>,
    ) -> Result<MPO, ExecutorError> {
        let upstream = self.context.upstream().ok_or_else(|| {
            SpaceError::from(ConversationError::Unreachable(format!(
                "executor {} is not attached",
                self.context.name
            )))
        })?;
        let owner = OwnerContext::construct(&self.router, upstream, self.heap.clone()).await?;
        let mpo = owner.mpo();
        self.clock.register(mpo)?;
        let task = tokio::spawn(run_owner(owner, program, self.clock.clone()));
        self.tasks.lock().insert(mpo, task);
        Ok(mpo)
    }

    /// Wait for the task of `mpo` to end.
    pub async fn join(&self, mpo: MPO) -> Result<(), ExecutorError> {
        let task = self
            .tasks
            .lock()
            .remove(&mpo)
            .ok_or(ExecutorError::UnknownOwner(mpo))?;
        task.await.map_err(|_| ExecutorError::Panicked(mpo))?
    }

    /// Abort every owner task and stop the router.
    pub fn shutdown(&self) {
        for (mpo, task) in self.tasks.lock().drain() {
            debug!(%mpo, "[ps-04] aborting owner");
            task.abort();
        }
        self.router.shutdown();
    }
}

async fn run_owner(
    mut owner: OwnerContext,
    mut program: Box<dyn OwnerProgram>,
    clock: ProcessClock,
) -> Result<(), ExecutorError> {
    let mpo = owner.mpo();
    let outcome = drive(&mut owner, program.as_mut(), &clock).await;
    if let Err(error) = &outcome {
        error!(%mpo, %error, "[ps-04] owner stopped on error");
    }

    let destroyed = owner.destroy().await;
    if let Err(error) = clock.unregister(mpo) {
        debug!(%mpo, %error, "[ps-04] clock already gone");
    }
    outcome?;
    destroyed?;
    Ok(())
}

async fn drive(
    owner: &mut OwnerContext,
    program: &mut dyn OwnerProgram,
    clock: &ProcessClock,
) -> Result<(), ExecutorError> {
    let mpo = owner.mpo();
    loop {
        clock.request_clock(mpo).await?;
        let mut cycle = owner.begin_cycle().await?;
        let tick = cycle.tick();
        let step = program.step(&mut *cycle, tick).await;
        drop(cycle);

        match step {
            Ok(Step::Continue) => {}
            Ok(Step::Stop) => {
                debug!(%mpo, cycle = tick.cycle, "[ps-04] program stopped");
                return Ok(());
            }
            Err(error) if error.is_recoverable() => {
                warn!(%mpo, cycle = tick.cycle, %error, "[ps-04] step failed");
            }
            Err(error) => return Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::OwnerState;
    use crate::roles::RootNode;
    use ps_01_address_table::InMemorySnapshotStore;
    use ps_03_clock::ClockTick;
    use shared_conversation::memory;
    use shared_types::{Reference, TypeId, TypeInstance};

    struct Client;

    #[async_trait]
    impl NodeContext for Client {
        fn role(&self) -> NodeRole {
            NodeRole::Tool
        }
        fn name(&self) -> String {
            "client".into()
        }
        fn upstream(&self) -> Option<ConnectionId> {
            None
        }
        fn downstream(&self) -> Vec<ConnectionId> {
            Vec::new()
        }
        async fn handle(
            &self,
            _conversation: &mut Conversation,
            _from: ConnectionId,
            request: Request,
        ) -> Result<Response, SpaceError> {
            Err(reject(self, &request))
        }
    }

    fn counter(root: &Reference) -> Reference {
        root.with_type_instance(TypeInstance::new(TypeId::make_context(1, 1), 0))
    }

    /// Counts its own cycles into its root.
    struct Count {
        cycles: u8,
    }

    #[async_trait]
    impl OwnerProgram for Count {
        async fn step(&mut self, owner: &mut OwnerState, _tick: ClockTick) -> Result<Step, SpaceError> {
            let root = owner.root();
            let mut value = owner.read(&counter(&root)).await?;
            let next = value.pop().unwrap_or(0) + 1;
            owner.write(&counter(&root), vec![next]).await?;
            Ok(if next >= self.cycles { Step::Stop } else { Step::Continue })
        }
    }

    struct Setup {
        root: Arc<RootNode>,
        executor: Executor,
        _root_router: Router,
        _client: Router,
    }

    async fn setup() -> Setup {
        let root = Arc::new(RootNode::new("root", Arc::new(InMemorySnapshotStore::new())));
        let root_router = Router::start(NodeRole::Root, Arc::new(NodeHandler::new(root.clone())));
        let client = Router::start(NodeRole::Tool, Arc::new(NodeHandler::new(Arc::new(Client))));
        let (_, upstream) = memory::link(&root_router, &client);

        let mut conversation = client.begin();
        let Response::DaemonEnroled { machine } =
            conversation.request(upstream, Request::EnroleDaemon).await.unwrap()
        else {
            panic!("expected DaemonEnroled");
        };
        let Response::LeafEnroled { mp } = conversation
            .request(upstream, Request::EnroleLeaf { machine })
            .await
            .unwrap()
        else {
            panic!("expected LeafEnroled");
        };

        let executor = Executor::start("executor", mp, Duration::from_millis(1));
        let (_, executor_upstream) = memory::link(&root_router, executor.router());
        executor.attach(executor_upstream);
        Setup {
            root,
            executor,
            _root_router: root_router,
            _client: client,
        }
    }

    #[tokio::test]
    async fn test_unattached_executor_refuses_owners() {
        let executor = Executor::start("lonely", MP::new(0, 0), Duration::from_millis(1));
        let err = executor
            .spawn_owner(Box::new(Count { cycles: 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Space(SpaceError::Conversation(_))));
        executor.shutdown();
    }

    #[tokio::test]
    async fn test_owner_runs_until_stop() {
        let s = setup().await;
        let mpo = s.executor.spawn_owner(Box::new(Count { cycles: 3 })).await.unwrap();
        assert!(s.root.is_constructed(mpo));
        assert_eq!(s.executor.owners(), vec![mpo]);

        s.executor.join(mpo).await.unwrap();
        assert!(!s.root.is_constructed(mpo));
        assert!(!s.executor.heap().is_hosted(mpo));
        assert!(s.executor.owners().is_empty());
        assert!(matches!(
            s.executor.join(mpo).await,
            Err(ExecutorError::UnknownOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_owners_share_the_clock() {
        let s = setup().await;
        let a = s.executor.spawn_owner(Box::new(Count { cycles: 2 })).await.unwrap();
        let b = s.executor.spawn_owner(Box::new(Count { cycles: 5 })).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(s.executor.context.owners().len(), 2);

        s.executor.join(a).await.unwrap();
        s.executor.join(b).await.unwrap();
        assert!(s.executor.heap().hosted().is_empty());
    }
}
