//! # Root
//!
//! The single authority of the cluster. Root answers every request that is
//! not common to all roles:
//!
//! | Area | Requests |
//! |------|----------|
//! | enrolment | `EnroleDaemon`, `EnroleLeaf` |
//! | owners and objects | `ConstructOwner`, `DestroyOwner`, `GetRoot`, `(De)AllocateNetworkAddress` |
//! | locks | `ReadLock`, `WriteLock`, `ReleaseLock`, `TakeTransactions` |
//! | storage | `Stash`, `Restore`, `SaveSnapshot`, `LoadSnapshot` |
//! | project | `SetProject`, `GetProject`, `GetProgram` |
//! | queries | `GetMachines`, `GetProcesses`, `GetOwners`, `Ping { Owner }` |
//!
//! Registry, lock table and journal sit behind one mutex that is never held
//! across an await.

use crate::domain::{RootRegistry, TransactionJournal};
use crate::ports::NodeContext;
use crate::roles::reject;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use ps_01_address_table::SnapshotStore;
use ps_02_lock_tracking::{LockAuthority, LockKind};
use shared_conversation::{ConnectionId, Conversation};
use shared_types::{
    AddressError, NodeRole, PingTarget, Program, Project, Request, Response, SpaceError, MPO,
};
use std::sync::Arc;
use tracing::{info, warn};

struct RootState {
    registry: RootRegistry,
    locks: LockAuthority,
    journal: TransactionJournal,
    project: Option<Project>,
    revision: u32,
}

impl RootState {
    fn require_owner(&self, mpo: MPO) -> Result<(), AddressError> {
        if self.registry.is_constructed(mpo) {
            Ok(())
        } else {
            Err(AddressError::NotAllocated(format!("owner {mpo}")))
        }
    }
}

/// Root node context.
pub struct RootNode {
    name: String,
    state: Mutex<RootState>,
    store: Arc<dyn SnapshotStore>,
    daemons: RwLock<Vec<ConnectionId>>,
}

impl RootNode {
    /// Root backed by `store` for stash and snapshot files.
    pub fn new(name: impl Into<String>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RootState {
                registry: RootRegistry::new(),
                locks: LockAuthority::new(),
                journal: TransactionJournal::new(),
                project: None,
                revision: 0,
            }),
            store,
            daemons: RwLock::new(Vec::new()),
        }
    }

    /// True when `mpo` is constructed.
    pub fn is_constructed(&self, mpo: MPO) -> bool {
        self.state.lock().registry.is_constructed(mpo)
    }

    /// Mode and holders of the lock on `target`.
    pub fn lock_holders(&self, target: MPO) -> Option<(LockKind, Vec<MPO>)> {
        self.state.lock().locks.holders(target)
    }

    /// Transactions waiting for `target`.
    pub fn pending_transactions(&self, target: MPO) -> usize {
        self.state.lock().journal.pending(target)
    }

    /// Objects Root has allocated for `mpo`, root included.
    pub fn object_count(&self, mpo: MPO) -> usize {
        self.state.lock().registry.object_count(mpo)
    }

    fn handle_locally(&self, from: ConnectionId, request: Request) -> Result<Response, SpaceError> {
        let mut state = self.state.lock();
        let response = match request {
            Request::EnroleDaemon => {
                let machine = state.registry.enrole_machine();
                let mut daemons = self.daemons.write();
                if !daemons.contains(&from) {
                    daemons.push(from);
                }
                info!(machine, connection = %from, "[ps-04] daemon enroled");
                Response::DaemonEnroled { machine }
            }
            Request::EnroleLeaf { machine } => {
                let mp = state.registry.enrole_process(machine)?;
                info!(%mp, "[ps-04] leaf enroled");
                Response::LeafEnroled { mp }
            }
            Request::ConstructOwner { mp } => {
                let (mpo, root) = state.registry.construct_owner(mp)?;
                info!(%mpo, "[ps-04] owner constructed");
                Response::OwnerConstructed { mpo, root }
            }
            Request::DestroyOwner { mpo } => {
                state.registry.destroy_owner(mpo)?;
                let released = state.locks.release_all(mpo);
                let discarded = state.journal.discard(mpo);
                info!(%mpo, released = released.len(), discarded, "[ps-04] owner destroyed");
                Response::OwnerDestroyed
            }
            Request::GetRoot { mpo } => Response::Root {
                root: state.registry.root(mpo)?,
            },
            Request::AllocateNetworkAddress { mpo, type_id } => Response::Allocated {
                address: state.registry.allocate(mpo, type_id)?,
            },
            Request::DeallocateNetworkAddress { address } => {
                state.registry.deallocate(address)?;
                Response::Deallocated
            }
            Request::ReadLock {
                requester,
                target,
                cycle,
            } => {
                state.require_owner(requester)?;
                state.require_owner(target)?;
                let grant = state.locks.acquire_read(requester, target, cycle)?;
                Response::LockGranted {
                    target,
                    cycle: grant.cycle,
                }
            }
            Request::WriteLock {
                requester,
                target,
                cycle,
            } => {
                state.require_owner(requester)?;
                state.require_owner(target)?;
                let grant = state.locks.acquire_write(requester, target, cycle)?;
                Response::LockGranted {
                    target,
                    cycle: grant.cycle,
                }
            }
            Request::ReleaseLock {
                requester,
                target,
                cycle,
                transaction,
            } => {
                match state.locks.release(requester, target, cycle)? {
                    Some(LockKind::Write) => {
                        state.journal.commit(target, transaction);
                    }
                    _ if !transaction.is_empty() => {
                        warn!(%requester, %target, records = transaction.records.len(), "[ps-04] writes released without a write lock dropped");
                    }
                    _ => {}
                }
                Response::LockReleased
            }
            Request::TakeTransactions { mpo } => {
                state.require_owner(mpo)?;
                Response::Transactions {
                    transactions: state.journal.take(mpo),
                }
            }
            Request::SetProject { project } => {
                state.revision += 1;
                info!(path = %project.path, revision = state.revision, "[ps-04] project set");
                state.project = Some(project);
                Response::ProjectSet
            }
            Request::GetProject => Response::Project {
                project: state.project.clone(),
            },
            Request::GetProgram => Response::Program {
                program: state.project.clone().map(|project| Program {
                    project,
                    revision: state.revision,
                }),
            },
            Request::GetMachines => Response::Machines {
                machines: state.registry.machines(),
            },
            Request::GetProcesses { machine } => Response::Processes {
                processes: state.registry.processes(machine)?,
            },
            Request::GetOwners { mp } => Response::Owners {
                owners: state.registry.owners(mp)?,
            },
            Request::Ping {
                target: PingTarget::Owner(mpo),
            } => Response::OwnerStatus {
                mpo,
                alive: state.registry.is_constructed(mpo),
            },
            other => return Err(reject(self, &other)),
        };
        Ok(response)
    }
}

#[async_trait]
impl NodeContext for RootNode {
    fn role(&self) -> NodeRole {
        NodeRole::Root
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn upstream(&self) -> Option<ConnectionId> {
        None
    }

    fn downstream(&self) -> Vec<ConnectionId> {
        self.daemons.read().clone()
    }

    async fn handle(
        &self,
        _conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        match request {
            Request::Stash { path, determinant } => {
                self.store.stash(&path, determinant).await?;
                Ok(Response::Stashed)
            }
            Request::Restore { path, determinant } => Ok(Response::Restored {
                restored: self.store.restore(&path, determinant).await?,
            }),
            Request::SaveSnapshot { path, image } => {
                self.store.save(&path, &image).await?;
                info!(%path, bytes = image.len(), "[ps-04] snapshot saved");
                Ok(Response::SnapshotSaved)
            }
            Request::LoadSnapshot { path } => Ok(Response::SnapshotLoaded {
                image: self.store.load(&path).await?,
            }),
            other => self.handle_locally(from, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::NodeHandler;
    use ps_01_address_table::InMemorySnapshotStore;
    use shared_conversation::{memory, Router};
    use shared_types::{
        ErrorKind, MemoryRecord, NetworkAddress, NodeStatus, Transaction, TypeId, MP,
    };

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

    struct Harness {
        root: Arc<RootNode>,
        client: Router,
        upstream: ConnectionId,
        _root_router: Router,
    }

    impl Harness {
        fn new() -> Self {
            let root = Arc::new(RootNode::new("root", Arc::new(InMemorySnapshotStore::new())));
            let root_router = Router::start(NodeRole::Root, Arc::new(NodeHandler::new(root.clone())));
            let client = Router::start(NodeRole::Tool, Arc::new(NodeHandler::new(Arc::new(Client))));
            let (_, upstream) = memory::link(&root_router, &client);
            Self {
                root,
                client,
                upstream,
                _root_router: root_router,
            }
        }

        async fn call(&self, request: Request) -> Result<Response, SpaceError> {
            self.client.begin().request(self.upstream, request).await
        }

        async fn owner(&self) -> MPO {
            let Response::DaemonEnroled { machine } = self.call(Request::EnroleDaemon).await.unwrap() else {
                panic!("expected DaemonEnroled");
            };
            let Response::LeafEnroled { mp } = self.call(Request::EnroleLeaf { machine }).await.unwrap() else {
                panic!("expected LeafEnroled");
            };
            match self.call(Request::ConstructOwner { mp }).await.unwrap() {
                Response::OwnerConstructed { mpo, root } => {
                    assert_eq!(root, NetworkAddress::make_root(mpo));
                    mpo
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_enrolment_and_queries() {
        let h = Harness::new();
        let a = h.owner().await;
        assert_eq!(a, MPO::new(0, 0, 0));

        assert_eq!(
            h.call(Request::GetMachines).await.unwrap(),
            Response::Machines { machines: vec![0] }
        );
        assert_eq!(
            h.call(Request::GetProcesses { machine: 0 }).await.unwrap(),
            Response::Processes {
                processes: vec![MP::new(0, 0)]
            }
        );
        assert_eq!(
            h.call(Request::GetOwners { mp: MP::new(0, 0) }).await.unwrap(),
            Response::Owners { owners: vec![a] }
        );
        assert_eq!(
            h.call(Request::Ping {
                target: PingTarget::Owner(a)
            })
            .await
            .unwrap(),
            Response::OwnerStatus { mpo: a, alive: true }
        );
    }

    #[tokio::test]
    async fn test_unknown_machine_is_fatal() {
        let h = Harness::new();
        let err = h.call(Request::EnroleLeaf { machine: 4 }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Address);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_write_lock_commits_transaction() {
        let h = Harness::new();
        let a = h.owner().await;
        let b = h.owner().await;

        let granted = h
            .call(Request::WriteLock {
                requester: a,
                target: b,
                cycle: 3,
            })
            .await
            .unwrap();
        assert_eq!(granted, Response::LockGranted { target: b, cycle: 3 });

        let self_access = h
            .call(Request::ReadLock {
                requester: b,
                target: b,
                cycle: 1,
            })
            .await;
        assert!(self_access.is_ok());

        let transaction = Transaction {
            source: a,
            cycle: 3,
            records: vec![MemoryRecord {
                address: NetworkAddress::make_root(b),
                data: vec![1],
            }],
        };
        h.call(Request::ReleaseLock {
            requester: a,
            target: b,
            cycle: 3,
            transaction: transaction.clone(),
        })
        .await
        .unwrap();
        assert_eq!(h.root.pending_transactions(b), 1);
        assert!(h.root.lock_holders(b).is_none());

        assert_eq!(
            h.call(Request::TakeTransactions { mpo: b }).await.unwrap(),
            Response::Transactions {
                transactions: vec![transaction]
            }
        );
    }

    #[tokio::test]
    async fn test_conflicting_lock_is_recoverable() {
        let h = Harness::new();
        let a = h.owner().await;
        let b = h.owner().await;
        let t = h.owner().await;

        h.call(Request::ReadLock {
            requester: a,
            target: t,
            cycle: 1,
        })
        .await
        .unwrap();
        let err = h
            .call(Request::WriteLock {
                requester: b,
                target: t,
                cycle: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lock);
        assert!(err.is_recoverable());

        let err = h
            .call(Request::ReadLock {
                requester: a,
                target: MPO::new(5, 5, 5),
                cycle: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Address);
    }

    #[tokio::test]
    async fn test_destroy_owner_releases_its_locks() {
        let h = Harness::new();
        let a = h.owner().await;
        let t = h.owner().await;

        h.call(Request::WriteLock {
            requester: a,
            target: t,
            cycle: 2,
        })
        .await
        .unwrap();
        h.call(Request::DestroyOwner { mpo: a }).await.unwrap();
        assert!(h.root.lock_holders(t).is_none());
        assert!(!h.root.is_constructed(a));
        assert!(h.call(Request::DestroyOwner { mpo: a }).await.is_err());
    }

    #[tokio::test]
    async fn test_allocation_round_trip() {
        let h = Harness::new();
        let a = h.owner().await;
        let Response::Allocated { address } = h
            .call(Request::AllocateNetworkAddress {
                mpo: a,
                type_id: TypeId::make_context(7, 2),
            })
            .await
            .unwrap()
        else {
            panic!("expected Allocated");
        };
        assert_eq!(address.mpo, a);
        assert_eq!(address.type_instance.type_id, TypeId::make_context(7, 0));

        h.call(Request::DeallocateNetworkAddress { address })
            .await
            .unwrap();
        let err = h
            .call(Request::DeallocateNetworkAddress {
                address: NetworkAddress::make_root(a),
            })
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_project_revisions() {
        let h = Harness::new();
        assert_eq!(
            h.call(Request::GetProgram).await.unwrap(),
            Response::Program { program: None }
        );
        for path in ["demo/a", "demo/b"] {
            h.call(Request::SetProject {
                project: Project { path: path.into() },
            })
            .await
            .unwrap();
        }
        match h.call(Request::GetProgram).await.unwrap() {
            Response::Program {
                program: Some(program),
            } => {
                assert_eq!(program.project.path, "demo/b");
                assert_eq!(program.revision, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_snapshot_storage() {
        let h = Harness::new();
        h.call(Request::SaveSnapshot {
            path: "saves/one.pss".into(),
            image: vec![1, 2, 3],
        })
        .await
        .unwrap();
        assert_eq!(
            h.call(Request::LoadSnapshot {
                path: "saves/one.pss".into()
            })
            .await
            .unwrap(),
            Response::SnapshotLoaded {
                image: vec![1, 2, 3]
            }
        );
        let err = h
            .call(Request::LoadSnapshot {
                path: "saves/missing.pss".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Snapshot);
    }

    #[tokio::test]
    async fn test_common_requests() {
        let h = Harness::new();
        match h
            .call(Request::Ping {
                target: PingTarget::Node,
            })
            .await
            .unwrap()
        {
            Response::Pong { status } => assert_eq!(status.role, NodeRole::Root),
            other => panic!("unexpected {other:?}"),
        }
        let Response::Nodes { nodes } = h.call(Request::ListNodes).await.unwrap() else {
            panic!("expected Nodes");
        };
        let roles: Vec<NodeRole> = nodes.iter().map(|n: &NodeStatus| n.role).collect();
        assert_eq!(roles, vec![NodeRole::Root]);
    }
}
