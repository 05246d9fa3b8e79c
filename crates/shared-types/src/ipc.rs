//! # IPC Message Surface
//!
//! The closed set of request/response payloads exchanged between node roles.
//! Payloads carry value types only: `MPO`, `MP`, `TypeId`, `NetworkAddress`
//! and plain bytes. No payload can hold a heap address.
//!
//! ## Authority Matrix
//!
//! | Request | Handled by | Forwarded by |
//! |---------|------------|--------------|
//! | `Ping { Node }` | every role | - |
//! | `ListNodes` | every role (fan-out down the tree) | - |
//! | everything else | Root | Daemon, Leaf, Executor, Tool |

use crate::identity::{TimeStamp, TypeId};
use crate::mpo::{MachineId, MP, MPO};
use crate::reference::NetworkAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node roles of the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Cluster-wide naming and lock authority.
    Root,
    /// Per-machine broker.
    Daemon,
    /// Per-process endpoint.
    Leaf,
    /// Owner host running scheduled owners.
    Executor,
    /// Owner host stepped by a tool.
    Tool,
}

impl NodeRole {
    /// Stable lower-case name.
    pub const fn name(self) -> &'static str {
        match self {
            NodeRole::Root => "root",
            NodeRole::Daemon => "daemon",
            NodeRole::Leaf => "leaf",
            NodeRole::Executor => "executor",
            NodeRole::Tool => "tool",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "root" => Ok(NodeRole::Root),
            "daemon" => Ok(NodeRole::Daemon),
            "leaf" => Ok(NodeRole::Leaf),
            "executor" => Ok(NodeRole::Executor),
            "tool" => Ok(NodeRole::Tool),
            other => Err(format!("unknown node role '{other}'")),
        }
    }
}

// =============================================================================
// PAYLOAD VALUES
// =============================================================================

/// One committed element write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Element written.
    pub address: NetworkAddress,
    /// Encoded value.
    pub data: Vec<u8>,
}

/// Writes one owner made to another owner's objects during one cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Writing owner.
    pub source: MPO,
    /// Cycle the writes belong to.
    pub cycle: TimeStamp,
    /// Records in write order.
    pub records: Vec<MemoryRecord>,
}

impl Transaction {
    /// Empty transaction, used when releasing read locks.
    pub fn empty(source: MPO, cycle: TimeStamp) -> Self {
        Self {
            source,
            cycle,
            records: Vec::new(),
        }
    }

    /// True when there is nothing to commit.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Project the cluster is running.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project path.
    pub path: String,
}

/// Program currently loaded for the project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Project the program was built from.
    pub project: Project,
    /// Bumped on every project change.
    pub revision: u32,
}

/// Target of a ping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PingTarget {
    /// The receiving node itself.
    Node,
    /// A constructed owner, checked against the root registry.
    Owner(MPO),
}

/// Liveness report of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Role of the node.
    pub role: NodeRole,
    /// Node name.
    pub name: String,
    /// Conversations currently active.
    pub conversations: usize,
    /// Owners hosted, if any.
    pub owners: Vec<MPO>,
}

// =============================================================================
// REQUESTS
// =============================================================================

/// Every request of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Daemon asks for a machine id.
    EnroleDaemon,
    /// Leaf asks for a process slot.
    EnroleLeaf {
        /// Machine of the daemon the leaf is attached to.
        machine: MachineId,
    },
    /// Allocate an owner slot in a process.
    ConstructOwner {
        /// Hosting process.
        mp: MP,
    },
    /// Free an owner slot and release its locks.
    DestroyOwner {
        /// Owner.
        mpo: MPO,
    },
    /// Root object of an owner.
    GetRoot {
        /// Owner.
        mpo: MPO,
    },
    /// Allocate a network object.
    AllocateNetworkAddress {
        /// Owner of the new object.
        mpo: MPO,
        /// Object type.
        type_id: TypeId,
    },
    /// Free a network object.
    DeallocateNetworkAddress {
        /// Object address.
        address: NetworkAddress,
    },
    /// Acquire a read lock.
    ReadLock {
        /// Locking owner.
        requester: MPO,
        /// Locked owner.
        target: MPO,
        /// Requester's current cycle.
        cycle: TimeStamp,
    },
    /// Acquire or upgrade to a write lock.
    WriteLock {
        /// Locking owner.
        requester: MPO,
        /// Locked owner.
        target: MPO,
        /// Requester's current cycle.
        cycle: TimeStamp,
    },
    /// Release a lock, committing the cycle's writes.
    ReleaseLock {
        /// Locking owner.
        requester: MPO,
        /// Locked owner.
        target: MPO,
        /// Cycle the lock was granted at.
        cycle: TimeStamp,
        /// Writes to commit. Empty for read locks.
        transaction: Transaction,
    },
    /// Drain transactions committed against an owner.
    TakeTransactions {
        /// Owner.
        mpo: MPO,
    },
    /// Copy a file into the stash.
    Stash {
        /// File path.
        path: String,
        /// Determinant hash of the file's inputs.
        determinant: u64,
    },
    /// Restore a file from the stash.
    Restore {
        /// File path.
        path: String,
        /// Determinant hash of the file's inputs.
        determinant: u64,
    },
    /// Select the project.
    SetProject {
        /// Project.
        project: Project,
    },
    /// Current project.
    GetProject,
    /// Current program.
    GetProgram,
    /// Persist an encoded snapshot.
    SaveSnapshot {
        /// Destination path.
        path: String,
        /// Encoded snapshot.
        image: Vec<u8>,
    },
    /// Read an encoded snapshot.
    LoadSnapshot {
        /// Source path.
        path: String,
    },
    /// Enroled machines.
    GetMachines,
    /// Enroled processes of a machine.
    GetProcesses {
        /// Machine.
        machine: MachineId,
    },
    /// Constructed owners of a process.
    GetOwners {
        /// Process.
        mp: MP,
    },
    /// Status of every node below the receiver, receiver included.
    ListNodes,
    /// Liveness query.
    Ping {
        /// Node or owner.
        target: PingTarget,
    },
}

impl Request {
    /// Message name for logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Request::EnroleDaemon => "EnroleDaemon",
            Request::EnroleLeaf { .. } => "EnroleLeaf",
            Request::ConstructOwner { .. } => "ConstructOwner",
            Request::DestroyOwner { .. } => "DestroyOwner",
            Request::GetRoot { .. } => "GetRoot",
            Request::AllocateNetworkAddress { .. } => "AllocateNetworkAddress",
            Request::DeallocateNetworkAddress { .. } => "DeallocateNetworkAddress",
            Request::ReadLock { .. } => "ReadLock",
            Request::WriteLock { .. } => "WriteLock",
            Request::ReleaseLock { .. } => "ReleaseLock",
            Request::TakeTransactions { .. } => "TakeTransactions",
            Request::Stash { .. } => "Stash",
            Request::Restore { .. } => "Restore",
            Request::SetProject { .. } => "SetProject",
            Request::GetProject => "GetProject",
            Request::GetProgram => "GetProgram",
            Request::SaveSnapshot { .. } => "SaveSnapshot",
            Request::LoadSnapshot { .. } => "LoadSnapshot",
            Request::GetMachines => "GetMachines",
            Request::GetProcesses { .. } => "GetProcesses",
            Request::GetOwners { .. } => "GetOwners",
            Request::ListNodes => "ListNodes",
            Request::Ping { .. } => "Ping",
        }
    }

    /// True when `role` answers this request itself instead of forwarding.
    pub fn handled_by(&self, role: NodeRole) -> bool {
        match self {
            Request::Ping {
                target: PingTarget::Node,
            }
            | Request::ListNodes => true,
            _ => role == NodeRole::Root,
        }
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Every response of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Machine assigned to a daemon.
    DaemonEnroled {
        /// Machine id.
        machine: MachineId,
    },
    /// Process slot assigned to a leaf.
    LeafEnroled {
        /// Process.
        mp: MP,
    },
    /// Owner slot allocated.
    OwnerConstructed {
        /// New owner.
        mpo: MPO,
        /// Its root object.
        root: NetworkAddress,
    },
    /// Owner slot freed.
    OwnerDestroyed,
    /// Root object of an owner.
    Root {
        /// Root address.
        root: NetworkAddress,
    },
    /// Object allocated.
    Allocated {
        /// Object address.
        address: NetworkAddress,
    },
    /// Object freed.
    Deallocated,
    /// Lock granted.
    LockGranted {
        /// Locked owner.
        target: MPO,
        /// Cycle recorded for the grant.
        cycle: TimeStamp,
    },
    /// Lock released.
    LockReleased,
    /// Drained transactions, oldest first.
    Transactions {
        /// Transactions.
        transactions: Vec<Transaction>,
    },
    /// File stashed.
    Stashed,
    /// Restore outcome.
    Restored {
        /// False when nothing matched path and determinant.
        restored: bool,
    },
    /// Project selected.
    ProjectSet,
    /// Current project.
    Project {
        /// None before the first `SetProject`.
        project: Option<Project>,
    },
    /// Current program.
    Program {
        /// None before the first `SetProject`.
        program: Option<Program>,
    },
    /// Snapshot persisted.
    SnapshotSaved,
    /// Snapshot read.
    SnapshotLoaded {
        /// Encoded snapshot.
        image: Vec<u8>,
    },
    /// Enroled machines.
    Machines {
        /// Machine ids, ascending.
        machines: Vec<MachineId>,
    },
    /// Processes of a machine.
    Processes {
        /// Processes, ascending.
        processes: Vec<MP>,
    },
    /// Owners of a process.
    Owners {
        /// Owners, ascending.
        owners: Vec<MPO>,
    },
    /// Node statuses of a subtree.
    Nodes {
        /// Receiver first, then its subtree.
        nodes: Vec<NodeStatus>,
    },
    /// Node liveness.
    Pong {
        /// Status of the pinged node.
        status: NodeStatus,
    },
    /// Owner liveness.
    OwnerStatus {
        /// Owner pinged.
        mpo: MPO,
        /// True when the owner is constructed.
        alive: bool,
    },
}

impl Response {
    /// Message name for logs and errors.
    pub const fn name(&self) -> &'static str {
        match self {
            Response::DaemonEnroled { .. } => "DaemonEnroled",
            Response::LeafEnroled { .. } => "LeafEnroled",
            Response::OwnerConstructed { .. } => "OwnerConstructed",
            Response::OwnerDestroyed => "OwnerDestroyed",
            Response::Root { .. } => "Root",
            Response::Allocated { .. } => "Allocated",
            Response::Deallocated => "Deallocated",
            Response::LockGranted { .. } => "LockGranted",
            Response::LockReleased => "LockReleased",
            Response::Transactions { .. } => "Transactions",
            Response::Stashed => "Stashed",
            Response::Restored { .. } => "Restored",
            Response::ProjectSet => "ProjectSet",
            Response::Project { .. } => "Project",
            Response::Program { .. } => "Program",
            Response::SnapshotSaved => "SnapshotSaved",
            Response::SnapshotLoaded { .. } => "SnapshotLoaded",
            Response::Machines { .. } => "Machines",
            Response::Processes { .. } => "Processes",
            Response::Owners { .. } => "Owners",
            Response::Nodes { .. } => "Nodes",
            Response::Pong { .. } => "Pong",
            Response::OwnerStatus { .. } => "OwnerStatus",
        }
    }
}
