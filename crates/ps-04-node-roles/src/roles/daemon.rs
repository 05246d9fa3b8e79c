//! Daemon: one per machine, relays its leaves to Root.

use crate::ports::NodeContext;
use crate::roles::{forward_upstream, reject, unexpected};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_conversation::{ConnectionId, Conversation, Router};
use shared_types::{ConversationError, MachineId, NodeRole, Request, Response, SpaceError};
use tracing::info;

/// Daemon node context.
pub struct DaemonNode {
    name: String,
    upstream: RwLock<Option<ConnectionId>>,
    machine: RwLock<Option<MachineId>>,
    leaves: RwLock<Vec<ConnectionId>>,
}

impl DaemonNode {
    /// Daemon not yet enroled.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upstream: RwLock::new(None),
            machine: RwLock::new(None),
            leaves: RwLock::new(Vec::new()),
        }
    }

    /// Machine id assigned by Root.
    pub fn machine(&self) -> Option<MachineId> {
        *self.machine.read()
    }

    /// Enrole with Root over `upstream`.
    pub async fn enrole(
        &self,
        router: &Router,
        upstream: ConnectionId,
    ) -> Result<MachineId, SpaceError> {
        *self.upstream.write() = Some(upstream);
        let mut conversation = router.begin();
        match conversation.request(upstream, Request::EnroleDaemon).await? {
            Response::DaemonEnroled { machine } => {
                *self.machine.write() = Some(machine);
                info!(name = %self.name, machine, "[ps-04] daemon ready");
                Ok(machine)
            }
            other => Err(unexpected("DaemonEnroled", &other)),
        }
    }
}

#[async_trait]
impl NodeContext for DaemonNode {
    fn role(&self) -> NodeRole {
        NodeRole::Daemon
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn upstream(&self) -> Option<ConnectionId> {
        *self.upstream.read()
    }

    fn downstream(&self) -> Vec<ConnectionId> {
        self.leaves.read().clone()
    }

    async fn handle(
        &self,
        conversation: &mut Conversation,
        from: ConnectionId,
        request: Request,
    ) -> Result<Response, SpaceError> {
        match request {
            Request::EnroleDaemon => Err(reject(self, &request)),
            Request::EnroleLeaf { .. } => {
                // Leaves do not know their machine; the daemon does.
                let machine = self.machine().ok_or_else(|| {
                    ConversationError::Unreachable(format!("daemon {} is not enroled", self.name))
                })?;
                let response =
                    forward_upstream(self, conversation, from, Request::EnroleLeaf { machine })
                        .await?;
                if matches!(response, Response::LeafEnroled { .. }) {
                    let mut leaves = self.leaves.write();
                    if !leaves.contains(&from) {
                        leaves.push(from);
                    }
                }
                Ok(response)
            }
            other => forward_upstream(self, conversation, from, other).await,
        }
    }
}
