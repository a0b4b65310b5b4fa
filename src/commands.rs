//! Administrative command dispatch.
//!
//! The only mutation surface besides session events: a closed command set
//! per entity type, dispatched onto a resolved live object. Anything
//! outside these enums is rejected at the type level.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::draft::{DraftAction, DraftCoordinator};
use crate::error::Result;
use crate::identity::{IdentityReconciler, UserAction};
use crate::servers::{ServerAction, ServerRegistry};
use crate::types::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum AdminCommand {
    User {
        id: UserId,
        #[serde(flatten)]
        action: UserAction,
    },
    Server {
        address: String,
        #[serde(flatten)]
        action: ServerAction,
    },
    Draft {
        #[serde(flatten)]
        action: DraftAction,
    },
}

pub struct CommandDispatcher {
    reconciler: IdentityReconciler,
    registry: Arc<ServerRegistry>,
    draft: Arc<DraftCoordinator>,
}

impl CommandDispatcher {
    pub fn new(
        reconciler: IdentityReconciler,
        registry: Arc<ServerRegistry>,
        draft: Arc<DraftCoordinator>,
    ) -> Self {
        Self {
            reconciler,
            registry,
            draft,
        }
    }

    pub async fn dispatch(&self, command: AdminCommand) -> Result<()> {
        match command {
            AdminCommand::User { id, action } => self.reconciler.dispatch_user(id, action).await,
            AdminCommand::Server { address, action } => {
                self.registry.dispatch(&address, action).await
            }
            AdminCommand::Draft { action } => self.draft.dispatch(action).await,
        }
    }
}
