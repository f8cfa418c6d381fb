// ABOUTME: Editing session guard tied to a connected client
// ABOUTME: Dropping the guard schedules a best-effort stop of the project's container

use crate::controller::LifecycleController;
use crate::error::LifecycleResult;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Held for as long as an editing client stays connected.
///
/// `close` performs the cleanup inline; otherwise `Drop` spawns it on the
/// current tokio runtime.
pub struct SessionGuard {
    controller: Arc<LifecycleController>,
    project_id: String,
    released: bool,
}

impl SessionGuard {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Run the disconnect cleanup now and wait for it
    pub async fn close(mut self) {
        self.released = true;
        self.controller.disconnect(&self.project_id).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let controller = Arc::clone(&self.controller);
        let project_id = std::mem::take(&mut self.project_id);
        match Handle::try_current() {
            Ok(handle) => {
                debug!(project_id = %project_id, "Session dropped, scheduling cleanup");
                handle.spawn(async move {
                    controller.disconnect(&project_id).await;
                });
            }
            Err(_) => warn!(
                project_id = %project_id,
                "Session dropped outside a runtime, container left running"
            ),
        }
    }
}

impl LifecycleController {
    /// Open an editing session for an existing project
    pub async fn session(self: &Arc<Self>, project_id: &str) -> LifecycleResult<SessionGuard> {
        self.store().get(project_id).await?;
        Ok(SessionGuard {
            controller: Arc::clone(self),
            project_id: project_id.to_string(),
            released: false,
        })
    }
}
