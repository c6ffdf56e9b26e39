//! Best-effort undo log for multi-step provisioning.
//!
//! Each successful step records how to undo itself. On failure the rows go
//! first, then the remote plugins, the remote service and finally the remote
//! route. Steps of the same kind unwind newest first. Undo errors are logged
//! and swallowed so the caller always surfaces the error that started the
//! rollback. Not-found during undo counts as success.

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::error::ControlPlaneResult;
use crate::gateway::GatewayAdapter;
use crate::provision::policy::AppliedChange;
use crate::store::Store;

/// One reversible step
#[derive(Debug, Clone, PartialEq)]
pub enum UndoStep {
    RemoteService(String),
    RemoteRoute(String),
    RemotePlugin(String),
    RouteRow(String),
    ServiceRow(String),
    PluginRow(String),
}

impl UndoStep {
    fn label(&self) -> &'static str {
        match self {
            Self::RemoteService(_) => "remote service",
            Self::RemoteRoute(_) => "remote route",
            Self::RemotePlugin(_) => "remote plugin",
            Self::RouteRow(_) => "route row",
            Self::ServiceRow(_) => "service row",
            Self::PluginRow(_) => "plugin row",
        }
    }

    /// Position of the step in the rollback sequence
    fn phase(&self) -> u8 {
        match self {
            Self::RouteRow(_) => 0,
            Self::ServiceRow(_) => 1,
            Self::PluginRow(_) => 2,
            Self::RemotePlugin(_) => 3,
            Self::RemoteService(_) => 4,
            Self::RemoteRoute(_) => 5,
        }
    }
}

pub struct Compensation {
    adapter: Arc<dyn GatewayAdapter>,
    store: Arc<dyn Store>,
    steps: Vec<UndoStep>,
}

impl Compensation {
    pub fn new(adapter: Arc<dyn GatewayAdapter>, store: Arc<dyn Store>) -> Self {
        Self {
            adapter,
            store,
            steps: Vec::new(),
        }
    }

    pub fn record(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    /// Record the remote undo of plugin additions. Updates and removals are not reverted.
    pub fn record_plugins(&mut self, changes: &[AppliedChange]) {
        for change in changes {
            if let AppliedChange::Added(instance) = change {
                self.record(UndoStep::RemotePlugin(instance.backend_id.clone()));
            }
        }
    }

    /// Record the row undo of plugin additions about to be persisted
    pub fn record_plugin_rows(&mut self, changes: &[AppliedChange]) {
        for change in changes {
            if let AppliedChange::Added(instance) = change {
                self.record(UndoStep::PluginRow(instance.id.clone()));
            }
        }
    }

    pub fn steps(&self) -> &[UndoStep] {
        &self.steps
    }

    /// Forget the log once the operation has committed
    pub fn commit(self) {
        debug!(steps = self.steps.len(), "provisioning committed");
    }

    /// Steps in the order [`Self::unwind`] runs them
    pub fn rollback_order(&self) -> Vec<&UndoStep> {
        let mut ordered: Vec<&UndoStep> = self.steps.iter().rev().collect();
        ordered.sort_by_key(|step| step.phase());
        ordered
    }

    /// Undo every recorded step
    pub async fn unwind(self) {
        for step in self.rollback_order() {
            let result = self.undo(step).await;
            match result {
                Ok(()) => debug!(step = step.label(), "compensated"),
                Err(e) if e.is_not_found() => debug!(step = step.label(), "already gone"),
                Err(e) => error!(step = step.label(), error = %e, "compensation failed"),
            }
        }
        if !self.steps.is_empty() {
            warn!(steps = self.steps.len(), "provisioning rolled back");
        }
    }

    async fn undo(&self, step: &UndoStep) -> ControlPlaneResult<()> {
        match step {
            UndoStep::RemoteService(id) => self.adapter.delete_service(id).await,
            UndoStep::RemoteRoute(id) => self.adapter.delete_route(id).await,
            UndoStep::RemotePlugin(id) => self.adapter.remove_plugin(id).await,
            UndoStep::RouteRow(id) => self.store.delete_route(id).await,
            UndoStep::ServiceRow(id) => self.store.delete_service(id).await,
            UndoStep::PluginRow(id) => self.store.delete_plugin(id).await,
        }
    }
}
