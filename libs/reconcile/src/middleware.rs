//! Action middleware.
//!
//! Wraps every resource action with the solvency precondition, the domain
//! operation, and a trailing sync, and turns the outcome into diagnostics
//! for the surrounding resource-management layer.

use std::fmt::Display;

use grid_id::GroupId;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{DefinitionError, ReconcileError};
use crate::gateway::{Ledger, NodeGateway};
use crate::kind::ResourceKind;
use crate::reconciler::Reconciler;
use crate::registry::ResourceState;

/// Summary attached to every read-path failure.
pub const READ_WARNING_SUMMARY: &str =
    "Error reading data from remote, state might be out of sync with the remote state";

/// Resource action requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl Diagnostic {
    pub fn error(err: impl Display) -> Self {
        Self {
            severity: Severity::Error,
            summary: err.to_string(),
            detail: String::new(),
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// State to write back, plus what went wrong on the way.
#[derive(Debug, Clone)]
pub struct ActionOutcome<S> {
    pub state: S,
    pub diagnostics: Vec<Diagnostic>,
}

impl<S> ActionOutcome<S> {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }
}

/// Persisted state of a group resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    /// `None` means not created, or gone from the ledger.
    #[serde(default)]
    pub id: Option<GroupId>,
}

/// Runs resource actions against a [`Reconciler`].
pub struct ActionMiddleware<G, L> {
    reconciler: Reconciler<G, L>,
}

impl<G: NodeGateway, L: Ledger> ActionMiddleware<G, L> {
    pub fn new(reconciler: Reconciler<G, L>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Reconciler<G, L> {
        &self.reconciler
    }

    /// Run one action on a deployable resource.
    ///
    /// The returned state must always be written back, even when the
    /// outcome carries errors.
    #[instrument(skip_all, fields(action = %action, kind = K::KIND, name = %state.definition.name()))]
    pub async fn run<K: ResourceKind>(
        &self,
        action: Action,
        mut state: ResourceState<K>,
    ) -> ActionOutcome<ResourceState<K>> {
        let mut diagnostics = Vec::new();

        if let Err(e) = self.reconciler.check_solvency().await {
            diagnostics.push(Diagnostic::error(e));
            return finish(action, state, diagnostics);
        }

        let mutation = match action {
            Action::Create | Action::Update => self.reconciler.deploy(&mut state).await.map(drop),
            Action::Delete => self.reconciler.cancel(&mut state).await.map(drop),
            Action::Read => Ok(()),
        };

        if let Err(e) = mutation {
            let touched_remote = matches!(e, ReconcileError::Apply(_) | ReconcileError::Read(_));
            warn!(error = %e, "Action failed");
            diagnostics.push(Diagnostic::error(&e));
            if !touched_remote {
                return finish(action, state, diagnostics);
            }
        }

        if let Err(e) = self.reconciler.sync(&mut state).await {
            warn!(error = %e, "Sync failed");
            diagnostics.push(Diagnostic::error(e));
        }

        finish(action, state, diagnostics)
    }

    /// Run one action on a group resource.
    #[instrument(skip(self, state), fields(group_id = ?state.id))]
    pub async fn run_group(&self, action: Action, mut state: GroupState) -> ActionOutcome<GroupState> {
        let mut diagnostics = Vec::new();

        if let Err(e) = self.reconciler.check_solvency().await {
            diagnostics.push(Diagnostic::error(e));
            return finish(action, state, diagnostics);
        }

        let ledger = self.reconciler.ledger();
        let owner = self.reconciler.twin_id();
        match (action, state.id) {
            (Action::Create, _) => match ledger.create_group(owner).await {
                Ok(group_id) => {
                    info!(group_id = %group_id, "Group created");
                    state.id = Some(group_id);
                }
                Err(e) => diagnostics.push(Diagnostic::error(e)),
            },
            (Action::Read, Some(group_id)) => match ledger.get_group(group_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!(group_id = %group_id, "Group no longer exists");
                    state.id = None;
                }
                Err(e) => diagnostics.push(Diagnostic::error(e)),
            },
            (Action::Update, _) => diagnostics.push(Diagnostic::error(
                DefinitionError::UpdateNotAllowed { kind: "group" },
            )),
            (Action::Delete, Some(group_id)) => match ledger.delete_group(owner, group_id).await {
                Ok(()) => {
                    info!(group_id = %group_id, "Group deleted");
                    state.id = None;
                }
                Err(e) => diagnostics.push(Diagnostic::error(e)),
            },
            (Action::Read | Action::Delete, None) => {}
        }

        finish(action, state, diagnostics)
    }
}

/// On the read path every error is downgraded so the caller keeps the
/// previously known state.
fn finish<S>(action: Action, state: S, mut diagnostics: Vec<Diagnostic>) -> ActionOutcome<S> {
    if action.is_read() {
        for diagnostic in &mut diagnostics {
            if diagnostic.is_error() {
                *diagnostic = Diagnostic::warning(
                    READ_WARNING_SUMMARY,
                    std::mem::take(&mut diagnostic.summary),
                );
            }
        }
    }
    ActionOutcome { state, diagnostics }
}
