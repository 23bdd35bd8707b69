//! Wizard state machine.
//!
//! Step transitions are [`WizardEvent`]s folded by the pure [`reduce`] function. The
//! [`WizardController`] applies the result and runs the side effects (persisting or clearing
//! the session) that the reducer asks for.

pub mod steps;

use crate::models::connection::Connection;
use crate::models::responses::UploadReceipt;
use crate::session::SessionStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    Upload,
    MapFields,
    Import,
}

impl Step {
    pub fn title(&self) -> &'static str {
        match self {
            Step::Connect => "Connect to Frappe",
            Step::Upload => "Upload Data",
            Step::MapFields => "Map Fields",
            Step::Import => "Import",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLayout {
    /// Connect -> Upload -> Map Fields -> Import
    #[default]
    FourStep,
    /// Connect -> Upload -> Import
    ThreeStep,
}

impl StepLayout {
    pub fn steps(&self) -> &'static [Step] {
        match self {
            StepLayout::FourStep => &[Step::Connect, Step::Upload, Step::MapFields, Step::Import],
            StepLayout::ThreeStep => &[Step::Connect, Step::Upload, Step::Import],
        }
    }

    /// 1-based position of `step`, if the layout has it.
    pub fn number(&self, step: Step) -> Option<usize> {
        self.steps().iter().position(|s| *s == step).map(|i| i + 1)
    }

    pub fn next(&self, step: Step) -> Option<Step> {
        let idx = self.steps().iter().position(|s| *s == step)?;
        self.steps().get(idx + 1).copied()
    }

    pub fn prev(&self, step: Step) -> Option<Step> {
        let idx = self.steps().iter().position(|s| *s == step)?;
        idx.checked_sub(1).and_then(|i| self.steps().get(i).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardEvent {
    ConnectionEstablished { connection: Connection },
    FileUploaded { receipt: UploadReceipt },
    MappingConfirmed,
    Back,
    Logout,
    ErrorReported(String),
    ErrorDismissed,
}

impl WizardEvent {
    /// Upload completion that only carries the job id.
    pub fn file_uploaded(job_id: impl Into<String>) -> Self {
        WizardEvent::FileUploaded {
            receipt: UploadReceipt {
                job_id: job_id.into(),
                columns: Vec::new(),
                total_rows: None,
                batch_size: None,
            },
        }
    }

    fn name(&self) -> &'static str {
        match self {
            WizardEvent::ConnectionEstablished { .. } => "ConnectionEstablished",
            WizardEvent::FileUploaded { .. } => "FileUploaded",
            WizardEvent::MappingConfirmed => "MappingConfirmed",
            WizardEvent::Back => "Back",
            WizardEvent::Logout => "Logout",
            WizardEvent::ErrorReported(_) => "ErrorReported",
            WizardEvent::ErrorDismissed => "ErrorDismissed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardSession {
    pub step: Step,
    pub connection: Option<Connection>,
    pub job_id: Option<String>,
    /// Columns reported by the last upload; feeds the Map Fields step.
    pub upload: Option<UploadReceipt>,
    pub last_error: Option<String>,
}

impl Default for WizardSession {
    fn default() -> Self {
        Self {
            step: Step::Connect,
            connection: None,
            job_id: None,
            upload: None,
            last_error: None,
        }
    }
}

impl WizardSession {
    pub fn connection_id(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    PersistConnection(Connection),
    ClearConnection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: WizardSession,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(session: WizardSession) -> Self {
        Self {
            session,
            effects: Vec::new(),
        }
    }
}

/// Back is offered from Map Fields and Import only.
pub fn can_go_back(step: Step) -> bool {
    matches!(step, Step::MapFields | Step::Import)
}

pub fn can_logout(step: Step) -> bool {
    step != Step::Connect
}

/// Fold one event. `None` means the event does not apply to the current step.
pub fn reduce(session: &WizardSession, layout: StepLayout, event: &WizardEvent) -> Option<Transition> {
    match event {
        WizardEvent::ConnectionEstablished { connection } => {
            if session.step != Step::Connect {
                return None;
            }
            Some(Transition {
                session: WizardSession {
                    step: Step::Upload,
                    connection: Some(connection.clone()),
                    ..WizardSession::default()
                },
                effects: vec![Effect::PersistConnection(connection.clone())],
            })
        }
        WizardEvent::FileUploaded { receipt } => {
            if session.step != Step::Upload {
                return None;
            }
            let step = layout.next(Step::Upload)?;
            Some(Transition::to(WizardSession {
                step,
                job_id: Some(receipt.job_id.clone()),
                upload: Some(receipt.clone()),
                last_error: None,
                ..session.clone()
            }))
        }
        WizardEvent::MappingConfirmed => {
            if session.step != Step::MapFields {
                return None;
            }
            Some(Transition::to(WizardSession {
                step: Step::Import,
                last_error: None,
                ..session.clone()
            }))
        }
        WizardEvent::Back => {
            if !can_go_back(session.step) {
                return None;
            }
            let step = layout.prev(session.step)?;
            Some(Transition::to(WizardSession {
                step,
                last_error: None,
                ..session.clone()
            }))
        }
        WizardEvent::Logout => {
            if !can_logout(session.step) {
                return None;
            }
            Some(Transition {
                session: WizardSession::default(),
                effects: vec![Effect::ClearConnection],
            })
        }
        WizardEvent::ErrorReported(message) => Some(Transition::to(WizardSession {
            last_error: Some(message.clone()),
            ..session.clone()
        })),
        WizardEvent::ErrorDismissed => Some(Transition::to(WizardSession {
            last_error: None,
            ..session.clone()
        })),
    }
}

pub struct WizardController {
    layout: StepLayout,
    session: WizardSession,
    store: Arc<dyn SessionStore>,
}

impl WizardController {
    pub fn new(layout: StepLayout, store: Arc<dyn SessionStore>) -> Self {
        Self {
            layout,
            session: WizardSession::default(),
            store,
        }
    }

    pub fn layout(&self) -> StepLayout {
        self.layout
    }

    pub fn session(&self) -> &WizardSession {
        &self.session
    }

    pub fn step(&self) -> Step {
        self.session.step
    }

    /// `(current, total)` for the step header.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.layout.number(self.session.step).unwrap_or(1),
            self.layout.steps().len(),
        )
    }

    pub fn can_go_back(&self) -> bool {
        can_go_back(self.session.step)
    }

    pub fn can_logout(&self) -> bool {
        can_logout(self.session.step)
    }

    /// Resume a persisted connection straight onto the Upload step. No backend call is made.
    pub async fn mount(&mut self) -> &WizardSession {
        if let Some(connection) = self.store.restore().await {
            info!(
                "[PHASE: wizard] [STEP: mount] resuming connection {} ({})",
                connection.id,
                connection.display_label()
            );
            self.session = WizardSession {
                step: Step::Upload,
                connection: Some(connection),
                ..WizardSession::default()
            };
        } else {
            info!("[PHASE: wizard] [STEP: mount] no saved session, starting at Connect");
        }
        &self.session
    }

    /// Apply `event`; returns false when it was ignored for the current step.
    pub async fn dispatch(&mut self, event: WizardEvent) -> bool {
        let Some(transition) = reduce(&self.session, self.layout, &event) else {
            warn!(
                "[PHASE: wizard] [STEP: dispatch] ignoring {} on step {:?}",
                event.name(),
                self.session.step
            );
            return false;
        };

        if transition.session.step != self.session.step {
            info!(
                "[PHASE: wizard] [STEP: dispatch] {} moved {:?} -> {:?}",
                event.name(),
                self.session.step,
                transition.session.step
            );
        }
        self.session = transition.session;

        for effect in transition.effects {
            let result = match &effect {
                Effect::PersistConnection(connection) => self.store.persist(connection).await,
                Effect::ClearConnection => self.store.clear().await,
            };
            if let Err(e) = result {
                warn!(
                    "[PHASE: wizard] [STEP: effects] {:?} failed: {}",
                    effect,
                    e.log_details()
                );
                self.session.last_error = Some(e.user_message());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    fn c1() -> Connection {
        Connection::new("c1", "https://x", "u")
    }

    async fn controller_on_import(store: Arc<MemorySessionStore>) -> WizardController {
        let mut wizard = WizardController::new(StepLayout::FourStep, store);
        wizard.mount().await;
        assert!(
            wizard
                .dispatch(WizardEvent::ConnectionEstablished { connection: c1() })
                .await
        );
        assert!(wizard.dispatch(WizardEvent::file_uploaded("j1")).await);
        assert!(wizard.dispatch(WizardEvent::MappingConfirmed).await);
        wizard
    }

    #[test]
    fn layouts_order_steps() {
        assert_eq!(StepLayout::FourStep.next(Step::Upload), Some(Step::MapFields));
        assert_eq!(StepLayout::ThreeStep.next(Step::Upload), Some(Step::Import));
        assert_eq!(StepLayout::ThreeStep.prev(Step::Import), Some(Step::Upload));
        assert_eq!(StepLayout::FourStep.prev(Step::Connect), None);
        assert_eq!(StepLayout::ThreeStep.number(Step::MapFields), None);
        assert_eq!(StepLayout::FourStep.number(Step::Import), Some(4));
    }

    #[test]
    fn reduce_ignores_events_for_other_steps() {
        let session = WizardSession::default();
        assert!(reduce(&session, StepLayout::FourStep, &WizardEvent::MappingConfirmed).is_none());
        assert!(reduce(&session, StepLayout::FourStep, &WizardEvent::file_uploaded("j1")).is_none());
        assert!(reduce(&session, StepLayout::FourStep, &WizardEvent::Back).is_none());
        assert!(reduce(&session, StepLayout::FourStep, &WizardEvent::Logout).is_none());
    }

    #[test]
    fn back_is_disabled_on_connect_and_upload() {
        assert!(!can_go_back(Step::Connect));
        assert!(!can_go_back(Step::Upload));
        assert!(can_go_back(Step::MapFields));
        assert!(can_go_back(Step::Import));
    }

    #[test]
    fn errors_never_change_step() {
        let session = WizardSession {
            step: Step::Upload,
            connection: Some(c1()),
            ..WizardSession::default()
        };
        let t = reduce(
            &session,
            StepLayout::FourStep,
            &WizardEvent::ErrorReported("Please select a file".to_string()),
        )
        .unwrap();
        assert_eq!(t.session.step, Step::Upload);
        assert_eq!(t.session.last_error.as_deref(), Some("Please select a file"));

        let t = reduce(&t.session, StepLayout::FourStep, &WizardEvent::ErrorDismissed).unwrap();
        assert!(t.session.last_error.is_none());
        assert_eq!(t.session.step, Step::Upload);
    }

    #[tokio::test]
    async fn resumes_persisted_connection_on_upload_step() {
        let store = Arc::new(MemorySessionStore::with_connection(c1()));
        let mut wizard = WizardController::new(StepLayout::FourStep, store.clone());

        let session = wizard.mount().await;
        assert_eq!(session.step, Step::Upload);
        assert_eq!(session.connection_id(), Some("c1"));
        assert_eq!(store.persist_calls(), 0);
    }

    #[tokio::test]
    async fn connect_persists_and_advances() {
        let store = Arc::new(MemorySessionStore::new());
        let mut wizard = WizardController::new(StepLayout::FourStep, store.clone());
        wizard.mount().await;
        assert_eq!(wizard.step(), Step::Connect);

        wizard
            .dispatch(WizardEvent::ConnectionEstablished { connection: c1() })
            .await;
        assert_eq!(wizard.step(), Step::Upload);
        assert_eq!(store.snapshot().map(|c| c.id), Some("c1".to_string()));
        assert_eq!(wizard.progress(), (2, 4));
    }

    #[tokio::test]
    async fn persist_failure_still_advances_with_error() {
        let store = Arc::new(MemorySessionStore::new());
        store.set_fail_writes(true);
        let mut wizard = WizardController::new(StepLayout::FourStep, store);
        wizard
            .dispatch(WizardEvent::ConnectionEstablished { connection: c1() })
            .await;

        assert_eq!(wizard.step(), Step::Upload);
        assert!(wizard
            .session()
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("Session storage error"));
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let store = Arc::new(MemorySessionStore::new());
        let mut wizard = controller_on_import(store.clone()).await;
        wizard.dispatch(WizardEvent::Back).await;
        assert_eq!(wizard.step(), Step::MapFields);
        wizard
            .dispatch(WizardEvent::ErrorReported("x".to_string()))
            .await;

        assert!(wizard.dispatch(WizardEvent::Logout).await);
        assert_eq!(wizard.session(), &WizardSession::default());
        assert!(store.snapshot().is_none());
        assert_eq!(store.clear_calls(), 1);

        // Logout on step 1 is a no-op.
        assert!(!wizard.dispatch(WizardEvent::Logout).await);
        assert_eq!(store.clear_calls(), 1);
    }

    #[tokio::test]
    async fn three_step_layout_skips_mapping() {
        let store = Arc::new(MemorySessionStore::new());
        let mut wizard = WizardController::new(StepLayout::ThreeStep, store);
        wizard
            .dispatch(WizardEvent::ConnectionEstablished { connection: c1() })
            .await;
        wizard.dispatch(WizardEvent::file_uploaded("j1")).await;
        assert_eq!(wizard.step(), Step::Import);
        assert_eq!(wizard.session().job_id.as_deref(), Some("j1"));
        assert_eq!(wizard.progress(), (3, 3));

        assert!(!wizard.dispatch(WizardEvent::MappingConfirmed).await);
        wizard.dispatch(WizardEvent::Back).await;
        assert_eq!(wizard.step(), Step::Upload);
        assert!(!wizard.can_go_back());
    }

    #[tokio::test]
    async fn back_moves_exactly_one_step() {
        let store = Arc::new(MemorySessionStore::new());
        let mut wizard = controller_on_import(store).await;
        assert_eq!(wizard.step(), Step::Import);

        assert!(wizard.dispatch(WizardEvent::Back).await);
        assert_eq!(wizard.step(), Step::MapFields);
        assert_eq!(wizard.session().job_id.as_deref(), Some("j1"));

        assert!(wizard.dispatch(WizardEvent::Back).await);
        assert_eq!(wizard.step(), Step::Upload);
        assert!(!wizard.dispatch(WizardEvent::Back).await);
        assert_eq!(wizard.step(), Step::Upload);
    }
}
