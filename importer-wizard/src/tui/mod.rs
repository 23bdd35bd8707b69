//! Headless terminal wizard.
//!
//! - Centered window titled "Frappe Data Importer" with a step header
//! - Page body per wizard step, error banner above the buttons
//! - Bottom button row: [ Back ] [ Next ] [ Logout ]
//!
//! Background operations run on a one-worker tokio runtime and report back over an
//! `mpsc` channel that is drained every tick. Step transitions only happen here, on the
//! UI thread, through `WizardController::dispatch`.
//!
//! Note: Logging is file-only in TUI mode (stdout logging is disabled) to avoid corrupting the terminal UI.

use crate::api::BackendApi;
use crate::config::AppConfig;
use crate::error::{ImporterError, Result as StepResult};
use crate::jobs::{BackendStatusSource, JobStatusWatcher, WatchState, WatchUpdate};
use crate::models::connection::Connection;
use crate::models::job::JobStatus;
use crate::models::responses::UploadReceipt;
use crate::selection::{FieldSelectionEngine, Recommendations, SelectAllState, Subset};
use crate::session::{MemorySessionStore, SessionStore};
use crate::template;
use crate::wizard::steps::{self, ConnectForm, MappingDraft, UploadForm};
use crate::wizard::{Step, StepLayout, WizardController, WizardEvent};
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use log::{debug, info, warn};
use ratatui::backend::{CrosstermBackend, TestBackend};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};
use ratatui::Terminal;
use std::future::Future;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

const WINDOW_TITLE: &str = "Frappe Data Importer";
const TICK_RATE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButtonFocus {
    Back,
    Next,
    Logout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Field(usize),
    Button(ButtonFocus),
}

#[derive(Debug, Clone)]
struct TextInput {
    value: String,
    /// Cursor position in characters.
    cursor: usize,
    masked: bool,
}

impl TextInput {
    fn new(value: impl Into<String>, masked: bool) -> Self {
        let v = value.into();
        Self {
            cursor: v.chars().count(),
            value: v,
            masked,
        }
    }

    fn display(&self) -> String {
        if self.masked {
            "*".repeat(self.value.chars().count())
        } else {
            self.value.clone()
        }
    }

    fn set(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.cursor = self.value.chars().count();
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    fn handle_key(&mut self, code: KeyCode) -> bool {
        let len = self.value.chars().count();
        match code {
            KeyCode::Char(c) => {
                let at = self.byte_index(self.cursor);
                self.value.insert(at, c);
                self.cursor += 1;
                true
            }
            KeyCode::Backspace => {
                if self.cursor > 0 {
                    let at = self.byte_index(self.cursor - 1);
                    self.value.remove(at);
                    self.cursor -= 1;
                }
                true
            }
            KeyCode::Delete => {
                if self.cursor < len {
                    let at = self.byte_index(self.cursor);
                    self.value.remove(at);
                }
                true
            }
            KeyCode::Left => {
                self.cursor = self.cursor.saturating_sub(1);
                true
            }
            KeyCode::Right => {
                self.cursor = (self.cursor + 1).min(len);
                true
            }
            KeyCode::Home => {
                self.cursor = 0;
                true
            }
            KeyCode::End => {
                self.cursor = len;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
enum UiMsg {
    Connected(StepResult<Connection>),
    SavedConnections(StepResult<Vec<Connection>>),
    ConnectionForgotten {
        id: String,
        result: StepResult<()>,
    },
    Doctypes(StepResult<Vec<String>>),
    SchemaFetched {
        doctype: String,
        result: StepResult<serde_json::Value>,
    },
    Uploaded(StepResult<UploadReceipt>),
    TemplateSaved(StepResult<PathBuf>),
    ImportStarted(StepResult<()>),
}

/// Collaborators for an interactive run.
pub struct TuiContext {
    pub config: AppConfig,
    pub api: Arc<dyn BackendApi>,
    pub store: Arc<dyn SessionStore>,
}

struct TuiState {
    controller: WizardController,
    focus: Focus,
    quit: bool,
    busy: Option<&'static str>,
    notice: Option<String>,

    // Connect
    url: TextInput,
    username: TextInput,
    password: TextInput,
    saved: Vec<Connection>,
    saved_index: usize,

    // Upload
    doctypes: Vec<String>,
    doctype_filter: TextInput,
    doctype_index: usize,
    engine: FieldSelectionEngine,
    field_index: usize,
    file_path: TextInput,
    batch_size: TextInput,

    // Map Fields
    draft: MappingDraft,
    column_index: usize,

    // Import
    watch: WatchUpdate,

    recommendations: Recommendations,
    template_dir: PathBuf,
    default_batch_size: u32,
}

impl TuiState {
    fn new(controller: WizardController, config: &AppConfig) -> Self {
        Self {
            controller,
            focus: Focus::Field(0),
            quit: false,
            busy: None,
            notice: None,

            url: TextInput::new("", false),
            username: TextInput::new("", false),
            password: TextInput::new("", true),
            saved: Vec::new(),
            saved_index: 0,

            doctypes: Vec::new(),
            doctype_filter: TextInput::new("", false),
            doctype_index: 0,
            engine: FieldSelectionEngine::new(),
            field_index: 0,
            file_path: TextInput::new("", false),
            batch_size: TextInput::new(config.default_batch_size.to_string(), false),

            draft: MappingDraft::default(),
            column_index: 0,

            watch: WatchUpdate::default(),

            recommendations: config.recommendations(),
            template_dir: config.template_folder(),
            default_batch_size: config.default_batch_size,
        }
    }

    fn step(&self) -> Step {
        self.controller.step()
    }

    fn connection(&self) -> Option<Connection> {
        self.controller.session().connection.clone()
    }

    fn field_count(&self) -> usize {
        match self.step() {
            Step::Connect => 4,
            Step::Upload => 4,
            Step::MapFields => 1,
            Step::Import => 0,
        }
    }

    fn filtered_doctypes(&self) -> Vec<&str> {
        let needle = self.doctype_filter.value.trim().to_ascii_lowercase();
        self.doctypes
            .iter()
            .map(String::as_str)
            .filter(|d| needle.is_empty() || d.to_ascii_lowercase().contains(&needle))
            .collect()
    }

    fn upload_form(&self) -> UploadForm {
        let file = self.file_path.value.trim();
        UploadForm {
            doctype: self.engine.target().map(str::to_string),
            file: (!file.is_empty()).then(|| PathBuf::from(file)),
            // Unparseable input becomes 0 and fails range validation.
            batch_size: self.batch_size.value.trim().parse().unwrap_or(0),
        }
    }

    fn connect_form(&self) -> ConnectForm {
        ConnectForm {
            url: self.url.value.clone(),
            username: self.username.value.clone(),
            password: self.password.value.clone(),
        }
    }

    /// Drop every piece of per-connection page state.
    fn reset_pages(&mut self) {
        self.password.set("");
        self.doctypes.clear();
        self.doctype_filter.set("");
        self.doctype_index = 0;
        self.engine = FieldSelectionEngine::new();
        self.field_index = 0;
        self.file_path.set("");
        self.batch_size.set(self.default_batch_size.to_string());
        self.draft = MappingDraft::default();
        self.column_index = 0;
        self.watch = WatchUpdate::default();
        self.notice = None;
        self.busy = None;
        self.focus = Focus::Field(0);
    }
}

/// Handles the UI thread needs to start background work.
struct Ops<'a> {
    api: &'a Arc<dyn BackendApi>,
    rt: &'a Runtime,
    tx: &'a mpsc::Sender<UiMsg>,
    watcher: &'a JobStatusWatcher,
}

impl Ops<'_> {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = UiMsg> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.rt.spawn(async move {
            if let Err(mpsc::SendError(msg)) = tx.send(fut.await) {
                debug!(
                    "[PHASE: tui] [STEP: drain] UI closed, dropping {:?}",
                    msg
                );
            }
        });
    }

    fn dispatch(&self, state: &mut TuiState, event: WizardEvent) -> bool {
        self.rt.block_on(state.controller.dispatch(event))
    }

    fn report(&self, state: &mut TuiState, err: ImporterError) {
        warn!(
            "[PHASE: tui] [STEP: error] {:?} step: {}",
            state.step(),
            err.log_details()
        );
        state.busy = None;
        self.dispatch(state, WizardEvent::ErrorReported(err.user_message()));
    }

    fn load_saved_connections(&self) {
        let api = Arc::clone(self.api);
        self.spawn(async move { UiMsg::SavedConnections(steps::saved_connections(api.as_ref()).await) });
    }

    fn load_doctypes(&self, connection: Connection) {
        let api = Arc::clone(self.api);
        self.spawn(async move { UiMsg::Doctypes(steps::list_doctypes(api.as_ref(), &connection).await) });
    }

    fn start_watch(&self, job_id: String) {
        let watcher = self.watcher;
        self.rt.block_on(async { watcher.start(job_id) });
    }
}

pub fn run(ctx: TuiContext) -> Result<()> {
    info!("[PHASE: tui] [STEP: start] Starting TUI wizard");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, &ctx, &rt);
    restore_terminal(&mut terminal)?;

    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ctx: &TuiContext,
    rt: &Runtime,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<UiMsg>();
    let watcher = JobStatusWatcher::new(
        Arc::new(BackendStatusSource::new(Arc::clone(&ctx.api))),
        ctx.config.poll_interval(),
    );
    let ops = Ops {
        api: &ctx.api,
        rt,
        tx: &tx,
        watcher: &watcher,
    };

    let controller = WizardController::new(ctx.config.step_layout, Arc::clone(&ctx.store));
    let mut state = TuiState::new(controller, &ctx.config);
    rt.block_on(state.controller.mount());
    match state.connection() {
        Some(connection) => ops.load_doctypes(connection),
        None => ops.load_saved_connections(),
    }

    let mut last_tick = Instant::now();
    while !state.quit {
        drain_messages(&mut state, &rx, &ops);
        state.watch = watcher.current();
        terminal.draw(|f| draw(f.size(), f, &state))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                handle_key(&mut state, key, &ops);
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
        }
    }

    watcher.stop();
    info!("[PHASE: tui] [STEP: exit] TUI wizard closed");
    Ok(())
}

fn drain_messages(state: &mut TuiState, rx: &mpsc::Receiver<UiMsg>, ops: &Ops<'_>) {
    while let Ok(msg) = rx.try_recv() {
        apply_message(state, msg, ops);
    }
}

fn apply_message(state: &mut TuiState, msg: UiMsg, ops: &Ops<'_>) {
    match msg {
        UiMsg::Connected(Ok(connection)) => {
            state.busy = None;
            state.password.set("");
            ops.dispatch(
                state,
                WizardEvent::ConnectionEstablished {
                    connection: connection.clone(),
                },
            );
            state.focus = Focus::Field(0);
            ops.load_doctypes(connection);
        }
        UiMsg::SavedConnections(Ok(list)) => {
            state.saved = list;
            state.saved_index = 0;
        }
        UiMsg::ConnectionForgotten { id, result: Ok(()) } => {
            state.saved.retain(|c| c.id != id);
            state.saved_index = state.saved_index.min(state.saved.len().saturating_sub(1));
        }
        UiMsg::Doctypes(Ok(list)) => {
            state.doctypes = list;
            state.doctype_index = 0;
        }
        UiMsg::SchemaFetched { doctype, result } => {
            // A newer selection supersedes this payload.
            if state.engine.target() != Some(doctype.as_str()) {
                return;
            }
            state.busy = None;
            let installed = result.and_then(|raw| {
                steps::install_schema(&mut state.engine, &doctype, &raw, &state.recommendations)
            });
            if let Err(e) = installed {
                ops.report(state, e);
            }
            state.field_index = 0;
        }
        UiMsg::Uploaded(Ok(receipt)) => {
            state.busy = None;
            state.draft = MappingDraft::new(receipt.columns.clone());
            let mapped = state.draft.auto_map(state.engine.catalog());
            info!(
                "[PHASE: tui] [STEP: upload] job {} uploaded, auto-mapped {} of {} columns",
                receipt.job_id,
                mapped,
                receipt.columns.len()
            );
            let skips_mapping =
                state.controller.layout().next(Step::Upload) == Some(Step::Import);
            if skips_mapping && state.draft.is_empty() {
                let err = ImporterError::validation(format!(
                    "None of the uploaded columns match {} fields. Use the downloaded template headers",
                    state.engine.target().unwrap_or("the target")
                ));
                ops.report(state, err);
                return;
            }
            ops.dispatch(state, WizardEvent::FileUploaded { receipt });
            state.column_index = 0;
            state.focus = Focus::Field(0);
            if state.step() == Step::Import {
                begin_import(state, ops);
            }
        }
        UiMsg::TemplateSaved(Ok(path)) => {
            state.busy = None;
            state.notice = Some(format!("Template saved to {}", path.display()));
        }
        UiMsg::ImportStarted(Ok(())) => {
            state.notice = Some("Import accepted by the backend".to_string());
        }
        UiMsg::ImportStarted(Err(e)) => {
            // The job stays pending on the backend, so polling would never end.
            ops.watcher.stop();
            state.watch = ops.watcher.current();
            ops.report(state, e);
        }
        UiMsg::Connected(Err(e))
        | UiMsg::SavedConnections(Err(e))
        | UiMsg::ConnectionForgotten { result: Err(e), .. }
        | UiMsg::Doctypes(Err(e))
        | UiMsg::Uploaded(Err(e))
        | UiMsg::TemplateSaved(Err(e)) => ops.report(state, e),
    }
}

/// Start polling and fire the import request.
///
/// `POST /import` only answers once the backend has run every batch, so the watcher is
/// started first and the request runs in the background.
fn begin_import(state: &mut TuiState, ops: &Ops<'_>) {
    let Some(job_id) = state.controller.session().job_id.clone() else {
        return;
    };
    if state.draft.is_empty() {
        ops.report(
            state,
            ImporterError::validation("Map at least one column before starting the import"),
        );
        return;
    }
    ops.start_watch(job_id.clone());

    let api = Arc::clone(ops.api);
    let draft = state.draft.clone();
    ops.spawn(async move { UiMsg::ImportStarted(steps::start_import(api.as_ref(), &job_id, &draft).await) });
}

fn next_label(step: Step) -> &'static str {
    match step {
        Step::Connect => "Connect",
        Step::Upload => "Upload",
        Step::MapFields => "Start Import",
        Step::Import => "Finish",
    }
}

fn can_go_next(state: &TuiState) -> bool {
    if state.busy.is_some() {
        return false;
    }
    match state.step() {
        Step::Connect => true,
        Step::Upload => state.engine.target().is_some(),
        Step::MapFields => !state.draft.is_empty(),
        // Idle here means the import request failed and the watch was stopped.
        Step::Import => state.watch.state != WatchState::Polling,
    }
}

fn button_enabled(state: &TuiState, b: ButtonFocus) -> bool {
    match b {
        ButtonFocus::Back => state.controller.can_go_back(),
        ButtonFocus::Next => can_go_next(state),
        ButtonFocus::Logout => state.controller.can_logout(),
    }
}

fn focus_order(state: &TuiState) -> Vec<Focus> {
    let mut order: Vec<Focus> = (0..state.field_count()).map(Focus::Field).collect();
    for b in [ButtonFocus::Back, ButtonFocus::Next, ButtonFocus::Logout] {
        if button_enabled(state, b) {
            order.push(Focus::Button(b));
        }
    }
    if order.is_empty() {
        order.push(Focus::Button(ButtonFocus::Next));
    }
    order
}

fn move_focus(state: &mut TuiState, forward: bool) {
    let order = focus_order(state);
    let pos = order.iter().position(|f| *f == state.focus);
    let len = order.len();
    let next = match (pos, forward) {
        (Some(i), true) => (i + 1) % len,
        (Some(i), false) => (i + len - 1) % len,
        (None, _) => 0,
    };
    state.focus = order[next];
}

fn handle_key(state: &mut TuiState, key: KeyEvent, ops: &Ops<'_>) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => {
            state.quit = true;
            return;
        }
        KeyCode::Char('e') if ctrl => {
            dismiss_banner(state, ops);
            return;
        }
        KeyCode::Esc => {
            dismiss_banner(state, ops);
            return;
        }
        KeyCode::Tab => {
            move_focus(state, true);
            return;
        }
        KeyCode::BackTab => {
            move_focus(state, false);
            return;
        }
        _ => {}
    }

    match state.focus {
        Focus::Button(b) => match key.code {
            KeyCode::Enter => activate(state, b, ops),
            KeyCode::Left | KeyCode::Right => {
                let buttons: Vec<ButtonFocus> = [ButtonFocus::Back, ButtonFocus::Next, ButtonFocus::Logout]
                    .into_iter()
                    .filter(|b| button_enabled(state, *b))
                    .collect();
                if let Some(pos) = buttons.iter().position(|x| *x == b) {
                    let len = buttons.len();
                    let next = if key.code == KeyCode::Right {
                        (pos + 1) % len
                    } else {
                        (pos + len - 1) % len
                    };
                    state.focus = Focus::Button(buttons[next]);
                }
            }
            _ => {}
        },
        Focus::Field(idx) => match state.step() {
            Step::Connect => handle_connect_key(state, idx, key.code, ops),
            Step::Upload => handle_upload_key(state, idx, key.code, ops),
            Step::MapFields => handle_mapping_key(state, key.code),
            Step::Import => {}
        },
    }
}

fn dismiss_banner(state: &mut TuiState, ops: &Ops<'_>) {
    if state.controller.session().last_error.is_some() {
        ops.dispatch(state, WizardEvent::ErrorDismissed);
    } else {
        state.notice = None;
    }
}

fn activate(state: &mut TuiState, button: ButtonFocus, ops: &Ops<'_>) {
    if !button_enabled(state, button) {
        return;
    }
    match button {
        ButtonFocus::Back => {
            if state.step() == Step::Import {
                ops.watcher.stop();
            }
            ops.dispatch(state, WizardEvent::Back);
            state.focus = Focus::Field(0);
        }
        ButtonFocus::Logout => {
            ops.watcher.stop();
            ops.dispatch(state, WizardEvent::Logout);
            state.reset_pages();
            ops.load_saved_connections();
        }
        ButtonFocus::Next => submit_step(state, ops),
    }
}

fn submit_step(state: &mut TuiState, ops: &Ops<'_>) {
    match state.step() {
        Step::Connect => {
            let form = state.connect_form();
            if let Err(e) = form.validate() {
                ops.report(state, e);
                return;
            }
            state.busy = Some("Connecting...");
            let api = Arc::clone(ops.api);
            ops.spawn(async move { UiMsg::Connected(steps::connect(api.as_ref(), &form).await) });
        }
        Step::Upload => {
            let Some(connection) = state.connection() else {
                return;
            };
            let form = state.upload_form();
            if let Err(e) = form.validate() {
                ops.report(state, e);
                return;
            }
            state.busy = Some("Uploading...");
            let api = Arc::clone(ops.api);
            ops.spawn(async move { UiMsg::Uploaded(steps::upload(api.as_ref(), &connection, &form).await) });
        }
        Step::MapFields => {
            if state.draft.is_empty() {
                ops.report(
                    state,
                    ImporterError::validation("Map at least one column before starting the import"),
                );
                return;
            }
            if ops.dispatch(state, WizardEvent::MappingConfirmed) {
                begin_import(state, ops);
            }
        }
        Step::Import => {
            state.quit = true;
        }
    }
}

fn handle_connect_key(state: &mut TuiState, idx: usize, code: KeyCode, ops: &Ops<'_>) {
    match idx {
        0 => {
            state.url.handle_key(code);
        }
        1 => {
            state.username.handle_key(code);
        }
        2 => {
            if code == KeyCode::Enter {
                submit_step(state, ops);
            } else {
                state.password.handle_key(code);
            }
        }
        _ => match code {
            KeyCode::Up => state.saved_index = state.saved_index.saturating_sub(1),
            KeyCode::Down => {
                if state.saved_index + 1 < state.saved.len() {
                    state.saved_index += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(saved) = state.saved.get(state.saved_index) {
                    let form = ConnectForm::prefill(saved);
                    state.url.set(form.url);
                    state.username.set(form.username);
                    state.password.set("");
                    state.focus = Focus::Field(2);
                }
            }
            KeyCode::Delete => {
                if let Some(saved) = state.saved.get(state.saved_index) {
                    let id = saved.id.clone();
                    let api = Arc::clone(ops.api);
                    ops.spawn(async move {
                        let result = steps::forget_connection(api.as_ref(), &id).await;
                        UiMsg::ConnectionForgotten { id, result }
                    });
                }
            }
            _ => {}
        },
    }
}

fn handle_upload_key(state: &mut TuiState, idx: usize, code: KeyCode, ops: &Ops<'_>) {
    match idx {
        0 => match code {
            KeyCode::Up => state.doctype_index = state.doctype_index.saturating_sub(1),
            KeyCode::Down => {
                if state.doctype_index + 1 < state.filtered_doctypes().len() {
                    state.doctype_index += 1;
                }
            }
            KeyCode::Enter => select_doctype(state, ops),
            other => {
                if state.doctype_filter.handle_key(other) {
                    state.doctype_index = 0;
                }
            }
        },
        1 => handle_checklist_key(state, code, ops),
        2 => {
            state.file_path.handle_key(code);
        }
        _ => {
            if matches!(code, KeyCode::Char(c) if !c.is_ascii_digit()) {
                return;
            }
            state.batch_size.handle_key(code);
        }
    }
}

fn select_doctype(state: &mut TuiState, ops: &Ops<'_>) {
    let Some(doctype) = state
        .filtered_doctypes()
        .get(state.doctype_index)
        .map(|d| d.to_string())
    else {
        return;
    };
    if state.engine.target() == Some(doctype.as_str()) {
        return;
    }
    let Some(connection) = state.connection() else {
        return;
    };

    state.engine.reset_for_target(doctype.clone());
    state.field_index = 0;
    state.busy = Some("Loading schema...");
    let api = Arc::clone(ops.api);
    ops.spawn(async move {
        let result = api.fetch_schema(&connection.id, &doctype).await;
        UiMsg::SchemaFetched { doctype, result }
    });
}

fn handle_checklist_key(state: &mut TuiState, code: KeyCode, ops: &Ops<'_>) {
    let visible = state.engine.visible_entries().len();
    match code {
        KeyCode::Up => state.field_index = state.field_index.saturating_sub(1),
        KeyCode::Down => {
            if state.field_index + 1 < visible {
                state.field_index += 1;
            }
        }
        KeyCode::Char(' ') => {
            let key = state
                .engine
                .visible_entries()
                .get(state.field_index)
                .map(|e| e.key.clone());
            if let Some(key) = key {
                state.engine.toggle_field(&key);
            }
        }
        KeyCode::Char(c @ '1'..='3') => {
            let subset = match c {
                '1' => Subset::Mandatory,
                '2' => Subset::Recommended,
                _ => Subset::All,
            };
            state.engine.set_active_subset(subset);
            state.field_index = 0;
        }
        KeyCode::Char('a') => {
            let checked = state.engine.select_all_state() != SelectAllState::Checked;
            state.engine.set_select_all_for_active_subset(checked);
        }
        KeyCode::Char('t') => download_template(state, ops),
        _ => {}
    }
}

fn download_template(state: &mut TuiState, ops: &Ops<'_>) {
    let (Some(connection), Some(doctype)) =
        (state.connection(), state.engine.target().map(str::to_string))
    else {
        ops.report(state, ImporterError::validation("Please select a doctype"));
        return;
    };
    let fields = state.engine.selected_in_display_order();
    let dir = state.template_dir.clone();
    state.busy = Some("Downloading template...");
    let api = Arc::clone(ops.api);
    ops.spawn(async move {
        UiMsg::TemplateSaved(
            steps::download_template(api.as_ref(), &connection, &doctype, &fields, &dir).await,
        )
    });
}

fn handle_mapping_key(state: &mut TuiState, code: KeyCode) {
    let columns = state.draft.columns().len();
    let column = state.draft.columns().get(state.column_index).cloned();
    match code {
        KeyCode::Up => state.column_index = state.column_index.saturating_sub(1),
        KeyCode::Down => {
            if state.column_index + 1 < columns {
                state.column_index += 1;
            }
        }
        KeyCode::Left | KeyCode::Right => {
            if let Some(column) = column {
                state
                    .draft
                    .cycle(&column, state.engine.catalog(), code == KeyCode::Right);
            }
        }
        KeyCode::Delete | KeyCode::Backspace => {
            if let Some(column) = column {
                state.draft.unassign(&column);
            }
        }
        KeyCode::Char('a') => {
            let mapped = state.draft.auto_map(state.engine.catalog());
            state.notice = Some(format!("Auto-mapped {} of {} columns", mapped, columns));
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn draw(area: Rect, f: &mut ratatui::Frame<'_>, state: &TuiState) {
    let window_area = centered_window(area, 100, 30);

    let outer_block = Block::default()
        .borders(Borders::ALL)
        .title(WINDOW_TITLE);
    f.render_widget(outer_block, window_area);

    let inner = window_area.inner(&ratatui::layout::Margin {
        vertical: 1,
        horizontal: 1,
    });
    let banner_h = if state.controller.session().last_error.is_some() || state.notice.is_some() {
        2
    } else {
        0
    };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(banner_h),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(inner);

    draw_header(f, rows[0], state);
    match state.step() {
        Step::Connect => draw_connect_page(f, rows[1], state),
        Step::Upload => draw_upload_page(f, rows[1], state),
        Step::MapFields => draw_mapping_page(f, rows[1], state),
        Step::Import => draw_import_page(f, rows[1], state),
    }
    draw_banner(f, rows[2], state);
    draw_buttons(f, rows[3], state);
}

fn centered_window(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width.saturating_sub(2)).max(60).min(area.width);
    let h = height.min(area.height.saturating_sub(2)).max(20).min(area.height);
    let x = area.x + (area.width.saturating_sub(w)) / 2;
    let y = area.y + (area.height.saturating_sub(h)) / 2;
    Rect {
        x,
        y,
        width: w,
        height: h,
    }
}

fn draw_header(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let (current, total) = state.controller.progress();
    let mut spans = vec![Span::styled(
        format!("Step {} of {}: {}", current, total, state.step().title()),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if let Some(conn) = &state.controller.session().connection {
        spans.push(Span::raw(format!("   {}", conn.display_label())));
    }
    if let Some(busy) = state.busy {
        spans.push(Span::styled(
            format!("   {}", busy),
            Style::default().fg(Color::Yellow),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_banner(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    if area.height == 0 {
        return;
    }
    let (text, style) = match (&state.controller.session().last_error, &state.notice) {
        (Some(err), _) => (
            format!("Error: {}  (Esc to dismiss)", err),
            Style::default().fg(Color::White).bg(Color::Red),
        ),
        (None, Some(notice)) => (notice.clone(), Style::default().fg(Color::Green)),
        (None, None) => return,
    };
    let p = Paragraph::new(text).style(style).wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn focus_prefix(state: &TuiState, idx: usize) -> &'static str {
    if state.focus == Focus::Field(idx) {
        ">"
    } else {
        " "
    }
}

/// `(start, end)` of a scrolled window of `height` rows keeping `index` visible.
fn visible_window(len: usize, index: usize, height: usize) -> (usize, usize) {
    if height == 0 || len == 0 {
        return (0, 0);
    }
    let start = index.saturating_sub(height - 1).min(len.saturating_sub(height));
    (start, (start + height).min(len))
}

fn draw_connect_page(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let mut lines = vec![
        Line::from("Enter the Frappe site and credentials."),
        Line::from(""),
        Line::from(format!("{} URL:      {}", focus_prefix(state, 0), state.url.display())),
        Line::from(format!(
            "{} Username: {}",
            focus_prefix(state, 1),
            state.username.display()
        )),
        Line::from(format!(
            "{} Password: {}",
            focus_prefix(state, 2),
            state.password.display()
        )),
        Line::from(""),
        Line::from(format!("{} Saved connections:", focus_prefix(state, 3))),
    ];

    if state.saved.is_empty() {
        lines.push(Line::from("    (none)"));
    } else {
        let rows = (area.height as usize).saturating_sub(lines.len() + 2);
        let (start, end) = visible_window(state.saved.len(), state.saved_index, rows);
        for (i, conn) in state.saved.iter().enumerate().take(end).skip(start) {
            let marker = if i == state.saved_index { "*" } else { " " };
            lines.push(Line::from(format!("  {} {}", marker, conn.display_label())));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(
        "Tab moves focus. Enter on a saved entry fills the form, Delete forgets it.",
    ));

    let p = Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false });
    f.render_widget(p, area);
}

fn draw_upload_page(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(4)].as_ref())
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(32), Constraint::Min(0)].as_ref())
        .split(rows[0]);

    // Doctypes
    let filtered = state.filtered_doctypes();
    let mut lines = vec![Line::from(format!(
        "{} Filter: {}",
        focus_prefix(state, 0),
        state.doctype_filter.display()
    ))];
    let list_rows = (cols[0].height as usize).saturating_sub(3);
    let (start, end) = visible_window(filtered.len(), state.doctype_index, list_rows);
    for (i, name) in filtered.iter().enumerate().take(end).skip(start) {
        let selected = state.engine.target() == Some(*name);
        let marker = if i == state.doctype_index { ">" } else { " " };
        let text = format!("{}{} {}", marker, if selected { "*" } else { " " }, name);
        let style = if selected {
            Style::default().add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(text, style)));
    }
    if filtered.is_empty() {
        lines.push(Line::from("  (no doctypes)"));
    }
    let block = Block::default().borders(Borders::ALL).title("Doctype");
    f.render_widget(Paragraph::new(Text::from(lines)).block(block), cols[0]);

    // Fields
    let active = state.engine.active_subset();
    let tabs: Vec<Span> = Subset::TABS
        .iter()
        .enumerate()
        .flat_map(|(i, subset)| {
            let style = if *subset == active {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            [
                Span::styled(format!(" {} {} ", i + 1, subset.label()), style),
                Span::raw(" "),
            ]
        })
        .collect();
    let mut lines = vec![
        Line::from(tabs),
        Line::from(format!(
            "{} {} Select all ({} selected)",
            focus_prefix(state, 1),
            state.engine.select_all_state().glyph(),
            state.engine.selected_keys().len()
        )),
    ];
    let visible = state.engine.visible_entries();
    let list_rows = (cols[1].height as usize).saturating_sub(5);
    let (start, end) = visible_window(visible.len(), state.field_index, list_rows);
    for (i, entry) in visible.iter().enumerate().take(end).skip(start) {
        let check = if state.engine.is_selected(&entry.key) {
            "[x]"
        } else {
            "[ ]"
        };
        let marker = if i == state.field_index && state.focus == Focus::Field(1) {
            ">"
        } else {
            " "
        };
        let required = if entry.is_required() { " *" } else { "" };
        lines.push(Line::from(format!(
            "{} {} {}{}  {}",
            marker,
            check,
            entry.display_label(),
            required,
            template::column_header(&entry.key, &entry.field)
        )));
    }
    if state.engine.target().is_none() {
        lines.push(Line::from("  Select a doctype to list its fields."));
    } else if visible.is_empty() {
        lines.push(Line::from("  No fields in this view."));
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Fields (Space toggles, a = select all, t = template)");
    f.render_widget(Paragraph::new(Text::from(lines)).block(block), cols[1]);

    // File, batch and the header row the template will carry
    let headers = template::preview_headers(
        state.engine.catalog(),
        &state.engine.selected_in_display_order(),
    );
    let template_line = if headers.is_empty() {
        "  Template:   (no fields selected)".to_string()
    } else {
        format!("  Template:   {}", headers.join(", "))
    };
    let lines = vec![
        Line::from(format!(
            "{} File:       {}",
            focus_prefix(state, 2),
            state.file_path.display()
        )),
        Line::from(format!(
            "{} Batch size: {}",
            focus_prefix(state, 3),
            state.batch_size.display()
        )),
        Line::from(template_line),
    ];
    f.render_widget(
        Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::TOP)),
        rows[1],
    );
}

fn draw_mapping_page(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let mut lines = vec![
        Line::from(format!(
            "Map uploaded columns to {} fields ({} of {} mapped).",
            state.engine.target().unwrap_or("target"),
            state.draft.mapped_count(),
            state.draft.columns().len()
        )),
        Line::from(""),
    ];

    let rows = (area.height as usize).saturating_sub(4);
    let columns = state.draft.columns();
    let (start, end) = visible_window(columns.len(), state.column_index, rows);
    for (i, column) in columns.iter().enumerate().take(end).skip(start) {
        let marker = if i == state.column_index && state.focus == Focus::Field(0) {
            ">"
        } else {
            " "
        };
        let target = match state.draft.get(column) {
            Some(key) => state
                .engine
                .catalog()
                .get(key)
                .map(|e| format!("{} ({})", e.display_label(), key))
                .unwrap_or_else(|| key.to_string()),
            None => "-- not imported --".to_string(),
        };
        lines.push(Line::from(format!("{} {:<32} -> {}", marker, column, target)));
    }
    if columns.is_empty() {
        lines.push(Line::from("  The upload reported no columns."));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(
        "Left/Right change the field, Delete clears it, a re-runs auto-map.",
    ));

    f.render_widget(
        Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
        area,
    );
}

fn draw_import_page(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(2),
                Constraint::Length(3),
                Constraint::Min(0),
            ]
            .as_ref(),
        )
        .split(area);

    let job = state
        .controller
        .session()
        .job_id
        .clone()
        .unwrap_or_else(|| "-".to_string());
    f.render_widget(
        Paragraph::new(format!("Import job {}", job)),
        rows[0],
    );

    let pct = state.watch.percentage();
    let gauge_color = match state.watch.snapshot.as_ref().map(|s| s.status) {
        Some(JobStatus::Failed) => Color::Red,
        Some(JobStatus::Completed) => Color::Green,
        _ => Color::Cyan,
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(gauge_color))
        .percent(u16::from(pct))
        .label(format!("{}%", pct));
    f.render_widget(gauge, rows[1]);

    let mut lines = Vec::new();
    match &state.watch.snapshot {
        Some(snap) => {
            lines.push(Line::from(format!("Status: {}", snap.status.as_str())));
            lines.push(Line::from(format!(
                "Rows: {} / {}",
                snap.processed_rows, snap.total_rows
            )));
            lines.push(Line::from(format!(
                "Batch: {} / {}",
                snap.current_batch, snap.total_batches
            )));
            lines.push(Line::from(""));
            match snap.status {
                JobStatus::Completed => lines.push(Line::from(Span::styled(
                    "Import completed successfully.",
                    Style::default().fg(Color::Green),
                ))),
                JobStatus::Failed => lines.push(Line::from(Span::styled(
                    format!(
                        "Import failed: {}",
                        snap.error_message.as_deref().unwrap_or("unknown error")
                    ),
                    Style::default().fg(Color::Red),
                ))),
                JobStatus::Processing => {}
            }
        }
        None if state.watch.state == WatchState::Polling => {
            lines.push(Line::from("Waiting for the first status update..."));
        }
        None => lines.push(Line::from("Not watching.")),
    }
    f.render_widget(
        Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
        rows[2],
    );
}

fn draw_buttons(f: &mut ratatui::Frame<'_>, area: Rect, state: &TuiState) {
    let back = button_text(
        "Back",
        state.focus == Focus::Button(ButtonFocus::Back),
        button_enabled(state, ButtonFocus::Back),
    );
    let next = button_text(
        next_label(state.step()),
        state.focus == Focus::Button(ButtonFocus::Next),
        button_enabled(state, ButtonFocus::Next),
    );
    let logout = button_text(
        "Logout",
        state.focus == Focus::Button(ButtonFocus::Logout),
        button_enabled(state, ButtonFocus::Logout),
    );

    let line = Line::from(vec![back, Span::raw(" "), next, Span::raw(" "), logout]);
    let p = Paragraph::new(Text::from(line)).alignment(Alignment::Right);
    f.render_widget(p, area);
}

fn button_text(label: &str, focused: bool, enabled: bool) -> Span<'static> {
    let mut style = Style::default();
    if !enabled {
        style = style.fg(Color::DarkGray);
    }
    if focused && enabled {
        style = style.add_modifier(Modifier::REVERSED);
    }
    Span::styled(format!("[ {} ]", label), style)
}

// ---------------------------------------------------------------------------
// Smoke rendering
// ---------------------------------------------------------------------------

/// Smoke-only sample schema so pages render without a backend.
fn sample_schema() -> serde_json::Value {
    serde_json::json!({
        "docs": [
            {
                "name": "Customer",
                "fields": [
                    {"fieldname": "customer_name", "label": "Customer Name", "fieldtype": "Data", "reqd": 1},
                    {"fieldname": "customer_type", "label": "Customer Type", "fieldtype": "Select", "reqd": 1},
                    {"fieldname": "customer_group", "label": "Customer Group", "fieldtype": "Link", "options": "Customer Group"},
                    {"fieldname": "territory", "label": "Territory", "fieldtype": "Link", "options": "Territory"},
                    {"fieldname": "address", "label": "Addresses", "fieldtype": "Table", "options": "Customer Address"}
                ]
            },
            {
                "name": "Customer Address",
                "fields": [
                    {"fieldname": "address_line1", "label": "Address Line 1", "fieldtype": "Data", "reqd": 1},
                    {"fieldname": "city", "label": "City", "fieldtype": "Data"}
                ]
            }
        ]
    })
}

fn new_smoke_state(target: &str) -> Result<TuiState> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start smoke runtime")?;
    let config = AppConfig::default();
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let mut state = TuiState::new(
        WizardController::new(StepLayout::FourStep, store),
        &config,
    );
    state.saved = vec![Connection::new("c1", "https://erp.example.com", "admin")];

    if target == "connect" {
        return Ok(state);
    }

    let connection = Connection::new("c1", "https://erp.example.com", "admin");
    rt.block_on(state.controller.dispatch(WizardEvent::ConnectionEstablished { connection }));
    state.doctypes = vec!["Customer".to_string(), "Item".to_string(), "Supplier".to_string()];
    steps::install_schema(&mut state.engine, "Customer", &sample_schema(), &state.recommendations)
        .context("Smoke schema failed to load")?;
    state.engine.set_select_all_for_active_subset(true);
    state.focus = Focus::Field(1);
    if target == "upload" {
        return Ok(state);
    }

    let receipt = UploadReceipt {
        job_id: "j1".to_string(),
        columns: vec![
            "customer_name [Data]".to_string(),
            "territory [Link] [Territory]".to_string(),
            "address.1.city [Data]".to_string(),
            "Notes".to_string(),
        ],
        total_rows: Some(100),
        batch_size: Some(100),
    };
    state.draft = MappingDraft::new(receipt.columns.clone());
    state.draft.auto_map(state.engine.catalog());
    rt.block_on(state.controller.dispatch(WizardEvent::FileUploaded { receipt }));
    state.focus = Focus::Field(0);
    if target == "mapping" {
        return Ok(state);
    }

    rt.block_on(state.controller.dispatch(WizardEvent::MappingConfirmed));
    let mut snapshot = crate::models::job::JobStatusSnapshot::processing(40, 100);
    snapshot.current_batch = 1;
    snapshot.total_batches = 1;
    state.watch = WatchUpdate {
        state: WatchState::Polling,
        job_id: Some("j1".to_string()),
        snapshot: Some(snapshot),
        fetches: 1,
        regressions: 0,
    };
    state.focus = Focus::Button(ButtonFocus::Back);
    Ok(state)
}

/// Render one frame of `target` (connect|upload|mapping|import) and return the screen text.
pub fn render_smoke(target: &str, width: u16, height: u16) -> Result<String> {
    let t = target.trim().to_ascii_lowercase();
    let t = if t.is_empty() { "connect".to_string() } else { t };
    if !matches!(t.as_str(), "connect" | "upload" | "mapping" | "import") {
        anyhow::bail!("Unknown smoke page '{}' (connect|upload|mapping|import)", target);
    }
    let state = new_smoke_state(&t)?;

    let backend = TestBackend::new(width, height);
    let mut terminal = Terminal::new(backend)?;
    terminal.draw(|f| draw(f.size(), f, &state))?;

    let buffer = terminal.backend().buffer();
    let mut out = String::new();
    for y in 0..buffer.area.height {
        for x in 0..buffer.area.width {
            out.push_str(buffer.get(x, y).symbol());
        }
        out.push('\n');
    }
    Ok(out)
}

/// Non-interactive smoke mode: render a single frame into an in-memory backend and exit.
pub fn smoke(target: &str) -> Result<()> {
    info!(
        "[PHASE: tui] [STEP: smoke] Rendering single-frame TUI smoke target={}",
        target
    );
    render_smoke(target, 100, 30).map(|_| ())
}
