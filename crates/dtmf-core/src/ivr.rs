//! IVR engine: menu graph, prompt playback, input collection, navigation.
//!
//! A session is created per call, presents a menu prompt, and waits for
//! DTMF input. Valid digits fire the item's action; invalid input and
//! timeouts share the retry path. Navigation keeps a stack so `goto_menu`
//! and `previous_menu` compose. A sweeper force-ends sessions past the
//! session timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use voxbridge_audio_core::wav::load_wav_pcm;

use crate::actions::{CallActions, MediaSink};
use crate::error::{DtmfError, Result};
use crate::tone;

const PROMPT_CHUNK: usize = 320;
const PROMPT_TICK: Duration = Duration::from_millis(20);

// Session ids only need uniqueness within the process.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_session_id(call_id: &str) -> String {
    format!(
        "ivr_{}_{}",
        SESSION_COUNTER.fetch_add(1, Ordering::Relaxed),
        call_id
    )
}

/// Prompt material. Text-to-speech is out of scope; tones and audio files
/// cover the menu set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvrPromptType {
    AudioFile,
    Tone,
    Silence,
}

#[derive(Debug, Clone)]
pub struct IvrPrompt {
    pub id: String,
    pub prompt_type: IvrPromptType,
    /// File path for audio files; unused for tones and silence.
    pub content: String,
    pub duration_s: Option<f32>,
    pub volume: f32,
    pub interruptible: bool,
    pub tone_frequency: Option<f32>,
    pub tone_amplitude: f32,
}

impl IvrPrompt {
    pub fn tone(id: &str, frequency: f32, duration_s: f32) -> Self {
        Self {
            id: id.to_string(),
            prompt_type: IvrPromptType::Tone,
            content: String::new(),
            duration_s: Some(duration_s),
            volume: 0.8,
            interruptible: true,
            tone_frequency: Some(frequency),
            tone_amplitude: 0.3,
        }
    }

    pub fn file(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            prompt_type: IvrPromptType::AudioFile,
            content: path.to_string(),
            duration_s: None,
            volume: 0.8,
            interruptible: true,
            tone_frequency: None,
            tone_amplitude: 0.3,
        }
    }

    pub fn silence(duration_s: f32) -> Self {
        Self {
            id: "silence".to_string(),
            prompt_type: IvrPromptType::Silence,
            content: String::new(),
            duration_s: Some(duration_s),
            volume: 1.0,
            interruptible: true,
            tone_frequency: None,
            tone_amplitude: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvrActionType {
    TransferCall,
    PlayPrompt,
    GotoMenu,
    HangupCall,
    ForwardToAi,
    CollectInput,
    RepeatMenu,
    PreviousMenu,
    CustomHandler,
}

#[derive(Debug, Clone)]
pub struct IvrAction {
    pub action_type: IvrActionType,
    pub target: Option<String>,
    pub prompt: Option<IvrPrompt>,
    pub parameters: Value,
    pub custom_handler: Option<String>,
}

impl IvrAction {
    pub fn new(action_type: IvrActionType) -> Self {
        Self {
            action_type,
            target: None,
            prompt: None,
            parameters: Value::Null,
            custom_handler: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_prompt(mut self, prompt: IvrPrompt) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_handler(mut self, name: &str) -> Self {
        self.custom_handler = Some(name.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct IvrMenuItem {
    pub digit: char,
    pub description: String,
    pub action: IvrAction,
    pub enabled: bool,
}

impl IvrMenuItem {
    pub fn new(digit: char, description: &str, action: IvrAction) -> Self {
        Self {
            digit,
            description: description.to_string(),
            action,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IvrMenu {
    pub menu_id: String,
    pub name: String,
    pub welcome_prompt: IvrPrompt,
    pub timeout: Duration,
    pub max_retries: u32,
    pub invalid_prompt: Option<IvrPrompt>,
    pub timeout_prompt: Option<IvrPrompt>,
    pub timeout_action: Option<IvrAction>,
    pub items: HashMap<char, IvrMenuItem>,
}

impl IvrMenu {
    pub fn new(menu_id: &str, name: &str, welcome_prompt: IvrPrompt) -> Self {
        Self {
            menu_id: menu_id.to_string(),
            name: name.to_string(),
            welcome_prompt,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            invalid_prompt: None,
            timeout_prompt: None,
            timeout_action: None,
            items: HashMap::new(),
        }
    }

    pub fn add_item(&mut self, item: IvrMenuItem) {
        self.items.insert(item.digit, item);
    }

    pub fn get_item(&self, digit: char) -> Option<&IvrMenuItem> {
        self.items.get(&digit)
    }
}

/// Custom IVR action handler, resolved by name at menu registration.
#[async_trait]
pub trait CustomIvrHandler: Send + Sync {
    async fn handle(&self, call_id: &str, parameters: &Value);
}

struct SessionState {
    session_id: String,
    current_menu_id: String,
    started_at: Instant,
    menu_stack: Vec<String>,
    collected_input: String,
    retry_count: u32,
    waiting_for_input: bool,
    /// Bumped whenever a new input window opens; stale timeout tasks
    /// compare against it and no-op.
    prompt_generation: u64,
    current_prompt_interruptible: bool,
}

/// The IVR engine. Construct with [`IvrEngine::new`], which returns an
/// `Arc` because timeout tasks hold a weak reference back to the engine.
pub struct IvrEngine {
    self_ref: Weak<IvrEngine>,
    menus: parking_lot::RwLock<HashMap<String, IvrMenu>>,
    sessions: Mutex<HashMap<String, SessionState>>,
    playback: Mutex<HashMap<String, JoinHandle<()>>>,
    custom_handlers: parking_lot::RwLock<HashMap<String, Arc<dyn CustomIvrHandler>>>,
    actions: Arc<dyn CallActions>,
    sink: Arc<dyn MediaSink>,
    sample_rate: u32,
    session_timeout: Duration,
    total_sessions: AtomicU64,
    completed_sessions: AtomicU64,
    failed_sessions: AtomicU64,
}

impl IvrEngine {
    pub fn new(
        actions: Arc<dyn CallActions>,
        sink: Arc<dyn MediaSink>,
        sample_rate: u32,
        session_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            menus: parking_lot::RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            playback: Mutex::new(HashMap::new()),
            custom_handlers: parking_lot::RwLock::new(HashMap::new()),
            actions,
            sink,
            sample_rate,
            session_timeout,
            total_sessions: AtomicU64::new(0),
            completed_sessions: AtomicU64::new(0),
            failed_sessions: AtomicU64::new(0),
        })
    }

    pub fn register_custom_handler(&self, name: &str, handler: Arc<dyn CustomIvrHandler>) {
        self.custom_handlers.write().insert(name.to_string(), handler);
    }

    /// Register a menu. Custom-handler actions must reference handlers that
    /// already exist so configuration errors surface here.
    pub fn add_menu(&self, menu: IvrMenu) -> Result<()> {
        let handlers = self.custom_handlers.read();
        let check = |action: &IvrAction| -> Result<()> {
            if action.action_type == IvrActionType::CustomHandler {
                let name = action
                    .custom_handler
                    .as_deref()
                    .ok_or_else(|| DtmfError::UnknownHandler("<unset>".to_string()))?;
                if !handlers.contains_key(name) {
                    return Err(DtmfError::UnknownHandler(name.to_string()));
                }
            }
            Ok(())
        };

        for item in menu.items.values() {
            check(&item.action)?;
        }
        if let Some(action) = &menu.timeout_action {
            check(action)?;
        }
        drop(handlers);

        tracing::info!(menu_id = %menu.menu_id, name = %menu.name, "registered IVR menu");
        self.menus.write().insert(menu.menu_id.clone(), menu);
        Ok(())
    }

    pub fn remove_menu(&self, menu_id: &str) -> bool {
        self.menus.write().remove(menu_id).is_some()
    }

    /// Start a session at the given menu.
    pub async fn start_session(&self, call_id: &str, menu_id: &str) -> bool {
        if !self.menus.read().contains_key(menu_id) {
            tracing::error!(call_id, menu_id, "IVR menu not found");
            return false;
        }

        {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(call_id) {
                tracing::warn!(call_id, "IVR session already active");
                return false;
            }
            sessions.insert(
                call_id.to_string(),
                SessionState {
                    session_id: next_session_id(call_id),
                    current_menu_id: menu_id.to_string(),
                    started_at: Instant::now(),
                    menu_stack: Vec::new(),
                    collected_input: String::new(),
                    retry_count: 0,
                    waiting_for_input: false,
                    prompt_generation: 0,
                    current_prompt_interruptible: true,
                },
            );
        }
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        if self.present_menu(call_id, menu_id).await {
            tracing::info!(call_id, menu_id, "IVR session started");
            true
        } else {
            self.end_session(call_id, "failed_to_start").await;
            false
        }
    }

    /// End a session and stop any prompt in flight.
    pub async fn end_session(&self, call_id: &str, reason: &str) -> bool {
        let removed = self.sessions.lock().await.remove(call_id);
        let Some(state) = removed else {
            return false;
        };

        self.stop_prompt(call_id).await;

        match reason {
            "completed" | "transferred" | "forwarded_to_ai" | "hung_up" => {
                self.completed_sessions.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.failed_sessions.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::info!(
            call_id,
            reason,
            duration_s = state.started_at.elapsed().as_secs(),
            "IVR session ended"
        );
        true
    }

    /// Whether a call currently has an IVR session.
    pub async fn has_session(&self, call_id: &str) -> bool {
        self.sessions.lock().await.contains_key(call_id)
    }

    /// Feed a DTMF digit. Returns true when the digit was consumed by an
    /// IVR session.
    pub async fn handle_digit(&self, call_id: &str, digit: char) -> bool {
        let (menu, interruptible) = {
            let mut sessions = self.sessions.lock().await;
            let Some(state) = sessions.get_mut(call_id) else {
                return false;
            };
            let menu = self.menus.read().get(&state.current_menu_id).cloned();
            let Some(menu) = menu else {
                return false;
            };
            state.waiting_for_input = false;
            state.prompt_generation += 1;
            (menu, state.current_prompt_interruptible)
        };

        if interruptible {
            self.stop_prompt(call_id).await;
        }

        match menu.get_item(digit) {
            Some(item) if item.enabled => {
                {
                    let mut sessions = self.sessions.lock().await;
                    if let Some(state) = sessions.get_mut(call_id) {
                        state.retry_count = 0;
                    }
                }
                let action = item.action.clone();
                self.execute_action(call_id, &action).await;
            }
            _ => {
                self.handle_invalid_input(call_id, &menu).await;
            }
        }
        true
    }

    async fn handle_invalid_input(&self, call_id: &str, menu: &IvrMenu) {
        let retries = {
            let mut sessions = self.sessions.lock().await;
            let Some(state) = sessions.get_mut(call_id) else {
                return;
            };
            state.retry_count += 1;
            state.retry_count
        };

        if retries >= menu.max_retries {
            match menu.timeout_action.clone() {
                Some(action) => self.execute_action(call_id, &action).await,
                None => {
                    self.end_session(call_id, "max_retries").await;
                }
            }
            return;
        }

        if let Some(prompt) = &menu.invalid_prompt {
            self.play_prompt(call_id, prompt).await;
        }
        self.arm_input_window(call_id, menu.timeout).await;
    }

    /// Timeout fired for an input window. `generation` guards against
    /// windows that were already answered.
    pub fn handle_input_timeout<'a>(
        &'a self,
        call_id: &'a str,
        generation: u64,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(self.handle_input_timeout_inner(call_id, generation))
    }

    async fn handle_input_timeout_inner(&self, call_id: &str, generation: u64) {
        let menu = {
            let sessions = self.sessions.lock().await;
            let Some(state) = sessions.get(call_id) else {
                return;
            };
            if !state.waiting_for_input || state.prompt_generation != generation {
                return;
            }
            self.menus.read().get(&state.current_menu_id).cloned()
        };

        let Some(menu) = menu else { return };

        let retries = {
            let mut sessions = self.sessions.lock().await;
            let Some(state) = sessions.get_mut(call_id) else {
                return;
            };
            state.waiting_for_input = false;
            state.retry_count += 1;
            state.retry_count
        };

        if retries >= menu.max_retries {
            match menu.timeout_action.clone() {
                Some(action) => self.execute_action(call_id, &action).await,
                None => {
                    self.end_session(call_id, "timeout").await;
                }
            }
            return;
        }

        if let Some(prompt) = menu.timeout_prompt.clone() {
            self.play_prompt(call_id, &prompt).await;
            self.arm_input_window(call_id, menu.timeout).await;
        } else {
            self.present_menu(call_id, &menu.menu_id.clone()).await;
        }
    }

    async fn execute_action(&self, call_id: &str, action: &IvrAction) {
        match action.action_type {
            IvrActionType::TransferCall => {
                let Some(target) = action.target.clone() else {
                    tracing::warn!(call_id, "transfer action without target");
                    self.end_session(call_id, "transfer_failed").await;
                    return;
                };
                if self.actions.transfer_call(call_id, &target).await {
                    self.end_session(call_id, "transferred").await;
                } else {
                    self.end_session(call_id, "transfer_failed").await;
                }
            }
            IvrActionType::PlayPrompt => {
                if let Some(prompt) = &action.prompt {
                    self.play_prompt(call_id, prompt).await;
                }
                let timeout = self.current_menu_timeout(call_id).await;
                self.arm_input_window(call_id, timeout).await;
            }
            IvrActionType::GotoMenu => {
                let Some(target) = action.target.clone() else {
                    return;
                };
                {
                    let mut sessions = self.sessions.lock().await;
                    if let Some(state) = sessions.get_mut(call_id) {
                        let current = state.current_menu_id.clone();
                        state.menu_stack.push(current);
                        state.retry_count = 0;
                    }
                }
                self.present_menu(call_id, &target).await;
            }
            IvrActionType::HangupCall => {
                self.actions.hangup_call(call_id, "ivr_hangup").await;
                self.end_session(call_id, "hung_up").await;
            }
            IvrActionType::ForwardToAi => {
                let frame = json!({
                    "type": "status",
                    "data": {
                        "call_id": call_id,
                        "event": "ivr_forward",
                        "parameters": action.parameters,
                    }
                });
                self.actions.forward_to_ai(call_id, frame).await;
                self.end_session(call_id, "forwarded_to_ai").await;
            }
            IvrActionType::CollectInput => {
                let mut sessions = self.sessions.lock().await;
                if let Some(state) = sessions.get_mut(call_id) {
                    state.collected_input.clear();
                    state.waiting_for_input = true;
                }
            }
            IvrActionType::RepeatMenu => {
                let menu_id = {
                    let sessions = self.sessions.lock().await;
                    sessions.get(call_id).map(|s| s.current_menu_id.clone())
                };
                if let Some(menu_id) = menu_id {
                    self.present_menu(call_id, &menu_id).await;
                }
            }
            IvrActionType::PreviousMenu => {
                let previous = {
                    let mut sessions = self.sessions.lock().await;
                    sessions.get_mut(call_id).and_then(|s| {
                        let prev = s.menu_stack.pop();
                        s.retry_count = 0;
                        prev
                    })
                };
                match previous {
                    Some(menu_id) => {
                        self.present_menu(call_id, &menu_id).await;
                    }
                    None => {
                        self.end_session(call_id, "no_previous_menu").await;
                    }
                }
            }
            IvrActionType::CustomHandler => {
                // Validated at add_menu time.
                let handler = action
                    .custom_handler
                    .as_deref()
                    .and_then(|name| self.custom_handlers.read().get(name).cloned());
                if let Some(handler) = handler {
                    handler.handle(call_id, &action.parameters).await;
                }
            }
        }
    }

    /// Present a menu: play its welcome prompt and open an input window.
    async fn present_menu(&self, call_id: &str, menu_id: &str) -> bool {
        let menu = self.menus.read().get(menu_id).cloned();
        let Some(menu) = menu else {
            tracing::error!(call_id, menu_id, "menu vanished during navigation");
            return false;
        };

        {
            let mut sessions = self.sessions.lock().await;
            let Some(state) = sessions.get_mut(call_id) else {
                return false;
            };
            state.current_menu_id = menu_id.to_string();
            state.current_prompt_interruptible = menu.welcome_prompt.interruptible;
        }

        self.play_prompt(call_id, &menu.welcome_prompt).await;
        self.arm_input_window(call_id, menu.timeout).await;
        true
    }

    async fn current_menu_timeout(&self, call_id: &str) -> Duration {
        let menu_id = {
            let sessions = self.sessions.lock().await;
            sessions.get(call_id).map(|s| s.current_menu_id.clone())
        };
        menu_id
            .and_then(|id| self.menus.read().get(&id).map(|m| m.timeout))
            .unwrap_or(Duration::from_secs(10))
    }

    /// Mark the session waiting and schedule its timeout task.
    async fn arm_input_window(&self, call_id: &str, timeout: Duration) {
        let generation = {
            let mut sessions = self.sessions.lock().await;
            let Some(state) = sessions.get_mut(call_id) else {
                return;
            };
            state.waiting_for_input = true;
            state.prompt_generation += 1;
            state.prompt_generation
        };

        let weak = self.self_ref.clone();
        let call_id = call_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(engine) = weak.upgrade() {
                engine.handle_input_timeout(&call_id, generation).await;
            }
        });
    }

    /// Play a prompt to the call, replacing any prompt in flight. A prompt
    /// that cannot be prepared is logged and skipped; the session carries
    /// on.
    async fn play_prompt(&self, call_id: &str, prompt: &IvrPrompt) -> bool {
        let audio = match self.prepare_audio(prompt).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(call_id, prompt = %prompt.id, error = %e, "failed to prepare prompt");
                return false;
            }
        };
        let audio = tone::apply_volume(&audio, prompt.volume);

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(state) = sessions.get_mut(call_id) {
                state.current_prompt_interruptible = prompt.interruptible;
            }
        }

        self.stop_prompt(call_id).await;

        let sink = self.sink.clone();
        let call = call_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROMPT_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut position = 0;
            while position < audio.len() {
                ticker.tick().await;
                let end = (position + PROMPT_CHUNK).min(audio.len());
                if !sink.send_audio(&call, &audio[position..end]).await {
                    break;
                }
                position = end;
            }
        });

        self.playback.lock().await.insert(call_id.to_string(), handle);
        true
    }

    async fn stop_prompt(&self, call_id: &str) {
        if let Some(handle) = self.playback.lock().await.remove(call_id) {
            handle.abort();
        }
    }

    async fn prepare_audio(&self, prompt: &IvrPrompt) -> Result<Vec<u8>> {
        match prompt.prompt_type {
            IvrPromptType::AudioFile => {
                let data = tokio::fs::read(&prompt.content).await?;
                Ok(load_wav_pcm(&data, self.sample_rate)?)
            }
            IvrPromptType::Tone => {
                let frequency = prompt.tone_frequency.unwrap_or(800.0);
                let duration = prompt.duration_s.unwrap_or(1.0);
                Ok(tone::generate_tone(
                    frequency,
                    duration,
                    self.sample_rate,
                    prompt.tone_amplitude,
                ))
            }
            IvrPromptType::Silence => {
                let duration = prompt.duration_s.unwrap_or(1.0);
                Ok(tone::generate_silence(duration, self.sample_rate))
            }
        }
    }

    /// Force-end sessions older than the session timeout.
    pub async fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, s)| now.duration_since(s.started_at) > self.session_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for call_id in &expired {
            self.end_session(call_id, "session_timeout").await;
        }
        expired.len()
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub fn total_session_count(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    pub fn completed_session_count(&self) -> u64 {
        self.completed_sessions.load(Ordering::Relaxed)
    }

    pub fn failed_session_count(&self) -> u64 {
        self.failed_sessions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordedActions {
        transfers: PlMutex<Vec<(String, String)>>,
        hangups: PlMutex<Vec<String>>,
        ai_frames: PlMutex<Vec<Value>>,
        transfer_ok: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CallActions for RecordedActions {
        async fn forward_to_ai(&self, _call_id: &str, frame: Value) -> bool {
            self.ai_frames.lock().push(frame);
            true
        }

        async fn transfer_call(&self, call_id: &str, target: &str) -> bool {
            self.transfers
                .lock()
                .push((call_id.to_string(), target.to_string()));
            self.transfer_ok.load(Ordering::SeqCst)
        }

        async fn play_audio(&self, _call_id: &str, _audio_ref: &str) -> bool {
            true
        }

        async fn hangup_call(&self, call_id: &str, _reason: &str) -> bool {
            self.hangups.lock().push(call_id.to_string());
            true
        }

        async fn toggle_recording(&self, _call_id: &str) -> bool {
            true
        }

        async fn enter_ivr(&self, _call_id: &str, _menu_id: &str) -> bool {
            true
        }
    }

    struct NullSink;

    #[async_trait]
    impl MediaSink for NullSink {
        async fn send_audio(&self, _call_id: &str, _pcm: &[u8]) -> bool {
            true
        }
    }

    fn engine(actions: Arc<RecordedActions>) -> Arc<IvrEngine> {
        IvrEngine::new(actions, Arc::new(NullSink), 8000, Duration::from_secs(300))
    }

    fn main_menu() -> IvrMenu {
        let mut menu = IvrMenu::new("main", "Main menu", IvrPrompt::tone("welcome", 800.0, 0.1));
        menu.add_item(IvrMenuItem::new(
            '1',
            "sales",
            IvrAction::new(IvrActionType::TransferCall).with_target("+1555"),
        ));
        menu.add_item(IvrMenuItem::new(
            '2',
            "submenu",
            IvrAction::new(IvrActionType::GotoMenu).with_target("sub"),
        ));
        menu.add_item(IvrMenuItem::new(
            '9',
            "goodbye",
            IvrAction::new(IvrActionType::HangupCall),
        ));
        menu.add_item(IvrMenuItem::new(
            '0',
            "agent",
            IvrAction::new(IvrActionType::ForwardToAi),
        ));
        menu.max_retries = 2;
        menu
    }

    fn sub_menu() -> IvrMenu {
        let mut menu = IvrMenu::new("sub", "Submenu", IvrPrompt::tone("sub", 600.0, 0.1));
        menu.add_item(IvrMenuItem::new(
            '*',
            "back",
            IvrAction::new(IvrActionType::PreviousMenu),
        ));
        menu
    }

    #[tokio::test]
    async fn unknown_menu_fails_to_start() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        assert!(!engine.start_session("c1", "missing").await);
        assert_eq!(engine.active_session_count().await, 0);
    }

    #[tokio::test]
    async fn transfer_item_transfers_and_ends_session() {
        let actions = Arc::new(RecordedActions::default());
        actions.transfer_ok.store(true, Ordering::SeqCst);
        let engine = engine(actions.clone());
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        assert!(engine.start_session("c1", "main").await);
        assert!(engine.handle_digit("c1", '1').await);

        assert_eq!(
            actions.transfers.lock().as_slice(),
            [("c1".to_string(), "+1555".to_string())]
        );
        assert!(!engine.has_session("c1").await);
        assert_eq!(engine.completed_session_count(), 1);
    }

    #[tokio::test]
    async fn navigation_stack_pushes_and_pops() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        engine.start_session("c1", "main").await;
        engine.handle_digit("c1", '2').await;
        {
            let sessions = engine.sessions.lock().await;
            let state = sessions.get("c1").unwrap();
            assert_eq!(state.current_menu_id, "sub");
            assert_eq!(state.menu_stack, vec!["main".to_string()]);
        }

        engine.handle_digit("c1", '*').await;
        {
            let sessions = engine.sessions.lock().await;
            let state = sessions.get("c1").unwrap();
            assert_eq!(state.current_menu_id, "main");
            assert!(state.menu_stack.is_empty());
        }
    }

    #[tokio::test]
    async fn invalid_input_exhausts_retries() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        engine.start_session("c1", "main").await;
        // max_retries is 2 and there is no timeout_action: second invalid
        // digit ends the session.
        engine.handle_digit("c1", '7').await;
        assert!(engine.has_session("c1").await);
        engine.handle_digit("c1", '7').await;
        assert!(!engine.has_session("c1").await);
        assert_eq!(engine.failed_session_count(), 1);
    }

    #[tokio::test]
    async fn forward_to_ai_ends_session_with_frame() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions.clone());
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        engine.start_session("c1", "main").await;
        engine.handle_digit("c1", '0').await;

        assert!(!engine.has_session("c1").await);
        let frames = actions.ai_frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["event"], "ivr_forward");
    }

    #[tokio::test]
    async fn stale_timeout_generation_is_ignored() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        engine.start_session("c1", "main").await;
        // Generation 0 predates the armed window; nothing should change.
        engine.handle_input_timeout("c1", 0).await;
        assert!(engine.has_session("c1").await);
        let sessions = engine.sessions.lock().await;
        assert_eq!(sessions.get("c1").unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn sweeper_ends_overlong_sessions() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        engine.add_menu(main_menu()).unwrap();
        engine.add_menu(sub_menu()).unwrap();

        engine.start_session("c1", "main").await;
        let far = Instant::now() + Duration::from_secs(301);
        assert_eq!(engine.sweep_expired(far).await, 1);
        assert!(!engine.has_session("c1").await);
    }

    #[tokio::test]
    async fn digits_for_calls_without_sessions_are_not_consumed() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        assert!(!engine.handle_digit("c1", '1').await);
    }

    #[test]
    fn custom_handler_validation_at_registration() {
        let actions = Arc::new(RecordedActions::default());
        let engine = engine(actions);
        let mut menu = IvrMenu::new("m", "m", IvrPrompt::silence(0.1));
        menu.add_item(IvrMenuItem::new(
            '1',
            "custom",
            IvrAction::new(IvrActionType::CustomHandler).with_handler("ghost"),
        ));
        assert!(matches!(
            engine.add_menu(menu),
            Err(DtmfError::UnknownHandler(_))
        ));
    }
}
