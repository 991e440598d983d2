//! Line-oriented terminal front end.
//!
//! Stdin is read on a background task into a shared channel. The prompt loop
//! and [`PromptApprover`] both take lines from it; approvals only happen while a
//! send is in flight, when the prompt loop is not reading.

use std::io::{self, Write as _};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_provider::ChatBackend;
use serde_json::Value;
use session_store::ConversationStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent_loop::{AgentLoop, AgentLoopOptions, SendRequest};
use crate::capability::{CapabilityCache, CapabilityManager, CAPABILITY_CACHE_FILE};
use crate::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use crate::config::{default_cache_dir, Config};
use crate::error::ChatError;
use crate::message_store::MessageStore;
use crate::state::{ConversationState, StateManager};
use crate::stream_handler::{RenderSurface, StreamHandler};
use crate::tasks::TaskManager;
use crate::tools::builtin::builtin_registry;
use crate::tools::{
    ApprovalHandler, PermissionRequest, ToolError, ToolRegistry, OUTPUT_RETENTION,
};

pub const INDICATOR_TASK: &str = "response_indicator";

const INDICATOR_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const TOOL_RESULT_PREVIEW_CHARS: usize = 240;

/// Lines typed by the user, shared between the prompt loop and approvals.
pub type SharedLines = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

/// Starts reading stdin line by line. The channel closes on EOF.
#[must_use]
pub fn spawn_stdin_reader() -> (SharedLines, JoinHandle<()>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(event = "repl.stdin.failed", %error);
                    break;
                }
            }
        }
    });
    (Arc::new(Mutex::new(receiver)), reader)
}

/// Asks the user on the terminal before gated tool operations.
pub struct PromptApprover {
    lines: SharedLines,
}

impl PromptApprover {
    #[must_use]
    pub fn new(lines: SharedLines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl ApprovalHandler for PromptApprover {
    async fn ask(&self, request: &PermissionRequest) -> Result<(), ToolError> {
        print_flush(&format!(
            "\nAllow {} for {}? [y/N] ",
            request.permission,
            request.patterns.join(", ")
        ));
        let answer = self.lines.lock().await.recv().await;
        let approved = answer
            .map(|answer| answer.trim().to_ascii_lowercase())
            .is_some_and(|answer| answer == "y" || answer == "yes");

        info!(
            event = "tool.permission.answered",
            permission = %request.permission,
            approved
        );
        if approved {
            Ok(())
        } else {
            Err(ToolError::rejected(request.permission.clone()))
        }
    }
}

/// Renders a reply as plain text on stdout.
pub struct StdoutSurface {
    tasks: Arc<TaskManager>,
    show_thinking: bool,
    thinking_open: bool,
}

impl StdoutSurface {
    #[must_use]
    pub fn new(tasks: Arc<TaskManager>, show_thinking: bool) -> Self {
        Self {
            tasks,
            show_thinking,
            thinking_open: false,
        }
    }
}

impl RenderSurface for StdoutSurface {
    fn set_content(&mut self, text: &str) {
        print_flush(text);
    }

    fn append_content(&mut self, text: &str) {
        print_flush(text);
    }

    fn append_thinking(&mut self, text: &str) {
        if !self.show_thinking {
            return;
        }
        if !self.thinking_open {
            self.thinking_open = true;
            print_flush("[thinking] ");
        }
        print_flush(text);
    }

    fn finalize_thinking(&mut self) {
        if self.thinking_open {
            self.thinking_open = false;
            print_flush("\n\n");
        }
    }

    fn append_tool_call(&mut self, name: &str, arguments: &Value) {
        self.finalize_thinking();
        print_flush(&format!("\n[tool] {name} {arguments}\n"));
    }

    fn append_tool_result(&mut self, name: &str, result: &str) {
        let mut preview: String = result.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
        if preview.len() < result.len() {
            preview.push_str("...");
        }
        print_flush(&format!("[tool result] {name}: {preview}\n"));
    }

    fn finalize_content(&mut self) {
        self.finalize_thinking();
        print_flush("\n");
    }

    fn stop_indicator(&mut self) {
        if let Some(indicator) = self.tasks.discard(INDICATOR_TASK) {
            indicator.abort();
            eprint!("\r\x1b[2K");
        }
    }

    fn set_status(&mut self, status: &str) {
        debug!(event = "ui.status", status = %status);
    }
}

/// Whether the prompt loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One interactive chat session.
pub struct ReplSession {
    config: Config,
    agent: AgentLoop,
    tools: Option<Arc<ToolRegistry>>,
    state: StateManager,
    tasks: Arc<TaskManager>,
    conversations: ConversationStore,
    lines: SharedLines,
    pending_images: Vec<String>,
}

impl ReplSession {
    /// Session using the capability cache in the user's cache directory.
    pub fn new(
        config: Config,
        backend: Arc<dyn ChatBackend>,
        lines: SharedLines,
    ) -> Result<Self, ToolError> {
        let cache = default_cache_dir()
            .map(|dir| CapabilityCache::open(dir.join(CAPABILITY_CACHE_FILE)))
            .unwrap_or_else(CapabilityCache::in_memory);
        Self::with_cache(config, backend, lines, cache)
    }

    pub fn with_cache(
        config: Config,
        backend: Arc<dyn ChatBackend>,
        lines: SharedLines,
        cache: CapabilityCache,
    ) -> Result<Self, ToolError> {
        let tools = if config.tools.enabled {
            let options = config
                .tools
                .clone()
                .with_web_search(config.capabilities.web_search_enabled);
            Some(Arc::new(builtin_registry(options)?))
        } else {
            None
        };

        let capabilities = CapabilityManager::new(
            Arc::clone(&backend),
            cache,
            config.capabilities.preferences(),
        );
        let store = MessageStore::with_system_prompt(
            &config.ollama.system_prompt,
            config.ollama.max_history_messages,
            config.ollama.max_context_tokens,
        );
        let options = AgentLoopOptions::new(config.ollama.model.clone())
            .with_retries(config.ollama.retries)
            .with_retry_backoff(config.ollama.retry_backoff());
        let agent = AgentLoop::new(backend, store, capabilities, options)
            .with_approver(Arc::new(PromptApprover::new(Arc::clone(&lines))));

        let conversations = ConversationStore::new(
            config.persistence.directory(),
            config.persistence.metadata_path(),
        )
        .with_enabled(config.persistence.enabled);

        Ok(Self {
            config,
            agent,
            tools,
            state: StateManager::new(),
            tasks: Arc::new(TaskManager::new()),
            conversations,
            lines,
            pending_images: Vec::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.state.get_state()
    }

    /// Connection probe, model preparation and housekeeping.
    pub async fn startup(&mut self) {
        if let Some(tools) = &self.tools {
            let truncator = tools.truncator().clone();
            self.tasks.spawn(None, async move {
                let removed = tokio::task::spawn_blocking(move || {
                    truncator.cleanup_old_outputs(OUTPUT_RETENTION)
                })
                .await
                .map_err(|error| error.to_string())?;
                debug!(event = "tool.output.cleanup", removed);
                Ok::<(), String>(())
            });
        }

        if !self.agent.check_connection().await {
            println!(
                "Cannot reach the model backend at {}. Messages will fail until it is available.",
                self.agent.backend().host()
            );
            return;
        }

        let pull = self.config.ollama.pull_model_on_start;
        if let Err(error) = self.agent.ensure_model_ready(pull).await {
            println!("{error}");
        }
        println!(
            "Connected to {} using model {}. {HELP_TEXT}",
            self.agent.backend().host(),
            self.agent.model()
        );
    }

    /// Reads and handles lines until `/quit`, EOF or Ctrl-C while idle.
    pub async fn run(&mut self) {
        loop {
            print_flush("> ");
            let line = tokio::select! {
                line = next_line(&self.lines) => line,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };
            if self.handle_line(&line).await == Flow::Quit {
                break;
            }
        }
        self.tasks.cancel_all().await;
    }

    pub async fn handle_line(&mut self, line: &str) -> Flow {
        match parse_slash_command(line) {
            Some(command) => self.handle_command(command).await,
            None => {
                self.submit(line).await;
                Flow::Continue
            }
        }
    }

    async fn handle_command(&mut self, command: SlashCommand) -> Flow {
        match command {
            SlashCommand::Help => println!("{HELP_TEXT}"),
            SlashCommand::New => {
                self.tasks.cancel_all().await;
                self.agent.clear_history();
                self.pending_images.clear();
                self.state.transition_if(ConversationState::Error, ConversationState::Idle);
                println!("Started a new conversation.");
            }
            SlashCommand::Save(name) => {
                let stored = self.agent.store().to_stored();
                match self
                    .conversations
                    .save(&stored, self.agent.model(), name.as_deref())
                {
                    Ok(path) => println!("Saved conversation to {}", path.display()),
                    Err(error) => println!("{}", ChatError::from(error)),
                }
            }
            SlashCommand::Load(path) => self.load_conversation(path.as_deref()),
            SlashCommand::Export => {
                let stored = self.agent.store().to_stored();
                match self.conversations.export_markdown(&stored, self.agent.model()) {
                    Ok(path) => println!("Exported conversation to {}", path.display()),
                    Err(error) => println!("{}", ChatError::from(error)),
                }
            }
            SlashCommand::Model(None) => match self.agent.list_models().await {
                Ok(models) => {
                    for model in models {
                        let marker = if model == self.agent.model() { "*" } else { " " };
                        println!("{marker} {model}");
                    }
                }
                Err(error) => println!("{error}"),
            },
            SlashCommand::Model(Some(model)) => {
                self.agent.set_model(&model);
                match self.agent.ensure_model_ready(false).await {
                    Ok(()) => println!("Using model {}", self.agent.model()),
                    Err(error) => println!("{error}"),
                }
            }
            SlashCommand::Image(None) => println!("Usage: /image <path>"),
            SlashCommand::Image(Some(path)) => match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    self.pending_images.push(ollama_api::encode_image(&bytes));
                    println!(
                        "Attached {path} ({} image(s) pending for the next message)",
                        self.pending_images.len()
                    );
                }
                Err(error) => println!("Cannot read image {path}: {error}"),
            },
            SlashCommand::Caps => self.print_capabilities().await,
            SlashCommand::Quit => return Flow::Quit,
            SlashCommand::Unknown(command) => println!("Unknown command {command}. {HELP_TEXT}"),
        }
        Flow::Continue
    }

    fn load_conversation(&mut self, path: Option<&str>) {
        let loaded = match path {
            Some(path) => self.conversations.load(Path::new(path)).map(Some),
            None => self.conversations.load_latest(),
        };
        match loaded {
            Ok(Some(conversation)) => {
                self.agent.load_history(
                    conversation
                        .messages
                        .iter()
                        .map(|message| (message.role, message.content.as_str())),
                );
                if !conversation.model.trim().is_empty() {
                    self.agent.set_model(&conversation.model);
                }
                println!(
                    "Loaded {} messages (model {}).",
                    self.agent.messages().len(),
                    self.agent.model()
                );
            }
            Ok(None) => println!("No saved conversations."),
            Err(error) => println!("{}", ChatError::from(error)),
        }
    }

    async fn print_capabilities(&mut self) {
        let model = self.agent.model().to_string();
        self.agent.capabilities_mut().ensure_support(&model).await;
        let capabilities = self.agent.capabilities();
        let effective = capabilities.effective();

        println!(
            "{model}: thinking={} tools={} vision={} (known={})",
            effective.think,
            effective.tools_enabled,
            effective.vision_enabled,
            capabilities.report().is_known()
        );
        let unsupported = capabilities.unsupported_features();
        if !unsupported.is_empty() {
            println!("Unsupported: {}", unsupported.join(", "));
        }
        println!(
            "Context: ~{} tokens in {} messages",
            self.agent.estimated_context_tokens(),
            self.agent.messages().len()
        );
    }

    async fn submit(&mut self, text: &str) {
        if !self
            .state
            .transition_if(ConversationState::Idle, ConversationState::Streaming)
        {
            println!("A response is already in progress.");
            return;
        }

        let mut request = SendRequest::new(text)
            .with_images(std::mem::take(&mut self.pending_images))
            .with_think(self.config.capabilities.think)
            .with_max_tool_iterations(self.config.capabilities.max_tool_iterations);
        if let Some(tools) = &self.tools {
            request = request.with_tools(Arc::clone(tools));
        }

        self.start_indicator();
        let surface = StdoutSurface::new(
            Arc::clone(&self.tasks),
            self.config.capabilities.show_thinking,
        );
        let mut handler = StreamHandler::new(surface, self.config.ui.stream_chunk_size);
        let cancel = CancellationToken::new();

        let outcome = {
            let send = self
                .agent
                .send(request, &cancel, |chunk| handler.handle(&chunk));
            tokio::pin!(send);
            loop {
                tokio::select! {
                    result = &mut send => break result,
                    _ = tokio::signal::ctrl_c() => {
                        if !cancel.is_cancelled() {
                            self.state.transition_to(ConversationState::Cancelling);
                            cancel.cancel();
                        }
                    }
                }
            }
        };

        match outcome {
            Ok(()) => {
                handler.finalize();
                self.state.transition_to(ConversationState::Idle);
            }
            Err(ChatError::Cancelled) => {
                handler.surface_mut().stop_indicator();
                handler.flush_buffer();
                println!("\n[cancelled]");
                self.state.transition_to(ConversationState::Idle);
            }
            Err(error) => {
                handler.surface_mut().stop_indicator();
                handler.flush_buffer();
                self.state.transition_to(ConversationState::Error);
                println!("\nError: {error}");
                self.state.transition_to(ConversationState::Idle);
            }
        }
    }

    fn start_indicator(&self) {
        self.tasks.spawn(Some(INDICATOR_TASK), async {
            let mut interval = tokio::time::interval(Duration::from_millis(120));
            for frame in INDICATOR_FRAMES.iter().cycle() {
                interval.tick().await;
                let mut stderr = io::stderr();
                write!(stderr, "\r{frame} waiting for response")?;
                stderr.flush()?;
            }
            Ok::<(), io::Error>(())
        });
    }
}

async fn next_line(lines: &SharedLines) -> Option<String> {
    lines.lock().await.recv().await
}

fn print_flush(text: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(error) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
        debug!(event = "repl.stdout.failed", %error);
    }
}
