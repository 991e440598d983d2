use serde_json::Value;

use crate::agent_loop::ChatChunk;

pub const NO_RESPONSE_PLACEHOLDER: &str = "(No response from model.)";

/// Where a streamed assistant reply is rendered.
pub trait RenderSurface {
    fn set_content(&mut self, text: &str);
    fn append_content(&mut self, text: &str);
    fn append_thinking(&mut self, text: &str);
    fn finalize_thinking(&mut self);
    fn append_tool_call(&mut self, name: &str, arguments: &Value);
    fn append_tool_result(&mut self, name: &str, result: &str);
    fn finalize_content(&mut self);

    /// Stops the "waiting for reply" indicator. Called once per reply at most.
    fn stop_indicator(&mut self) {}

    fn set_status(&mut self, _status: &str) {}

    fn scroll_to_end(&mut self) {}
}

/// Turns a sequence of [`ChatChunk`]s into render calls.
///
/// Content chunks are buffered and written `chunk_size` at a time; thinking,
/// tool calls and tool results are written immediately. A tool call flushes any
/// buffered content first so the transcript keeps chunk order.
pub struct StreamHandler<S> {
    surface: S,
    chunk_size: usize,
    buffer: Vec<String>,
    response_started: bool,
    thinking_started: bool,
    status: String,
}

impl<S: RenderSurface> StreamHandler<S> {
    #[must_use]
    pub fn new(surface: S, chunk_size: usize) -> Self {
        Self {
            surface,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            response_started: false,
            thinking_started: false,
            status: String::new(),
        }
    }

    #[must_use]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    #[must_use]
    pub fn into_surface(self) -> S {
        self.surface
    }

    #[must_use]
    pub fn response_started(&self) -> bool {
        self.response_started
    }

    #[must_use]
    pub fn thinking_started(&self) -> bool {
        self.thinking_started
    }

    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn handle(&mut self, chunk: &ChatChunk) {
        match chunk {
            ChatChunk::Thinking { text } => self.handle_thinking(text),
            ChatChunk::Content { text } => self.handle_content(text),
            ChatChunk::ToolCall {
                name, arguments, ..
            } => self.handle_tool_call(name, arguments),
            ChatChunk::ToolResult { name, result, .. } => self.handle_tool_result(name, result),
        }
    }

    pub fn handle_thinking(&mut self, text: &str) {
        self.start_response();
        if !self.thinking_started {
            self.thinking_started = true;
            self.update_status("Thinking...".to_string());
        }
        self.surface.append_thinking(text);
        self.surface.scroll_to_end();
    }

    pub fn handle_content(&mut self, text: &str) {
        self.start_response();
        if self.thinking_started {
            self.surface.finalize_thinking();
            self.thinking_started = false;
            self.update_status("Streaming response...".to_string());
        }
        self.buffer.push(text.to_string());
        if self.buffer.len() >= self.chunk_size {
            self.flush_buffer();
        }
    }

    pub fn handle_tool_call(&mut self, name: &str, arguments: &Value) {
        self.start_response();
        self.flush_buffer();
        self.surface.append_tool_call(name, arguments);
        self.update_status(format!("Calling tool: {name}..."));
        self.surface.scroll_to_end();
    }

    pub fn handle_tool_result(&mut self, name: &str, result: &str) {
        self.start_response();
        self.flush_buffer();
        self.surface.append_tool_result(name, result);
        self.update_status("Processing tool result...".to_string());
        self.surface.scroll_to_end();
    }

    pub fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = self.buffer.concat();
        self.buffer.clear();
        self.surface.append_content(&text);
        self.surface.scroll_to_end();
    }

    /// Flushes what is left and closes the reply.
    pub fn finalize(&mut self) {
        self.flush_buffer();
        if !self.response_started {
            self.start_response();
            self.surface.set_content(NO_RESPONSE_PLACEHOLDER);
        }
        self.surface.finalize_content();
    }

    fn start_response(&mut self) {
        if self.response_started {
            return;
        }
        self.surface.stop_indicator();
        self.surface.set_content("");
        self.response_started = true;
    }

    fn update_status(&mut self, status: String) {
        self.surface.set_status(&status);
        self.status = status;
    }
}
