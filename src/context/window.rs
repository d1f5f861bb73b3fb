//! Two-cursor context window.

use tracing::debug;

use crate::conversation::Message;
use crate::errors::TickError;
use crate::store::models::AgentCursor;

/// Truncation state for one agent's log.
///
/// `loop_start` always indexes a turn-start message. `inner_start` indexes
/// either that same message or a later agent message carrying a tool request.
/// Both only ever move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWindow {
    loop_start: usize,
    inner_start: usize,
}

impl ContextWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cursor(cursor: AgentCursor) -> Self {
        Self {
            loop_start: cursor.loop_start.max(0) as usize,
            inner_start: cursor.inner_start.max(0) as usize,
        }
    }

    pub fn cursor(&self) -> AgentCursor {
        AgentCursor {
            loop_start: self.loop_start as i64,
            inner_start: self.inner_start as i64,
        }
    }

    pub fn loop_start(&self) -> usize {
        self.loop_start
    }

    pub fn inner_start(&self) -> usize {
        self.inner_start
    }

    /// The window the current cursors select, without checking any budget.
    ///
    /// `messages[inner_start..]`, with the turn-start at `loop_start`
    /// prepended when the inner cursor has moved past it.
    pub fn candidate(&self, messages: &[Message]) -> Vec<Message> {
        let inner = self.inner_start.min(messages.len());
        let mut window = Vec::with_capacity(messages.len() - inner + 1);
        if self.inner_start > self.loop_start {
            if let Some(turn_start) = messages.get(self.loop_start) {
                window.push(turn_start.clone());
            }
        }
        window.extend_from_slice(&messages[inner..]);
        window
    }

    /// Return the largest suffix window that fits `budget`.
    ///
    /// `count_tokens` must report what the model would consume for the
    /// window, including system prompt and tool schemas. Cursors advance only
    /// as far as needed, so calling this again without new messages returns
    /// the same window and leaves the cursors where they are.
    pub fn render<F>(
        &mut self,
        messages: &[Message],
        budget: usize,
        mut count_tokens: F,
    ) -> Result<Vec<Message>, TickError>
    where
        F: FnMut(&[Message]) -> usize,
    {
        loop {
            let window = self.candidate(messages);
            let required = count_tokens(&window);
            if required <= budget {
                return Ok(window);
            }
            if !self.advance(messages) {
                return Err(TickError::ContextOverflow { budget, required });
            }
            debug!(
                loop_start = self.loop_start,
                inner_start = self.inner_start,
                required,
                budget,
                "Context over budget, advanced cursors"
            );
        }
    }

    /// Move to the next valid truncation point. Returns `false` when none is left.
    ///
    /// A turn-start moves both cursors; an agent tool request moves only
    /// `inner_start`. When the cursors coincide the scan skips one extra
    /// message, since truncating right after a turn-start changes nothing.
    pub fn advance(&mut self, messages: &[Message]) -> bool {
        let step = if self.inner_start == self.loop_start { 2 } else { 1 };
        let from = self.inner_start.max(self.loop_start) + step;

        for (index, message) in messages.iter().enumerate().skip(from) {
            if message.is_turn_start() {
                self.loop_start = index;
                self.inner_start = index;
                return true;
            }
            if message.is_tool_request() {
                self.inner_start = index;
                return true;
            }
        }
        false
    }
}
