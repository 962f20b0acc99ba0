//! Conversation state: the settled message log, the single typing slot and
//! model selection.
//!
//! Nothing here performs I/O or owns a timer. The controller feeds backend
//! results and reveal ticks in; the UI reads the state back out.

use std::collections::VecDeque;

use crate::backend::{BackendError, ChatRequest};

/// Shown in place of a reply when the chat request fails.
pub const ERROR_REPLY: &str = "Error: Could not get a response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A chat message. `display_content` is the prefix of `content` revealed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub display_content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role: Role::User,
            display_content: content.clone(),
            content,
        }
    }

    /// An assistant message that still has to be typed out.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            display_content: String::new(),
        }
    }

    /// An assistant message that skips the animation.
    pub fn revealed(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role: Role::Assistant,
            display_content: content.clone(),
            content,
        }
    }

    pub fn is_fully_revealed(&self) -> bool {
        self.display_content.len() == self.content.len()
    }

    /// Reveal one more character. Returns false when nothing was left.
    fn reveal_next(&mut self) -> bool {
        // display_content is always a prefix, so its byte length is a char boundary
        match self.content[self.display_content.len()..].chars().next() {
            Some(c) => {
                self.display_content.push(c);
                true
            }
            None => false,
        }
    }
}

/// Identifies one message's stay in the typing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevealId(u64);

#[derive(Debug, Clone)]
struct Pending {
    id: RevealId,
    message: Message,
}

/// Outcome of a single reveal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealStep {
    /// Nothing was being revealed.
    Idle,
    /// One more character is visible.
    Advanced,
    /// The message reached full length and moved to the settled log.
    Settled,
}

#[derive(Debug, Default)]
pub struct Conversation {
    settled: Vec<Message>,
    pending: Option<Pending>,
    // Replies that arrived while another one was still typing
    queued: VecDeque<Message>,

    models: Vec<String>,
    selected_model: Option<String>,
    has_selected: bool,
    prompt_open: bool,

    awaiting_replies: usize,
    next_reveal_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    // Accessors

    pub fn settled(&self) -> &[Message] {
        &self.settled
    }

    pub fn pending(&self) -> Option<&Message> {
        self.pending.as_ref().map(|p| &p.message)
    }

    pub fn pending_id(&self) -> Option<RevealId> {
        self.pending.as_ref().map(|p| p.id)
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    pub fn has_selected(&self) -> bool {
        self.has_selected
    }

    /// Whether the model picker is showing.
    pub fn selection_prompt_open(&self) -> bool {
        self.prompt_open
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_replies > 0
    }

    // Models

    /// Record a fresh model listing. Returns true when a selection is required.
    pub fn set_models(&mut self, models: Vec<String>) -> bool {
        self.models = models;
        if self.models.is_empty() {
            return false;
        }

        if !self.has_selected {
            self.prompt_open = true;
            return true;
        }

        if let Some(model) = self.selected_model.clone() {
            self.enqueue(Message::assistant(format!(
                "You are currently chatting with {}.",
                model
            )));
        }
        false
    }

    /// A failed listing leaves no models to choose from.
    pub fn clear_models(&mut self) {
        self.models.clear();
    }

    pub fn select_model(&mut self, model: &str) {
        self.selected_model = Some(model.to_string());
        self.has_selected = true;
        self.prompt_open = false;
        self.enqueue(Message::assistant(format!(
            "You are now chatting with {}.",
            model
        )));
    }

    pub fn open_selection_prompt(&mut self) {
        self.prompt_open = true;
    }

    /// Close the picker. Refused until a first model has been chosen.
    pub fn dismiss_selection_prompt(&mut self) -> bool {
        if self.has_selected {
            self.prompt_open = false;
        }
        !self.prompt_open
    }

    // Messages

    /// Accept user input. Returns the request to send, or None when the input
    /// is blank or no model is selected.
    pub fn submit(&mut self, text: &str) -> Option<ChatRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let model = self.selected_model.clone()?;

        self.settled.push(Message::user(text));
        self.awaiting_replies += 1;

        Some(ChatRequest {
            message: text.to_string(),
            model_name: model,
        })
    }

    /// Feed back the outcome of a chat request.
    pub fn receive_reply(&mut self, reply: Result<String, BackendError>) {
        self.awaiting_replies = self.awaiting_replies.saturating_sub(1);
        match reply {
            Ok(text) => self.enqueue(Message::assistant(text)),
            Err(_) => self.enqueue(Message::revealed(ERROR_REPLY)),
        }
    }

    /// Advance the typing message by one character.
    pub fn reveal_step(&mut self) -> RevealStep {
        let Some(pending) = self.pending.as_mut() else {
            return RevealStep::Idle;
        };

        pending.message.reveal_next();
        if pending.message.is_fully_revealed() {
            self.settle();
            RevealStep::Settled
        } else {
            RevealStep::Advanced
        }
    }

    fn enqueue(&mut self, message: Message) {
        self.queued.push_back(message);
        if self.pending.is_none() {
            self.promote();
        }
    }

    /// Move queued messages into the typing slot, settling the ones that are
    /// already fully shown.
    fn promote(&mut self) {
        while self.pending.is_none() {
            let Some(message) = self.queued.pop_front() else {
                return;
            };

            if message.is_fully_revealed() {
                self.settled.push(message);
                continue;
            }

            let id = RevealId(self.next_reveal_id);
            self.next_reveal_id += 1;
            self.pending = Some(Pending { id, message });
        }
    }

    fn settle(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.settled.push(pending.message);
        }
        self.promote();
    }
}
