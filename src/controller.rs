//! Drives a [`Conversation`] against the backend.
//!
//! Network calls and the typing timer run as tokio tasks. They never touch
//! the conversation directly: every result comes back as a
//! [`ControllerEvent`] that the owner of the controller feeds into
//! [`ChatController::handle_event`] on its own loop.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::backend::{BackendClient, BackendError};
use crate::conversation::{Conversation, RevealId, RevealStep};

#[derive(Debug)]
pub enum ControllerEvent {
    ModelsListed(Result<Vec<String>, BackendError>),
    ModelNotified {
        model: String,
        result: Result<(), BackendError>,
    },
    ChatReplied(Result<String, BackendError>),
    RevealTick(RevealId),
}

pub struct ChatController {
    conversation: Conversation,
    backend: BackendClient,
    events: UnboundedSender<ControllerEvent>,
    reveal_interval: Duration,
    reveal_timer: Option<(RevealId, JoinHandle<()>)>,
}

impl ChatController {
    pub fn new(
        backend: BackendClient,
        events: UnboundedSender<ControllerEvent>,
        reveal_interval: Duration,
    ) -> Self {
        Self {
            conversation: Conversation::new(),
            backend,
            events,
            reveal_interval,
            reveal_timer: None,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Ask the backend for its models. The answer arrives as `ModelsListed`.
    pub fn list_models(&self) {
        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.list_models().await;
            let _ = events.send(ControllerEvent::ModelsListed(result));
        });
    }

    /// Switch models locally right away and tell the backend in the background.
    pub fn select_model(&mut self, model: &str) {
        info!("selected model {}", model);
        self.conversation.select_model(model);
        self.sync_reveal_timer();

        let backend = self.backend.clone();
        let events = self.events.clone();
        let model = model.to_string();
        tokio::spawn(async move {
            let result = backend.set_model(&model).await;
            let _ = events.send(ControllerEvent::ModelNotified { model, result });
        });
    }

    pub fn open_selection_prompt(&mut self) {
        self.conversation.open_selection_prompt();
    }

    pub fn dismiss_selection_prompt(&mut self) -> bool {
        self.conversation.dismiss_selection_prompt()
    }

    /// Send user input. Returns false when the input was ignored.
    pub fn send_message(&mut self, text: &str) -> bool {
        let Some(request) = self.conversation.submit(text) else {
            return false;
        };
        debug!(
            "sending {} chars to {}",
            request.message.chars().count(),
            request.model_name
        );

        let backend = self.backend.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = backend.chat(&request).await;
            let _ = events.send(ControllerEvent::ChatReplied(result));
        });
        true
    }

    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::ModelsListed(Ok(models)) => {
                info!("backend offers {} models", models.len());
                self.conversation.set_models(models);
            }
            ControllerEvent::ModelsListed(Err(e)) => {
                error!("error fetching models: {}", e);
                self.conversation.clear_models();
            }
            ControllerEvent::ModelNotified { model, result } => match result {
                Ok(()) => debug!("backend switched to {}", model),
                Err(e) => error!("error setting model {} on backend: {}", model, e),
            },
            ControllerEvent::ChatReplied(result) => {
                if let Err(e) = &result {
                    error!("error sending message: {}", e);
                }
                self.conversation.receive_reply(result);
            }
            ControllerEvent::RevealTick(id) => {
                if self.conversation.pending_id() == Some(id) {
                    if self.conversation.reveal_step() == RevealStep::Settled {
                        debug!("reply settled");
                    }
                } else {
                    // Sent before the timer was aborted
                    debug!("dropping stale reveal tick");
                }
            }
        }
        self.sync_reveal_timer();
    }

    /// Whether anything is still on its way to the settled log.
    pub fn is_busy(&self) -> bool {
        self.conversation.is_awaiting_reply()
            || self.conversation.pending().is_some()
            || self.conversation.queued_len() > 0
    }

    /// Keep exactly one timer running for the message in the typing slot.
    fn sync_reveal_timer(&mut self) {
        let pending = self.conversation.pending_id();
        if let Some((id, _)) = &self.reveal_timer {
            if Some(*id) == pending {
                return;
            }
        }

        if let Some((_, handle)) = self.reveal_timer.take() {
            handle.abort();
        }

        if let Some(id) = pending {
            let events = self.events.clone();
            let period = self.reveal_interval.max(Duration::from_millis(1));
            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // The first tick completes immediately
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if events.send(ControllerEvent::RevealTick(id)).is_err() {
                        warn!("reveal timer lost its receiver");
                        break;
                    }
                }
            });
            self.reveal_timer = Some((id, handle));
        }
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.reveal_timer.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Message, Role, ERROR_REPLY};
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::time::timeout;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn controller(uri: &str) -> (ChatController, UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller =
            ChatController::new(BackendClient::new(uri), tx, Duration::from_millis(1));
        (controller, rx)
    }

    async fn run_until_idle(
        controller: &mut ChatController,
        rx: &mut UnboundedReceiver<ControllerEvent>,
    ) {
        while controller.is_busy() {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("controller stalled")
                .expect("channel closed");
            controller.handle_event(event);
        }
    }

    async fn mount_models(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/models"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "models": ["llama3", "mistral"] })),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/set_model"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    async fn choose(
        controller: &mut ChatController,
        rx: &mut UnboundedReceiver<ControllerEvent>,
        model: &str,
    ) {
        controller.list_models();
        let event = rx.recv().await.unwrap();
        controller.handle_event(event);
        controller.select_model(model);
        assert!(settle_selection(controller, rx).await.is_ok());
    }

    /// Run until the announcement settles and the backend notification is back.
    async fn settle_selection(
        controller: &mut ChatController,
        rx: &mut UnboundedReceiver<ControllerEvent>,
    ) -> Result<(), BackendError> {
        let mut outcome = None;
        while outcome.is_none() || controller.is_busy() {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("controller stalled")
                .expect("channel closed");
            let event = match event {
                ControllerEvent::ModelNotified { model, result } => {
                    outcome = Some(result);
                    ControllerEvent::ModelNotified { model, result: Ok(()) }
                }
                other => other,
            };
            controller.handle_event(event);
        }
        outcome.unwrap_or(Ok(()))
    }

    #[tokio::test]
    async fn test_model_selection_announces_switch() {
        let server = MockServer::start().await;
        mount_models(&server).await;
        let (mut controller, mut rx) = controller(&server.uri());

        controller.list_models();
        let event = rx.recv().await.unwrap();
        controller.handle_event(event);
        assert_eq!(controller.conversation().models(), ["llama3", "mistral"]);
        assert!(controller.conversation().selection_prompt_open());

        controller.select_model("mistral");
        assert!(!controller.conversation().selection_prompt_open());
        assert_eq!(controller.conversation().selected_model(), Some("mistral"));

        run_until_idle(&mut controller, &mut rx).await;
        let last = controller.conversation().settled().last().unwrap();
        assert_eq!(last.content, "You are now chatting with mistral.");
        assert_eq!(last.display_content, last.content);
    }

    #[tokio::test]
    async fn test_chat_reply_is_revealed_and_settled() {
        let server = MockServer::start().await;
        mount_models(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_json(json!({ "message": "Hi", "model_name": "mistral" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "Hello back" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        let (mut controller, mut rx) = controller(&server.uri());
        choose(&mut controller, &mut rx, "mistral").await;

        assert!(controller.send_message("Hi"));
        assert_eq!(
            controller.conversation().settled().last().unwrap(),
            &Message::user("Hi")
        );
        run_until_idle(&mut controller, &mut rx).await;

        let log = controller.conversation().settled();
        let n = log.len();
        assert_eq!(log[n - 2], Message::user("Hi"));
        assert_eq!(log[n - 1].role, Role::Assistant);
        assert_eq!(log[n - 1].content, "Hello back");
        assert_eq!(log[n - 1].display_content, "Hello back");
        assert!(controller.reveal_timer.is_none());
    }

    #[tokio::test]
    async fn test_chat_failure_shows_error_instantly() {
        let server = MockServer::start().await;
        mount_models(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (mut controller, mut rx) = controller(&server.uri());
        choose(&mut controller, &mut rx, "mistral").await;

        controller.send_message("Hi");
        loop {
            // Leftover ticks from the announcement may still be queued
            let event = rx.recv().await.unwrap();
            let is_reply = matches!(event, ControllerEvent::ChatReplied(Err(_)));
            controller.handle_event(event);
            if is_reply {
                break;
            }
        }

        // Settled in the same step, no timer needed
        assert!(controller.conversation().pending().is_none());
        assert!(controller.reveal_timer.is_none());
        let last = controller.conversation().settled().last().unwrap();
        assert_eq!(last.content, ERROR_REPLY);
        assert_eq!(last.display_content, ERROR_REPLY);
    }

    #[tokio::test]
    async fn test_send_ignored_without_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "x" })))
            .expect(0)
            .mount(&server)
            .await;
        let (mut controller, _rx) = controller(&server.uri());

        assert!(!controller.send_message("Hi"));
        assert!(controller.conversation().settled().is_empty());
        assert!(!controller.is_busy());
    }

    #[tokio::test]
    async fn test_model_listing_failure_clears_models() {
        // Nothing listens on a port we just released
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut controller, mut rx) = controller(&format!("http://127.0.0.1:{}", port));
        controller.list_models();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ControllerEvent::ModelsListed(Err(_))));
        controller.handle_event(event);

        assert!(controller.conversation().models().is_empty());
        assert!(!controller.conversation().selection_prompt_open());
    }

    #[tokio::test]
    async fn test_selection_kept_when_backend_notify_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/set_model"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let (mut controller, mut rx) = controller(&server.uri());

        controller.select_model("llama3");
        assert!(settle_selection(&mut controller, &mut rx).await.is_err());
        assert_eq!(controller.conversation().selected_model(), Some("llama3"));
    }

    #[tokio::test]
    async fn test_stale_tick_is_ignored() {
        let server = MockServer::start().await;
        let (mut controller, mut rx) = controller(&server.uri());
        controller.select_model("llama3");
        let id = controller.conversation().pending_id().unwrap();
        run_until_idle(&mut controller, &mut rx).await;

        let settled = controller.conversation().settled().len();
        controller.handle_event(ControllerEvent::RevealTick(id));
        assert_eq!(controller.conversation().settled().len(), settled);
    }
}
