use std::path::PathBuf;

use log::warn;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;

use crate::config::Config;
use crate::controller::{ChatController, ControllerEvent};

/// Convert a character index to a byte index for UTF-8 safe string operations
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub struct App {
    pub should_quit: bool,
    pub controller: ChatController,
    pub backend_url: String,

    // Input line
    pub input: String,
    pub input_cursor: usize, // cursor position in chars
    pub max_input_chars: usize,

    // Model picker
    pub picker_state: ListState,
    pub last_model: Option<String>,
    config_path: Option<PathBuf>,

    // Chat log view
    pub chat_scroll: u16,
    pub follow_tail: bool,
    pub chat_height: u16,      // Height of chat area for scroll calculations
    pub chat_total_lines: u16, // Wrapped line count from the last render
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(controller: ChatController, config: &Config) -> Self {
        Self {
            should_quit: false,
            controller,
            backend_url: config.backend_url.clone(),

            input: String::new(),
            input_cursor: 0,
            max_input_chars: config.max_input_chars,

            picker_state: ListState::default(),
            last_model: config.last_model.clone(),
            config_path: None,

            chat_scroll: 0,
            follow_tail: true,
            chat_height: 0,
            chat_total_lines: 0,
            chat_area: None,

            animation_frame: 0,
        }
    }

    /// Remember model choices in this config file.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Kick off the initial model listing.
    pub fn start(&mut self) {
        self.controller.list_models();
    }

    pub fn on_controller_event(&mut self, event: ControllerEvent) {
        let was_open = self.picker_open();
        let relisted = matches!(event, ControllerEvent::ModelsListed(_));
        self.controller.handle_event(event);
        if self.picker_open() && !was_open {
            self.reset_picker_selection();
        } else if relisted {
            self.clamp_picker_selection();
        }
    }

    // Input editing

    pub fn insert_char(&mut self, c: char) {
        if self.input.chars().count() >= self.max_input_chars {
            return;
        }
        let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
        self.input.insert(byte_pos, c);
        self.input_cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.input_cursor > 0 {
            self.input_cursor -= 1;
            let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.input_cursor < self.input.chars().count() {
            let byte_pos = char_to_byte_index(&self.input, self.input_cursor);
            self.input.remove(byte_pos);
        }
    }

    pub fn cursor_left(&mut self) {
        self.input_cursor = self.input_cursor.saturating_sub(1);
    }

    pub fn cursor_right(&mut self) {
        let char_count = self.input.chars().count();
        self.input_cursor = (self.input_cursor + 1).min(char_count);
    }

    pub fn cursor_home(&mut self) {
        self.input_cursor = 0;
    }

    pub fn cursor_end(&mut self) {
        self.input_cursor = self.input.chars().count();
    }

    /// Send the input line. It is only cleared when the controller accepts it.
    pub fn submit_input(&mut self) {
        if self.controller.send_message(&self.input) {
            self.input.clear();
            self.input_cursor = 0;
            self.follow_tail = true;
        }
    }

    // Model picker

    pub fn picker_open(&self) -> bool {
        self.controller.conversation().selection_prompt_open()
    }

    pub fn open_model_picker(&mut self) {
        self.controller.open_selection_prompt();
        self.reset_picker_selection();
    }

    pub fn dismiss_model_picker(&mut self) {
        self.controller.dismiss_selection_prompt();
    }

    pub fn refresh_models(&mut self) {
        self.controller.list_models();
    }

    pub fn picker_nav_down(&mut self) {
        let len = self.controller.conversation().models().len();
        if len > 0 {
            let i = self.picker_state.selected().unwrap_or(0);
            self.picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn picker_nav_up(&mut self) {
        let i = self.picker_state.selected().unwrap_or(0);
        self.picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn confirm_model(&mut self) {
        let Some(model) = self
            .picker_state
            .selected()
            .and_then(|i| self.controller.conversation().models().get(i))
            .cloned()
        else {
            return;
        };

        self.controller.select_model(&model);
        self.follow_tail = true;
        if let Some(path) = &self.config_path {
            if let Err(e) = Config::save_last_model(path, &model) {
                warn!("could not remember model choice: {:#}", e);
            }
        }
        self.last_model = Some(model);
    }

    /// Point the picker at the current model, else the last used one, else the top.
    fn reset_picker_selection(&mut self) {
        let conversation = self.controller.conversation();
        let models = conversation.models();
        if models.is_empty() {
            self.picker_state.select(None);
            return;
        }

        let preferred = conversation
            .selected_model()
            .or(self.last_model.as_deref());
        let idx = preferred
            .and_then(|name| models.iter().position(|m| m == name))
            .unwrap_or(0);
        self.picker_state.select(Some(idx));
    }

    /// Keep the picker cursor on a row that still exists.
    fn clamp_picker_selection(&mut self) {
        let len = self.controller.conversation().models().len();
        let selected = match self.picker_state.selected() {
            _ if len == 0 => None,
            Some(i) => Some(i.min(len - 1)),
            None => Some(0),
        };
        self.picker_state.select(selected);
    }

    // Chat scrolling

    pub fn max_scroll(&self) -> u16 {
        self.chat_total_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll());
        if self.chat_scroll >= self.max_scroll() {
            self.follow_tail = true;
        }
    }

    pub fn page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    pub fn page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    /// Called by the renderer once the wrapped height of the log is known.
    pub fn update_chat_metrics(&mut self, total_lines: u16, height: u16) {
        self.chat_total_lines = total_lines;
        self.chat_height = height;
        if self.follow_tail {
            self.chat_scroll = self.max_scroll();
        } else {
            self.chat_scroll = self.chat_scroll.min(self.max_scroll());
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.controller.conversation().is_awaiting_reply() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendClient, BackendError};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        // Nothing is listening here; tests below never reach the network
        let controller = ChatController::new(
            BackendClient::new("http://127.0.0.1:9"),
            tx,
            Duration::from_millis(20),
        );
        let config = Config {
            max_input_chars: 5,
            ..Config::default()
        };
        App::new(controller, &config)
    }

    #[test]
    fn test_char_to_byte_index() {
        assert_eq!(char_to_byte_index("héllo", 2), 3);
        assert_eq!(char_to_byte_index("abc", 10), 3);
    }

    #[test]
    fn test_input_capped() {
        let mut app = app();
        for c in "abcdefg".chars() {
            app.insert_char(c);
        }
        assert_eq!(app.input, "abcde");
        assert_eq!(app.input_cursor, 5);
    }

    #[test]
    fn test_cursor_editing_is_utf8_safe() {
        let mut app = app();
        for c in "añb".chars() {
            app.insert_char(c);
        }
        app.cursor_left();
        app.backspace();
        assert_eq!(app.input, "ab");
        assert_eq!(app.input_cursor, 1);

        app.cursor_home();
        app.delete();
        assert_eq!(app.input, "b");
        app.cursor_end();
        assert_eq!(app.input_cursor, 1);
    }

    #[test]
    fn test_submit_without_model_keeps_input() {
        let mut app = app();
        for c in "hey".chars() {
            app.insert_char(c);
        }
        app.submit_input();
        assert_eq!(app.input, "hey");
        assert!(app.controller.conversation().settled().is_empty());
    }

    fn models(names: &[&str]) -> ControllerEvent {
        ControllerEvent::ModelsListed(Ok(names.iter().map(|n| n.to_string()).collect()))
    }

    #[tokio::test]
    async fn test_shorter_relist_keeps_picker_cursor_in_range() {
        let mut app = app();
        app.on_controller_event(models(&["a", "b", "c"]));
        assert!(app.picker_open());
        app.picker_nav_down();
        app.picker_nav_down();
        assert_eq!(app.picker_state.selected(), Some(2));

        // Ctrl+R while the picker is still up
        app.on_controller_event(models(&["a"]));
        assert_eq!(app.picker_state.selected(), Some(0));

        app.confirm_model();
        assert!(!app.picker_open());
        assert_eq!(app.controller.conversation().selected_model(), Some("a"));
    }

    #[test]
    fn test_failed_relist_clears_picker_cursor() {
        let mut app = app();
        app.on_controller_event(models(&["a", "b"]));
        app.on_controller_event(ControllerEvent::ModelsListed(Err(BackendError::Status {
            endpoint: "/api/models",
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        })));
        assert!(app.picker_open());
        assert_eq!(app.picker_state.selected(), None);
    }

    #[test]
    fn test_scroll_follows_tail_until_user_scrolls() {
        let mut app = app();
        app.update_chat_metrics(50, 10);
        assert_eq!(app.chat_scroll, 40);

        app.scroll_up(5);
        assert!(!app.follow_tail);
        app.update_chat_metrics(60, 10);
        assert_eq!(app.chat_scroll, 35);

        app.scroll_down(100);
        assert!(app.follow_tail);
        assert_eq!(app.chat_scroll, 50);
    }
}
