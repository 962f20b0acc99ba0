use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;

use crate::app::App;
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Controller(event) => app.on_controller_event(event),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    match key.code {
        KeyCode::Char('c') if ctrl => {
            app.should_quit = true;
            return;
        }
        KeyCode::Char('r') if ctrl => {
            app.refresh_models();
            return;
        }
        _ => {}
    }

    if app.picker_open() {
        handle_picker(app, key);
    } else {
        handle_chat(app, key, ctrl);
    }
}

/// The picker blocks the chat until it is closed.
fn handle_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.dismiss_model_picker(),
        KeyCode::Char('j') | KeyCode::Down => app.picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.picker_nav_up(),
        KeyCode::Enter => app.confirm_model(),
        _ => {}
    }
}

fn handle_chat(app: &mut App, key: KeyEvent, ctrl: bool) {
    match key.code {
        KeyCode::Enter => app.submit_input(),
        KeyCode::Char('o') if ctrl => app.open_model_picker(),

        // Chat log scrolling
        KeyCode::Up => app.scroll_up(1),
        KeyCode::Down => app.scroll_down(1),
        KeyCode::PageUp => app.page_up(),
        KeyCode::PageDown => app.page_down(),

        // Line editing
        KeyCode::Backspace => app.backspace(),
        KeyCode::Delete => app.delete(),
        KeyCode::Left => app.cursor_left(),
        KeyCode::Right => app.cursor_right(),
        KeyCode::Home => app.cursor_home(),
        KeyCode::End => app.cursor_end(),
        KeyCode::Char(c) if !ctrl => app.insert_char(c),
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat || app.picker_open() {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
