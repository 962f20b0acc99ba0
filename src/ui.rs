use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::app::App;
use crate::conversation::{Message, Role};
use crate::markdown;

const NO_MODELS: &str = "No models found. Please ensure Ollama is running and models are pulled.";

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, chat, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.picker_open() {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let model = match app.controller.conversation().selected_model() {
        Some(model) => Span::styled(
            format!(" Model: {} ", model),
            Style::default().fg(Color::White),
        ),
        None => Span::styled(" No model selected ", Style::default().fg(Color::Yellow)),
    };

    let title = Line::from(vec![
        Span::styled(" Chatbot ", Style::default().fg(Color::Cyan).bold()),
        model,
        Span::styled(format!(" {} ", app.backend_url), Style::default().fg(Color::Gray)),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut pairs = vec![(" Enter ", " send "), (" Ctrl+O ", " model ")];
    if app.picker_open() {
        pairs = vec![(" j/k ", " nav "), (" Enter ", " select ")];
    }
    pairs.push((" Ctrl+R ", " refresh "));
    if app.picker_open() {
        // Only dismissible once something was chosen
        if app.controller.conversation().has_selected() {
            pairs.push((" Esc ", " close "));
        }
    } else {
        pairs.push((" PgUp/PgDn ", " scroll "));
        pairs.push((" Ctrl+C ", " quit "));
    }

    let hints: Vec<Span> = pairs
        .iter()
        .flat_map(|(key, label)| {
            [Span::styled(*key, key_style), Span::styled(*label, label_style)]
        })
        .collect();

    frame.render_widget(Paragraph::new(Line::from(hints)), area);
}

fn message_lines(
    message: &Message,
    assistant_name: &str,
    text: &str,
    lines: &mut Vec<Line<'static>>,
) {
    match message.role {
        Role::User => {
            lines.push(Line::from(Span::styled(
                "You:",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )));
            for line in text.lines() {
                lines.push(Line::from(line.to_string()));
            }
        }
        Role::Assistant => {
            lines.push(Line::from(Span::styled(
                format!("{}:", assistant_name),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            )));
            lines.extend(markdown::render(text));
        }
    }
    lines.push(Line::default());
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);
    let conversation = app.controller.conversation();
    let assistant_name = conversation.selected_model().unwrap_or("Assistant").to_string();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Conversation ");

    let mut lines: Vec<Line<'static>> = Vec::new();
    for message in conversation.settled() {
        message_lines(message, &assistant_name, &message.content, &mut lines);
    }
    if let Some(pending) = conversation.pending() {
        message_lines(pending, &assistant_name, &pending.display_content, &mut lines);
    }
    if conversation.is_awaiting_reply() {
        lines.push(Line::from(Span::styled(
            format!("{}:", assistant_name),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    if lines.is_empty() {
        let hint = if conversation.selected_model().is_some() {
            "Type a message below and press Enter."
        } else {
            "Select a model to start chatting (Ctrl+O)."
        };
        let placeholder = Paragraph::new(hint)
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let inner = block.inner(area);
    // Rows as laid out by the same word wrapper that draws them
    let chat = Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false });
    let total = u16::try_from(chat.line_count(inner.width)).unwrap_or(u16::MAX);
    app.update_chat_metrics(total, inner.height);

    let chat = chat.block(block).scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = !app.picker_open();
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(
            " Message ({}/{}) ",
            app.input.chars().count(),
            app.max_input_chars
        ));

    // Calculate visible portion of input with horizontal scrolling
    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;

    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(block);

    frame.render_widget(input, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let conversation = app.controller.conversation();
    let models = conversation.models();
    let needs_choice = conversation.selected_model().is_none();

    // Calculate popup size and position (centered)
    let body_rows = models.len().max(1) as u16;
    let footer_rows = if needs_choice && !models.is_empty() { 2 } else { 0 };
    let popup_width = 60.min(area.width.saturating_sub(4));
    let popup_height = (body_rows + footer_rows + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let title = if conversation.has_selected() {
        " Select a Model (Esc to close) "
    } else {
        " Select a Model "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(title);

    if models.is_empty() {
        let empty = Paragraph::new(NO_MODELS)
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true })
            .block(block);
        frame.render_widget(empty, popup_area);
        return;
    }

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let [list_area, note_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(footer_rows),
    ])
    .areas(inner);

    let items: Vec<ListItem> = models
        .iter()
        .map(|model| {
            let is_current = conversation.selected_model() == Some(model.as_str());
            let is_last = app.last_model.as_deref() == Some(model.as_str());

            let label = if is_current {
                format!(" {} (current) ", model)
            } else if is_last {
                format!(" {} (last used) ", model)
            } else {
                format!(" {} ", model)
            };
            let style = if is_current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(label).style(style)
        })
        .collect();

    let list = List::new(items)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    if footer_rows > 0 {
        let note = Paragraph::new(Line::from(Span::styled(
            "Please select a model to continue.",
            Style::default().fg(Color::Red),
        )));
        frame.render_widget(note, Rect { y: note_area.y + 1, height: 1, ..note_area });
    }

    frame.render_stateful_widget(list, list_area, &mut app.picker_state);
}
