//! A small Markdown subset for assistant replies: headings, bullets, fenced
//! code, `**bold**` and `` `code` `` spans.
//!
//! Replies are rendered while they are still being typed out, so every
//! construct has to degrade gracefully when its closing marker has not
//! appeared yet.

use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

fn code_style() -> Style {
    Style::default().fg(Color::Green)
}

/// Render a block of Markdown text into terminal lines.
pub fn render(text: &str) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut in_fence = false;

    for raw in text.lines() {
        let trimmed = raw.trim_start();

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            let lang = trimmed.trim_start_matches('`').trim();
            if in_fence && !lang.is_empty() {
                lines.push(Line::from(Span::styled(
                    format!("[{}]", lang),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            continue;
        }

        if in_fence {
            lines.push(Line::from(Span::styled(format!("  {}", raw), code_style())));
            continue;
        }

        if let Some(heading) = heading_text(trimmed) {
            lines.push(Line::from(Span::styled(
                heading.to_string(),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            )));
            continue;
        }

        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            let indent = raw.len() - trimmed.len();
            let mut spans = vec![Span::raw(format!("{}• ", " ".repeat(indent)))];
            spans.extend(parse_inline(item));
            lines.push(Line::from(spans));
            continue;
        }

        lines.push(Line::from(parse_inline(raw)));
    }

    lines
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) {
        line[hashes..].strip_prefix(' ')
    } else {
        None
    }
}

/// Parse a line of text and convert **bold** and `code` markdown to styled spans
fn parse_inline(text: &str) -> Vec<Span<'static>> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                // Consume the second *
                chars.next();

                let mut bold_text = String::new();
                let mut found_close = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'*') {
                        chars.next();
                        found_close = true;
                        break;
                    }
                    bold_text.push(c);
                }

                if found_close && !bold_text.is_empty() {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(
                        bold_text,
                        Style::default().add_modifier(Modifier::BOLD),
                    ));
                } else {
                    // No closing **, treat as literal
                    current_text.push_str("**");
                    current_text.push_str(&bold_text);
                    if found_close {
                        current_text.push_str("**");
                    }
                }
            }
            '`' => {
                let mut code = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        found_close = true;
                        break;
                    }
                    code.push(c);
                }

                if found_close {
                    if !current_text.is_empty() {
                        spans.push(Span::raw(std::mem::take(&mut current_text)));
                    }
                    spans.push(Span::styled(code, code_style()));
                } else {
                    current_text.push('`');
                    current_text.push_str(&code);
                }
            }
            _ => current_text.push(c),
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }
    spans
}
