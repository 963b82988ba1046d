//! Terminal renderer using crossterm
//!
//! Draws the scrollback tail, a status bar and the command line.

use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::core::session::ERROR_MARKER;
use crate::core::transport::ConnectionStatus;

use super::keymapper::LineEditor;

/// Spaces per tab stop when flattening output
const TAB_WIDTH: usize = 4;

/// Everything the renderer needs for one frame
pub struct Frame<'a> {
    pub lines: &'a [String],
    pub status: ConnectionStatus,
    pub server: &'a str,
    pub cwd: &'a str,
    pub input: &'a LineEditor,
    /// Rows scrolled back from the live tail
    pub scroll_offset: usize,
    pub show_status_bar: bool,
}

/// Terminal renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Current terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, DisableLineWrap, Clear(ClearType::All))?;
        self.initialized = true;
        Ok(())
    }

    /// Restore the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;
        let mut stdout = io::stdout();
        execute!(stdout, ResetColor, Show, EnableLineWrap, LeaveAlternateScreen)?;
        terminal::disable_raw_mode()
    }

    pub fn render(&mut self, frame: &Frame<'_>) -> io::Result<()> {
        let (cols, rows) = Self::size()?;
        let width = cols as usize;
        let reserved = if frame.show_status_bar { 2 } else { 1 };
        let body_rows = (rows as usize).saturating_sub(reserved);

        let mut stdout = io::stdout();
        queue!(stdout, Hide)?;

        let visible = layout_rows(frame.lines, width, body_rows, frame.scroll_offset);
        for row in 0..body_rows {
            queue!(stdout, MoveTo(0, row as u16), Clear(ClearType::CurrentLine))?;
            if let Some(text) = visible.get(row) {
                if text.starts_with(ERROR_MARKER) {
                    queue!(stdout, SetForegroundColor(Color::Red), Print(text), ResetColor)?;
                } else {
                    queue!(stdout, Print(text))?;
                }
            }
        }

        let mut next_row = body_rows as u16;
        if frame.show_status_bar {
            let (label, color) = match frame.status {
                ConnectionStatus::Connected => ("connected", Color::DarkGreen),
                ConnectionStatus::Connecting => ("connecting", Color::DarkYellow),
                ConnectionStatus::Disconnected => ("disconnected", Color::DarkRed),
            };
            let mut bar = format!(" {} | {} | {}", label, frame.server, frame.cwd);
            if frame.scroll_offset > 0 {
                bar.push_str(&format!(" | scrolled +{}", frame.scroll_offset));
            }
            let bar = pad_to_width(&truncate_to_width(&bar, width), width);
            queue!(
                stdout,
                MoveTo(0, next_row),
                SetBackgroundColor(color),
                SetForegroundColor(Color::White),
                Print(bar),
                ResetColor
            )?;
            next_row += 1;
        }

        let prompt = format!("{}$ ", frame.cwd);
        let (line, cursor_col) = input_view(&prompt, frame.input, width);
        queue!(
            stdout,
            MoveTo(0, next_row),
            Clear(ClearType::CurrentLine),
            Print(line),
            MoveTo(cursor_col as u16, next_row),
            Show
        )?;
        stdout.flush()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Flatten scrollback entries into display rows and pick the window that
/// ends `scroll_offset` rows above the tail
pub fn layout_rows(lines: &[String], width: usize, height: usize, scroll_offset: usize) -> Vec<String> {
    let mut rows: Vec<String> = Vec::new();
    for entry in lines {
        let entry = entry.strip_suffix('\n').unwrap_or(entry);
        for piece in entry.split('\n') {
            let flat = piece.replace('\t', &" ".repeat(TAB_WIDTH));
            rows.push(truncate_to_width(&flat, width));
        }
    }
    let end = rows.len().saturating_sub(scroll_offset);
    let start = end.saturating_sub(height);
    rows[start..end].to_vec()
}

/// Number of display rows `lines` occupy; bounds scrolling
pub fn row_count(lines: &[String]) -> usize {
    lines
        .iter()
        .map(|entry| entry.strip_suffix('\n').unwrap_or(entry).split('\n').count())
        .sum()
}

/// Cut `text` to at most `width` columns
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut used = 0;
    let mut out = String::new();
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out
}

fn pad_to_width(text: &str, width: usize) -> String {
    let w = text.width();
    if w >= width {
        text.to_string()
    } else {
        format!("{}{}", text, " ".repeat(width - w))
    }
}

/// Prompt plus input, scrolled horizontally so the cursor stays visible.
/// Returns the text and the cursor column.
fn input_view(prompt: &str, input: &LineEditor, width: usize) -> (String, usize) {
    let text: Vec<char> = input.text().chars().collect();
    let before: String = text[..input.cursor()].iter().collect();
    let full_before = format!("{}{}", prompt, before);
    let cursor_col = full_before.width();

    if cursor_col < width {
        let full = format!("{}{}", prompt, input.text());
        return (truncate_to_width(&full, width), cursor_col);
    }

    // Keep the tail ending at the cursor
    let mut shown = String::new();
    let mut used = 0;
    for ch in full_before.chars().rev() {
        let w = ch.width().unwrap_or(0);
        if used + w >= width {
            break;
        }
        used += w;
        shown.insert(0, ch);
    }
    (shown, used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_layout_splits_embedded_newlines() {
        let rows = layout_rows(&lines(&["a\nb\n", "c"]), 80, 10, 0);
        assert_eq!(rows, vec!["a", "b", "c"]);
        assert_eq!(row_count(&lines(&["a\nb\n", "c"])), 3);
    }

    #[test]
    fn test_layout_keeps_tail() {
        let rows = layout_rows(&lines(&["1", "2", "3", "4"]), 80, 2, 0);
        assert_eq!(rows, vec!["3", "4"]);
    }

    #[test]
    fn test_layout_scroll_offset() {
        let rows = layout_rows(&lines(&["1", "2", "3", "4"]), 80, 2, 1);
        assert_eq!(rows, vec!["2", "3"]);
        let rows = layout_rows(&lines(&["1", "2"]), 80, 2, 10);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_truncate_wide_chars() {
        assert_eq!(truncate_to_width("日本語", 5), "日本");
        assert_eq!(truncate_to_width("abc", 5), "abc");
    }

    #[test]
    fn test_tabs_expanded() {
        let rows = layout_rows(&lines(&["a\tb"]), 80, 1, 0);
        assert_eq!(rows, vec!["a    b"]);
    }

    #[test]
    fn test_input_view_scrolls() {
        let mut input = LineEditor::new();
        input.set("abcdefghij");
        let (text, col) = input_view("$ ", &input, 8);
        assert_eq!(text, "defghij");
        assert_eq!(col, 7);

        input.set("ab");
        let (text, col) = input_view("$ ", &input, 8);
        assert_eq!(text, "$ ab");
        assert_eq!(col, 4);
    }
}
