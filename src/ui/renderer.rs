//! Terminal renderer using crossterm
//!
//! Keeps the console output as styled lines in a bounded scrollback and
//! draws the visible part above a one-line status bar.

use std::collections::VecDeque;
use std::io::{self, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    execute, queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use unicode_width::UnicodeWidthChar;

use crate::config::Palette;
use crate::core::ansi::StyleTag;
use crate::core::console::DisplaySink;

const TAB_WIDTH: usize = 4;

/// A run of text sharing one color
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub tag: StyleTag,
}

type Line = Vec<Span>;

/// Bounded list of styled lines with a scroll position
#[derive(Debug)]
pub struct Scrollback {
    lines: VecDeque<Line>,
    max_lines: usize,
    /// Rows scrolled up from the bottom
    scroll_offset: usize,
}

impl Scrollback {
    pub fn new(max_lines: usize) -> Self {
        let mut lines = VecDeque::new();
        lines.push_back(Line::new());
        Self {
            lines,
            max_lines: max_lines.max(1),
            scroll_offset: 0,
        }
    }

    pub fn set_max_lines(&mut self, max_lines: usize) {
        self.max_lines = max_lines.max(1);
        self.trim();
    }

    #[allow(dead_code)]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Append text, starting new lines at '\n'
    ///
    /// '\r' and other control characters are dropped, tabs become spaces.
    pub fn append(&mut self, text: &str, tag: StyleTag) {
        for ch in text.chars() {
            match ch {
                '\n' => {
                    self.lines.push_back(Line::new());
                    if self.scroll_offset > 0 {
                        self.scroll_offset += 1;
                    }
                }
                '\t' => {
                    for _ in 0..TAB_WIDTH {
                        self.push_char(' ', tag);
                    }
                }
                c if c.is_control() => {}
                c => self.push_char(c, tag),
            }
        }
        self.trim();
    }

    fn push_char(&mut self, ch: char, tag: StyleTag) {
        if self.lines.is_empty() {
            self.lines.push_back(Line::new());
        }
        let Some(line) = self.lines.back_mut() else {
            return;
        };
        match line.last_mut() {
            Some(span) if span.tag == tag => span.text.push(ch),
            _ => line.push(Span {
                text: ch.to_string(),
                tag,
            }),
        }
    }

    fn trim(&mut self) {
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.lines.push_back(Line::new());
        self.scroll_offset = 0;
    }

    pub fn scroll_up(&mut self, rows: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(rows);
    }

    pub fn scroll_down(&mut self, rows: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(rows);
    }

    pub fn scroll_to_end(&mut self) {
        self.scroll_offset = 0;
    }

    /// Rows to show in a `width` x `height` area, oldest first
    ///
    /// Long lines wrap at `width` display columns. The scroll offset is
    /// clamped to the available history.
    pub fn visible_rows(&mut self, width: usize, height: usize) -> Vec<Line> {
        let width = width.max(1);
        let wanted = height.saturating_add(self.scroll_offset);

        // Wrap from the bottom until enough rows exist
        let mut rows: Vec<Line> = Vec::new();
        for line in self.lines.iter().rev() {
            let mut wrapped = wrap_line(line, width);
            wrapped.reverse();
            rows.extend(wrapped);
            if rows.len() >= wanted {
                break;
            }
        }
        rows.reverse();

        let max_offset = rows.len().saturating_sub(height);
        self.scroll_offset = self.scroll_offset.min(max_offset);

        let end = rows.len() - self.scroll_offset;
        let start = end.saturating_sub(height);
        rows.drain(start..end).collect()
    }
}

/// Split one logical line into rows of at most `width` columns
fn wrap_line(line: &[Span], width: usize) -> Vec<Line> {
    let mut rows = vec![Line::new()];
    let mut column = 0;

    for span in line {
        for ch in span.text.chars() {
            let ch_width = ch.width().unwrap_or(0);
            if column + ch_width > width && column > 0 {
                rows.push(Line::new());
                column = 0;
            }
            let Some(row) = rows.last_mut() else {
                continue;
            };
            match row.last_mut() {
                Some(last) if last.tag == span.tag => last.text.push(ch),
                _ => row.push(Span {
                    text: ch.to_string(),
                    tag: span.tag,
                }),
            }
            column += ch_width;
        }
    }
    rows
}

/// Terminal renderer
pub struct Renderer {
    scrollback: Scrollback,
    palette: Palette,
    /// Whether the terminal has been initialized
    initialized: bool,
    /// Terminal reports modifier keys and key releases
    keyboard_enhanced: bool,
    dirty: bool,
    last_status: String,
}

impl Renderer {
    pub fn new(palette: Palette, scrollback_lines: usize) -> Self {
        Self {
            scrollback: Scrollback::new(scrollback_lines),
            palette,
            initialized: false,
            keyboard_enhanced: false,
            dirty: true,
            last_status: String::new(),
        }
    }

    /// Initialize the terminal for rendering
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            Hide,
            DisableLineWrap,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;

        self.keyboard_enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if self.keyboard_enhanced {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                )
            )?;
        }
        tracing::debug!("Terminal initialized (keyboard enhancement: {})", self.keyboard_enhanced);

        self.initialized = true;
        self.dirty = true;
        Ok(())
    }

    /// Cleanup the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        if self.keyboard_enhanced {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(stdout, ResetColor, SetAttribute(Attribute::Reset));
        let _ = execute!(stdout, Show, EnableLineWrap, LeaveAlternateScreen);
        let _ = stdout.flush();

        terminal::disable_raw_mode()
    }

    pub fn keyboard_enhanced(&self) -> bool {
        self.keyboard_enhanced
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
        self.dirty = true;
    }

    pub fn set_scrollback_lines(&mut self, lines: usize) {
        self.scrollback.set_max_lines(lines);
        self.dirty = true;
    }

    /// Force a full redraw on the next `draw`
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn page_up(&mut self) -> io::Result<()> {
        let (_, rows) = Self::size()?;
        self.scrollback.scroll_up(Self::page(rows));
        self.dirty = true;
        Ok(())
    }

    pub fn page_down(&mut self) -> io::Result<()> {
        let (_, rows) = Self::size()?;
        self.scrollback.scroll_down(Self::page(rows));
        self.dirty = true;
        Ok(())
    }

    fn page(rows: u16) -> usize {
        usize::from(rows.saturating_sub(2)).max(1)
    }

    /// Draw output and status line if anything changed
    pub fn draw(&mut self, status: &str) -> io::Result<()> {
        if !self.dirty && status == self.last_status {
            return Ok(());
        }

        let (cols, rows) = Self::size()?;
        let width = usize::from(cols);
        let height = usize::from(rows.saturating_sub(1));
        let visible = self.scrollback.visible_rows(width, height);

        let stdout = io::stdout();
        let mut out = io::BufWriter::with_capacity(65536, stdout.lock());

        for (index, row) in visible.iter().enumerate() {
            queue!(out, MoveTo(0, index as u16))?;
            for span in row {
                match self.palette.color_for(span.tag) {
                    Some(color) => queue!(out, SetForegroundColor(color.to_crossterm()))?,
                    None => queue!(out, ResetColor)?,
                }
                queue!(out, Print(&span.text))?;
            }
            queue!(out, ResetColor, Clear(ClearType::UntilNewLine))?;
        }
        for index in visible.len()..height {
            queue!(out, MoveTo(0, index as u16), Clear(ClearType::CurrentLine))?;
        }

        // Show scroll indicator if scrolled
        let offset = self.scrollback.scroll_offset();
        if offset > 0 && height > 0 {
            queue!(
                out,
                MoveTo(0, 0),
                SetAttribute(Attribute::Reverse),
                Print(format!("[\u{2191} {} rows]", offset)),
                SetAttribute(Attribute::Reset)
            )?;
        }

        if rows > 0 {
            queue!(
                out,
                MoveTo(0, rows - 1),
                SetAttribute(Attribute::Reverse),
                Print(fit_to_width(status, width)),
                SetAttribute(Attribute::Reset)
            )?;
        }
        out.flush()?;

        self.dirty = false;
        self.last_status = status.to_string();
        Ok(())
    }
}

impl DisplaySink for Renderer {
    fn append_styled(&mut self, text: &str, tag: StyleTag) {
        self.scrollback.append(text, tag);
        self.dirty = true;
    }

    fn clear(&mut self) {
        self.scrollback.clear();
        self.dirty = true;
    }

    fn scroll_to_end(&mut self) {
        self.scrollback.scroll_to_end();
        self.dirty = true;
    }
}

/// Truncate or pad `text` to exactly `width` columns
fn fit_to_width(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        result.push(ch);
        used += w;
    }
    result.extend(std::iter::repeat(' ').take(width - used));
    result
}
