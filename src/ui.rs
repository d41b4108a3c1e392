use crate::agent::{Agent, TurnObserver, TurnOutcome};
use crate::ai_sdk::{Message, ModelApi, Role, ToolCall};
use crate::decoder::{PartialSink, PartialUpdate};
use crate::session::{transcript_entries, SessionLog};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::collections::BTreeMap;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;

const INPUT_HEIGHT: u16 = 6;
const LIVE_HEIGHT: u16 = 12;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    User(String),
    Assistant(String),
    Info(String),
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

fn labelled(label: &str, body: &str, color: Color) -> Vec<LineSpec> {
    let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
    let body_style = Style::default().fg(color);
    let mut lines = vec![LineSpec::new(label, header_style)];
    for line in body.lines() {
        lines.push(LineSpec::new(format!("  {}", line), body_style));
    }
    lines
}

fn to_text(specs: Vec<LineSpec>) -> Text<'static> {
    Text::from(
        specs
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>(),
    )
}

/// Rows `text` occupies when word-wrapped at `width` terminal columns.
/// Words wider than a row break between characters.
fn wrapped_rows(text: &str, width: usize) -> usize {
    let mut rows = 1;
    let mut column = 0;
    for word in text.split_inclusive(' ') {
        let visible = word.trim_end_matches(' ').width();
        if column > 0 && column + visible > width {
            rows += 1;
            column = 0;
        }
        if visible > width {
            for ch in word.chars() {
                let w = ch.width().unwrap_or(0);
                if column + w > width {
                    rows += 1;
                    column = 0;
                }
                column += w;
            }
        } else {
            column += word.width();
        }
        column = column.min(width);
    }
    rows
}

fn rendered_height(specs: &[LineSpec], width: u16) -> u16 {
    let width = width.max(1) as usize;
    let total: usize = specs
        .iter()
        .map(|spec| wrapped_rows(&spec.text, width))
        .sum();
    total.min(u16::MAX as usize) as u16
}

impl ChatMessage {
    fn line_specs(&self) -> Vec<LineSpec> {
        match self {
            ChatMessage::User(msg) => labelled("You:", msg, Color::Blue),
            ChatMessage::Assistant(msg) => labelled("Claude:", msg, Color::Yellow),
            ChatMessage::Info(msg) => vec![LineSpec::new(
                format!("ℹ {}", msg),
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::ITALIC),
            )],
        }
    }
}

/// Settled form of a message for scrollback: its text blocks only.
fn settled_messages(message: &Message) -> Vec<ChatMessage> {
    transcript_entries(message)
        .map(|entry| match entry.role {
            Role::User => ChatMessage::User(entry.text),
            Role::Assistant => ChatMessage::Assistant(entry.text),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LivePartial {
    Text(String),
    ToolInput { name: String, raw: String },
    Thinking(String),
}

impl From<PartialUpdate<'_>> for LivePartial {
    fn from(update: PartialUpdate<'_>) -> Self {
        match update {
            PartialUpdate::Text(text) => LivePartial::Text(text.to_string()),
            PartialUpdate::ToolInput { name, raw } => LivePartial::ToolInput {
                name: name.to_string(),
                raw: raw.to_string(),
            },
            PartialUpdate::Thinking(text) => LivePartial::Thinking(text.to_string()),
        }
    }
}

/// Display elements for blocks still streaming in the current turn.
///
/// Keyed by message generation and block index: the first update for a key
/// creates its element, later ones replace its content in place.
#[derive(Debug, Default)]
struct LiveBlocks {
    generation: usize,
    blocks: BTreeMap<(usize, usize), LivePartial>,
    expanded: bool,
}

impl LiveBlocks {
    /// Returns true when a new element was created.
    fn update(&mut self, index: usize, partial: LivePartial) -> bool {
        self.blocks
            .insert((self.generation, index), partial)
            .is_none()
    }

    /// The current message settled: its text moves to scrollback, tool
    /// input stays visible until the turn ends.
    fn next_message(&mut self) {
        self.blocks
            .retain(|_, block| matches!(block, LivePartial::ToolInput { .. }));
        self.generation += 1;
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.generation = 0;
    }

    fn toggle_expanded(&mut self) {
        self.expanded = !self.expanded;
    }

    fn line_specs(&self) -> Vec<LineSpec> {
        let hint = if self.expanded { "▾" } else { "▸" };
        let mut lines = Vec::new();
        for block in self.blocks.values() {
            match block {
                LivePartial::Text(text) => lines.extend(labelled("Claude:", text, Color::Yellow)),
                LivePartial::ToolInput { name, raw } => {
                    let label = format!("{} Tool use: {} (Tab to toggle)", hint, name);
                    if self.expanded {
                        lines.extend(labelled(&label, raw, Color::Green));
                    } else {
                        lines.push(LineSpec::new(label, Style::default().fg(Color::Green)));
                    }
                }
                LivePartial::Thinking(text) => {
                    let label = format!("{} Thinking...", hint);
                    if self.expanded {
                        lines.extend(labelled(&label, text, Color::Magenta));
                    } else {
                        lines.push(LineSpec::new(label, Style::default().fg(Color::Magenta)));
                    }
                }
            }
        }
        lines
    }
}

#[derive(Debug)]
pub(crate) enum UiEvent {
    Partial { index: usize, partial: LivePartial },
    MessageAppended(Message),
    ToolCall { name: String },
    TurnFinished {
        log: SessionLog,
        result: Result<TurnOutcome, String>,
    },
}

/// Forwards turn progress from the turn task to the UI loop.
struct ChannelObserver {
    sender: mpsc::UnboundedSender<UiEvent>,
}

impl PartialSink for ChannelObserver {
    fn update(&mut self, index: usize, update: PartialUpdate<'_>) {
        let _ = self.sender.send(UiEvent::Partial {
            index,
            partial: update.into(),
        });
    }
}

impl TurnObserver for ChannelObserver {
    fn message_appended(&mut self, message: &Message) {
        let _ = self.sender.send(UiEvent::MessageAppended(message.clone()));
    }

    fn tool_invoked(&mut self, call: &ToolCall) {
        let _ = self.sender.send(UiEvent::ToolCall {
            name: call.name.clone(),
        });
    }
}

/// Multi-line prompt editor. `cursor` is a byte offset on a char boundary.
#[derive(Debug, Default)]
struct InputBuffer {
    text: String,
    cursor: usize,
}

impl InputBuffer {
    fn insert(&mut self, c: char) {
        self.text.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    fn backspace(&mut self) {
        if let Some(prev) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
            self.text.remove(self.cursor);
        }
    }

    fn left(&mut self) {
        if let Some(prev) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= prev.len_utf8();
        }
    }

    fn right(&mut self) {
        if let Some(next) = self.text[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }

    fn line_start(&self, at: usize) -> usize {
        self.text[..at].rfind('\n').map_or(0, |i| i + 1)
    }

    fn line_end(&self, at: usize) -> usize {
        self.text[at..].find('\n').map_or(self.text.len(), |i| at + i)
    }

    fn column(&self) -> usize {
        self.text[self.line_start(self.cursor)..self.cursor]
            .chars()
            .count()
    }

    // Byte offset of `column` within [start, end), clamped to the line end.
    fn offset_in_line(&self, start: usize, end: usize, column: usize) -> usize {
        self.text[start..end]
            .char_indices()
            .nth(column)
            .map_or(end, |(i, _)| start + i)
    }

    fn up(&mut self) {
        let start = self.line_start(self.cursor);
        if start == 0 {
            return;
        }
        let column = self.column();
        self.cursor = self.offset_in_line(self.line_start(start - 1), start - 1, column);
    }

    fn down(&mut self) {
        let end = self.line_end(self.cursor);
        if end == self.text.len() {
            return;
        }
        let column = self.column();
        self.cursor = self.offset_in_line(end + 1, self.line_end(end + 1), column);
    }

    fn home(&mut self) {
        self.cursor = self.line_start(self.cursor);
    }

    fn end(&mut self) {
        self.cursor = self.line_end(self.cursor);
    }

    /// (row, column) of the cursor, in characters.
    fn position(&self) -> (usize, usize) {
        let row = self.text[..self.cursor].matches('\n').count();
        (row, self.column())
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    fn render(&self) -> Text<'static> {
        if self.text.is_empty() {
            return Text::from(Span::styled(
                "Ask a question...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(self.text.clone())
    }
}

pub(crate) struct App<M> {
    input: InputBuffer,
    live: LiveBlocks,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    status: Option<String>,
    agent: Arc<Agent<M>>,
    // Lent to the turn task while a turn runs.
    log: Option<SessionLog>,
}

impl<M: ModelApi + 'static> App<M> {
    pub fn new(agent: Agent<M>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            input: InputBuffer::default(),
            live: LiveBlocks::default(),
            should_quit: false,
            sender,
            receiver,
            status: None,
            agent: Arc::new(agent),
            log: Some(SessionLog::new()),
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [live_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)]).areas(f.area());

        let live_lines = self.live.line_specs();
        let overflow = rendered_height(&live_lines, live_area.width).saturating_sub(live_area.height);
        let live = Paragraph::new(to_text(live_lines))
            .wrap(Wrap { trim: false })
            .scroll((overflow, 0));
        f.render_widget(live, live_area);

        let title = match &self.status {
            Some(status) => format!(" Input (Enter to send, Esc to quit) [{}] ", status),
            None => " Input (Enter to send, Esc to quit) ".to_string(),
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, input_area);

        let (row, column) = self.input.position();
        let cursor_x = (column + 1) as u16;
        let cursor_y = row as u16;
        let x = (input_area.x + cursor_x).min(input_area.x + input_area.width - 2);
        let y = (input_area.y + 1 + cursor_y).min(input_area.y + input_area.height - 2);
        f.set_cursor_position((x, y));
    }

    fn append_message(
        &mut self,
        terminal: &mut TuiTerminal,
        message: ChatMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let width = terminal.size()?.width;
        let specs = message.line_specs();
        let height = rendered_height(&specs, width).saturating_add(1);
        let mut text = to_text(specs);
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        Ok(())
    }

    fn submit(&mut self, terminal: &mut TuiTerminal) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.input.is_blank() {
            return Ok(());
        }
        // One turn at a time; the log is away while a turn runs.
        let Some(mut log) = self.log.take() else {
            return Ok(());
        };

        let msg = self.input.take();
        self.append_message(terminal, ChatMessage::User(msg.clone()))?;
        self.status = Some("Thinking...".to_string());
        log.append_user_input(&msg);

        let agent = Arc::clone(&self.agent);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let mut observer = ChannelObserver {
                sender: sender.clone(),
            };
            let result = agent
                .run_turn(&mut log, &mut observer)
                .await
                .map_err(|e| e.to_string());
            let _ = sender.send(UiEvent::TurnFinished { log, result });
        });
        Ok(())
    }

    fn apply_event(
        &mut self,
        terminal: &mut TuiTerminal,
        event: UiEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match event {
            UiEvent::Partial { index, partial } => {
                self.live.update(index, partial);
            }
            UiEvent::MessageAppended(message) => {
                if message.role == Role::Assistant {
                    self.live.next_message();
                    for settled in settled_messages(&message) {
                        self.append_message(terminal, settled)?;
                    }
                }
            }
            UiEvent::ToolCall { name } => {
                self.status = Some(format!("Running {}...", name));
            }
            UiEvent::TurnFinished { log, result } => {
                self.log = Some(log);
                self.live.clear();
                self.status = None;
                match result {
                    Ok(outcome) => debug!(
                        model_calls = outcome.model_calls,
                        stop_reason = ?outcome.stop_reason,
                        "turn finished"
                    ),
                    Err(err) => {
                        warn!(error = %err, "turn failed");
                        self.append_message(terminal, ChatMessage::Info(format!("Error: {}", err)))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_events(
        &mut self,
        terminal: &mut TuiTerminal,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply_event(terminal, event)?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                return self.on_key(terminal, key);
            }
        }

        Ok(true)
    }

    /// Returns false once the user asked to quit.
    fn on_key(
        &mut self,
        terminal: &mut TuiTerminal,
        key: KeyEvent,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Enter if shift => self.input.insert('\n'),
            KeyCode::Enter => self.submit(terminal)?,
            KeyCode::Tab => self.live.toggle_expanded(),
            KeyCode::Char(c) => self.input.insert(c),
            KeyCode::Backspace => self.input.backspace(),
            KeyCode::Left => self.input.left(),
            KeyCode::Right => self.input.right(),
            KeyCode::Up => self.input.up(),
            KeyCode::Down => self.input.down(),
            KeyCode::Home => self.input.home(),
            KeyCode::End => self.input.end(),
            _ => {}
        }

        Ok(!self.should_quit)
    }
}

pub(crate) fn run_tui<M: ModelApi + 'static>(
    agent: Agent<M>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(LIVE_HEIGHT + INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(agent);

    let _guard = TerminalGuard::new();

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}
