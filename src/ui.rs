use crate::{
    app::{
        App, FolderPrompt, Notice, NoticeLevel, PathChoice, Shell, SourceChoice, SyncReport,
        SyncTarget,
    },
    config::PathKey,
};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEvent,
        KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use directories::BaseDirs;
use ratatui::{
    prelude::*,
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Padding, Paragraph, Wrap},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

const MENU_WIDTH: u16 = 34;
const QUIT_INDEX: usize = SyncTarget::ALL.len();

#[derive(Clone)]
struct Theme {
    accent: Color,
    accent_soft: Color,
    border: Color,
    text: Color,
    muted: Color,
    success: Color,
    warning: Color,
    error: Color,
    header_bg: Color,
}

impl Theme {
    fn new() -> Self {
        Self {
            accent: Color::Rgb(120, 200, 130),
            accent_soft: Color::Rgb(70, 130, 85),
            border: Color::Rgb(65, 75, 90),
            text: Color::Rgb(220, 230, 240),
            muted: Color::Rgb(135, 145, 155),
            success: Color::Rgb(120, 220, 140),
            warning: Color::Rgb(230, 200, 120),
            error: Color::Rgb(235, 100, 95),
            header_bg: Color::Rgb(22, 28, 36),
        }
    }

    fn block(&self, title: &'static str) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(self.border))
            .title(Span::styled(
                title,
                Style::default()
                    .fg(self.accent)
                    .add_modifier(Modifier::BOLD),
            ))
    }

    fn panel(&self, title: &'static str) -> Block<'static> {
        self.block(title).padding(Padding {
            left: 1,
            right: 1,
            top: 1,
            bottom: 0,
        })
    }

    fn modal(&self, border: Color) -> Block<'static> {
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(self.header_bg))
            .padding(Padding::horizontal(1))
    }

    fn level_color(&self, level: NoticeLevel) -> Color {
        match level {
            NoticeLevel::Info => self.success,
            NoticeLevel::Warn => self.warning,
            NoticeLevel::Error => self.error,
        }
    }
}

trait EventSource {
    fn next_event(&mut self) -> Result<Event>;
}

struct TerminalEvents;

impl EventSource for TerminalEvents {
    fn next_event(&mut self) -> Result<Event> {
        event::read().context("read terminal event")
    }
}

/// What the main menu shows; dialogs draw on top of it.
#[derive(Default)]
struct Backdrop {
    selected: usize,
    paths: Vec<(&'static str, String)>,
    downloads: bool,
    status: Option<(NoticeLevel, String)>,
}

impl Backdrop {
    fn refresh(&mut self, app: &App) {
        self.paths = PathKey::ALL
            .iter()
            .map(|key| (key.as_str(), app.paths.get(*key).display().to_string()))
            .collect();
        self.downloads = app.downloads_available();
        self.status = app.last_report.as_ref().map(|report| match report {
            SyncReport::Cancelled => (NoticeLevel::Warn, "Last run cancelled".to_string()),
            SyncReport::Replaced { destination, files } => (
                NoticeLevel::Info,
                format!("Copied {files} file(s) to {}", destination.display()),
            ),
            SyncReport::Failed { message } => (NoticeLevel::Error, message.clone()),
        });
    }
}

struct Tui<B: Backend, E: EventSource> {
    terminal: Terminal<B>,
    events: E,
    theme: Theme,
    backdrop: Backdrop,
}

pub fn run(app: &mut App) -> Result<()> {
    enable_raw_mode()?;
    let terminal = restore_on_error(enter_terminal(), || {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), DisableBracketedPaste, LeaveAlternateScreen);
    })?;
    let mut tui = Tui::new(terminal, TerminalEvents);

    let result = tui.main_loop(app);

    disable_raw_mode()?;
    execute!(
        tui.terminal.backend_mut(),
        DisableBracketedPaste,
        LeaveAlternateScreen
    )?;
    tui.terminal.show_cursor()?;

    result
}

fn enter_terminal() -> Result<Terminal<ratatui::backend::CrosstermBackend<io::Stdout>>> {
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

/// Runs `restore` when terminal setup failed after raw mode was enabled.
fn restore_on_error<T>(setup: Result<T>, restore: impl FnOnce()) -> Result<T> {
    if setup.is_err() {
        restore();
    }
    setup
}

impl<B: Backend, E: EventSource> Tui<B, E> {
    fn new(terminal: Terminal<B>, events: E) -> Self {
        Self {
            terminal,
            events,
            theme: Theme::new(),
            backdrop: Backdrop::default(),
        }
    }

    fn main_loop(&mut self, app: &mut App) -> Result<()> {
        self.backdrop.refresh(app);
        loop {
            self.draw(|_, _| {})?;
            let Some(key) = self.next_key()? else {
                continue;
            };
            let target = match key.code {
                KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => break,
                KeyCode::Up | KeyCode::Char('k') => {
                    self.backdrop.selected = self.backdrop.selected.saturating_sub(1);
                    None
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    self.backdrop.selected = (self.backdrop.selected + 1).min(QUIT_INDEX);
                    None
                }
                KeyCode::Char(c @ '1'..='3') => {
                    let index = c as usize - '1' as usize;
                    self.backdrop.selected = index;
                    SyncTarget::ALL.get(index).copied()
                }
                KeyCode::Enter => {
                    if self.backdrop.selected == QUIT_INDEX {
                        break;
                    }
                    SyncTarget::ALL.get(self.backdrop.selected).copied()
                }
                _ => None,
            };

            if let Some(target) = target {
                if let Err(err) = app.run_sync(target, self) {
                    tracing::error!("{} failed: {err:#}", target.label());
                    app.last_report = Some(SyncReport::Failed {
                        message: format!("{err:#}"),
                    });
                }
                self.backdrop.refresh(app);
            }
        }
        Ok(())
    }

    fn next_key(&mut self) -> Result<Option<KeyEvent>> {
        match self.events.next_event()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    fn draw(&mut self, overlay: impl FnOnce(&mut Frame<'_>, &Theme)) -> Result<()> {
        let theme = &self.theme;
        let backdrop = &self.backdrop;
        self.terminal.draw(|frame| {
            draw_menu(frame, theme, backdrop);
            overlay(frame, theme);
        })?;
        Ok(())
    }

    /// Yes/No dialog. `None` when dismissed with Esc.
    fn ask(
        &mut self,
        title: &str,
        message: &str,
        labels: (&str, &str),
        default_yes: bool,
    ) -> Result<Option<bool>> {
        let mut yes = default_yes;
        loop {
            self.draw(|frame, theme| draw_dialog(frame, theme, title, message, labels, yes))?;
            let Some(key) = self.next_key()? else {
                continue;
            };
            match key.code {
                KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::Char('h')
                | KeyCode::Char('l') => yes = !yes,
                KeyCode::Char('y') | KeyCode::Char('Y') => yes = true,
                KeyCode::Char('n') | KeyCode::Char('N') => yes = false,
                KeyCode::Enter | KeyCode::Char(' ') => return Ok(Some(yes)),
                KeyCode::Esc => return Ok(None),
                _ => {}
            }
        }
    }

    fn browse(&mut self, start: &str) -> Result<Option<PathBuf>> {
        let mut dir = browse_start(Path::new(start.trim()));
        let mut entries = list_subdirs(&dir);
        let mut state = ListState::default();
        state.select(Some(0));

        loop {
            let has_parent = dir.parent().is_some();
            let mut rows: Vec<String> = Vec::with_capacity(entries.len() + 1);
            if has_parent {
                rows.push("..".to_string());
            }
            rows.extend(entries.iter().map(|entry| display_name(entry)));

            let shown = dir.display().to_string();
            self.draw(|frame, theme| draw_browser(frame, theme, &shown, &rows, &mut state))?;

            let Some(key) = self.next_key()? else {
                continue;
            };
            let selected = state.selected().unwrap_or(0);
            let next_dir = match key.code {
                KeyCode::Esc => return Ok(None),
                KeyCode::Char('s') | KeyCode::Char(' ') => return Ok(Some(dir)),
                KeyCode::Up | KeyCode::Char('k') => {
                    state.select(Some(selected.saturating_sub(1)));
                    None
                }
                KeyCode::Down | KeyCode::Char('j') => {
                    let last = rows.len().saturating_sub(1);
                    state.select(Some((selected + 1).min(last)));
                    None
                }
                KeyCode::Backspace | KeyCode::Left | KeyCode::Char('h') => {
                    dir.parent().map(Path::to_path_buf)
                }
                KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => {
                    if has_parent && selected == 0 {
                        dir.parent().map(Path::to_path_buf)
                    } else {
                        let index = if has_parent { selected - 1 } else { selected };
                        entries.get(index).cloned()
                    }
                }
                _ => None,
            };

            if let Some(next) = next_dir {
                dir = next;
                entries = list_subdirs(&dir);
                state.select(Some(0));
            }
        }
    }
}

impl<B: Backend, E: EventSource> Shell for Tui<B, E> {
    fn pick_folder(&mut self, prompt: &FolderPrompt) -> Result<PathChoice> {
        let mut buffer = prompt.default.display().to_string();
        loop {
            self.draw(|frame, theme| draw_prompt(frame, theme, prompt, &buffer))?;
            let key = match self.events.next_event()? {
                Event::Paste(text) => {
                    buffer.push_str(text.trim_matches(|c: char| c == '\r' || c == '\n'));
                    continue;
                }
                Event::Key(key) if key.kind == KeyEventKind::Press => key,
                _ => continue,
            };
            match key.code {
                KeyCode::Esc => return Ok(PathChoice::Cancelled),
                KeyCode::Enter => {
                    let value = buffer.trim();
                    if !value.is_empty() {
                        return Ok(PathChoice::Accepted(PathBuf::from(value)));
                    }
                }
                KeyCode::Tab => {
                    if let Some(path) = self.browse(&buffer)? {
                        buffer = path.display().to_string();
                    }
                }
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    buffer.clear();
                }
                KeyCode::Char(c) => {
                    if !key.modifiers.contains(KeyModifiers::CONTROL)
                        && !key.modifiers.contains(KeyModifiers::ALT)
                    {
                        buffer.push(c);
                    }
                }
                _ => {}
            }
        }
    }

    fn confirm_replace(&mut self, source: &Path, destination: &Path) -> Result<bool> {
        let message = format!(
            "Copy\n{}\n\ninto\n{}\n\nThe destination 'mods' folder will be deleted first.",
            source.display(),
            destination.display()
        );
        let answer = self.ask("Replace mods?", &message, ("Replace", "Cancel"), false)?;
        Ok(answer.unwrap_or(false))
    }

    fn choose_source(&mut self) -> Result<SourceChoice> {
        let answer = self.ask(
            "Minecraft",
            "Where should the mods come from?",
            ("Download modpack", "Local folder"),
            true,
        )?;
        Ok(match answer {
            Some(true) => SourceChoice::Download,
            Some(false) => SourceChoice::Local,
            None => SourceChoice::Cancelled,
        })
    }

    fn busy(&mut self, message: &str) -> Result<()> {
        self.draw(|frame, theme| {
            draw_message(frame, theme, "Working", message, theme.accent, None)
        })
    }

    fn notify(&mut self, notice: Notice) -> Result<()> {
        loop {
            self.draw(|frame, theme| {
                draw_message(
                    frame,
                    theme,
                    &notice.title,
                    &notice.message,
                    theme.level_color(notice.level),
                    Some("Press any key"),
                )
            })?;
            if self.next_key()?.is_some() {
                return Ok(());
            }
        }
    }
}

fn draw_menu(frame: &mut Frame<'_>, theme: &Theme, backdrop: &Backdrop) {
    let area = frame.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(area);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "modsync",
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  v{}  minecraft mods folder sync", env!("CARGO_PKG_VERSION")),
            Style::default().fg(theme.muted),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(theme.border))
            .style(Style::default().bg(theme.header_bg)),
    );
    frame.render_widget(header, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(MENU_WIDTH), Constraint::Min(20)])
        .split(rows[1]);

    let mut items: Vec<ListItem> = SyncTarget::ALL
        .iter()
        .enumerate()
        .map(|(index, target)| ListItem::new(format!("{}  {}", index + 1, target.label())))
        .collect();
    items.push(ListItem::new("q  Quit"));
    let menu = List::new(items)
        .block(theme.panel("Options"))
        .style(Style::default().fg(theme.text))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(theme.accent)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");
    let mut state = ListState::default();
    state.select(Some(backdrop.selected));
    frame.render_stateful_widget(menu, body[0], &mut state);

    let mut lines: Vec<Line> = Vec::new();
    for (key, value) in &backdrop.paths {
        lines.push(Line::from(Span::styled(
            key.to_string(),
            Style::default().fg(theme.muted),
        )));
        lines.push(Line::from(Span::styled(
            format!("  {value}"),
            Style::default().fg(theme.text),
        )));
    }
    lines.push(Line::from(""));
    let (label, color) = if backdrop.downloads {
        ("Modpack download: available", theme.success)
    } else {
        ("Modpack download: unavailable in this build", theme.warning)
    };
    lines.push(Line::from(Span::styled(label, Style::default().fg(color))));
    let details = Paragraph::new(lines)
        .block(theme.panel("Remembered folders"))
        .wrap(Wrap { trim: false });
    frame.render_widget(details, body[1]);

    let (status_text, status_color) = match &backdrop.status {
        Some((level, message)) => (message.clone(), theme.level_color(*level)),
        None => ("Ready".to_string(), theme.muted),
    };
    let status = Paragraph::new(status_text)
        .style(Style::default().fg(status_color))
        .block(theme.block("Status"));
    frame.render_widget(status, rows[2]);

    let footer = Paragraph::new("↑/↓ select  Enter run  1-3 shortcut  q quit")
        .style(Style::default().fg(theme.muted));
    frame.render_widget(footer, rows[3]);
}

fn draw_prompt(frame: &mut Frame<'_>, theme: &Theme, prompt: &FolderPrompt, buffer: &str) {
    let area = frame.size();
    let width = modal_width(area);
    let inner = width.saturating_sub(4);
    let hint_height = wrapped_height(prompt.hint, inner);
    let modal = centered(area, width, 8 + hint_height);

    let lines = vec![
        Line::from(Span::styled(
            prompt.title.clone(),
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![
            Span::styled(buffer.to_string(), Style::default().fg(theme.text)),
            Span::styled("█", Style::default().fg(theme.accent)),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            prompt.hint,
            Style::default().fg(theme.muted),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Enter accept  Tab browse  Ctrl+U clear  Esc cancel",
            Style::default().fg(theme.muted),
        )),
    ];

    frame.render_widget(Clear, modal);
    let widget = Paragraph::new(lines)
        .block(theme.modal(theme.accent_soft))
        .wrap(Wrap { trim: false });
    frame.render_widget(widget, modal);
}

fn draw_browser(
    frame: &mut Frame<'_>,
    theme: &Theme,
    dir: &str,
    rows: &[String],
    state: &mut ListState,
) {
    let area = frame.size();
    let width = modal_width(area);
    let height = area.height.saturating_sub(4).clamp(8, 24);
    let modal = centered(area, width, height);

    frame.render_widget(Clear, modal);
    let block = theme
        .modal(theme.accent_soft)
        .title(Span::styled(
            "Browse",
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        ));
    let inner = block.inner(modal);
    frame.render_widget(block, modal);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(inner);

    frame.render_widget(
        Paragraph::new(dir.to_string()).style(Style::default().fg(theme.text)),
        parts[0],
    );
    let items: Vec<ListItem> = rows
        .iter()
        .map(|row| ListItem::new(format!("{row}/")))
        .collect();
    let list = List::new(items)
        .style(Style::default().fg(theme.text))
        .highlight_style(Style::default().fg(Color::Black).bg(theme.accent));
    frame.render_stateful_widget(list, parts[1], state);
    frame.render_widget(
        Paragraph::new("Enter open  Backspace up  s select this folder  Esc back")
            .style(Style::default().fg(theme.muted)),
        parts[2],
    );
}

fn draw_dialog(
    frame: &mut Frame<'_>,
    theme: &Theme,
    title: &str,
    message: &str,
    labels: (&str, &str),
    yes_selected: bool,
) {
    let area = frame.size();
    let width = modal_width(area);
    let height = wrapped_height(message, width.saturating_sub(4)) + 6;
    let modal = centered(area, width, height);

    let selected = |color: Color| {
        Style::default()
            .fg(Color::Black)
            .bg(color)
            .add_modifier(Modifier::BOLD)
    };
    let yes_style = if yes_selected {
        selected(theme.accent)
    } else {
        Style::default().fg(theme.text)
    };
    let no_style = if yes_selected {
        Style::default().fg(theme.text)
    } else {
        selected(theme.warning)
    };

    let mut lines = vec![
        Line::from(Span::styled(
            title.to_string(),
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    lines.extend(message.lines().map(|line| Line::from(line.to_string())));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled(format!(" {} ", labels.0), yes_style),
        Span::raw("   "),
        Span::styled(format!(" {} ", labels.1), no_style),
    ]));

    frame.render_widget(Clear, modal);
    let widget = Paragraph::new(lines)
        .block(theme.modal(theme.accent_soft))
        .style(Style::default().fg(theme.text))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false });
    frame.render_widget(widget, modal);
}

fn draw_message(
    frame: &mut Frame<'_>,
    theme: &Theme,
    title: &str,
    message: &str,
    border: Color,
    footer: Option<&str>,
) {
    let area = frame.size();
    let width = modal_width(area);
    let extra = if footer.is_some() { 2 } else { 0 };
    let height = wrapped_height(message, width.saturating_sub(4)) + 4 + extra;
    let modal = centered(area, width, height);

    let mut lines = vec![
        Line::from(Span::styled(
            title.to_string(),
            Style::default().fg(border).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    lines.extend(message.lines().map(|line| Line::from(line.to_string())));
    if let Some(footer) = footer {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            footer.to_string(),
            Style::default().fg(theme.muted),
        )));
    }

    frame.render_widget(Clear, modal);
    let widget = Paragraph::new(lines)
        .block(theme.modal(border))
        .style(Style::default().fg(theme.text))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: false });
    frame.render_widget(widget, modal);
}

fn modal_width(area: Rect) -> u16 {
    let width = area.width.saturating_mul(2) / 3;
    width.clamp(40.min(area.width), area.width.saturating_sub(2).max(40.min(area.width)))
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + (area.width - width) / 2;
    let y = area.y + (area.height - height) / 2;
    Rect::new(x, y, width, height)
}

fn wrapped_height(text: &str, width: u16) -> u16 {
    let width = usize::from(width.max(1));
    let lines: usize = text
        .lines()
        .map(|line| line.chars().count().max(1).div_ceil(width))
        .sum();
    u16::try_from(lines.max(1)).unwrap_or(u16::MAX)
}

/// Nearest existing directory for the typed path, else the home directory.
fn browse_start(typed: &Path) -> PathBuf {
    typed
        .ancestors()
        .find(|candidate| !candidate.as_os_str().is_empty() && candidate.is_dir())
        .map(Path::to_path_buf)
        .or_else(|| BaseDirs::new().map(|base| base.home_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn list_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort_by_key(|path| display_name(path).to_lowercase());
    dirs
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
