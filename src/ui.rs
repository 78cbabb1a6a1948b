use crate::config::Config;
use crate::filter::{self, DayBuckets, Section};
use crate::model::{Task, TaskChanges, TaskId};
use crate::service::{TodoService, UpdateOutcome};
use crate::storage::TaskRepository;
use anyhow::Result;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, TimeZone};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::ListState;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Terminal;
use std::collections::HashMap;
use std::io::{stdout, Stdout};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const IDLE_POLL: Duration = Duration::from_millis(200);
const CALENDAR_WIDTH: u16 = 53;

pub fn run<R, Tz>(service: TodoService<R, Tz>, config: &Config) -> Result<()>
where
    R: TaskRepository,
    Tz: TimeZone,
{
    let mut terminal = setup_terminal()?;
    let mut app = App::new(service, config);
    let result = app.event_loop(&mut terminal);
    app.shutdown();
    teardown_terminal(&mut terminal)?;
    result
}

struct App<R, Tz: TimeZone> {
    service: TodoService<R, Tz>,
    selected_day: NaiveDate,
    focus: Focus,
    selected: usize,
    list_offset: usize,
    show_pending: bool,
    show_completed: bool,
    mode: Mode,
    pending_delete: Option<PendingDelete>,
    delete_delay: Duration,
    status: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Focus {
    Calendar,
    Tasks,
}

enum Mode {
    Normal,
    EditingTitle {
        task_id: TaskId,
        field: FieldValue,
        original: String,
    },
    EditingTime {
        task_id: TaskId,
        field: FieldValue,
    },
}

struct PendingDelete {
    task_id: TaskId,
    due: Instant,
}

#[derive(Clone)]
struct FieldValue {
    value: String,
    cursor: usize,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor = prev_boundary(self.cursor, &self.value);
    }

    fn move_right(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        self.cursor = next_boundary(self.cursor, &self.value);
    }

    fn home(&mut self) {
        self.cursor = 0;
    }

    fn end(&mut self) {
        self.cursor = self.value.len();
    }

    fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let prev = prev_boundary(self.cursor, &self.value);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn delete(&mut self) {
        if self.cursor >= self.value.len() {
            return;
        }
        let next = next_boundary(self.cursor, &self.value);
        self.value.drain(self.cursor..next);
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert_str(self.cursor, "▌");
        text
    }
}

impl<R, Tz> App<R, Tz>
where
    R: TaskRepository,
    Tz: TimeZone,
{
    fn new(mut service: TodoService<R, Tz>, config: &Config) -> Self {
        // A previous session may have been killed mid-edit.
        let removed = service.end_session();
        if removed > 0 {
            debug!(removed, "swept untitled tasks left by an earlier session");
        }
        let status = format!("Loaded tasks from {}", service.repository().describe());
        let selected_day = service.today();
        App {
            service,
            selected_day,
            focus: Focus::Tasks,
            selected: 0,
            list_offset: 0,
            show_pending: config.show_pending,
            show_completed: config.show_completed,
            mode: Mode::Normal,
            pending_delete: None,
            delete_delay: config.delete_delay(),
            status,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.tick(Instant::now());
            terminal.draw(|f| self.draw(f))?;
            if event::poll(self.poll_timeout(Instant::now()))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) {
                            break;
                        }
                    }
                    Event::FocusLost => self.background(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        match &self.pending_delete {
            Some(pending) => pending.due.saturating_duration_since(now).min(IDLE_POLL),
            None => IDLE_POLL,
        }
    }

    /// Applies a deferred delete once its deadline has passed.
    fn tick(&mut self, now: Instant) {
        let due = self
            .pending_delete
            .as_ref()
            .map(|pending| pending.due <= now)
            .unwrap_or(false);
        if due {
            self.flush_delete();
        }
    }

    fn flush_delete(&mut self) {
        let Some(pending) = self.pending_delete.take() else {
            return;
        };
        match self.service.delete(&pending.task_id) {
            Ok(task) => {
                self.status = format!("Deleted \"{}\"", display_title(&task));
            }
            Err(err) => {
                warn!(error = %err, "deferred delete skipped");
                self.status = format!("Delete failed: {}", err);
            }
        }
        self.clamp_selection();
    }

    /// The terminal lost focus: close any edit and sweep blank tasks.
    fn background(&mut self) {
        self.finish_edit();
        let removed = self.service.end_session();
        if removed > 0 {
            self.status = format!("Removed {} untitled task(s)", removed);
        }
        self.clamp_selection();
    }

    fn shutdown(&mut self) {
        self.finish_edit();
        self.flush_delete();
        let removed = self.service.end_session();
        debug!(removed, "session closed");
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::EditingTitle { .. } | Mode::EditingTime { .. } => {
                self.handle_edit_key(key);
                false
            }
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Char('q') => return true,
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Calendar => Focus::Tasks,
                    Focus::Tasks => Focus::Calendar,
                };
            }
            KeyCode::Char('n') => self.new_task(),
            KeyCode::Char('p') => {
                self.show_pending = !self.show_pending;
                self.clamp_selection();
            }
            KeyCode::Char('c') => {
                self.show_completed = !self.show_completed;
                self.clamp_selection();
            }
            KeyCode::Char('t') => {
                let today = self.service.today();
                self.set_day(today);
            }
            KeyCode::Left | KeyCode::Char('h') => self.shift_day(-1),
            KeyCode::Right | KeyCode::Char('l') => self.shift_day(1),
            _ => match self.focus {
                Focus::Calendar => self.handle_calendar_key(key),
                Focus::Tasks => self.handle_task_key(key),
            },
        }
        false
    }

    fn handle_calendar_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.shift_day(-7),
            KeyCode::Down | KeyCode::Char('j') => self.shift_day(7),
            KeyCode::Enter => self.focus = Focus::Tasks,
            _ => {}
        }
    }

    fn handle_task_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected += 1;
                self.clamp_selection();
            }
            KeyCode::Char(' ') | KeyCode::Char('x') => self.toggle_selected(),
            KeyCode::Enter | KeyCode::Char('e') => self.begin_title_edit(),
            KeyCode::Char('@') => self.begin_time_edit(),
            KeyCode::Char('d') | KeyCode::Delete => self.schedule_delete(),
            _ => {}
        }
    }

    fn handle_edit_key(&mut self, key: KeyEvent) {
        let is_time = matches!(self.mode, Mode::EditingTime { .. });
        match key.code {
            KeyCode::Enter => self.finish_edit(),
            KeyCode::Esc => self.cancel_edit(),
            KeyCode::Tab | KeyCode::BackTab => {
                self.finish_edit();
                self.focus = Focus::Calendar;
            }
            code => {
                let field = match &mut self.mode {
                    Mode::EditingTitle { field, .. } | Mode::EditingTime { field, .. } => field,
                    Mode::Normal => return,
                };
                match code {
                    KeyCode::Left => field.move_left(),
                    KeyCode::Right => field.move_right(),
                    KeyCode::Home => field.home(),
                    KeyCode::End => field.end(),
                    KeyCode::Backspace => field.backspace(),
                    KeyCode::Delete => field.delete(),
                    KeyCode::Char(c)
                        if !key
                            .modifiers
                            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
                    {
                        if !is_time || c.is_ascii_digit() || c == ':' {
                            field.insert_char(c);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn new_task(&mut self) {
        match self.service.create_task(self.selected_day) {
            Ok(id) => {
                self.show_pending = true;
                self.focus = Focus::Tasks;
                self.select_task(&id);
                self.mode = Mode::EditingTitle {
                    task_id: id,
                    field: FieldValue::new(""),
                    original: String::new(),
                };
                self.status = "New task: type a title, Enter to save, Esc to discard".into();
            }
            Err(err) => self.status = format!("Could not create task: {}", err),
        }
    }

    fn begin_title_edit(&mut self) {
        let Some(task) = self.selected_task() else {
            self.status = "No task selected".into();
            return;
        };
        if self.is_pending_delete(&task.id) {
            return;
        }
        let (task_id, title) = (task.id.clone(), task.title.clone());
        self.mode = Mode::EditingTitle {
            task_id,
            field: FieldValue::new(&title),
            original: title,
        };
        self.status = "Editing title (Enter save, Esc cancel)".into();
    }

    fn begin_time_edit(&mut self) {
        let Some(task) = self.selected_task() else {
            self.status = "No task selected".into();
            return;
        };
        if self.is_pending_delete(&task.id) {
            return;
        }
        let task_id = task.id.clone();
        let current = filter::format_time(&task.date, self.service.time_zone());
        self.mode = Mode::EditingTime {
            task_id,
            field: FieldValue::new(&current),
        };
        self.status = "Editing time as HH:MM (Enter save, Esc cancel)".into();
    }

    /// Ends the current edit session, keeping what was typed.
    fn finish_edit(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Normal => {}
            Mode::EditingTitle { task_id, field, .. } => {
                let changes = TaskChanges::default().title(field.value).ending_edit();
                self.end_title_session(&task_id, changes);
            }
            Mode::EditingTime { task_id, field } => match filter::parse_time(&field.value) {
                Ok(time) => match self.service.set_time(&task_id, time) {
                    Ok(_) => {
                        self.status = format!("Time set to {}", time.format(filter::TIME_FORMAT));
                        self.select_task(&task_id);
                    }
                    Err(err) => {
                        self.status = format!("Could not set time: {}", err);
                        self.mode = Mode::EditingTime { task_id, field };
                    }
                },
                Err(err) => {
                    self.status = err.to_string();
                    self.mode = Mode::EditingTime { task_id, field };
                }
            },
        }
    }

    /// Ends the current edit session, dropping what was typed.
    fn cancel_edit(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Normal => {}
            Mode::EditingTitle {
                task_id, original, ..
            } => {
                let changes = TaskChanges::default().title(original).ending_edit();
                self.end_title_session(&task_id, changes);
            }
            Mode::EditingTime { .. } => {
                self.status = "Time unchanged".into();
            }
        }
    }

    fn end_title_session(&mut self, task_id: &str, changes: TaskChanges) {
        match self.service.update_task(task_id, changes) {
            Ok(UpdateOutcome::Updated) => {
                self.status = "Saved".into();
                self.select_task(task_id);
            }
            Ok(UpdateOutcome::Deleted) => {
                self.status = "Discarded untitled task".into();
            }
            Err(err) => self.status = format!("Could not save: {}", err),
        }
        self.clamp_selection();
    }

    fn toggle_selected(&mut self) {
        let Some(id) = self.selected_task().map(|task| task.id.clone()) else {
            return;
        };
        if self.is_pending_delete(&id) {
            return;
        }
        match self.service.toggle_completion(&id) {
            Ok(done) => {
                self.status = if done {
                    "Marked completed".into()
                } else {
                    "Marked pending".into()
                };
                self.select_task(&id);
                self.clamp_selection();
            }
            Err(err) => self.status = format!("Could not toggle: {}", err),
        }
    }

    fn schedule_delete(&mut self) {
        let Some(id) = self.selected_task().map(|task| task.id.clone()) else {
            self.status = "No task selected".into();
            return;
        };
        if self.is_pending_delete(&id) {
            return;
        }
        self.flush_delete();
        self.pending_delete = Some(PendingDelete {
            task_id: id,
            due: Instant::now() + self.delete_delay,
        });
        self.status = "Deleting...".into();
    }

    fn is_pending_delete(&self, id: &str) -> bool {
        self.pending_delete
            .as_ref()
            .map(|pending| pending.task_id == id)
            .unwrap_or(false)
    }

    fn shift_day(&mut self, days: i64) {
        if let Some(day) = self
            .selected_day
            .checked_add_signed(ChronoDuration::days(days))
        {
            self.set_day(day);
        }
    }

    fn set_day(&mut self, day: NaiveDate) {
        self.finish_edit();
        if day != self.selected_day {
            self.selected_day = day;
            self.selected = 0;
            self.list_offset = 0;
        }
        self.status = format!("Showing {}", day.format("%A, %B %-d %Y"));
    }

    /// Task rows in display order, skipping collapsed sections.
    fn visible_rows(&self) -> Vec<(Section, TaskId)> {
        let buckets = self.service.day(self.selected_day);
        let mut rows = Vec::new();
        if self.show_pending {
            rows.extend(buckets.pending.iter().map(|t| (Section::Pending, t.id.clone())));
        }
        if self.show_completed {
            rows.extend(
                buckets
                    .completed
                    .iter()
                    .map(|t| (Section::Completed, t.id.clone())),
            );
        }
        rows
    }

    fn selected_task(&self) -> Option<&Task> {
        let rows = self.visible_rows();
        let (_, id) = rows.get(self.selected)?;
        self.service.get(id)
    }

    fn select_task(&mut self, id: &str) {
        if let Some(idx) = self.visible_rows().iter().position(|(_, row)| row == id) {
            self.selected = idx;
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.visible_rows().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(8),
                Constraint::Length(4),
            ])
            .split(f.size());

        self.draw_header(f, layout[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(CALENDAR_WIDTH), Constraint::Min(20)])
            .split(layout[1]);
        let counts = self.service.day_counts();
        self.draw_calendar(f, body[0], &counts);
        self.list_offset = self.draw_tasks(f, body[1]);

        self.draw_footer(f, layout[2]);
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let saved = match self.service.last_saved() {
            Some(at) => format!("saved {}", format_elapsed(at)),
            None => "not saved yet".to_string(),
        };
        let spans = vec![
            Span::styled(
                "daylist ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                self.selected_day.format("%A, %B %-d %Y").to_string(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  •  "),
            Span::styled(
                self.service.repository().describe(),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw("  •  "),
            Span::styled(saved, Style::default().fg(Color::Gray)),
        ];

        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        let paragraph = Paragraph::new(Line::from(spans))
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    fn draw_calendar(
        &self,
        f: &mut ratatui::Frame<'_>,
        area: Rect,
        counts: &HashMap<NaiveDate, usize>,
    ) {
        let focused = self.focus == Focus::Calendar;
        let cursor = self.selected_day;
        let month_start =
            NaiveDate::from_ymd_opt(cursor.year(), cursor.month(), 1).unwrap_or(cursor);
        let days = days_in_month(month_start.year(), month_start.month());
        let start_offset = month_start.weekday().num_days_from_monday();
        let today = self.service.today();

        let mut lines = Vec::new();
        lines.push(Line::from(Span::styled(
            format!("{} {}", month_start.format("%B"), month_start.year()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )));
        let headings = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
        let header_spans: Vec<Span<'static>> = headings
            .iter()
            .map(|h| Span::styled(format!("{:^6} ", h), Style::default().fg(Color::Gray)))
            .collect();
        lines.push(Line::from(header_spans));

        let mut day: i32 = 1 - start_offset as i32;
        while day <= days as i32 {
            let mut spans = Vec::new();
            for _ in 0..7 {
                if day < 1 || day > days as i32 {
                    spans.push(Span::raw("      "));
                } else if let Some(date) =
                    NaiveDate::from_ymd_opt(month_start.year(), month_start.month(), day as u32)
                {
                    let count = counts.get(&date).copied().unwrap_or(0);
                    let text = if count > 0 {
                        format!("{:>2}({:>2})", day, count.min(99))
                    } else {
                        format!("{:>2}    ", day)
                    };
                    let mut style = Style::default().fg(if count > 0 {
                        Color::LightYellow
                    } else {
                        Color::Gray
                    });
                    if date == today {
                        style = style.add_modifier(Modifier::UNDERLINED);
                    }
                    if date == cursor {
                        style = style
                            .bg(if focused { Color::Cyan } else { Color::Blue })
                            .fg(Color::Black)
                            .add_modifier(Modifier::BOLD);
                    }
                    spans.push(Span::styled(format!("{:>6}", text), style));
                }
                spans.push(Span::raw(" "));
                day += 1;
            }
            lines.push(Line::from(spans));
        }

        let block = Block::default()
            .title(Span::styled(
                "Calendar",
                Style::default()
                    .fg(if focused { Color::Cyan } else { Color::Gray })
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if focused {
                Color::Cyan
            } else {
                Color::DarkGray
            }));
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(paragraph, area);
    }

    /// Renders both sections and returns the scroll offset it used.
    fn draw_tasks(&self, f: &mut ratatui::Frame<'_>, area: Rect) -> usize {
        let focused = self.focus == Focus::Tasks;
        let buckets = self.service.day(self.selected_day);
        let rows = self.visible_rows();
        let selected_id = rows.get(self.selected).map(|(_, id)| id.as_str());

        let mut items = Vec::new();
        let mut selected_item = None;
        for section in [Section::Pending, Section::Completed] {
            let expanded = match section {
                Section::Pending => self.show_pending,
                Section::Completed => self.show_completed,
            };
            let tasks = buckets.section(section);
            items.push(section_header(section, tasks.len(), expanded));
            if !expanded {
                continue;
            }
            if tasks.is_empty() {
                items.push(
                    ListItem::new("    No tasks found").style(
                        Style::default()
                            .fg(Color::DarkGray)
                            .add_modifier(Modifier::ITALIC),
                    ),
                );
                continue;
            }
            for task in tasks {
                if Some(task.id.as_str()) == selected_id {
                    selected_item = Some(items.len());
                }
                items.push(self.task_item(task));
            }
        }
        items.push(ListItem::new(Line::from(Span::styled(
            "  + New Task (n)",
            Style::default()
                .fg(Color::LightMagenta)
                .add_modifier(Modifier::BOLD),
        ))));

        let mut state = ListState::default();
        let viewport = area.height.saturating_sub(2) as usize;
        let anchor = selected_item.unwrap_or(0);
        let offset = adjust_offset(anchor, self.list_offset, viewport, 1, items.len());
        *state.offset_mut() = offset;
        if focused {
            state.select(selected_item);
        }

        let block = Block::default()
            .title(Span::styled(
                day_title(&buckets),
                Style::default()
                    .fg(if focused { Color::Cyan } else { Color::Gray })
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if focused {
                Color::Cyan
            } else {
                Color::DarkGray
            }));
        let list = List::new(items).block(block).highlight_style(
            Style::default()
                .bg(Color::Rgb(40, 44, 56))
                .add_modifier(Modifier::BOLD),
        );
        f.render_stateful_widget(list, area, &mut state);
        offset
    }

    fn task_item(&self, task: &Task) -> ListItem<'static> {
        let deleting = self.is_pending_delete(&task.id);
        let glyph = if task.is_completed { "☑" } else { "☐" };
        let time = filter::format_time(&task.date, self.service.time_zone());

        let (title_text, title_editing) = match &self.mode {
            Mode::EditingTitle { task_id, field, .. } if task_id == &task.id => {
                (field.with_caret(), true)
            }
            _ => (display_title(task).to_string(), false),
        };
        let (time_text, time_editing) = match &self.mode {
            Mode::EditingTime { task_id, field } if task_id == &task.id => {
                (format!("{:<6}", field.with_caret()), true)
            }
            _ => (format!("{:<5}", time), false),
        };

        let mut title_style = if task.is_completed {
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::CROSSED_OUT)
        } else if task.has_blank_title() && !title_editing {
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC)
        } else {
            Style::default().fg(Color::White)
        };
        if title_editing {
            title_style = Style::default().fg(Color::Cyan);
        }
        let time_style = if time_editing {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };

        let mut spans = vec![
            Span::raw("    "),
            Span::styled(
                glyph,
                Style::default()
                    .fg(Color::LightBlue)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(time_text, time_style),
            Span::raw("  "),
            Span::styled(title_text, title_style),
        ];
        if deleting {
            spans.push(Span::styled(
                "  deleting",
                Style::default().fg(Color::LightRed),
            ));
        }
        let mut item = ListItem::new(Line::from(spans));
        if deleting {
            item = item.style(Style::default().add_modifier(Modifier::DIM));
        }
        item
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(2)])
            .split(area);

        let help_bar = Paragraph::new(self.footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help_bar, rows[0]);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(rows[1]);

        let status = Paragraph::new(self.status.clone())
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(status, bottom[0]);

        let detail = match self.selected_task() {
            Some(task) => selected_task_detail(task, self.service.time_zone()),
            None => Line::from("No task selected"),
        };
        let detail = Paragraph::new(detail).wrap(Wrap { trim: true }).block(
            Block::default()
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray))
                .title("Selected"),
        );
        f.render_widget(detail, bottom[1]);
    }

    fn footer_help_line(&self) -> Line<'static> {
        let key = |k: &'static str, color: Color| Span::styled(k, Style::default().fg(color));
        match (&self.mode, self.focus) {
            (Mode::EditingTitle { .. }, _) | (Mode::EditingTime { .. }, _) => Line::from(vec![
                key("Enter", Color::LightGreen),
                Span::raw(" save  "),
                key("Esc", Color::LightRed),
                Span::raw(" cancel  "),
                key("Tab", Color::LightCyan),
                Span::raw(" save and leave"),
            ]),
            (Mode::Normal, Focus::Calendar) => Line::from(vec![
                key("←→", Color::LightCyan),
                Span::raw(" day  "),
                key("↑↓", Color::LightCyan),
                Span::raw(" week  "),
                key("t", Color::LightCyan),
                Span::raw(" today  "),
                key("Tab/Enter", Color::LightCyan),
                Span::raw(" tasks  "),
                key("n", Color::LightMagenta),
                Span::raw(" new  "),
                key("q", Color::LightRed),
                Span::raw(" quit"),
            ]),
            (Mode::Normal, Focus::Tasks) => Line::from(vec![
                key("↑↓", Color::LightCyan),
                Span::raw(" select  "),
                key("←→", Color::LightCyan),
                Span::raw(" day  "),
                key("Space", Color::LightGreen),
                Span::raw(" done  "),
                key("e", Color::LightYellow),
                Span::raw(" title  "),
                key("@", Color::LightYellow),
                Span::raw(" time  "),
                key("d", Color::LightRed),
                Span::raw(" delete  "),
                key("p/c", Color::LightCyan),
                Span::raw(" fold  "),
                key("n", Color::LightMagenta),
                Span::raw(" new  "),
                key("q", Color::LightRed),
                Span::raw(" quit"),
            ]),
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn section_header(section: Section, count: usize, expanded: bool) -> ListItem<'static> {
    let arrow = if expanded { "▾" } else { "▸" };
    let label = if count == 0 {
        format!("{} {}", arrow, section.label())
    } else {
        format!("{} {} ({})", arrow, section.label(), count)
    };
    ListItem::new(Line::from(Span::styled(
        label,
        Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
    )))
}

fn day_title(buckets: &DayBuckets<'_>) -> String {
    format!(
        "{} ({} done of {})",
        buckets.day.format("%a %Y-%m-%d"),
        buckets.completed.len(),
        buckets.len()
    )
}

fn display_title(task: &Task) -> &str {
    if task.has_blank_title() {
        "Untitled"
    } else {
        task.title.as_str()
    }
}

fn selected_task_detail<Tz: TimeZone>(task: &Task, tz: &Tz) -> Line<'static> {
    let state = if task.is_completed {
        Span::styled("completed", Style::default().fg(Color::LightGreen))
    } else {
        Span::styled("pending", Style::default().fg(Color::LightYellow))
    };
    Line::from(vec![
        Span::styled(
            display_title(task).to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            filter::format_time(&task.date, tz),
            Style::default().fg(Color::LightRed),
        ),
        Span::raw("  "),
        state,
        Span::raw("  "),
        Span::styled(
            format!("[{}]", task.id),
            Style::default().fg(Color::DarkGray),
        ),
    ])
}

fn adjust_offset(
    selected: usize,
    current_offset: usize,
    viewport: usize,
    scrolloff: usize,
    len: usize,
) -> usize {
    if viewport == 0 || len == 0 {
        return 0;
    }
    let max_offset = len.saturating_sub(viewport);
    let margin = scrolloff.min(viewport.saturating_sub(1));
    let mut offset = current_offset.min(max_offset);
    if selected < offset.saturating_add(margin) {
        offset = selected.saturating_sub(margin);
    } else {
        let upper = offset
            .saturating_add(viewport.saturating_sub(1))
            .saturating_sub(margin);
        if selected > upper {
            offset = selected.saturating_add(margin + 1).saturating_sub(viewport);
        }
    }
    offset.min(max_offset)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    next.and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn prev_boundary(cursor: usize, text: &str) -> usize {
    text[..cursor]
        .char_indices()
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_boundary(cursor: usize, text: &str) -> usize {
    text[cursor..]
        .chars()
        .next()
        .map(|ch| cursor + ch.len_utf8())
        .unwrap_or(text.len())
}

fn format_elapsed(last: Instant) -> String {
    let secs = last.elapsed().as_secs();
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStore;
    use crate::storage::MemoryRepository;
    use chrono::{NaiveTime, Utc};
    use ratatui::backend::TestBackend;

    fn app_with(config: Config) -> App<MemoryRepository, Utc> {
        let service = TodoService::open(MemoryRepository::new(), Utc).expect("open");
        let mut app = App::new(service, &config);
        app.selected_day = NaiveDate::from_ymd_opt(2024, 5, 8).expect("valid day");
        app
    }

    fn app() -> App<MemoryRepository, Utc> {
        app_with(Config::default())
    }

    fn press(app: &mut App<MemoryRepository, Utc>, code: KeyCode) -> bool {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(app: &mut App<MemoryRepository, Utc>, text: &str) {
        for ch in text.chars() {
            press(app, KeyCode::Char(ch));
        }
    }

    fn add_named(app: &mut App<MemoryRepository, Utc>, title: &str) -> TaskId {
        press(app, KeyCode::Char('n'));
        type_text(app, title);
        press(app, KeyCode::Enter);
        app.selected_task().map(|t| t.id.clone()).expect("new task selected")
    }

    #[test]
    fn new_task_opens_title_editor_on_selected_day() {
        let mut app = app();
        app.show_pending = false;
        press(&mut app, KeyCode::Char('n'));
        assert!(app.show_pending);
        let task_id = match &app.mode {
            Mode::EditingTitle { task_id, .. } => task_id.clone(),
            _ => panic!("expected title editor"),
        };
        let task = app.service.get(&task_id).expect("created");
        assert_eq!(filter::local_day(&task.date, &Utc), app.selected_day);
        assert_eq!(app.selected_task().map(|t| t.id.clone()), Some(task_id));
    }

    #[test]
    fn typed_title_is_saved_on_enter() {
        let mut app = app();
        let id = add_named(&mut app, "Buy bread");
        assert!(matches!(app.mode, Mode::Normal));
        let saved = app.service.repository().snapshot();
        assert_eq!(saved.get(&id).map(|t| t.title.as_str()), Some("Buy bread"));
    }

    #[test]
    fn escaping_a_new_task_discards_it() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "half typed");
        press(&mut app, KeyCode::Esc);
        assert!(app.service.store().is_empty());
        assert!(app.service.repository().snapshot().is_empty());
    }

    #[test]
    fn losing_focus_while_editing_empty_title_deletes_task() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        app.background();
        assert!(matches!(app.mode, Mode::Normal));
        assert!(app.service.store().is_empty());
    }

    #[test]
    fn losing_focus_keeps_typed_title() {
        let mut app = app();
        press(&mut app, KeyCode::Char('n'));
        type_text(&mut app, "Draft");
        app.background();
        assert_eq!(app.service.store().len(), 1);
        assert_eq!(app.selected_task().map(|t| t.title.clone()), Some("Draft".into()));
    }

    #[test]
    fn space_toggles_and_selection_follows_task() {
        let mut app = app();
        let first = add_named(&mut app, "One");
        add_named(&mut app, "Two");
        app.select_task(&first);
        press(&mut app, KeyCode::Char(' '));
        let buckets = app.service.day(app.selected_day);
        assert_eq!(buckets.locate(&first), Some((Section::Completed, 0)));
        assert_eq!(app.selected_task().map(|t| t.id.clone()), Some(first));
    }

    #[test]
    fn collapsed_sections_hide_rows_from_selection() {
        let mut app = app();
        let done = add_named(&mut app, "Done already");
        press(&mut app, KeyCode::Char(' '));
        add_named(&mut app, "Still open");
        press(&mut app, KeyCode::Char('p'));
        assert_eq!(app.visible_rows(), vec![(Section::Completed, done)]);
        press(&mut app, KeyCode::Char('c'));
        assert!(app.visible_rows().is_empty());
        assert!(app.selected_task().is_none());
    }

    #[test]
    fn delete_waits_for_the_deadline() {
        let mut app = app();
        let id = add_named(&mut app, "Swipe me");
        press(&mut app, KeyCode::Char('d'));
        assert!(app.is_pending_delete(&id));

        app.tick(Instant::now());
        assert!(app.service.get(&id).is_some());

        app.tick(Instant::now() + Duration::from_secs(1));
        assert!(app.service.get(&id).is_none());
        assert!(app.pending_delete.is_none());
    }

    #[test]
    fn zero_delay_deletes_on_next_tick() {
        let mut app = app_with(Config {
            delete_delay_ms: 0,
            ..Config::default()
        });
        let id = add_named(&mut app, "Gone");
        press(&mut app, KeyCode::Delete);
        app.tick(Instant::now());
        assert!(app.service.get(&id).is_none());
    }

    #[test]
    fn time_editor_accepts_hh_mm_and_keeps_the_day() {
        let mut app = app();
        let id = add_named(&mut app, "Standup");
        press(&mut app, KeyCode::Char('@'));
        for _ in 0..5 {
            press(&mut app, KeyCode::Backspace);
        }
        type_text(&mut app, "0x9:3z0");
        press(&mut app, KeyCode::Enter);
        let task = app.service.get(&id).expect("still there");
        assert_eq!(
            filter::local_time(&task.date, &Utc),
            NaiveTime::from_hms_opt(9, 30, 0).expect("valid time")
        );
        assert_eq!(filter::local_day(&task.date, &Utc), app.selected_day);
    }

    #[test]
    fn bad_time_keeps_editor_open() {
        let mut app = app();
        add_named(&mut app, "Lunch");
        press(&mut app, KeyCode::Char('@'));
        type_text(&mut app, "99");
        press(&mut app, KeyCode::Enter);
        assert!(matches!(app.mode, Mode::EditingTime { .. }));
        assert!(app.status.contains("HH:MM"));
    }

    #[test]
    fn arrows_change_day_and_reset_selection() {
        let mut app = app();
        add_named(&mut app, "Today thing");
        press(&mut app, KeyCode::Right);
        assert_eq!(
            app.selected_day,
            NaiveDate::from_ymd_opt(2024, 5, 9).expect("valid day")
        );
        assert!(app.visible_rows().is_empty());
        press(&mut app, KeyCode::Tab);
        press(&mut app, KeyCode::Up);
        assert_eq!(
            app.selected_day,
            NaiveDate::from_ymd_opt(2024, 5, 2).expect("valid day")
        );
    }

    #[test]
    fn quitting_flushes_deletes_and_sweeps_blanks() {
        let mut app = app();
        let id = add_named(&mut app, "Pending delete");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('n'));
        assert!(!press(&mut app, KeyCode::Esc));
        press(&mut app, KeyCode::Char('n'));
        app.mode = Mode::Normal;
        assert!(press(&mut app, KeyCode::Char('q')));
        app.shutdown();
        assert!(app.service.get(&id).is_none());
        assert!(app.service.store().is_empty());
        assert!(app.service.repository().snapshot().is_empty());
    }

    #[test]
    fn startup_sweeps_blank_tasks_from_an_earlier_session() {
        let date = Utc
            .with_ymd_and_hms(2024, 5, 8, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut store = TaskStore::new();
        store.insert(Task::new("blank1".to_string(), date));
        let mut named = Task::new("named1".to_string(), date);
        named.title = "Kept".to_string();
        store.insert(named);

        let service =
            TodoService::open(MemoryRepository::with_store(store), Utc).expect("open");
        let mut app = App::new(service, &Config::default());
        app.selected_day = date.date_naive();

        assert_eq!(
            app.visible_rows(),
            vec![(Section::Pending, "named1".to_string())]
        );
        let saved = app.service.repository().snapshot();
        assert!(!saved.contains("blank1"));
        assert!(saved.contains("named1"));
    }

    #[test]
    fn rows_marked_for_deletion_cannot_be_edited() {
        let mut app = app();
        let id = add_named(&mut app, "Going away");
        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('e'));
        assert!(matches!(app.mode, Mode::Normal));
        press(&mut app, KeyCode::Char('@'));
        assert!(matches!(app.mode, Mode::Normal));

        app.tick(Instant::now() + Duration::from_secs(1));
        assert!(app.service.get(&id).is_none());
        assert!(!app.status.contains("Could not save"));
    }

    #[test]
    fn failed_saves_stay_out_of_the_screen() {
        let mut app = app();
        app.service.repository().set_fail_saves(true);
        add_named(&mut app, "Unsaved");
        assert!(app.service.last_save_failed());

        let mut terminal = Terminal::new(TestBackend::new(120, 30)).expect("terminal");
        terminal.draw(|f| app.draw(f)).expect("draw");
        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains("Unsaved"));
        assert!(!screen.to_lowercase().contains("fail"));
    }

    #[test]
    fn field_editing_handles_multibyte_chars() {
        let mut field = FieldValue::new("héllo");
        field.move_left();
        field.move_left();
        field.move_left();
        field.move_left();
        field.backspace();
        assert_eq!(field.value, "éllo");
        field.delete();
        assert_eq!(field.value, "llo");
        field.end();
        field.insert_char('!');
        assert_eq!(field.with_caret(), "llo!▌");
    }

    #[test]
    fn offsets_keep_selection_visible() {
        assert_eq!(adjust_offset(0, 0, 5, 1, 20), 0);
        assert_eq!(adjust_offset(10, 0, 5, 1, 20), 7);
        assert_eq!(adjust_offset(2, 7, 5, 1, 20), 1);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 12), 31);
    }
}
