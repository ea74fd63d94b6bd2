use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use std::time::Duration;
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    watch,
};

use crate::{
    app::{format_time, AppCommand, AppEvent, AppState, Focus},
    playback::{PlaybackSnapshot, PlaybackState, PlayerHandle},
    types::{SongScope, Visibility},
};

const ACCENT: Color = Color::Rgb(29, 185, 84);

pub struct UiContext<'a> {
    pub events: &'a mut UnboundedReceiver<AppEvent>,
    pub commands: UnboundedSender<AppCommand>,
    pub player: &'a PlayerHandle,
    pub playback: watch::Receiver<PlaybackSnapshot>,
    pub seek_step: f64,
}

pub fn run<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut AppState,
    mut ctx: UiContext<'_>,
) -> Result<()> {
    loop {
        while let Ok(event) = ctx.events.try_recv() {
            app.handle_event(event);
        }
        if app.take_refresh_request() && app.scope == SongScope::Private {
            app.loading_songs = true;
            send(&ctx.commands, AppCommand::LoadSongs { scope: SongScope::Private });
        }

        let snapshot = ctx.playback.borrow_and_update().clone();
        terminal.draw(|frame| render(frame, app, &snapshot))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if !handle_key(key, app, &ctx) {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn send(commands: &UnboundedSender<AppCommand>, command: AppCommand) {
    let _ = commands.send(command);
}

fn handle_key(key: KeyEvent, app: &mut AppState, ctx: &UiContext<'_>) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return false;
    }
    if key.code == KeyCode::Tab {
        app.focus = match app.focus {
            Focus::Prompt => Focus::Songs,
            Focus::Songs => Focus::Prompt,
        };
        return true;
    }

    match app.focus {
        Focus::Prompt => match key.code {
            KeyCode::Esc => app.focus = Focus::Songs,
            KeyCode::Enter => {
                if let Some(prompt) = app.take_prompt() {
                    send(&ctx.commands, AppCommand::SubmitPrompt { prompt });
                }
            }
            KeyCode::Backspace => {
                app.input.pop();
            }
            KeyCode::Char(c) => app.input.push(c),
            _ => {}
        },
        Focus::Songs => match key.code {
            KeyCode::Char('q') => return false,
            KeyCode::Down | KeyCode::Char('j') => app.select_next(),
            KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
            KeyCode::Enter => {
                if let Some(track) = app.selected_track() {
                    ctx.player.play(track.clone());
                }
            }
            KeyCode::Char(' ') => ctx.player.toggle_play_pause(),
            KeyCode::Char('p') => ctx.player.pause(),
            KeyCode::Home => ctx.player.seek_to(0.0),
            KeyCode::Left => ctx.player.seek_by(-ctx.seek_step),
            KeyCode::Right => ctx.player.seek_by(ctx.seek_step),
            KeyCode::Char('v') => {
                if let Some(track) = app.selected_track() {
                    send(&ctx.commands, AppCommand::ToggleVisibility { id: track.id.clone() });
                }
            }
            KeyCode::Char('l') => {
                let scope = app.switch_scope();
                send(&ctx.commands, AppCommand::LoadSongs { scope });
            }
            KeyCode::Char('r') => {
                app.loading_songs = true;
                send(&ctx.commands, AppCommand::LoadSongs { scope: app.scope });
            }
            KeyCode::Char('i') | KeyCode::Char('/') => app.focus = Focus::Prompt,
            _ => {}
        },
    }
    true
}

fn render(frame: &mut Frame, app: &AppState, snapshot: &PlaybackSnapshot) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(4),
            Constraint::Length(1),
        ])
        .split(frame.size());

    render_prompt(frame, rows[0], app);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(rows[1]);
    render_songs(frame, body[0], app, snapshot);
    render_status(frame, body[1], app);
    render_player(frame, rows[2], snapshot);

    let help = match app.focus {
        Focus::Prompt => "Enter submit | Esc/Tab songs | Ctrl-C quit",
        Focus::Songs => {
            "Enter play | Space play/pause | p pause | ←/→ seek | Home restart | v visibility | l private/public | r refresh | Tab prompt | q quit"
        }
    };
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        rows[3],
    );
}

fn focus_style(active: bool) -> Style {
    if active {
        Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn render_prompt(frame: &mut Frame, area: Rect, app: &AppState) {
    let title = match app.job_label() {
        Some(label) if !app.can_submit() => format!("Prompt ({label})"),
        _ if app.submitting => "Prompt (submitting…)".to_string(),
        _ => "Prompt".to_string(),
    };
    let text = if app.can_submit() || !app.input.is_empty() {
        Span::raw(app.input.as_str())
    } else {
        Span::styled("Generating song...", Style::default().fg(Color::DarkGray))
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(focus_style(app.focus == Focus::Prompt));
    frame.render_widget(Paragraph::new(Line::from(text)).block(block), area);
}

fn render_songs(frame: &mut Frame, area: Rect, app: &AppState, snapshot: &PlaybackSnapshot) {
    let current_id = snapshot.track.as_ref().map(|track| &track.id);
    let items: Vec<ListItem> = app
        .songs
        .values()
        .map(|track| {
            let marker = if current_id == Some(&track.id) {
                match snapshot.state() {
                    PlaybackState::Playing => "▶ ",
                    _ => "‖ ",
                }
            } else {
                "  "
            };
            let visibility_style = match track.visibility {
                Visibility::Public => Style::default().fg(ACCENT),
                Visibility::Private => Style::default().fg(Color::DarkGray),
            };
            let mut spans = vec![
                Span::raw(marker),
                Span::raw(track.title.clone()),
                Span::raw("  "),
                Span::styled(format!("[{}]", track.visibility.label()), visibility_style),
            ];
            if let Some(owner) = &track.owner {
                spans.push(Span::styled(format!(" · {owner}"), Style::default().fg(Color::Gray)));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let title = if app.loading_songs {
        format!("{} (loading…)", app.scope.label())
    } else {
        format!("{} ({})", app.scope.label(), app.songs.len())
    };
    let list = List::new(items)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(focus_style(app.focus == Focus::Songs)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    state.select(app.selected_index());
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_status(frame: &mut Frame, area: Rect, app: &AppState) {
    let lines: Vec<Line> = if app.status_lines.is_empty() {
        vec![Line::from("Nothing yet.")]
    } else {
        app.status_lines
            .iter()
            .rev()
            .map(|line| {
                Line::from(vec![
                    Span::styled(
                        line.timestamp.format("%H:%M:%S ").to_string(),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::raw(line.content.clone()),
                ])
            })
            .collect()
    };
    let block = Block::default().title("Status").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block).wrap(Wrap { trim: true }), area);
}

fn render_player(frame: &mut Frame, area: Rect, snapshot: &PlaybackSnapshot) {
    let block = Block::default().title("Now Playing").borders(Borders::ALL);
    let Some(track) = &snapshot.track else {
        frame.render_widget(Paragraph::new("Nothing playing.").block(block), area);
        return;
    };

    let inner = block.inner(area);
    frame.render_widget(block, area);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(inner);

    let state = match (&snapshot.load_error, snapshot.state()) {
        (Some(_), _) => "unavailable",
        (None, PlaybackState::Playing) => "playing",
        (None, _) => "paused",
    };
    let header = Line::from(vec![
        Span::styled(track.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled(format!("  AI Generated · {state}"), Style::default().fg(Color::Gray)),
    ]);
    frame.render_widget(Paragraph::new(header), rows[0]);

    let duration = snapshot.duration_seconds.unwrap_or(0.0);
    let label = format!(
        "{} / {}",
        format_time(snapshot.position_seconds),
        format_time(duration)
    );
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(ACCENT).bg(Color::Black))
        .ratio(snapshot.progress_ratio())
        .label(label);
    frame.render_widget(gauge, rows[1]);
}
