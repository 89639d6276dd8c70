use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use ratatui::buffer::Buffer;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Clear, List, ListItem, Paragraph, Widget, Wrap,
};

use super::{App, InputMode, Screen};
use crate::banner::Tone;
use crate::labels::serialize_labels;
use crate::log_sanitize::log_lines;
use crate::model::{Labels, time_since};
use crate::navigator::Root;
use crate::status::{agent_badge, build_badge};
use crate::sync::Cadence;

fn local_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn opt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(local_time).unwrap_or_else(|| "-".into())
}

fn field(label: &str, value: impl Into<String>) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{label:<12}"), Style::default().fg(Color::Gray)),
        Span::raw(value.into()),
    ])
}

fn labels_summary(labels: &Labels) -> String {
    if labels.is_empty() {
        return "-".into();
    }
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn highlight() -> Style {
    Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD)
}

fn placeholder(loaded: bool, empty_hint: &str) -> Paragraph<'static> {
    let text = if loaded { empty_hint } else { "Loading..." };
    Paragraph::new(text.to_string()).style(Style::default().fg(Color::Gray))
}

impl App {
    pub(super) fn draw(&mut self, f: &mut ratatui::Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(2),
            ])
            .split(f.area());

        self.draw_header(f, chunks[0]);
        self.draw_banner(f, chunks[1]);
        self.draw_main(f, chunks[2]);
        self.draw_footer(f, chunks[3]);
        self.draw_modal(f);
    }

    fn crumb(&self) -> String {
        match &self.screen {
            Screen::Projects(_) => "projects".into(),
            Screen::Project(s) => format!("projects > {}", s.project.name),
            Screen::Build(s) => format!("projects > {} > build {}", s.project.name, s.build.id),
            Screen::Agents(s) => format!("agents [{}]", s.filter.label()),
            Screen::Agent(s) => format!("agents > {}", s.agent.name),
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame, area: Rect) {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let root = self.nav.kind().root();
        let tab = |label: &'static str, r: Root| {
            if root == r {
                Span::styled(
                    label,
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                Span::styled(label, Style::default().fg(Color::Gray))
            }
        };
        let line = Line::from(vec![
            Span::styled("GIP Console", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            tab(" 1 Projects ", Root::Projects),
            Span::raw(" "),
            tab(" 2 Agents ", Root::Agents),
            Span::raw("  "),
            Span::styled(self.crumb(), Style::default().fg(Color::LightBlue)),
            Span::raw("  "),
            Span::styled(self.cfg.base_url.clone(), Style::default().fg(Color::DarkGray)),
            Span::raw("  "),
            Span::styled(now, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(Text::from(line)).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_banner(&self, f: &mut ratatui::Frame, area: Rect) {
        let Some(b) = self.banner.current(Instant::now()) else {
            return;
        };
        let style = match b.tone {
            Tone::Info => Style::default().fg(Color::LightBlue),
            Tone::Success => Style::default().fg(Color::Green),
            Tone::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        };
        f.render_widget(Paragraph::new(b.text.clone()).style(style), area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame, area: Rect) {
        let editing = matches!(&self.screen, Screen::Agent(s) if s.draft.is_some());
        let hint = match (&self.input, &self.screen) {
            (InputMode::Form(_), _) => "[Tab/Up/Down] Field  [Enter] Submit  [Esc] Cancel",
            (InputMode::ConfirmDelete { .. }, _) => "[y] Delete  [n/Esc] Keep",
            _ if editing => "one key=value per line  [Ctrl+S] Save  [Esc] Discard",
            (_, Screen::Projects(_)) => {
                "[j/k] Move  [Enter] Open  [n] New project  [r] Reload  [D] Download by id  [Tab/1/2] Switch  [q] Quit"
            }
            (_, Screen::Project(_)) => {
                "[j/k] Move  [Enter] Open build  [b] Trigger build  [r] Reload  [Esc] Back  [q] Quit"
            }
            (_, Screen::Build(_)) => {
                "[j/k PgUp/PgDn] Scroll log  [d] Download  [r] Refresh  [Esc] Back  [q] Quit"
            }
            (_, Screen::Agents(_)) => {
                "[j/k] Move  [Enter] Open  [f] Cycle filter  [r] Refresh  [Tab/1/2] Switch  [q] Quit"
            }
            (_, Screen::Agent(_)) => {
                "[o/f/x] Online/Offline/Draining  [e] Edit labels  [X] Delete  [r] Refresh  [Esc] Back  [q] Quit"
            }
        };
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_main(&mut self, f: &mut ratatui::Frame, area: Rect) {
        let poll_hint = self.poll_hint();
        match &mut self.screen {
            Screen::Projects(s) => {
                let block = Block::default().borders(Borders::ALL).title("Projects");
                if s.projects.is_empty() {
                    f.render_widget(
                        placeholder(s.loaded, "No projects yet. Press n to create one.").block(block),
                        area,
                    );
                    return;
                }
                let items: Vec<ListItem> = s
                    .projects
                    .iter()
                    .map(|p| {
                        ListItem::new(Line::from(vec![
                            Span::styled(format!("#{:<5}", p.id), Style::default().fg(Color::DarkGray)),
                            Span::styled(format!("{:<24}", p.name), Style::default().fg(Color::White)),
                            Span::styled(format!("{:<10}", p.branch), Style::default().fg(Color::LightBlue)),
                            Span::raw(p.repo_url.clone()),
                        ]))
                    })
                    .collect();
                let list = List::new(items).block(block).highlight_style(highlight());
                f.render_stateful_widget(list, area, &mut s.list);
            }
            Screen::Project(s) => {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(6), Constraint::Min(0)])
                    .split(area);
                let info = vec![
                    field("Name", s.project.name.clone()),
                    field("Repository", s.project.repo_url.clone()),
                    field("Branch", s.project.branch.clone()),
                    field("Subdir", s.project.subdir.clone().unwrap_or_else(|| "-".into())),
                ];
                f.render_widget(
                    Paragraph::new(Text::from(info)).block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("Project #{}", s.project.id)),
                    ),
                    rows[0],
                );

                let block = Block::default().borders(Borders::ALL).title("Builds");
                if s.builds.is_empty() {
                    f.render_widget(
                        placeholder(s.loaded, "No builds yet. Press b to trigger one.").block(block),
                        rows[1],
                    );
                    return;
                }
                let items: Vec<ListItem> = s
                    .builds
                    .iter()
                    .map(|b| {
                        let badge = build_badge(b.status.as_str());
                        ListItem::new(Line::from(vec![
                            Span::styled(format!("#{:<6}", b.id), Style::default().fg(Color::DarkGray)),
                            badge.span(),
                            Span::raw("  "),
                            Span::styled(format!("{:<16}", b.branch), Style::default().fg(Color::LightBlue)),
                            Span::raw(local_time(b.created_at)),
                        ]))
                    })
                    .collect();
                let list = List::new(items).block(block).highlight_style(highlight());
                f.render_stateful_widget(list, rows[1], &mut s.list);
            }
            Screen::Build(s) => {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(8), Constraint::Min(0)])
                    .split(area);
                let badge = build_badge(s.build.status.as_str());
                let mut info = vec![
                    Line::from(vec![
                        Span::styled(format!("{:<12}", "Status"), Style::default().fg(Color::Gray)),
                        badge.span(),
                    ]),
                    field("Branch", s.build.branch.clone()),
                    field("Created", local_time(s.build.created_at)),
                    field("Started", opt_time(s.build.started_at)),
                    field("Ended", opt_time(s.build.ended_at)),
                ];
                if let Some(hint) = poll_hint {
                    info.push(Line::from(Span::styled(
                        hint,
                        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                    )));
                }
                f.render_widget(
                    Paragraph::new(Text::from(info)).block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("Build #{} of {}", s.build.id, s.project.name)),
                    ),
                    rows[0],
                );

                let log: Vec<Line> = match s.build.log_output.as_deref() {
                    Some(raw) => log_lines(raw).into_iter().map(Line::from).collect(),
                    None => vec![Line::from(Span::styled(
                        "no output yet",
                        Style::default().fg(Color::DarkGray),
                    ))],
                };
                let max_scroll = (log.len() as u16).saturating_sub(1);
                s.log_scroll = s.log_scroll.min(max_scroll);
                f.render_widget(
                    Paragraph::new(Text::from(log))
                        .block(Block::default().borders(Borders::ALL).title("Log"))
                        .scroll((s.log_scroll, 0)),
                    rows[1],
                );
            }
            Screen::Agents(s) => {
                let title = format!("Agents (filter: {})", s.filter.label());
                let block = Block::default().borders(Borders::ALL).title(title);
                if s.agents.is_empty() {
                    f.render_widget(placeholder(s.loaded, "No agents match.").block(block), area);
                    return;
                }
                let now = Utc::now();
                let items: Vec<ListItem> = s
                    .agents
                    .iter()
                    .map(|a| {
                        ListItem::new(Line::from(vec![
                            Span::styled(format!("#{:<5}", a.id), Style::default().fg(Color::DarkGray)),
                            Span::styled(format!("{:<20}", a.name), Style::default().fg(Color::White)),
                            agent_badge(a.status.as_str()).span(),
                            Span::raw("  "),
                            Span::styled(
                                format!("seen {:<10}", a.last_seen_label(now)),
                                Style::default().fg(Color::Gray),
                            ),
                            Span::raw(labels_summary(&a.labels)),
                        ]))
                    })
                    .collect();
                let list = List::new(items).block(block).highlight_style(highlight());
                f.render_stateful_widget(list, area, &mut s.list);
            }
            Screen::Agent(s) => {
                let rows = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(6), Constraint::Min(0)])
                    .split(area);
                let now = Utc::now();
                let info = vec![
                    Line::from(vec![
                        Span::styled(format!("{:<12}", "Status"), Style::default().fg(Color::Gray)),
                        agent_badge(s.agent.status.as_str()).span(),
                    ]),
                    field("Registered", format!(
                        "{} ({})",
                        local_time(s.agent.created_at),
                        time_since(s.agent.created_at, now)
                    )),
                    field("Last seen", s.agent.last_seen_label(now)),
                    field("Refresh", poll_hint.unwrap_or_default()),
                ];
                f.render_widget(
                    Paragraph::new(Text::from(info)).block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("Agent #{} {}", s.agent.id, s.agent.name)),
                    ),
                    rows[0],
                );

                match &s.draft {
                    Some(draft) => {
                        let cols = Layout::default()
                            .direction(Direction::Horizontal)
                            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                            .split(rows[1]);
                        let mut text = draft.text().to_string();
                        text.push('▏');
                        f.render_widget(
                            Paragraph::new(text)
                                .wrap(Wrap { trim: false })
                                .block(
                                    Block::default()
                                        .borders(Borders::ALL)
                                        .border_style(Style::default().fg(Color::Yellow))
                                        .title("Edit labels"),
                                ),
                            cols[0],
                        );
                        f.render_widget(
                            Paragraph::new(serialize_labels(draft.labels())).block(
                                Block::default()
                                    .borders(Borders::ALL)
                                    .title(format!("Will save {} label(s)", draft.labels().len())),
                            ),
                            cols[1],
                        );
                    }
                    None => {
                        let lines: Vec<Line> = if s.agent.labels.is_empty() {
                            vec![Line::from(Span::styled(
                                "no labels",
                                Style::default().fg(Color::DarkGray),
                            ))]
                        } else {
                            s.agent
                                .labels
                                .iter()
                                .map(|(k, v)| {
                                    Line::from(vec![
                                        Span::styled(format!("{k} "), Style::default().fg(Color::Cyan)),
                                        Span::raw(v.clone()),
                                    ])
                                })
                                .collect()
                        };
                        f.render_widget(
                            Paragraph::new(Text::from(lines))
                                .block(Block::default().borders(Borders::ALL).title("Labels")),
                            rows[1],
                        );
                    }
                }
            }
        }
    }

    /// "auto-refreshing every Ns" while the mounted view is being polled.
    pub(super) fn poll_hint(&self) -> Option<String> {
        let sync = self.screen.sync();
        let period = match sync.cadence() {
            Cadence::Once => return None,
            Cadence::Every(p) | Cadence::WhileInProgress(p) => p,
        };
        sync.is_live()
            .then(|| format!("auto-refreshing every {}s", period.as_secs()))
    }

    fn draw_modal(&self, f: &mut ratatui::Frame) {
        let (title, body): (String, Vec<Line>) = match &self.input {
            InputMode::Normal => return,
            InputMode::Form(form) => {
                let mut lines = Vec::new();
                for (i, fld) in form.fields().iter().enumerate() {
                    let focused = i == form.focus();
                    let marker = if fld.required { "*" } else { " " };
                    let label_style = if focused {
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(Color::Gray)
                    };
                    let mut value = fld.value.clone();
                    if focused {
                        value.push('▏');
                    }
                    lines.push(Line::from(vec![
                        Span::styled(format!("{:<16}{marker} ", fld.label), label_style),
                        Span::raw(value),
                    ]));
                }
                (form.title(), lines)
            }
            InputMode::ConfirmDelete { agent_id, name } => (
                "Delete agent".into(),
                vec![
                    Line::from(format!("Delete agent #{agent_id} ({name})?")),
                    Line::from(""),
                    Line::from(Span::styled(
                        "y = delete, n = keep",
                        Style::default().fg(Color::Yellow),
                    )),
                ],
            ),
        };

        let area = centered_rect(70, 30, f.area());
        let shadow = shadow_rect(area, f.area());
        f.render_widget(
            Fill {
                style: Style::default()
                    .bg(Color::Black)
                    .add_modifier(Modifier::DIM),
            },
            shadow,
        );
        f.render_widget(Clear, area);
        let p = Paragraph::new(Text::from(body))
            .style(Style::default().fg(Color::White).bg(Color::DarkGray))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .title(title),
            );
        f.render_widget(p, area);
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r)[1];
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical)[1]
}

fn shadow_rect(inner: Rect, bounds: Rect) -> Rect {
    let max_x = bounds.x.saturating_add(bounds.width);
    let max_y = bounds.y.saturating_add(bounds.height);
    let x = inner.x.saturating_add(1).min(max_x.saturating_sub(1));
    let y = inner.y.saturating_add(1).min(max_y.saturating_sub(1));
    Rect {
        x,
        y,
        width: inner.width.min(max_x.saturating_sub(x)),
        height: inner.height.min(max_y.saturating_sub(y)),
    }
}

struct Fill {
    style: Style,
}

impl Widget for Fill {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for y in area.y..area.y.saturating_add(area.height) {
            for x in area.x..area.x.saturating_add(area.width) {
                buf[(x, y)].set_char(' ').set_style(self.style);
            }
        }
    }
}
