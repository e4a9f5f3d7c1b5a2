use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use marie_reconcile::{export_session, reports, ReconcileSession, ReportSummary, SessionMatch};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    History,
    Reports,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Dashboard => Page::History,
            Page::History => Page::Reports,
            Page::Reports => Page::Dashboard,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Dashboard => Page::Reports,
            Page::History => Page::Dashboard,
            Page::Reports => Page::History,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Dashboard => "Dashboard",
            Page::History => "Histórico",
            Page::Reports => "Relatórios",
        }
    }
}

pub struct App {
    pub sessions: Vec<ReconcileSession>,
    /// History rows: all sessions, or the search projection
    pub visible: Vec<SessionMatch>,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
    pub search_query: String,
    pub search_input: bool,
    pub status_message: Option<String>,
    pub export_dir: PathBuf,
    summary: ReportSummary,
}

impl App {
    pub fn new(sessions: Vec<ReconcileSession>, export_dir: PathBuf) -> Self {
        let summary = reports::report_summary(&sessions);
        let mut app = Self {
            sessions,
            visible: Vec::new(),
            state: TableState::default(),
            current_page: Page::Dashboard,
            show_detail: false,
            search_query: String::new(),
            search_input: false,
            status_message: None,
            export_dir,
            summary,
        };
        app.refresh_visible();
        app
    }

    fn refresh_visible(&mut self) {
        self.visible = if self.search_query.trim().is_empty() {
            self.sessions
                .iter()
                .map(|session| SessionMatch {
                    matching_count: session.transaction_count(),
                    session: session.clone(),
                })
                .collect()
        } else {
            reports::search_sessions(&self.sessions, &self.search_query)
        };

        if self.visible.is_empty() {
            self.state.select(None);
            self.show_detail = false;
        } else {
            self.state.select(Some(0));
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn toggle_detail(&mut self) {
        if self.selected_session().is_some() {
            self.show_detail = !self.show_detail;
        }
    }

    pub fn selected_session(&self) -> Option<&ReconcileSession> {
        self.state
            .selected()
            .and_then(|i| self.visible.get(i))
            .map(|m| &m.session)
    }

    pub fn start_search(&mut self) {
        self.current_page = Page::History;
        self.search_input = true;
    }

    pub fn push_search_char(&mut self, c: char) {
        self.search_query.push(c);
        self.refresh_visible();
    }

    pub fn pop_search_char(&mut self) {
        self.search_query.pop();
        self.refresh_visible();
    }

    pub fn finish_search(&mut self) {
        self.search_input = false;
    }

    pub fn clear_search(&mut self) {
        self.search_query.clear();
        self.search_input = false;
        self.refresh_visible();
    }

    /// Export the full stored session behind the selected row
    pub fn export_selected(&mut self) -> Option<PathBuf> {
        let id = self.selected_session()?.id.clone();
        let session = self.sessions.iter().find(|s| s.id == id)?;

        match export_session(session, &self.export_dir) {
            Ok(path) => {
                self.status_message = Some(format!("Exportado: {}", path.display()));
                Some(path)
            }
            Err(e) => {
                self.status_message = Some(format!("Falha ao exportar: {:#}", e));
                None
            }
        }
    }

    pub fn next(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) => len - 1,
            Some(i) => i - 1,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.visible.len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        let i = self.state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        self.state.select(Some(i));
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };

        if app.search_input {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => app.finish_search(),
                KeyCode::Backspace => app.pop_search_char(),
                KeyCode::Char(c) => app.push_search_char(c),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
            KeyCode::Tab => app.next_page(),
            KeyCode::BackTab => app.previous_page(),
            KeyCode::Char('/') => app.start_search(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
            KeyCode::Char('c') => app.clear_search(),
            KeyCode::Enter if app.current_page == Page::History => app.toggle_detail(),
            KeyCode::Char('e') if app.current_page == Page::History => {
                app.export_selected();
            }
            KeyCode::Down | KeyCode::Char('j') => app.next(),
            KeyCode::Up | KeyCode::Char('k') => app.previous(),
            KeyCode::PageDown => app.page_down(),
            KeyCode::PageUp => app.page_up(),
            KeyCode::Home if !app.visible.is_empty() => app.state.select(Some(0)),
            KeyCode::End if !app.visible.is_empty() => app.state.select(Some(app.visible.len() - 1)),
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Dashboard => render_dashboard(f, chunks[1], app),
        Page::History if app.show_detail => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                .split(chunks[1]);

            render_history(f, content_chunks[0], app);
            render_detail_panel(f, content_chunks[1], app);
        }
        Page::History => render_history(f, chunks[1], app),
        Page::Reports => render_reports(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn header_style() -> Style {
    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
}

fn label(text: &str) -> Span<'_> {
    Span::styled(text, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Dashboard, Page::History, Page::Reports];

    let mut tab_spans = vec![Span::styled(" Marie ", Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD))];
    for (i, page) in pages.iter().enumerate() {
        tab_spans.push(Span::raw(if i == 0 { " " } else { " │ " }));

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        tab_spans.push(Span::styled(page.title(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Lotes: {}", app.sessions.len()),
        Style::default().fg(Color::White),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_dashboard(f: &mut Frame, area: Rect, app: &App) {
    let totals = reports::dashboard_totals(&app.sessions);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);

    let last = totals
        .last_session
        .map(|d| local_date(&d, "%d/%m/%Y"))
        .unwrap_or_else(|| "-".to_string());

    let content = vec![
        Line::from(""),
        Line::from(vec![
            label("  Total Conciliado: "),
            Span::styled(brl(totals.total_amount), Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![label("  Transações: "), Span::raw(totals.transaction_count.to_string())]),
        Line::from(vec![label("  Último Lote: "), Span::raw(last)]),
    ];

    let summary = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Resumo "),
    );
    f.render_widget(summary, chunks[0]);

    let header = Row::new(["Data", "Itens", "Valor"].map(|h| Cell::from(h).style(header_style())))
        .style(Style::default().bg(Color::DarkGray));

    let rows = reports::recent_sessions(&app.sessions, 5).iter().map(|session| {
        Row::new(vec![
            Cell::from(local_date(&session.date, "%d/%m/%Y %H:%M")),
            Cell::from(session.transaction_count().to_string()),
            Cell::from(brl(session.total_amount)).style(Style::default().fg(Color::Green)),
        ])
    });

    let table = Table::new(rows, [Constraint::Length(20), Constraint::Length(8), Constraint::Length(18)])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(" Lotes Recentes "),
        );
    f.render_widget(table, chunks[1]);
}

fn render_history(f: &mut Frame, area: Rect, app: &mut App) {
    let header = Row::new(["Data", "Itens", "Valor", "ID"].map(|h| Cell::from(h).style(header_style())))
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let searching = !app.search_query.trim().is_empty();
    let rows = app.visible.iter().map(|m| {
        let items = if searching {
            format!("{}/{}", m.matching_count, session_size(&app.sessions, &m.session.id))
        } else {
            m.matching_count.to_string()
        };

        Row::new(vec![
            Cell::from(local_date(&m.session.date, "%d/%m/%Y %H:%M")),
            Cell::from(items),
            Cell::from(brl(m.session.total_amount)).style(Style::default().fg(Color::Green)),
            Cell::from(truncate(&m.session.id, 24)).style(Style::default().fg(Color::DarkGray)),
        ])
        .height(1)
    });

    let title = if searching {
        format!(" Histórico - busca: \"{}\" ({} lotes) ", app.search_query, app.visible.len())
    } else {
        " Histórico de Conciliações ".to_string()
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(8),
            Constraint::Length(16),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn session_size(sessions: &[ReconcileSession], id: &str) -> usize {
    sessions
        .iter()
        .find(|s| s.id == id)
        .map(ReconcileSession::transaction_count)
        .unwrap_or(0)
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let Some(session) = app.selected_session() else {
        let empty = Paragraph::new("Nenhum lote selecionado").block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" Detalhes "),
        );
        f.render_widget(empty, area);
        return;
    };

    let mut content = vec![
        Line::from(vec![label("  Lote: "), Span::raw(&session.id)]),
        Line::from(vec![
            label("  Total: "),
            Span::styled(brl(session.total_amount), Style::default().fg(Color::Green)),
        ]),
        Line::from("  ─────────────────────────────────────"),
    ];

    for tx in &session.transactions {
        content.push(Line::from(vec![
            Span::raw(format!("  {} ", tx.date())),
            Span::styled(truncate(&tx.payer_name, 22), Style::default().fg(Color::White)),
            Span::raw(" "),
            Span::styled(brl(tx.amount()), Style::default().fg(Color::Green)),
        ]));

        let mut extra = vec![Span::styled(
            format!("    {}", tx.category),
            Style::default().fg(Color::Yellow),
        )];
        if !tx.patient_name.is_empty() {
            extra.push(Span::styled(
                format!("  Paciente: {}", tx.patient_name),
                Style::default().fg(Color::DarkGray),
            ));
        }
        content.push(Line::from(extra));
    }

    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Enter fecha | e exporta CSV",
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
    )));

    let panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Detalhes do Lote "),
    );
    f.render_widget(panel, area);
}

fn render_reports(f: &mut Frame, area: Rect, app: &App) {
    let summary = &app.summary;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    let top = summary
        .top_category
        .as_ref()
        .map(|c| format!("{} ({})", c.category, brl(c.value)))
        .unwrap_or_else(|| "-".to_string());

    let highlights = Paragraph::new(vec![
        Line::from(vec![label("  Ticket Médio: "), Span::raw(brl(summary.average_ticket))]),
        Line::from(vec![label("  Top Categoria: "), Span::raw(top)]),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Destaques "));
    f.render_widget(highlights, chunks[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(35),
            Constraint::Percentage(35),
        ])
        .split(chunks[1]);

    let monthly: Vec<(String, f64)> = summary.monthly.iter().map(|p| (p.name.clone(), p.value)).collect();
    let daily: Vec<(String, f64)> = summary.daily.iter().map(|p| (p.name.clone(), p.value)).collect();
    let categories: Vec<(String, f64)> = summary
        .categories
        .iter()
        .map(|c| (c.category.clone(), c.value))
        .collect();

    render_series(f, columns[0], " Por Mês ", &monthly);
    render_series(f, columns[1], " Por Dia ", &daily);
    render_series(f, columns[2], " Por Categoria ", &categories);
}

fn render_series(f: &mut Frame, area: Rect, title: &str, series: &[(String, f64)]) {
    let rows = series.iter().map(|(name, value)| {
        Row::new(vec![
            Cell::from(truncate(name, 20)),
            Cell::from(brl(*value)).style(Style::default().fg(Color::Green)),
        ])
    });

    let table = Table::new(rows, [Constraint::Min(10), Constraint::Length(16)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    );
    f.render_widget(table, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = Vec::new();

    if app.search_input {
        status_spans.push(Span::styled(" Buscar: ", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(format!("{}▏", app.search_query)));
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
        status_spans.push(Span::raw(" confirmar"));
    } else {
        let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);
        status_spans.push(Span::styled(
            format!(" Linha: {}/{} ", selected, app.visible.len()),
            Style::default().fg(Color::Cyan),
        ));

        if let Some(message) = &app.status_message {
            status_spans.push(Span::raw(" | "));
            status_spans.push(Span::styled(message.clone(), Style::default().fg(Color::Green)));
        }

        for (key, action) in [("Tab", " Página"), ("/", " Buscar"), ("Enter", " Detalhes"), ("e", " Exportar")] {
            status_spans.push(Span::raw(" | "));
            status_spans.push(Span::styled(key, Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(action));
        }
        status_spans.push(Span::raw(" | "));
        status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
        status_spans.push(Span::raw(" Sair"));
    }

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

/// Stored timestamps are UTC; the bookkeeper reads wall-clock time
fn local_date(date: &DateTime<Utc>, format: &str) -> String {
    date.with_timezone(&Local).format(format).to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// `R$ 1.234,56`
pub fn brl(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}R$ {},{:02}", sign, grouped, cents % 100)
}
