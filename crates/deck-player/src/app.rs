use std::collections::HashSet;
use std::io;
use std::sync::Arc;

use ratatui::crossterm::{
    event::{self, Event, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, List, ListItem, ListState, Paragraph},
    Frame, Terminal,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

use deck_proto::track::{PlaylistSummary, Track};

use crate::display::{clean_title, format_time, now_playing, truncate};
use crate::engine::PlayerHandle;
use crate::focus::{Direction, FocusItems, FocusList, Panel, PanelNavigator};
use crate::keys::{action_for, InputMode, KeyAction};
use crate::media::LogMediaSession;
use crate::source::DaemonClient;
use crate::state::{PlaybackSnapshot, PlaybackStatus, PlayerBroadcast, StateManager};
use crate::theme;

/// A list of tracks the tracklist can show.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackView {
    Favourites,
    Playlist { id: String, name: String },
    Search(String),
}

impl TrackView {
    pub fn title(&self) -> String {
        match self {
            Self::Favourites => "Favourites".to_string(),
            Self::Playlist { name, .. } => name.clone(),
            Self::Search(query) => format!("Search: {}", query),
        }
    }
}

pub enum AppMessage {
    Event(Event),
    StateUpdated(PlaybackSnapshot),
    Notice(String),
    Playlists(Vec<PlaylistSummary>),
    Tracks { view: TrackView, tracks: Vec<Track> },
    FavouriteSet { track_id: String, favourite: bool },
}

pub struct App {
    library: Arc<DaemonClient>,
    player: PlayerHandle,
    media: Arc<LogMediaSession>,
    state_manager: Arc<StateManager>,
    nav: PanelNavigator,
    mode: InputMode,
    search: Input,
    /// Favourites first, then the playlists in daemon order.
    sidebar: Vec<TrackView>,
    view: Option<TrackView>,
    tracks: Vec<Track>,
    favourites: HashSet<String>,
    snapshot: PlaybackSnapshot,
    notice: Option<String>,
    should_quit: bool,
    tx: mpsc::Sender<AppMessage>,
    rx: Option<mpsc::Receiver<AppMessage>>,
}

impl App {
    pub fn new(
        library: Arc<DaemonClient>,
        player: PlayerHandle,
        media: Arc<LogMediaSession>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<AppMessage>(1024);
        let mut nav = PanelNavigator::new();
        nav.register(Panel::Sidebar, FocusList::default());
        nav.register(Panel::Tracklist, FocusList::default());
        let mut app = Self {
            library,
            player,
            media,
            state_manager,
            nav,
            mode: InputMode::Normal,
            search: Input::default(),
            sidebar: vec![TrackView::Favourites],
            view: None,
            tracks: Vec::new(),
            favourites: HashSet::new(),
            snapshot: PlaybackSnapshot::default(),
            notice: None,
            should_quit: false,
            tx,
            rx: Some(rx),
        };
        app.sync_focus(Panel::Sidebar, 1, false);
        app
    }

    pub async fn run(mut self, mut broadcast_rx: broadcast::Receiver<PlayerBroadcast>) -> anyhow::Result<()> {
        let Some(mut rx) = self.rx.take() else {
            anyhow::bail!("app already running");
        };

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Keyboard events.
        let event_tx = self.tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // Engine broadcasts.
        let bc_tx = self.tx.clone();
        let bc_state_manager = self.state_manager.clone();
        tokio::spawn(async move {
            loop {
                let app_msg = match broadcast_rx.recv().await {
                    Ok(PlayerBroadcast::StateUpdated) => {
                        AppMessage::StateUpdated(bc_state_manager.get_state().await)
                    }
                    Ok(PlayerBroadcast::TrackChanged(id)) => {
                        debug!("track changed: {}", id);
                        continue;
                    }
                    Ok(PlayerBroadcast::Error(message)) => AppMessage::Notice(message),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcast receiver lagged by {} messages", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if bc_tx.send(app_msg).await.is_err() {
                    break;
                }
            }
        });

        self.load_playlists();
        self.load(TrackView::Favourites);

        let result = self.event_loop(&mut terminal, &mut rx).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn event_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        rx: &mut mpsc::Receiver<AppMessage>,
    ) -> anyhow::Result<()> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                return Ok(());
            }

            let Some(msg) = rx.recv().await else {
                return Ok(());
            };
            needs_redraw = self.handle_message(msg).await;
            while let Ok(next) = rx.try_recv() {
                needs_redraw |= self.handle_message(next).await;
            }
        }
    }

    /// Apply one message. Returns whether the screen needs a redraw.
    async fn handle_message(&mut self, msg: AppMessage) -> bool {
        match msg {
            AppMessage::Event(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                self.handle_key(key).await;
                true
            }
            AppMessage::Event(Event::Resize(..)) => true,
            AppMessage::Event(_) => false,
            AppMessage::StateUpdated(snapshot) => {
                self.snapshot = snapshot;
                true
            }
            AppMessage::Notice(text) => {
                self.notice = Some(text);
                true
            }
            AppMessage::Playlists(playlists) => {
                self.sidebar.truncate(1);
                self.sidebar
                    .extend(playlists.into_iter().map(|p| TrackView::Playlist {
                        id: p.id,
                        name: p.name,
                    }));
                self.sync_focus(Panel::Sidebar, self.sidebar.len(), false);
                true
            }
            AppMessage::Tracks { view, tracks } => {
                if view == TrackView::Favourites {
                    self.favourites = tracks.iter().map(|t| t.id.clone()).collect();
                }
                info!("showing {} ({} tracks)", view.title(), tracks.len());
                self.tracks = tracks;
                self.view = Some(view);
                self.sync_focus(Panel::Tracklist, self.tracks.len(), true);
                true
            }
            AppMessage::FavouriteSet {
                track_id,
                favourite,
            } => {
                if favourite {
                    self.favourites.insert(track_id);
                } else {
                    self.favourites.remove(&track_id);
                    if self.view == Some(TrackView::Favourites) {
                        self.tracks.retain(|t| t.id != track_id);
                        self.sync_focus(Panel::Tracklist, self.tracks.len(), false);
                    }
                }
                true
            }
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        let Some(action) = action_for(self.mode, key) else {
            if self.mode == InputMode::Search {
                self.search.handle_event(&Event::Key(key));
            }
            return;
        };
        if let Err(e) = self.dispatch(action).await {
            warn!("{:?} failed: {}", action, e);
            self.notice = Some(e.to_string());
        }
    }

    async fn dispatch(&mut self, action: KeyAction) -> anyhow::Result<()> {
        match action {
            KeyAction::Quit => self.should_quit = true,
            KeyAction::TogglePlayPause => self.player.toggle_play_pause().await?,
            KeyAction::FocusSearch => self.mode = InputMode::Search,
            KeyAction::CancelSearch => self.mode = InputMode::Normal,
            KeyAction::SubmitSearch => {
                self.mode = InputMode::Normal;
                let query = self.search.value().trim().to_string();
                if !query.is_empty() {
                    self.load(TrackView::Search(query));
                    self.nav.set_active(Panel::Tracklist);
                }
            }
            KeyAction::NextPanel => {
                self.nav.next_panel();
            }
            KeyAction::PrevPanel => {
                self.nav.prev_panel();
            }
            KeyAction::FocusNext => self.navigate(Direction::Next),
            KeyAction::FocusPrev => self.navigate(Direction::Previous),
            KeyAction::Activate => self.activate().await?,
            KeyAction::PlayNext => self.player.play_next().await?,
            KeyAction::PlayPrevious => self.player.play_previous().await?,
            KeyAction::Stop => self.player.stop().await?,
            KeyAction::ToggleFavourite => self.toggle_favourite(),
            KeyAction::SeekBy(delta) => {
                if self.snapshot.current.is_some() {
                    self.player.seek(self.snapshot.position + delta).await?;
                }
            }
            KeyAction::Media(media_action) => {
                if !self.media.trigger(media_action) {
                    debug!("no media handlers bound for {:?}", media_action);
                }
            }
        }
        Ok(())
    }

    fn navigate(&mut self, direction: Direction) {
        if let Some(panel) = self.nav.active() {
            self.nav.navigate(panel, direction);
        }
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        match self.nav.active() {
            Some(Panel::Sidebar) => {
                if let Some(view) = self.focused(Panel::Sidebar).and_then(|i| self.sidebar.get(i)) {
                    self.load(view.clone());
                }
            }
            Some(Panel::Tracklist) => {
                if let Some(track) = self.focused_track().cloned() {
                    self.player.set_queue(self.tracks.clone()).await?;
                    self.player.play_track(track).await?;
                    self.nav.set_active(Panel::Tracklist);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn toggle_favourite(&self) {
        let focused = self
            .focused_track()
            .filter(|_| self.nav.is_active(Panel::Tracklist));
        let Some(track) = focused.or(self.snapshot.current.as_ref()) else {
            return;
        };

        let track_id = track.id.clone();
        let favourite = !self.favourites.contains(&track_id);
        let library = self.library.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let msg = match library.set_favourite(&track_id, favourite).await {
                Ok(()) => AppMessage::FavouriteSet {
                    track_id,
                    favourite,
                },
                Err(e) => AppMessage::Notice(format!("favourite failed: {}", e)),
            };
            let _ = tx.send(msg).await;
        });
    }

    fn load(&self, view: TrackView) {
        let library = self.library.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match &view {
                TrackView::Favourites => library.favourites().await.map(|v| v.tracks),
                TrackView::Playlist { id, .. } => library.playlist(id).await.map(|v| v.tracks),
                TrackView::Search(query) => library.search(query).await.map(|r| r.tracks),
            };
            let msg = match result {
                Ok(tracks) => AppMessage::Tracks { view, tracks },
                Err(e) => AppMessage::Notice(format!("{}: {}", view.title(), e)),
            };
            let _ = tx.send(msg).await;
        });
    }

    fn load_playlists(&self) {
        let library = self.library.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let msg = match library.playlists().await {
                Ok(playlists) => AppMessage::Playlists(playlists),
                Err(e) => AppMessage::Notice(format!("playlists: {}", e)),
            };
            let _ = tx.send(msg).await;
        });
    }

    fn focused(&self, panel: Panel) -> Option<usize> {
        self.nav.items(panel).and_then(|items| items.focused())
    }

    fn focused_track(&self) -> Option<&Track> {
        self.focused(Panel::Tracklist).and_then(|i| self.tracks.get(i))
    }

    fn sync_focus(&mut self, panel: Panel, len: usize, reset: bool) {
        if let Some(items) = self.nav.items_mut(panel) {
            items.set_len(len);
            if reset {
                items.clear_focus();
            }
            if items.focused().is_none() && len > 0 {
                items.focus(0);
            }
        }
    }

    // ── Drawing ──────────────────────────────────────────────────────────────

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        frame.render_widget(Block::default().style(theme::style_default()), area);

        let rows = Layout::vertical([
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);
        let cols = Layout::horizontal([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(rows[0]);

        self.draw_sidebar(frame, cols[0]);
        self.draw_tracklist(frame, cols[1]);
        self.draw_status(frame, rows[1]);
        self.draw_search(frame, rows[2]);
    }

    fn draw_sidebar(&self, frame: &mut Frame, area: Rect) {
        let width = area.width.saturating_sub(4) as usize;
        let items: Vec<ListItem> = self
            .sidebar
            .iter()
            .map(|view| {
                let label = match view {
                    TrackView::Favourites => format!("♥ {}", view.title()),
                    _ => view.title(),
                };
                let style = if Some(view) == self.view.as_ref() {
                    Style::default().fg(theme::C_ACCENT)
                } else {
                    theme::style_default()
                };
                ListItem::new(Line::styled(truncate(&label, width), style))
            })
            .collect();

        let list = List::new(items)
            .block(
                Block::bordered()
                    .title(" Library ")
                    .border_style(theme::border_style(self.nav.is_active(Panel::Sidebar))),
            )
            .highlight_style(theme::style_selected());
        let mut state = ListState::default().with_selected(self.focused(Panel::Sidebar));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_tracklist(&self, frame: &mut Frame, area: Rect) {
        let width = area.width.saturating_sub(4) as usize;
        let current_id = self.snapshot.current.as_ref().map(|t| t.id.as_str());
        let items: Vec<ListItem> = self
            .tracks
            .iter()
            .map(|track| {
                let is_current = current_id == Some(track.id.as_str());
                let marker = if is_current { "▶ " } else { "  " };
                let heart = if self.favourites.contains(&track.id) { "♥ " } else { "  " };
                let time = format_time(track.duration);
                let text = format!(
                    "{}{} · {}",
                    marker,
                    clean_title(&track.name),
                    track.artist_line()
                );
                let text_width = width.saturating_sub(time.len() + 3);
                let text = truncate(&text, text_width);
                let pad = text_width.saturating_sub(unicode_width::UnicodeWidthStr::width(text.as_str()));
                let style = if is_current {
                    theme::style_playing()
                } else {
                    theme::style_default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(text, style),
                    Span::raw(" ".repeat(pad + 1)),
                    Span::styled(heart, Style::default().fg(theme::C_FAVOURITE)),
                    Span::styled(time, theme::style_secondary()),
                ]))
            })
            .collect();

        let title = match &self.view {
            Some(view) => format!(" {} ", view.title()),
            None => " Tracks ".to_string(),
        };
        let list = List::new(items)
            .block(
                Block::bordered()
                    .title(title)
                    .border_style(theme::border_style(self.nav.is_active(Panel::Tracklist))),
            )
            .highlight_style(theme::style_selected());
        let mut state = ListState::default().with_selected(self.focused(Panel::Tracklist));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let status_color = match self.snapshot.status {
            PlaybackStatus::Playing => theme::C_PLAYING,
            PlaybackStatus::Loading => theme::C_LOADING,
            PlaybackStatus::Paused | PlaybackStatus::Idle => theme::C_SECONDARY,
        };
        let mut spans = vec![
            Span::styled(
                format!(" {} ", self.mode.label()),
                Style::default().fg(theme::C_BG).bg(theme::C_SECONDARY),
            ),
            Span::raw(" "),
            Span::styled(now_playing(&self.snapshot), Style::default().fg(status_color)),
        ];
        if let Some(note) = self.notice.as_ref().or(self.snapshot.last_error.as_ref()) {
            spans.push(Span::styled(
                format!("  {}", note),
                Style::default().fg(theme::C_ACCENT),
            ));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn draw_search(&self, frame: &mut Frame, area: Rect) {
        let scroll = self
            .search
            .visual_scroll(area.width.saturating_sub(4) as usize);
        let value = self.search.value();
        let display = if value.is_empty() && self.mode != InputMode::Search {
            Span::styled("/ search", Style::default().fg(theme::C_MUTED))
        } else {
            let visible: String = value.chars().skip(scroll).collect();
            Span::styled(format!("/ {}", visible), Style::default().fg(theme::C_SEARCH_FG))
        };
        let paragraph =
            Paragraph::new(Line::from(vec![display])).style(Style::default().bg(theme::C_SEARCH_BG));
        frame.render_widget(paragraph, area);

        if self.mode == InputMode::Search && area.width > 0 {
            let cursor_x = area.x + 2 + self.search.visual_cursor().saturating_sub(scroll) as u16;
            frame.set_cursor_position((cursor_x.min(area.x + area.width - 1), area.y));
        }
    }
}
