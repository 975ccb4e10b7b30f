use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, LinkId, LinkStatus};
use crate::config::Settings;
use crate::direction::Dir;
use crate::grid::{Cell, Grid, Pos};
use crate::maze::{generate, START};
use crate::protocol::{sync_lines, PeerCommand};
use crate::search::{find_furthest, FALLBACK_GOAL};
use crate::transport::{LinkError, Transport};

/// Everything the renderer and the peer need to know.
#[derive(Debug, Clone)]
pub struct Session {
    pub grid: Grid,
    pub player: Pos,
    pub goal: Pos,
    pub link: LinkStatus,
    pub maze_count: u32,
    pub status: String,
}

/// Inputs to the control loop.
#[derive(Debug)]
pub enum Event {
    MoveRequested(Dir),
    NewMazeRequested,
    Peer { link: LinkId, command: PeerCommand },
    LinkLost { link: LinkId, error: Option<LinkError> },
}

pub struct Game<R> {
    session: Session,
    rng: R,
    bridge: Bridge,
    events: Receiver<Event>,
    win_delay: Duration,
    pending_maze: Option<Instant>,
    revision: u64,
}

impl<R: Rng> Game<R> {
    pub fn new(rng: R, settings: &Settings) -> Self {
        let (tx, events) = mpsc::channel();
        let mut game = Self {
            session: Session {
                grid: Grid::filled(Cell::Wall),
                player: START,
                goal: FALLBACK_GOAL,
                link: LinkStatus::Disconnected,
                maze_count: 0,
                status: "Playing locally".to_string(),
            },
            rng,
            bridge: Bridge::new(tx, settings.ready_ack),
            events,
            win_delay: settings.win_delay,
            pending_maze: None,
            revision: 0,
        };
        game.request_new_maze();
        game
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Bumped once per completed transition; redraw when it changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn link_status(&self) -> LinkStatus {
        self.bridge.status()
    }

    pub fn peer_ready(&self) -> bool {
        self.bridge.peer_ready()
    }

    pub fn regeneration_pending(&self) -> bool {
        self.pending_maze.is_some()
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.session.status = status.into();
        self.changed();
    }

    pub fn request_new_maze(&mut self) {
        let mut grid = generate(&mut self.rng, START);
        let goal = find_furthest(&grid, START);
        // The fallback goal is not guaranteed to be carved.
        grid.set(goal, Cell::Passage);

        self.session.grid = grid;
        self.session.player = START;
        self.session.goal = goal;
        self.session.maze_count += 1;
        self.pending_maze = None;
        info!(maze = self.session.maze_count, %goal, "new maze");

        let lines = sync_lines(&self.session.grid, self.session.player, self.session.goal);
        self.bridge.send_sync(&lines);
        self.changed();
    }

    /// Steps the player one cell. Moves off the grid or into a wall are
    /// ignored and return `false`.
    pub fn try_move(&mut self, dir: Dir, now: Instant) -> bool {
        let (dx, dy) = dir.delta();
        let next = self
            .session
            .player
            .offset(dx, dy)
            .filter(|next| self.session.grid.is_passage(*next));
        let Some(next) = next else {
            debug!(%dir, from = %self.session.player, "move blocked");
            return false;
        };

        self.session.player = next;
        self.bridge.send_position(next);
        self.check_win(now);
        self.changed();
        true
    }

    fn check_win(&mut self, now: Instant) {
        if self.session.player != self.session.goal || self.pending_maze.is_some() {
            return;
        }
        info!(maze = self.session.maze_count, "goal reached");
        self.session.status = "Goal reached!".to_string();
        self.pending_maze = Some(now + self.win_delay);
    }

    /// Fires a scheduled regeneration once its delay has passed.
    pub fn tick(&mut self, now: Instant) {
        if let Some(deadline) = self.pending_maze {
            if now >= deadline {
                self.request_new_maze();
            }
        }
    }

    pub fn handle(&mut self, event: Event, now: Instant) {
        match event {
            Event::MoveRequested(dir) => {
                self.try_move(dir, now);
                // Echoed whether or not the move was accepted.
                self.bridge.send_move(dir);
                self.session.link = self.bridge.status();
            }
            Event::NewMazeRequested => self.request_new_maze(),
            Event::Peer { link, command } => {
                if self.bridge.is_current(link) {
                    self.handle_peer(command);
                }
            }
            Event::LinkLost { link, error } => {
                if !self.bridge.is_current(link) {
                    return;
                }
                self.session.status = match &error {
                    Some(err) => format!("Connection lost ({err}) - playing locally"),
                    None => "Peer closed the link - playing locally".to_string(),
                };
                self.bridge.on_link_lost(error);
                self.changed();
            }
        }
    }

    fn handle_peer(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::Ready(detail) => {
                info!(%detail, "peer ready");
                self.bridge.on_ready();
                self.session.status = "Peer ready - display active".to_string();
                self.changed();
            }
            PeerCommand::Position(pos) => {
                self.session.player = pos;
                self.changed();
            }
            PeerCommand::Win(_) => self.request_new_maze(),
            PeerCommand::Unknown(line) => {
                debug!(%line, "ignoring peer line");
                self.session.status = format!("Peer: {line}");
                self.changed();
            }
        }
    }

    /// Handles every link event already queued, without blocking.
    pub fn pump_link(&mut self, now: Instant) {
        while let Ok(event) = self.events.try_recv() {
            self.handle(event, now);
        }
    }

    /// Waits up to `timeout` for one link event and handles it.
    pub fn wait_link_event(&mut self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event, Instant::now());
                true
            }
            Err(_) => false,
        }
    }

    pub fn connect(&mut self, transport: &dyn Transport) {
        let lines = sync_lines(&self.session.grid, self.session.player, self.session.goal);
        self.session.status = match self.bridge.open(transport, &lines) {
            Ok(()) => format!("Connected to {} - maze sent", transport.describe()),
            Err(err) => {
                warn!(%err, "could not open link");
                format!("Link failed ({err}) - using keyboard controls")
            }
        };
        self.changed();
    }

    pub fn disconnect(&mut self) {
        if self.bridge.status() == LinkStatus::Disconnected {
            return;
        }
        self.bridge.close();
        self.session.status = "Disconnected - playing locally".to_string();
        self.changed();
    }

    fn changed(&mut self) {
        self.session.link = self.bridge.status();
        self.revision += 1;
    }
}
