use std::io::{self, Stdout, Write};

use crossterm::cursor::MoveTo;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::QueueableCommand;
use unicode_width::UnicodeWidthStr;

use maze_link::grid::{HEIGHT, WIDTH};
use maze_link::{Cell, Pos, Session};

const CELL_W: usize = 2;

#[derive(Clone, Copy, PartialEq)]
enum Glyph {
    Player,
    Goal,
    Wall,
    Empty,
}

#[derive(Clone, Copy, PartialEq)]
struct Tile {
    glyph: Glyph,
    color: Color,
}

pub struct Renderer {
    last: Vec<Tile>,
    last_hud: String,
    last_status: String,
    needs_full: bool,
    origin_x: u16,
    origin_y: u16,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            last: vec![
                Tile {
                    glyph: Glyph::Empty,
                    color: Color::Reset,
                };
                WIDTH * HEIGHT
            ],
            last_hud: String::new(),
            last_status: String::new(),
            needs_full: true,
            origin_x: 0,
            origin_y: 0,
        }
    }

    pub fn invalidate(&mut self) {
        self.needs_full = true;
    }

    pub fn needs_full(&self) -> bool {
        self.needs_full
    }

    pub fn render(&mut self, stdout: &mut Stdout, session: &Session) -> io::Result<()> {
        let Some((origin_x, origin_y)) = board_origin(terminal::size()?) else {
            // HUD and status line need a row each above and below the board.
            stdout.queue(Clear(ClearType::All))?;
            stdout.queue(MoveTo(0, 0))?;
            stdout.queue(Print("Enlarge the window to see the maze"))?;
            stdout.flush()?;
            self.needs_full = true;
            return Ok(());
        };

        if (origin_x, origin_y) != (self.origin_x, self.origin_y) {
            self.origin_x = origin_x;
            self.origin_y = origin_y;
            self.needs_full = true;
        }
        if self.needs_full {
            stdout.queue(Clear(ClearType::All))?;
        }

        let hud = format!(
            "Maze: {}  Player: {}  Goal: {}  Link: {}",
            session.maze_count, session.player, session.goal, session.link
        );
        if self.needs_full || hud != self.last_hud {
            stdout.queue(MoveTo(self.origin_x, self.origin_y - 1))?;
            stdout.queue(SetForegroundColor(Color::White))?;
            stdout.queue(Clear(ClearType::CurrentLine))?;
            stdout.queue(Print(&hud))?;
            stdout.queue(ResetColor)?;
            self.last_hud = hud;
        }

        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let tile = tile_for(session, Pos::new(x as i32, y as i32));
                let idx = y * WIDTH + x;
                if self.needs_full || tile != self.last[idx] {
                    self.last[idx] = tile;
                    self.draw_tile(stdout, x, y, tile)?;
                }
            }
        }

        let status = format!(
            "{}  (arrows/wasd/hjkl move, n new, c connect, x disconnect, q quit)",
            session.status
        );
        if self.needs_full || status != self.last_status {
            stdout.queue(MoveTo(self.origin_x, self.origin_y + HEIGHT as u16 + 1))?;
            stdout.queue(Clear(ClearType::CurrentLine))?;
            stdout.queue(Print(&status))?;
            self.last_status = status;
        }
        self.needs_full = false;

        stdout.flush()?;
        Ok(())
    }

    fn draw_tile(&self, stdout: &mut Stdout, x: usize, y: usize, tile: Tile) -> io::Result<()> {
        let text = match tile.glyph {
            Glyph::Player => "😃",
            Glyph::Goal => "🏁",
            Glyph::Wall => "██",
            Glyph::Empty => "",
        };
        let pad = CELL_W.saturating_sub(UnicodeWidthStr::width(text));
        stdout.queue(MoveTo(
            self.origin_x + (x * CELL_W) as u16,
            self.origin_y + y as u16,
        ))?;
        stdout.queue(SetForegroundColor(tile.color))?;
        stdout.queue(Print(format!("{text}{:pad$}", "")))?;
        stdout.queue(ResetColor)?;
        Ok(())
    }
}

/// Top-left cell of a centred board, or `None` when the terminal cannot hold
/// it.
fn board_origin((cols, rows): (u16, u16)) -> Option<(u16, u16)> {
    let board_w = (WIDTH * CELL_W) as u16;
    let board_h = HEIGHT as u16 + 3;
    if cols < board_w || rows < board_h {
        return None;
    }
    Some(((cols - board_w) / 2, (rows - board_h) / 2 + 1))
}

fn tile_for(session: &Session, pos: Pos) -> Tile {
    if pos == session.player {
        return Tile {
            glyph: Glyph::Player,
            color: Color::Yellow,
        };
    }
    if pos == session.goal {
        return Tile {
            glyph: Glyph::Goal,
            color: Color::Green,
        };
    }
    match session.grid.get(pos) {
        Some(Cell::Wall) => Tile {
            glyph: Glyph::Wall,
            color: Color::Blue,
        },
        _ => Tile {
            glyph: Glyph::Empty,
            color: Color::Reset,
        },
    }
}
