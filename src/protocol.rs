//! Line protocol spoken with the peer device.
//!
//! Outbound lines describe game state (`P:`, `E:`, `M:`, `MOVE:`), inbound
//! lines carry the peer's commands (`READY:`, `POS:`, `WIN:`). Every line is
//! ASCII and ends with `\n`; there is no escaping and no checksum.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::direction::Dir;
use crate::grid::{Cell, Grid, Pos};

/// Partial lines longer than this are dropped.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Greeting,
    Player(Pos),
    Exit(Pos),
    Row { index: usize, bits: String },
    Move(Dir),
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Greeting => f.write_str("TEST:CONNECTED"),
            Outbound::Player(pos) => write!(f, "P:{pos}"),
            Outbound::Exit(pos) => write!(f, "E:{pos}"),
            Outbound::Row { index, bits } => write!(f, "M:{index}:{bits}"),
            Outbound::Move(dir) => write!(f, "MOVE:{dir}"),
        }
    }
}

/// The reset sequence: player, exit, then every row top to bottom.
pub fn sync_lines(grid: &Grid, player: Pos, goal: Pos) -> Vec<Outbound> {
    let mut lines = vec![Outbound::Player(player), Outbound::Exit(goal)];
    for (index, row) in grid.rows().enumerate() {
        let bits = row
            .iter()
            .map(|cell| match cell {
                Cell::Wall => '1',
                Cell::Passage => '0',
            })
            .collect();
        lines.push(Outbound::Row { index, bits });
    }
    lines
}

/// Joins lines into one newline-terminated buffer.
pub fn encode(lines: &[Outbound]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Ready(String),
    Position(Pos),
    Win(String),
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed position payload '{0}'")]
    MalformedPosition(String),
    #[error("empty line")]
    Empty,
}

impl PeerCommand {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        if let Some(rest) = line.strip_prefix("READY:") {
            return Ok(PeerCommand::Ready(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("POS:") {
            return parse_position(rest).map(PeerCommand::Position);
        }
        if let Some(rest) = line.strip_prefix("WIN:") {
            return Ok(PeerCommand::Win(rest.to_string()));
        }
        Ok(PeerCommand::Unknown(line.to_string()))
    }
}

fn parse_position(payload: &str) -> Result<Pos, ProtocolError> {
    let malformed = || ProtocolError::MalformedPosition(payload.to_string());
    let (x, y) = payload.split_once(',').ok_or_else(malformed)?;
    let x = x.trim().parse::<i32>().map_err(|_| malformed())?;
    let y = y.trim().parse::<i32>().map_err(|_| malformed())?;
    Ok(Pos::new(x, y))
}

/// Reassembles lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends a chunk and returns every line it completed, untrimmed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.pending);
                lines.push(String::from_utf8_lossy(&line).into_owned());
                continue;
            }
            if self.pending.len() >= MAX_LINE_LEN {
                warn!(len = self.pending.len(), "dropping oversized partial line");
                self.pending.clear();
            }
            self.pending.push(byte);
        }
        lines
    }
}
