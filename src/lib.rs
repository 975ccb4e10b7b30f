//! Random 8×8 mazes mirrored to a peer device over a line protocol.

pub mod bridge;
pub mod config;
pub mod direction;
pub mod game;
pub mod grid;
pub mod maze;
pub mod protocol;
pub mod search;
pub mod transport;

pub use bridge::LinkStatus;
pub use config::Settings;
pub use direction::Dir;
pub use game::{Event, Game, Session};
pub use grid::{Cell, Grid, Pos};
