use rand::Rng;

use crate::grid::{Cell, Grid, Pos};

pub const START: Pos = Pos::new(1, 1);

/// Cells opened before carving starts, independent of the spanning tree.
pub const FORCED_OPEN: [Pos; 3] = [Pos::new(0, 0), Pos::new(1, 0), Pos::new(0, 1)];

const CARVE_DIRS: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// A frontier edge: the room two steps away and the wall cell in between.
#[derive(Debug, Clone, Copy)]
struct WallCandidate {
    room: Pos,
    wall: Pos,
}

/// Carves a spanning tree over the rooms reachable from `start` in steps of
/// two (randomized Prim). Every passage is connected to `start` by exactly
/// one simple path, apart from the forced opening at the origin.
pub fn generate(rng: &mut impl Rng, start: Pos) -> Grid {
    let mut grid = Grid::filled(Cell::Wall);
    for pos in FORCED_OPEN {
        grid.set(pos, Cell::Passage);
    }

    grid.set(start, Cell::Passage);
    let mut frontier = Vec::new();
    add_frontier(start, &mut frontier);

    while !frontier.is_empty() {
        let idx = rng.gen_range(0..frontier.len());
        let candidate = frontier.swap_remove(idx);
        if grid.get(candidate.room) != Some(Cell::Wall) {
            continue;
        }
        grid.set(candidate.room, Cell::Passage);
        grid.set(candidate.wall, Cell::Passage);
        add_frontier(candidate.room, &mut frontier);
    }

    grid
}

fn add_frontier(from: Pos, frontier: &mut Vec<WallCandidate>) {
    for (dx, dy) in CARVE_DIRS {
        if let (Some(room), Some(wall)) = (from.offset(dx * 2, dy * 2), from.offset(dx, dy)) {
            if room.in_bounds() {
                frontier.push(WallCandidate { room, wall });
            }
        }
    }
}
