use std::collections::VecDeque;

use crate::grid::{Grid, Pos, HEIGHT, WIDTH};

/// Goal used when nothing far enough from the start exists.
pub const FALLBACK_GOAL: Pos = Pos::new(6, 6);
pub const MIN_GOAL_DISTANCE: u32 = 5;

const NEIGHBOURS: [(i32, i32); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// BFS step counts from `start` over passages; `None` where unreachable.
pub fn distances(grid: &Grid, start: Pos) -> Vec<Vec<Option<u32>>> {
    let mut dist = vec![vec![None; WIDTH]; HEIGHT];
    for (pos, d) in bfs(grid, start) {
        dist[pos.y as usize][pos.x as usize] = Some(d);
    }
    dist
}

/// The first passage discovered at the greatest distance from `start`, or
/// [`FALLBACK_GOAL`] when that distance is below [`MIN_GOAL_DISTANCE`].
pub fn find_furthest(grid: &Grid, start: Pos) -> Pos {
    let mut furthest = (start, 0);
    for (pos, d) in bfs(grid, start) {
        if d > furthest.1 {
            furthest = (pos, d);
        }
    }

    if furthest.1 < MIN_GOAL_DISTANCE {
        return FALLBACK_GOAL;
    }
    furthest.0
}

/// Cells in discovery order with their distance.
fn bfs(grid: &Grid, start: Pos) -> Vec<(Pos, u32)> {
    let mut order = Vec::new();
    if !grid.is_passage(start) {
        return order;
    }

    let mut visited = [[false; WIDTH]; HEIGHT];
    let mut q = VecDeque::new();
    visited[start.y as usize][start.x as usize] = true;
    q.push_back((start, 0));

    while let Some((pos, d)) = q.pop_front() {
        order.push((pos, d));
        for (dx, dy) in NEIGHBOURS {
            let Some(next) = pos.offset(dx, dy) else {
                continue;
            };
            if !grid.is_passage(next) || visited[next.y as usize][next.x as usize] {
                continue;
            }
            visited[next.y as usize][next.x as usize] = true;
            q.push_back((next, d + 1));
        }
    }
    order
}
