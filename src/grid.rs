use std::fmt;

pub const WIDTH: usize = 8;
pub const HEIGHT: usize = 8;

// Carving steps two cells at a time; odd sizes are not supported.
const _: () = assert!(WIDTH % 2 == 0 && HEIGHT % 2 == 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Wall,
    Passage,
}

/// A grid coordinate. Signed because a peer may report any position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// `None` when either coordinate would overflow.
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        Some(Self {
            x: self.x.checked_add(dx)?,
            y: self.y.checked_add(dy)?,
        })
    }

    pub fn in_bounds(self) -> bool {
        self.x >= 0 && self.y >= 0 && (self.x as usize) < WIDTH && (self.y as usize) < HEIGHT
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cells: [[Cell; WIDTH]; HEIGHT],
}

impl Grid {
    pub fn filled(cell: Cell) -> Self {
        Self {
            cells: [[cell; WIDTH]; HEIGHT],
        }
    }

    /// Returns `None` for positions off the grid.
    pub fn get(&self, pos: Pos) -> Option<Cell> {
        if !pos.in_bounds() {
            return None;
        }
        Some(self.cells[pos.y as usize][pos.x as usize])
    }

    pub fn set(&mut self, pos: Pos, cell: Cell) {
        if pos.in_bounds() {
            self.cells[pos.y as usize][pos.x as usize] = cell;
        }
    }

    pub fn is_passage(&self, pos: Pos) -> bool {
        self.get(pos) == Some(Cell::Passage)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell; WIDTH]> {
        self.cells.iter()
    }

    #[cfg(test)]
    pub(crate) fn passages(&self) -> Vec<Pos> {
        let mut cells = Vec::new();
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                if self.cells[y][x] == Cell::Passage {
                    cells.push(Pos::new(x as i32, y as i32));
                }
            }
        }
        cells
    }
}
