use serde::{Deserialize, Serialize};

/// Direction of a port and of every buffer registered on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Index into per-port tables. Input is port 0, output is port 1.
    pub fn index(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    /// The OMX-visible port index.
    pub fn port_index(self) -> u32 {
        self.index() as u32
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Port addressing for commands: a single port or all of them, matching the
/// OMX convention of passing `-1` as the port parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelector {
    One(Direction),
    All,
}

impl PortSelector {
    pub fn contains(self, dir: Direction) -> bool {
        match self {
            Self::One(d) => d == dir,
            Self::All => true,
        }
    }

    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl From<Direction> for PortSelector {
    fn from(dir: Direction) -> Self {
        Self::One(dir)
    }
}
