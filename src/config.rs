use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// What the first exchange of every iteration does with the receive-side
/// buffers and requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundMode {
    /// Post receives from the neighbors into the receive buffers.
    Receive,
    /// Issue a second round of sends out of the receive buffers through the
    /// receive request table. Nothing is ever received; neighbors accumulate
    /// unread messages.
    Send,
}

/// How the process count is split over the grid axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `N / D` per axis with the remainder added to the last axis. Rejected
    /// unless the extents multiply back to `N`.
    Even,
    /// Factor `N` into `D` extents that are as close to each other as
    /// possible.
    Balanced,
}

/// The flat configuration of one benchmark run. Immutable once validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub dimensions: usize,
    pub payload_size: usize,
    pub task_size: usize,
    pub iterations: usize,
    pub inbound: InboundMode,
    pub layout: Layout,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dimensions: 1,
            payload_size: 16,
            task_size: 128,
            iterations: 16,
            inbound: InboundMode::Receive,
            layout: Layout::Even,
        }
    }
}

impl RunConfig {
    /// Check the fields that have a lower bound. The grid-shape check needs
    /// the process count and happens in [`crate::topology::Topology::new`].
    pub fn validate(self) -> Result<Self> {
        if self.task_size == 0 {
            return Err(Error::Config("task size must be positive".to_string()));
        }
        if self.iterations == 0 {
            return Err(Error::Config("iteration count must be positive".to_string()));
        }
        Ok(self)
    }

    /// Number of direction slots, two per axis.
    pub fn num_slots(&self) -> usize {
        2 * self.dimensions
    }

    pub fn exchanges_data(&self) -> bool {
        self.payload_size > 0
    }
}

impl FromStr for InboundMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "receive" | "recv" => Ok(Self::Receive),
            "send" => Ok(Self::Send),
            _ => Err(format!("unknown inbound mode '{}' (expected receive or send)", s)),
        }
    }
}

impl fmt::Display for InboundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive => write!(f, "receive"),
            Self::Send => write!(f, "send"),
        }
    }
}

impl FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "even" => Ok(Self::Even),
            "balanced" => Ok(Self::Balanced),
            _ => Err(format!("unknown layout '{}' (expected even or balanced)", s)),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Even => write!(f, "even"),
            Self::Balanced => write!(f, "balanced"),
        }
    }
}
