use std::fmt;

/// Lifecycle state of a tunnel.
///
/// `Up` and `Down` are the only resting values a tunnel ever reports.
/// `Toggle` is a request sentinel: passed to [`Tunnel::set_state`] it asks the
/// manager to flip whatever the current state is, and it never appears as the
/// stored state of a live tunnel.
///
/// [`Tunnel::set_state`]: crate::tunnel::Tunnel::set_state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TunnelState {
    Down,
    Toggle,
    Up,
}

impl TunnelState {
    /// Maps a kernel "is the interface running" answer onto a resting state.
    /// Never returns [`TunnelState::Toggle`].
    pub fn from_running(running: bool) -> Self {
        if running {
            TunnelState::Up
        } else {
            TunnelState::Down
        }
    }

    /// True for the two resting values, false for the request sentinel.
    pub fn is_resting(self) -> bool {
        !matches!(self, TunnelState::Toggle)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Down => write!(f, "down"),
            TunnelState::Toggle => write!(f, "toggle"),
            TunnelState::Up => write!(f, "up"),
        }
    }
}
