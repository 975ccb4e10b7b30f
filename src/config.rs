use std::path::PathBuf;
use std::time::Duration;

use crate::transport::{LinkTarget, DEFAULT_BAUD_RATE};

const DEFAULT_WIN_DELAY_MS: u64 = 300;
const DEFAULT_FPS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub link: Option<LinkTarget>,
    pub baud_rate: u32,
    pub win_delay: Duration,
    pub fps: u64,
    pub ready_ack: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            link: None,
            baud_rate: DEFAULT_BAUD_RATE,
            win_delay: Duration::from_millis(DEFAULT_WIN_DELAY_MS),
            fps: DEFAULT_FPS,
            ready_ack: false,
            log_file: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparsable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let win_delay_ms = lookup("MAZE_WIN_DELAY_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_WIN_DELAY_MS);
        let fps = lookup("MAZE_FPS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_FPS);
        let baud_rate = lookup("MAZE_BAUD")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_BAUD_RATE);
        let ready_ack = lookup("MAZE_READY_ACK")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            link: lookup("MAZE_LINK").and_then(|v| LinkTarget::parse(&v)),
            baud_rate,
            win_delay: Duration::from_millis(win_delay_ms),
            fps,
            ready_ack,
            log_file: lookup("MAZE_LOG")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}
