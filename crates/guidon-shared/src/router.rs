//! Command name -> bus topic.
//!
//! Heavy or bursty command classes get their own lane so they cannot starve
//! the rest. Anything not listed rides the shared base lane.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    Base,
    Draw,
    Snapshot,
    Stats,
    Colors,
    PixelInfo,
    CanvasState,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Base,
        Topic::Draw,
        Topic::Snapshot,
        Topic::Stats,
        Topic::Colors,
        Topic::PixelInfo,
        Topic::CanvasState,
    ];

    /// Lane suffix used in topic names.
    pub fn lane(&self) -> &'static str {
        match self {
            Topic::Base => "base",
            Topic::Draw => "draw",
            Topic::Snapshot => "snapshot",
            Topic::Stats => "stats",
            Topic::Colors => "colors",
            Topic::PixelInfo => "pixel-info",
            Topic::CanvasState => "canvas-state",
        }
    }

    /// Full topic name, e.g. `discord-commands-draw`.
    pub fn name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.lane())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.lane())
    }
}

pub fn topic_for(command: &str) -> Topic {
    match command {
        "draw" => Topic::Draw,
        "snapshot" => Topic::Snapshot,
        "stats" => Topic::Stats,
        "colors" => Topic::Colors,
        "pixel_info" | "getpixel" => Topic::PixelInfo,
        "canvas_state" => Topic::CanvasState,
        _ => Topic::Base,
    }
}
