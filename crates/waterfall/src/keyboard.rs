//! Keyboard shortcuts for the waterfall controls

use crate::{ControlAction, WaterfallError};
use std::str::FromStr;

/// Keys the waterfall view responds to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlKey {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    PageUp,
    PageDown,
    Home,
    End,
    Space,
}

impl ControlKey {
    pub fn action(&self) -> ControlAction {
        match self {
            // Step slice
            Self::ArrowLeft | Self::ArrowDown => ControlAction::Decrement,
            Self::ArrowRight | Self::ArrowUp => ControlAction::Increment,

            // Page the window
            Self::PageUp => ControlAction::ScrollWindowUp,
            Self::PageDown => ControlAction::ScrollWindowDown,

            // Jump to start/end
            Self::Home => ControlAction::First,
            Self::End => ControlAction::Last,

            Self::Space => ControlAction::TogglePlayback,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ArrowLeft | Self::ArrowDown => "Previous slice",
            Self::ArrowRight | Self::ArrowUp => "Next slice",
            Self::PageUp => "Scroll window forward",
            Self::PageDown => "Scroll window back",
            Self::Home => "First slice",
            Self::End => "Last slice",
            Self::Space => "Play/Pause",
        }
    }

    pub fn all() -> &'static [ControlKey] {
        &[
            Self::ArrowLeft,
            Self::ArrowRight,
            Self::ArrowUp,
            Self::ArrowDown,
            Self::PageUp,
            Self::PageDown,
            Self::Home,
            Self::End,
            Self::Space,
        ]
    }
}

impl FromStr for ControlKey {
    type Err = WaterfallError;

    /// Accepts DOM `KeyboardEvent.key` names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ArrowLeft" | "Left" => Ok(Self::ArrowLeft),
            "ArrowRight" | "Right" => Ok(Self::ArrowRight),
            "ArrowUp" | "Up" => Ok(Self::ArrowUp),
            "ArrowDown" | "Down" => Ok(Self::ArrowDown),
            "PageUp" => Ok(Self::PageUp),
            "PageDown" => Ok(Self::PageDown),
            "Home" => Ok(Self::Home),
            "End" => Ok(Self::End),
            " " | "Space" | "Spacebar" => Ok(Self::Space),
            other => Err(WaterfallError::UnknownKey(other.to_string())),
        }
    }
}
