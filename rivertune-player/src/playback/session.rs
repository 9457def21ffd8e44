//! Media-session command surface.
//!
//! System control surfaces (notification, headset, car) see four custom
//! commands beside transport control. Each maps 1:1 to an orchestrator
//! method; the [`SessionLayout`] mirrors current queue/track truth and is
//! recomputed after every relevant transition.

use std::sync::Arc;

use rivertune_common::events::RepeatMode;
use serde::{Deserialize, Serialize};

use crate::playback::orchestrator::PlaybackOrchestrator;

/// Remote commands exposed through the media session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCommand {
    ToggleShuffle,
    CycleRepeat,
    ToggleLike,
    StartRadio,
}

/// One command affordance: what the surface shows and whether it works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandButton {
    pub label: String,
    pub icon: String,
    pub enabled: bool,
}

impl CommandButton {
    fn new(label: &str, icon: &str, enabled: bool) -> Self {
        Self {
            label: label.to_string(),
            icon: icon.to_string(),
            enabled,
        }
    }
}

/// The full custom-command row shown by the media session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLayout {
    pub shuffle: CommandButton,
    pub repeat: CommandButton,
    pub like: CommandButton,
    pub radio: CommandButton,
}

impl SessionLayout {
    /// Build the layout from current truth. `liked` is None when no song
    /// row is known for the current track.
    pub fn compute(
        shuffled: bool,
        repeat: RepeatMode,
        liked: Option<bool>,
        has_current: bool,
    ) -> Self {
        let (repeat_label, repeat_icon) = match repeat {
            RepeatMode::Off => ("Repeat off", "repeat"),
            RepeatMode::One => ("Repeat one", "repeat_one_on"),
            RepeatMode::All => ("Repeat all", "repeat_on"),
        };
        Self {
            shuffle: CommandButton::new(
                if shuffled { "Disable shuffle" } else { "Enable shuffle" },
                if shuffled { "shuffle_on" } else { "shuffle" },
                true,
            ),
            repeat: CommandButton::new(repeat_label, repeat_icon, true),
            like: CommandButton::new(
                if liked == Some(true) { "Remove like" } else { "Like" },
                if liked == Some(true) { "favorite" } else { "favorite_border" },
                liked.is_some(),
            ),
            radio: CommandButton::new("Start radio", "radio", has_current),
        }
    }
}

impl Default for SessionLayout {
    fn default() -> Self {
        Self::compute(false, RepeatMode::Off, None, false)
    }
}

/// Route a media-session command to the orchestrator.
pub async fn dispatch(orchestrator: &Arc<PlaybackOrchestrator>, command: SessionCommand) {
    match command {
        SessionCommand::ToggleShuffle => orchestrator.trigger_shuffle().await,
        SessionCommand::CycleRepeat => orchestrator.cycle_repeat_mode(),
        SessionCommand::ToggleLike => orchestrator.toggle_like().await,
        SessionCommand::StartRadio => orchestrator.toggle_start_radio().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_reflects_state() {
        let layout = SessionLayout::compute(true, RepeatMode::All, Some(true), true);
        assert_eq!(layout.shuffle.label, "Disable shuffle");
        assert_eq!(layout.repeat.icon, "repeat_on");
        assert_eq!(layout.like.label, "Remove like");
        assert!(layout.like.enabled);
        assert!(layout.radio.enabled);
    }

    #[test]
    fn like_and_radio_disabled_without_a_track() {
        let layout = SessionLayout::compute(false, RepeatMode::Off, None, false);
        assert!(!layout.like.enabled);
        assert!(!layout.radio.enabled);
        assert_eq!(layout.like.label, "Like");
    }
}
