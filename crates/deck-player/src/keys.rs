//! Key bindings.
//!
//! Space and `/` are global shortcuts only in `Normal` mode; while the search
//! box has focus every printable key is text.

use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MediaKeyCode};

use crate::media::MediaAction;

/// Seconds moved by `,` and `.`.
pub const SEEK_STEP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Search,
}

impl InputMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Search => "SEARCH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyAction {
    Quit,
    TogglePlayPause,
    FocusSearch,
    CancelSearch,
    SubmitSearch,
    NextPanel,
    PrevPanel,
    FocusNext,
    FocusPrev,
    Activate,
    PlayNext,
    PlayPrevious,
    Stop,
    ToggleFavourite,
    SeekBy(f64),
    /// Hardware media key, routed through the media session.
    Media(MediaAction),
}

/// Map a key press to an action. `None` in `Search` mode means the key
/// belongs to the text input.
pub fn action_for(mode: InputMode, key: KeyEvent) -> Option<KeyAction> {
    if key.code == KeyCode::Char('c') && key.modifiers == KeyModifiers::CONTROL {
        return Some(KeyAction::Quit);
    }
    if let KeyCode::Media(media) = key.code {
        return media_key(media);
    }

    match mode {
        InputMode::Search => match key.code {
            KeyCode::Esc | KeyCode::Tab | KeyCode::BackTab => Some(KeyAction::CancelSearch),
            KeyCode::Enter => Some(KeyAction::SubmitSearch),
            _ => None,
        },
        InputMode::Normal => match key.code {
            KeyCode::Char(' ') => Some(KeyAction::TogglePlayPause),
            KeyCode::Char('/') => Some(KeyAction::FocusSearch),
            KeyCode::Char('q') if key.modifiers == KeyModifiers::NONE => Some(KeyAction::Quit),
            KeyCode::Tab => Some(KeyAction::NextPanel),
            KeyCode::BackTab => Some(KeyAction::PrevPanel),
            KeyCode::Down | KeyCode::Char('j') => Some(KeyAction::FocusNext),
            KeyCode::Up | KeyCode::Char('k') => Some(KeyAction::FocusPrev),
            KeyCode::Enter => Some(KeyAction::Activate),
            KeyCode::Char('n') => Some(KeyAction::PlayNext),
            KeyCode::Char('p') => Some(KeyAction::PlayPrevious),
            KeyCode::Char('s') => Some(KeyAction::Stop),
            KeyCode::Char('f') => Some(KeyAction::ToggleFavourite),
            KeyCode::Char(',') => Some(KeyAction::SeekBy(-SEEK_STEP)),
            KeyCode::Char('.') => Some(KeyAction::SeekBy(SEEK_STEP)),
            _ => None,
        },
    }
}

fn media_key(code: MediaKeyCode) -> Option<KeyAction> {
    match code {
        MediaKeyCode::PlayPause => Some(KeyAction::TogglePlayPause),
        MediaKeyCode::Play => Some(KeyAction::Media(MediaAction::Play)),
        MediaKeyCode::Pause => Some(KeyAction::Media(MediaAction::Pause)),
        MediaKeyCode::TrackNext => Some(KeyAction::Media(MediaAction::Next)),
        MediaKeyCode::TrackPrevious => Some(KeyAction::Media(MediaAction::Previous)),
        MediaKeyCode::Stop => Some(KeyAction::Stop),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_space_and_slash_only_in_normal_mode() {
        let space = key(KeyCode::Char(' '));
        let slash = key(KeyCode::Char('/'));
        assert_eq!(action_for(InputMode::Normal, space), Some(KeyAction::TogglePlayPause));
        assert_eq!(action_for(InputMode::Normal, slash), Some(KeyAction::FocusSearch));
        assert_eq!(action_for(InputMode::Search, space), None);
        assert_eq!(action_for(InputMode::Search, slash), None);
    }

    #[test]
    fn test_search_mode_leaves_letters_to_input() {
        for c in ['q', 'n', 'j', 'f'] {
            assert_eq!(action_for(InputMode::Search, key(KeyCode::Char(c))), None);
        }
        assert_eq!(
            action_for(InputMode::Search, key(KeyCode::Esc)),
            Some(KeyAction::CancelSearch)
        );
        assert_eq!(
            action_for(InputMode::Search, key(KeyCode::Enter)),
            Some(KeyAction::SubmitSearch)
        );
    }

    #[test]
    fn test_ctrl_c_and_media_keys_everywhere() {
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        let next = key(KeyCode::Media(MediaKeyCode::TrackNext));
        for mode in [InputMode::Normal, InputMode::Search] {
            assert_eq!(action_for(mode, ctrl_c), Some(KeyAction::Quit));
            assert_eq!(
                action_for(mode, next),
                Some(KeyAction::Media(MediaAction::Next))
            );
        }
    }

    #[test]
    fn test_navigation_and_seek_keys() {
        assert_eq!(action_for(InputMode::Normal, key(KeyCode::Char('j'))), Some(KeyAction::FocusNext));
        assert_eq!(action_for(InputMode::Normal, key(KeyCode::Up)), Some(KeyAction::FocusPrev));
        assert_eq!(action_for(InputMode::Normal, key(KeyCode::Tab)), Some(KeyAction::NextPanel));
        assert_eq!(
            action_for(InputMode::Normal, key(KeyCode::Char(','))),
            Some(KeyAction::SeekBy(-SEEK_STEP))
        );
        let shifted_q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::SHIFT);
        assert_eq!(action_for(InputMode::Normal, shifted_q), None);
    }
}
