//! Text formatting for the terminal views.

use regex::Regex;
use std::sync::OnceLock;
use unicode_width::UnicodeWidthChar;

use crate::state::PlaybackSnapshot;

/// `m:ss`; minutes are not wrapped into hours.
pub fn format_time(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Drop long parenthesised suffixes such as "(Remastered 2011 Digital
/// Version)"; short ones like "(Live)" stay.
pub fn clean_title(title: &str) -> String {
    static LONG_PARENS: OnceLock<Option<Regex>> = OnceLock::new();
    match LONG_PARENS.get_or_init(|| Regex::new(r"\([^)]{17,}\)").ok()) {
        Some(re) => re.replace_all(title, "").trim_end().to_string(),
        None => title.to_string(),
    }
}

/// Cut `text` to at most `width` terminal columns, marking the cut with `…`.
pub fn truncate(text: &str, width: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    let total: usize = text.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= width {
        return text.to_string();
    }
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(c);
    }
    if width > 0 {
        out.push('…');
    }
    out
}

/// One-line status: state, title, artists and timeline.
pub fn now_playing(snap: &PlaybackSnapshot) -> String {
    let Some(track) = &snap.current else {
        return "Nothing playing".to_string();
    };
    format!(
        "[{}] {} · {}  {} / {}",
        snap.status.label(),
        clean_title(&track.name),
        track.artist_line(),
        format_time(snap.position),
        format_time(snap.duration),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlaybackStatus;
    use crate::testing::track;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(3725.0), "62:05");
        assert_eq!(format_time(f64::NAN), "0:00");
        assert_eq!(format_time(-3.0), "0:00");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("Song (Live)"), "Song (Live)");
        assert_eq!(
            clean_title("Song (Remastered 2011 Version)"),
            "Song"
        );
        assert_eq!(
            clean_title("A (feat. Someone Long Name) B"),
            "A  B"
        );
        // Exactly 16 characters inside is kept.
        assert_eq!(clean_title("X (abcdefghijklmnop)"), "X (abcdefghijklmnop)");
        assert_eq!(clean_title("X (abcdefghijklmnopq)"), "X");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
        assert_eq!(truncate("日本語テキスト", 7), "日本語…");
    }

    #[test]
    fn test_now_playing() {
        let mut snap = PlaybackSnapshot::default();
        assert_eq!(now_playing(&snap), "Nothing playing");

        snap.current = Some(track("t1", 200.0));
        snap.status = PlaybackStatus::Playing;
        snap.position = 65.0;
        snap.duration = 200.0;
        assert_eq!(now_playing(&snap), "[playing] Song t1 · Artist  1:05 / 3:20");
    }
}
