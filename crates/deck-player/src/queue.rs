//! Play queue.
//!
//! Next/previous wrap around at both ends. A current track that is not in
//! the queue (the queue was replaced while it played) counts as index -1:
//! next lands on the first entry, previous on the one before the last.

use deck_proto::track::Track;

#[derive(Debug, Clone, Default)]
pub struct Queue {
    tracks: Vec<Track>,
}

impl Queue {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn set(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn position_of(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    pub fn next_after(&self, track_id: &str) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let next = match self.position_of(track_id) {
            Some(i) => (i + 1) % self.tracks.len(),
            None => 0,
        };
        self.tracks.get(next)
    }

    pub fn previous_before(&self, track_id: &str) -> Option<&Track> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        let previous = match self.position_of(track_id) {
            Some(i) => (i + len - 1) % len,
            None => (len + len - 2) % len,
        };
        self.tracks.get(previous)
    }

    /// The entry right after `track_id`, without wrapping.
    pub fn prefetch_candidate(&self, track_id: &str) -> Option<&Track> {
        let i = self.position_of(track_id)?;
        self.tracks.get(i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::track;

    fn queue(ids: &[&str]) -> Queue {
        Queue::new(ids.iter().map(|id| track(id, 180.0)).collect())
    }

    fn id(t: Option<&Track>) -> Option<&str> {
        t.map(|t| t.id.as_str())
    }

    #[test]
    fn test_next_and_previous_wrap() {
        let q = queue(&["a", "b", "c"]);
        assert_eq!(id(q.next_after("a")), Some("b"));
        assert_eq!(id(q.next_after("c")), Some("a"));
        assert_eq!(id(q.previous_before("a")), Some("c"));
        assert_eq!(id(q.previous_before("b")), Some("a"));
    }

    #[test]
    fn test_next_then_previous_restores_every_position() {
        for len in 1..6 {
            let ids: Vec<String> = (0..len).map(|i| format!("t{i}")).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let q = queue(&refs);
            for current in &refs {
                let next = q.next_after(current).unwrap().id.clone();
                assert_eq!(id(q.previous_before(&next)), Some(*current));
            }
        }
    }

    #[test]
    fn test_track_outside_queue() {
        let q = queue(&["a", "b", "c"]);
        assert_eq!(id(q.next_after("zz")), Some("a"));
        assert_eq!(id(q.previous_before("zz")), Some("b"));
        assert!(q.prefetch_candidate("zz").is_none());

        let single = queue(&["a"]);
        assert_eq!(id(single.previous_before("zz")), Some("a"));
        let pair = queue(&["a", "b"]);
        assert_eq!(id(pair.previous_before("zz")), Some("a"));
    }

    #[test]
    fn test_empty_queue() {
        let q = Queue::default();
        assert!(q.next_after("a").is_none());
        assert!(q.previous_before("a").is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_prefetch_candidate_does_not_wrap() {
        let mut q = queue(&["a", "b"]);
        assert_eq!(id(q.prefetch_candidate("a")), Some("b"));
        assert!(q.prefetch_candidate("b").is_none());

        q.set(vec![track("x", 10.0)]);
        assert_eq!(q.len(), 1);
        assert!(q.prefetch_candidate("x").is_none());
        assert_eq!(id(q.next_after("x")), Some("x"));
    }
}
