//! Keyboard focus: which panel is active, and which item inside each panel.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Panel {
    Sidebar,
    Tracklist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// A panel's focusable items. Queried at key time, never cached.
pub trait FocusItems {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn focused(&self) -> Option<usize>;
    fn focus(&mut self, index: usize);
}

/// Focus state of a list whose length changes as data arrives.
#[derive(Debug, Clone, Default)]
pub struct FocusList {
    len: usize,
    focused: Option<usize>,
}

impl FocusList {
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if len == 0 {
            self.focused = None;
        } else if let Some(i) = self.focused {
            self.focused = Some(i.min(len - 1));
        }
    }

    pub fn clear_focus(&mut self) {
        self.focused = None;
    }
}

impl FocusItems for FocusList {
    fn len(&self) -> usize {
        self.len
    }

    fn focused(&self) -> Option<usize> {
        self.focused
    }

    fn focus(&mut self, index: usize) {
        if index < self.len {
            self.focused = Some(index);
        }
    }
}

/// Registry of panels in focus order, plus the active one.
pub struct PanelNavigator<T: FocusItems = FocusList> {
    panels: Vec<(Panel, T)>,
    active: usize,
}

impl<T: FocusItems> PanelNavigator<T> {
    pub fn new() -> Self {
        Self {
            panels: Vec::new(),
            active: 0,
        }
    }

    /// Register (or replace) the items of `panel`.
    pub fn register(&mut self, panel: Panel, items: T) {
        match self.panels.iter_mut().find(|(p, _)| *p == panel) {
            Some(slot) => slot.1 = items,
            None => self.panels.push((panel, items)),
        }
    }

    pub fn items(&self, panel: Panel) -> Option<&T> {
        self.panels.iter().find(|(p, _)| *p == panel).map(|(_, t)| t)
    }

    pub fn items_mut(&mut self, panel: Panel) -> Option<&mut T> {
        self.panels
            .iter_mut()
            .find(|(p, _)| *p == panel)
            .map(|(_, t)| t)
    }

    pub fn active(&self) -> Option<Panel> {
        self.panels.get(self.active).map(|(p, _)| *p)
    }

    pub fn is_active(&self, panel: Panel) -> bool {
        self.active() == Some(panel)
    }

    pub fn set_active(&mut self, panel: Panel) {
        if let Some(pos) = self.panels.iter().position(|(p, _)| *p == panel) {
            self.active = pos;
        }
    }

    pub fn next_panel(&mut self) -> Option<Panel> {
        if self.panels.is_empty() {
            return None;
        }
        self.active = (self.active + 1) % self.panels.len();
        self.active()
    }

    pub fn prev_panel(&mut self) -> Option<Panel> {
        if self.panels.is_empty() {
            return None;
        }
        self.active = if self.active == 0 {
            self.panels.len() - 1
        } else {
            self.active - 1
        };
        self.active()
    }

    /// Move focus inside `panel`. Nothing focused counts as index -1, so
    /// `Next` lands on the first item and `Previous` on the one before the
    /// last. Returns the newly focused index.
    pub fn navigate(&mut self, panel: Panel, direction: Direction) -> Option<usize> {
        let items = self.items_mut(panel)?;
        if items.is_empty() {
            return None;
        }
        let count = items.len() as i64;
        let current = match items.focused() {
            Some(i) if (i as i64) < count => i as i64,
            Some(_) => return None,
            None => -1,
        };
        let target = match direction {
            Direction::Next => (current + 1).rem_euclid(count),
            Direction::Previous => (current - 1 + count).rem_euclid(count),
        } as usize;
        items.focus(target);
        Some(target)
    }
}

impl<T: FocusItems> Default for PanelNavigator<T> {
    fn default() -> Self {
        Self::new()
    }
}
