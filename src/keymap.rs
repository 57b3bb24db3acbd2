use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use rustc_hash::FxHashMap;

use crate::action::TreeAction;

/// Built-in navigation layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KeymapProfile {
    /// Arrows and `hjkl` both navigate.
    #[default]
    Default,
    /// `hjkl`, `g`/`G` and `Ctrl-u`/`Ctrl-d` only.
    Vim,
    /// Arrow keys only.
    Arrows,
}

/// A key chord, ignoring press/release kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyBinding {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl KeyBinding {
    pub const fn new(code: KeyCode, modifiers: KeyModifiers) -> Self {
        Self { code, modifiers }
    }

    pub const fn plain(code: KeyCode) -> Self {
        Self::new(code, KeyModifiers::NONE)
    }
}

impl From<KeyEvent> for KeyBinding {
    fn from(key: KeyEvent) -> Self {
        Self::new(key.code, key.modifiers)
    }
}

/// Maps key events to [`TreeAction`]s: user overrides first, then the profile, then keys
/// shared by every profile.
#[derive(Clone, Debug, Default)]
pub struct TreeKeyBindings {
    profile: KeymapProfile,
    // `None` unbinds the chord.
    overrides: FxHashMap<KeyBinding, Option<TreeAction>>,
}

impl TreeKeyBindings {
    pub fn new() -> Self {
        Self::with_profile(KeymapProfile::Default)
    }

    pub fn with_profile(profile: KeymapProfile) -> Self {
        Self {
            profile,
            overrides: FxHashMap::default(),
        }
    }

    pub const fn profile(&self) -> KeymapProfile {
        self.profile
    }

    pub const fn set_profile(&mut self, profile: KeymapProfile) {
        self.profile = profile;
    }

    /// Binds a chord to a built-in action, replacing whatever the profile maps it to.
    pub fn bind(&mut self, key: KeyBinding, action: TreeAction) {
        self.overrides.insert(key, Some(action));
    }

    /// Makes a chord resolve to nothing.
    pub fn unbind(&mut self, key: KeyBinding) {
        self.overrides.insert(key, None);
    }

    /// Drops all overrides.
    pub fn reset(&mut self) {
        self.overrides.clear();
    }

    pub fn resolve<C>(&self, key: KeyEvent) -> Option<TreeAction<C>> {
        let chord = KeyBinding::from(key);
        let action = match self.overrides.get(&chord) {
            Some(bound) => *bound,
            None => self.resolve_builtin(chord),
        };
        action.and_then(builtin)
    }

    pub fn resolve_with<C, F>(&self, key: KeyEvent, custom: F) -> Option<TreeAction<C>>
    where
        F: Fn(KeyEvent) -> Option<C>,
    {
        if let Some(action) = custom(key) {
            return Some(TreeAction::Custom(action));
        }

        self.resolve(key)
    }

    fn resolve_builtin(&self, chord: KeyBinding) -> Option<TreeAction> {
        if chord.modifiers.contains(KeyModifiers::CONTROL) {
            return self.resolve_control(chord.code);
        }

        let nav_action = match self.profile {
            KeymapProfile::Default => Self::resolve_arrows(chord.code)
                .or_else(|| Self::resolve_hjkl(chord.code)),
            KeymapProfile::Vim => Self::resolve_hjkl(chord.code).or(match chord.code {
                KeyCode::Char('g') => Some(TreeAction::SelectFirst),
                KeyCode::Char('G') => Some(TreeAction::SelectLast),
                _ => None,
            }),
            KeymapProfile::Arrows => Self::resolve_arrows(chord.code),
        };
        nav_action.or_else(|| Self::resolve_common(chord.code))
    }

    const fn resolve_control(&self, code: KeyCode) -> Option<TreeAction> {
        match (self.profile, code) {
            (_, KeyCode::Right) => Some(TreeAction::ExpandAll),
            (_, KeyCode::Left) => Some(TreeAction::CollapseAll),
            (KeymapProfile::Vim, KeyCode::Char('d')) => Some(TreeAction::PageDown),
            (KeymapProfile::Vim, KeyCode::Char('u')) => Some(TreeAction::PageUp),
            _ => None,
        }
    }

    const fn resolve_arrows(code: KeyCode) -> Option<TreeAction> {
        match code {
            KeyCode::Up => Some(TreeAction::SelectPrev),
            KeyCode::Down => Some(TreeAction::SelectNext),
            KeyCode::Left => Some(TreeAction::CollapseOrSelectParent),
            KeyCode::Right => Some(TreeAction::ExpandOrSelectChild),
            _ => None,
        }
    }

    const fn resolve_hjkl(code: KeyCode) -> Option<TreeAction> {
        match code {
            KeyCode::Char('k') => Some(TreeAction::SelectPrev),
            KeyCode::Char('j') => Some(TreeAction::SelectNext),
            KeyCode::Char('h') => Some(TreeAction::CollapseOrSelectParent),
            KeyCode::Char('l') => Some(TreeAction::ExpandOrSelectChild),
            _ => None,
        }
    }

    const fn resolve_common(code: KeyCode) -> Option<TreeAction> {
        match code {
            KeyCode::Char(' ') | KeyCode::Enter => Some(TreeAction::ToggleExpansion),
            KeyCode::Char('+' | '*') => Some(TreeAction::ExpandAll),
            KeyCode::Char('-') => Some(TreeAction::CollapseAll),
            KeyCode::Home => Some(TreeAction::SelectFirst),
            KeyCode::End => Some(TreeAction::SelectLast),
            KeyCode::PageUp => Some(TreeAction::PageUp),
            KeyCode::PageDown => Some(TreeAction::PageDown),
            _ => None,
        }
    }
}

// Key bindings only ever produce built-in actions.
const fn builtin<C>(action: TreeAction) -> Option<TreeAction<C>> {
    Some(match action {
        TreeAction::CollapseOrSelectParent => TreeAction::CollapseOrSelectParent,
        TreeAction::ExpandOrSelectChild => TreeAction::ExpandOrSelectChild,
        TreeAction::ToggleExpansion => TreeAction::ToggleExpansion,
        TreeAction::ExpandAll => TreeAction::ExpandAll,
        TreeAction::CollapseAll => TreeAction::CollapseAll,
        TreeAction::SelectPrev => TreeAction::SelectPrev,
        TreeAction::SelectNext => TreeAction::SelectNext,
        TreeAction::SelectFirst => TreeAction::SelectFirst,
        TreeAction::SelectLast => TreeAction::SelectLast,
        TreeAction::PageUp => TreeAction::PageUp,
        TreeAction::PageDown => TreeAction::PageDown,
        TreeAction::Custom(()) => return None,
    })
}
