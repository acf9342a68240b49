//! Named modifiers and the combination codes used to select bindings.
//!
//! Codes 1 and 2 are reserved for the touch and toggle overlays, so named
//! modifiers carry weights from 4 upwards.

use crate::config::ModifierWeight;

/// Modifier code contribution of a touched channel.
pub const TOUCH_OFFSET: u32 = 1;
/// Modifier code contribution of a toggled channel.
pub const TOGGLE_OFFSET: u32 = 2;
/// Smallest weight a named modifier may carry without aliasing an overlay.
pub const MIN_MODIFIER_WEIGHT: u32 = TOUCH_OFFSET + TOGGLE_OFFSET + 1;
/// Upper bound on the vocabulary size. Every engaged subset is enumerated.
pub const MAX_MODIFIERS: usize = 16;

/// Overlay offsets in the order they are tried: touched and toggled, touched,
/// toggled, plain.
pub fn overlay_offsets(touched: bool, toggled: bool) -> impl Iterator<Item = u32> {
    [
        (touched && toggled).then_some(TOUCH_OFFSET + TOGGLE_OFFSET),
        touched.then_some(TOUCH_OFFSET),
        toggled.then_some(TOGGLE_OFFSET),
        Some(0),
    ]
    .into_iter()
    .flatten()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    pub name: String,
    pub weight: u32,
    pub engaged: bool,
}

/// Independent modifier flags plus the cached, descending list of codes they
/// can currently produce.
#[derive(Debug, Clone)]
pub struct ModifierManager {
    modifiers: Vec<Modifier>,
    combinations: Vec<u32>,
}

impl Default for ModifierManager {
    fn default() -> Self {
        Self::new(&ModifierWeight::standard_set())
    }
}

impl ModifierManager {
    pub fn new(vocabulary: &[ModifierWeight]) -> Self {
        if vocabulary.len() > MAX_MODIFIERS {
            tracing::warn!(
                configured = vocabulary.len(),
                kept = MAX_MODIFIERS,
                "modifier vocabulary truncated"
            );
        }
        let modifiers = vocabulary
            .iter()
            .take(MAX_MODIFIERS)
            .map(|entry| Modifier {
                name: entry.name.clone(),
                weight: entry.weight,
                engaged: false,
            })
            .collect();

        Self {
            modifiers,
            combinations: vec![0],
        }
    }

    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    pub fn weight_of(&self, name: &str) -> Option<u32> {
        self.find(name).map(|modifier| modifier.weight)
    }

    pub fn is_modifier(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn is_engaged(&self, name: &str) -> bool {
        self.find(name).map_or(false, |modifier| modifier.engaged)
    }

    /// Returns `true` when the flag actually changed; the combination list is
    /// recalculated on every change.
    pub fn set_engaged(&mut self, name: &str, engaged: bool) -> bool {
        let Some(modifier) = self.modifiers.iter_mut().find(|m| m.name == name) else {
            tracing::debug!(modifier = name, "unknown modifier");
            return false;
        };
        if modifier.engaged == engaged {
            return false;
        }

        modifier.engaged = engaged;
        self.recalculate();
        true
    }

    /// Disengages everything. Returns `true` if anything was engaged.
    pub fn clear(&mut self) -> bool {
        let was_engaged = self.modifiers.iter().any(|m| m.engaged);
        for modifier in &mut self.modifiers {
            modifier.engaged = false;
        }
        if was_engaged {
            self.recalculate();
        }
        was_engaged
    }

    /// Sum of the engaged weights.
    pub fn engaged_code(&self) -> u32 {
        self.modifiers
            .iter()
            .filter(|m| m.engaged)
            .map(|m| m.weight)
            .sum()
    }

    /// Reachable codes, highest first. Always ends with 0.
    pub fn combinations(&self) -> &[u32] {
        &self.combinations
    }

    /// Sums every subset of the engaged weights. The empty subset supplies 0;
    /// aliasing sums collapse into one entry.
    pub fn recalculate(&mut self) {
        let engaged: Vec<u32> = self
            .modifiers
            .iter()
            .filter(|m| m.engaged)
            .map(|m| m.weight)
            .collect();

        let mut codes = Vec::with_capacity(1 << engaged.len());
        for mask in 0u32..(1 << engaged.len()) {
            let code: u32 = engaged
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .fold(0u32, |sum, (_, weight)| sum.saturating_add(*weight));
            codes.push(code);
        }

        codes.sort_unstable_by(|a, b| b.cmp(a));
        codes.dedup();
        self.combinations = codes;
    }

    fn find(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.name == name)
    }
}
