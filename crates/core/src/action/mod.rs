//! Action seam between the engine and the automation host.
//!
//! Host behaviour (volume, mute, transport...) lives behind [`Action`] and is
//! looked up by name in an [`ActionRegistry`] built by the composition root.
//! Actions that steer the engine itself (modifiers, zone navigation) are the
//! closed [`EngineAction`] set; they never touch the host and instead queue a
//! [`SurfaceCommand`] that is applied once the current traversal finishes.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::modifiers::ModifierManager;
use crate::values::Rgba;
use crate::zone::{Navigator, ZoneId};

/// Opaque handle to an automation target such as a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetHandle(pub u64);

/// The effect currently focused in the host's UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusedFx {
    pub target: TargetHandle,
    pub slot: usize,
    pub name: String,
}

/// Host lookups the engine needs while dispatching.
pub trait TargetResolver {
    /// Target a navigator currently points at, if any.
    fn resolve(&self, navigator: Navigator) -> Option<TargetHandle>;

    fn target_color(&self, _target: TargetHandle) -> Option<Rgba> {
        None
    }

    fn focused_fx(&self) -> Option<FocusedFx> {
        None
    }

    /// Effect names on `target` in slot order.
    fn fx_names(&self, _target: TargetHandle) -> Vec<String> {
        Vec::new()
    }

    fn fx_name(&self, target: TargetHandle, slot: usize) -> Option<String> {
        self.fx_names(target).into_iter().nth(slot)
    }
}

/// Everything a host action may know about the binding that fired it.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub action: &'a str,
    pub widget: &'a str,
    /// Alias of the owning zone, or its name.
    pub zone: &'a str,
    pub slot_index: usize,
    pub target: Option<TargetHandle>,
    /// Leading integer of the first parameter (may be negative).
    pub int_param: i32,
    /// Leading unsigned integer of the first parameter.
    pub param_index: Option<usize>,
    /// First parameter verbatim.
    pub string_param: &'a str,
    pub params: &'a [String],
}

/// Value or text pushed back to a widget on refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    Value(f64),
    Text(String),
}

/// A host behaviour. Implementations own whatever state they touch; the
/// engine only hands them values that are already range-clamped.
pub trait Action {
    fn perform(&self, invocation: &Invocation<'_>, value: f64);

    fn touch(&self, _invocation: &Invocation<'_>, _value: f64) {}

    /// Current value of the target in the binding's value space.
    fn current_normalized_value(&self, _invocation: &Invocation<'_>) -> f64 {
        0.0
    }

    /// `None` blanks the widget.
    fn feedback(&self, invocation: &Invocation<'_>) -> Option<Feedback> {
        Some(Feedback::Value(self.current_normalized_value(invocation)))
    }
}

/// Name to behaviour table, plus an optional catch-all for names nobody
/// registered.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Rc<dyn Action>>,
    fallback: Option<Rc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, action: Rc<dyn Action>) {
        self.actions.insert(name.into(), action);
    }

    pub fn with(mut self, name: impl Into<String>, action: Rc<dyn Action>) -> Self {
        self.register(name, action);
        self
    }

    pub fn set_fallback(&mut self, action: Rc<dyn Action>) {
        self.fallback = Some(action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Action>> {
        self.actions
            .get(name)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.actions.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry")
            .field("actions", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// `Go<Name>` shortcuts and the associated zone each one selects.
const ASSOCIATED_SHORTCUTS: [(&str, &str); 11] = [
    ("GoTrack", "Track"),
    ("GoVCA", "VCA"),
    ("GoFolder", "Folder"),
    ("GoMasterTrack", "MasterTrack"),
    ("GoTrackSend", "TrackSend"),
    ("GoTrackReceive", "TrackReceive"),
    ("GoTrackFXMenu", "TrackFXMenu"),
    ("GoSelectedTrack", "SelectedTrack"),
    ("GoSelectedTrackSend", "SelectedTrackSend"),
    ("GoSelectedTrackReceive", "SelectedTrackReceive"),
    ("GoSelectedTrackFXMenu", "SelectedTrackFXMenu"),
];

/// Actions implemented by the engine rather than the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    NoAction,
    /// Engaged while the widget is held.
    Modifier(String),
    ClearModifiers,
    ToggleChannel,
    GoHome,
    GoAssociatedZone(String),
    GoSubZone(String),
    LeaveSubZone,
    GoSelectedTrackFx,
    GoFxSlot(usize),
    ToggleFocusedFxMapping,
    ToggleFocusedFxParamMapping,
    Broadcast(Vec<String>),
    Receive(Vec<String>),
    FixedText(String),
}

impl EngineAction {
    /// Recognises engine action names. `params` are the tokens after the name.
    pub fn parse(name: &str, params: &[String], vocabulary: &ModifierManager) -> Option<Self> {
        if vocabulary.is_modifier(name) {
            return Some(Self::Modifier(name.to_string()));
        }
        if let Some((_, zone)) = ASSOCIATED_SHORTCUTS.iter().find(|(alias, _)| *alias == name) {
            return Some(Self::GoAssociatedZone((*zone).to_string()));
        }

        let first = params.first().filter(|param| !is_bracket(param));
        let action = match name {
            "NoAction" => Self::NoAction,
            "ClearModifiers" => Self::ClearModifiers,
            "ToggleChannel" => Self::ToggleChannel,
            "GoHome" => Self::GoHome,
            "GoZone" => match first {
                Some(zone) => Self::GoAssociatedZone(zone.clone()),
                None => Self::NoAction,
            },
            "GoSubZone" => match first {
                Some(zone) => Self::GoSubZone(zone.clone()),
                None => Self::NoAction,
            },
            "LeaveSubZone" => Self::LeaveSubZone,
            "GoSelectedTrackFX" => Self::GoSelectedTrackFx,
            "GoFXSlot" => Self::GoFxSlot(first.and_then(|slot| slot.parse().ok()).unwrap_or(0)),
            "ToggleEnableFocusedFXMapping" => Self::ToggleFocusedFxMapping,
            "ToggleEnableFocusedFXParamMapping" => Self::ToggleFocusedFxParamMapping,
            "Broadcast" => Self::Broadcast(zone_list(params)),
            "Receive" => Self::Receive(zone_list(params)),
            "FixedTextDisplay" => Self::FixedText(first.cloned().unwrap_or_default()),
            _ => return None,
        };
        Some(action)
    }
}

fn is_bracket(token: &str) -> bool {
    matches!(token, "[" | "]" | "{" | "}")
}

fn zone_list(params: &[String]) -> Vec<String> {
    params
        .iter()
        .take_while(|param| !is_bracket(param))
        .cloned()
        .collect()
}

/// Deferred engine effect, applied by the page after a dispatch completes.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCommand {
    SetModifier { name: String, engaged: bool },
    ClearModifiers,
    ToggleChannel(u32),
    GoHome,
    GoAssociatedZone(String),
    GoSubZone { zone: ZoneId, name: String },
    LeaveSubZone { zone: ZoneId },
    GoSelectedTrackFx,
    GoFxSlot { navigator: Navigator, slot: usize },
    ToggleFocusedFxMapping,
    ToggleFocusedFxParamMapping,
    SetBroadcast(Vec<String>),
    SetReceive(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl Action for Silent {
        fn perform(&self, _invocation: &Invocation<'_>, _value: f64) {}
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn registry_prefers_exact_names_then_fallback() {
        let mut registry = ActionRegistry::new().with("Play", Rc::new(Silent));
        assert!(registry.get("Play").is_some());
        assert!(registry.get("Stop").is_none());

        registry.set_fallback(Rc::new(Silent));
        assert!(registry.get("Stop").is_some());
        assert!(!registry.contains("Stop"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn recognises_engine_actions() {
        let vocabulary = ModifierManager::default();
        let parse = |name: &str, params: &[&str]| {
            EngineAction::parse(name, &strings(params), &vocabulary)
        };

        assert_eq!(parse("Shift", &[]), Some(EngineAction::Modifier("Shift".into())));
        assert_eq!(
            parse("GoVCA", &[]),
            Some(EngineAction::GoAssociatedZone("VCA".into()))
        );
        assert_eq!(
            parse("GoZone", &["Sends"]),
            Some(EngineAction::GoAssociatedZone("Sends".into()))
        );
        assert_eq!(parse("GoFXSlot", &["3"]), Some(EngineAction::GoFxSlot(3)));
        assert_eq!(
            parse("Broadcast", &["Home", "VCA", "{", "Track", "}"]),
            Some(EngineAction::Broadcast(strings(&["Home", "VCA"])))
        );
        assert_eq!(
            parse("FixedTextDisplay", &["Gain"]),
            Some(EngineAction::FixedText("Gain".into()))
        );
        assert_eq!(parse("GoSubZone", &[]), Some(EngineAction::NoAction));
        assert_eq!(parse("TrackVolume", &[]), None);
    }
}
