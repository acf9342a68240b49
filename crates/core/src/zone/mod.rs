//! Zones: named scopes of widget bindings and their activation cascade.
//!
//! Zones live in a [`ZoneArena`] and refer to each other by [`ZoneId`]. The
//! arena walks the tree for activation, dispatch and refresh; building zones
//! from definitions is the registry's job.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use crate::context::{ActionContext, DispatchEnv, Gesture};
use crate::modifiers::{overlay_offsets, ModifierManager};
use crate::widget::{Surface, WidgetId};

/// Handle into a [`ZoneArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(pub(crate) usize);

impl ZoneId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a zone finds the target its actions operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Navigator {
    /// 1-based surface channel after the channel offset.
    Track { channel: u32 },
    SelectedTrack,
    MasterTrack,
    FocusedFx,
}

/// Identity of a zone instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneScope {
    pub id: ZoneId,
    pub name: String,
    pub alias: Option<String>,
    pub source: PathBuf,
    pub navigator: Navigator,
    pub slot_index: usize,
}

impl ZoneScope {
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug)]
pub struct Zone {
    pub scope: ZoneScope,
    /// Zone whose channel a sub-zone is scoped to.
    pub enclosing: Option<ZoneId>,
    active: bool,
    widgets: BTreeSet<WidgetId>,
    bindings: BTreeMap<WidgetId, BTreeMap<u32, Vec<ActionContext>>>,
    current_modifiers: BTreeMap<WidgetId, u32>,
    pub included: Vec<ZoneId>,
    pub associated: BTreeMap<String, Vec<ZoneId>>,
    pub sub_zones: BTreeMap<String, Vec<ZoneId>>,
}

impl Zone {
    pub fn new(scope: ZoneScope, enclosing: Option<ZoneId>) -> Self {
        Self {
            scope,
            enclosing,
            active: false,
            widgets: BTreeSet::new(),
            bindings: BTreeMap::new(),
            current_modifiers: BTreeMap::new(),
            included: Vec::new(),
            associated: BTreeMap::new(),
            sub_zones: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ZoneId {
        self.scope.id
    }

    pub fn name(&self) -> &str {
        &self.scope.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn widgets(&self) -> impl Iterator<Item = WidgetId> + '_ {
        self.widgets.iter().copied()
    }

    pub fn owns(&self, widget: WidgetId) -> bool {
        self.widgets.contains(&widget)
    }

    pub fn add_widget(&mut self, widget: WidgetId) {
        self.widgets.insert(widget);
    }

    /// Appends a context under `(widget, modifier)`; the zone owns it from here.
    pub fn add_context(&mut self, widget: WidgetId, modifier: u32, context: ActionContext) {
        self.widgets.insert(widget);
        self.bindings
            .entry(widget)
            .or_default()
            .entry(modifier)
            .or_default()
            .push(context);
    }

    pub fn binding_count(&self) -> usize {
        self.bindings
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Every context bound to `widget`, across modifiers.
    pub fn contexts_of(&self, widget: WidgetId) -> impl Iterator<Item = &ActionContext> + '_ {
        self.bindings
            .get(&widget)
            .into_iter()
            .flat_map(BTreeMap::values)
            .flatten()
    }

    /// Highest channel among the zone's widgets.
    pub fn channel_number(&self, surface: &Surface) -> u32 {
        self.widgets
            .iter()
            .map(|&widget| surface.channel_of(widget))
            .max()
            .unwrap_or(0)
    }

    pub fn current_modifier(&self, widget: WidgetId) -> Option<u32> {
        self.current_modifiers.get(&widget).copied()
    }

    /// Picks the first reachable combination the widget has a binding for.
    pub fn update_current_modifier(&mut self, widget: WidgetId, combinations: &[u32]) {
        let Some(table) = self.bindings.get(&widget) else {
            return;
        };
        if let Some(&code) = combinations.iter().find(|code| table.contains_key(code)) {
            self.current_modifiers.insert(widget, code);
        }
    }

    pub fn update_current_modifiers(&mut self, combinations: &[u32]) {
        let widgets: Vec<WidgetId> = self.widgets.iter().copied().collect();
        for widget in widgets {
            self.update_current_modifier(widget, combinations);
        }
    }

    fn selected_key(&self, widget: WidgetId, surface: &Surface) -> Option<u32> {
        let modifier = self.current_modifiers.get(&widget)?;
        let table = self.bindings.get(&widget)?;
        let channel = surface.channel_of(widget);
        overlay_offsets(
            surface.is_channel_touched(channel),
            surface.is_channel_toggled(channel),
        )
        .map(|offset| modifier + offset)
        .find(|key| table.contains_key(key))
    }

    /// Contexts live for `widget` right now. Empty when nothing is selected.
    pub fn action_contexts(&self, widget: WidgetId, surface: &Surface) -> &[ActionContext] {
        self.selected_key(widget, surface)
            .and_then(|key| self.bindings.get(&widget)?.get(&key))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn action_contexts_mut(
        &mut self,
        widget: WidgetId,
        combinations: &[u32],
        surface: &Surface,
    ) -> (&ZoneScope, &mut [ActionContext]) {
        if !self.current_modifiers.contains_key(&widget) {
            self.update_current_modifier(widget, combinations);
        }
        let key = self.selected_key(widget, surface);
        let contexts = key
            .and_then(|key| self.bindings.get_mut(&widget)?.get_mut(&key))
            .map(Vec::as_mut_slice)
            .unwrap_or_default();
        (&self.scope, contexts)
    }

    fn run(&mut self, widget: WidgetId, gesture: Gesture, env: &mut DispatchEnv<'_>) {
        let (scope, contexts) =
            self.action_contexts_mut(widget, env.modifiers.combinations(), env.surface);
        for context in contexts {
            context.handle(gesture, scope, env);
        }
    }

    fn fire_hardwired(&mut self, name: &str, env: &mut DispatchEnv<'_>) {
        if let Some(widget) = env.surface.widget_by_name(name) {
            if self.owns(widget) {
                self.run(widget, Gesture::Press(1.0), env);
            }
        }
    }

    fn request_update_widget(&mut self, widget: WidgetId, env: &mut DispatchEnv<'_>) {
        let (scope, contexts) =
            self.action_contexts_mut(widget, env.modifiers.combinations(), env.surface);
        for context in contexts.iter_mut() {
            context.run_deferred(scope, env);
        }
        if let Some(first) = contexts.first_mut() {
            first.request_update(scope, env);
        }
    }

    fn overlays(&self) -> Vec<ZoneId> {
        self.sub_zones
            .values()
            .chain(self.associated.values())
            .flatten()
            .copied()
            .collect()
    }

    fn children(&self) -> Vec<ZoneId> {
        self.included
            .iter()
            .chain(self.associated.values().flatten())
            .chain(self.sub_zones.values().flatten())
            .copied()
            .collect()
    }
}

/// Owner of every zone instance of one surface.
#[derive(Debug, Default)]
pub struct ZoneArena {
    slots: Vec<Option<Zone>>,
    free: Vec<usize>,
}

impl ZoneArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the zone built by `build`, handing it its own id.
    pub fn insert_with(&mut self, build: impl FnOnce(ZoneId) -> Zone) -> ZoneId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        let id = ZoneId(index);
        self.slots[index] = Some(build(id));
        id
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ZoneId) -> Option<&mut Zone> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_active(&self, id: ZoneId) -> bool {
        self.get(id).map_or(false, Zone::is_active)
    }

    /// Removes a zone and every zone it owns.
    pub fn release(&mut self, id: ZoneId) {
        let Some(zone) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        self.free.push(id.0);
        for child in zone.children() {
            self.release(child);
        }
    }

    pub fn update_current_modifiers(&mut self, id: ZoneId, modifiers: &ModifierManager) {
        let Some(zone) = self.get_mut(id) else {
            return;
        };
        zone.update_current_modifiers(modifiers.combinations());
        for child in zone.children() {
            self.update_current_modifiers(child, modifiers);
        }
    }

    /// Runs the full activation cascade, even if the zone is already active.
    pub fn activate(&mut self, id: ZoneId, env: &mut DispatchEnv<'_>) {
        let Some(zone) = self.get_mut(id) else {
            return;
        };
        zone.update_current_modifiers(env.modifiers.combinations());
        zone.fire_hardwired("OnZoneActivation", env);
        zone.active = true;
        env.surface.announce_zone(zone.scope.display_name());
        tracing::debug!(zone = %zone.scope.display_name(), "activated");

        let overlays = zone.overlays();
        let included = zone.included.clone();
        for overlay in overlays {
            self.deactivate(overlay, env);
        }
        for child in included {
            self.activate(child, env);
        }
    }

    /// Runs the deactivation cascade and blanks every owned widget. The
    /// `OnZoneDeactivation` hook only fires for a zone that was active.
    pub fn deactivate(&mut self, id: ZoneId, env: &mut DispatchEnv<'_>) {
        let Some(zone) = self.get_mut(id) else {
            return;
        };
        if zone.active {
            zone.fire_hardwired("OnZoneDeactivation", env);
        }
        zone.active = false;
        tracing::debug!(zone = %zone.scope.display_name(), "deactivated");

        let widgets: Vec<WidgetId> = zone.widgets().collect();
        for child in zone.children() {
            self.deactivate(child, env);
        }
        for widget in widgets {
            env.surface.force_clear(widget);
        }
    }

    /// Offers an input to the zone tree under `id`. At most one zone claims
    /// it: overlays first, then the zone itself, then its included zones.
    pub fn dispatch(
        &mut self,
        id: ZoneId,
        widget: WidgetId,
        gesture: Gesture,
        env: &mut DispatchEnv<'_>,
        used: &mut bool,
    ) {
        let Some(zone) = self.get(id) else {
            return;
        };
        if !zone.active || *used {
            return;
        }

        for overlay in zone.overlays() {
            self.dispatch(overlay, widget, gesture, env, used);
        }
        if *used {
            return;
        }

        let Some(zone) = self.get_mut(id) else {
            return;
        };
        if zone.owns(widget) {
            *used = true;
            zone.run(widget, gesture, env);
            return;
        }

        let included = zone.included.clone();
        for child in included {
            self.dispatch(child, widget, gesture, env, used);
        }
    }

    /// Pulls feedback for every widget the tree owns that no zone visited
    /// earlier has already claimed.
    pub fn request_update(
        &mut self,
        id: ZoneId,
        env: &mut DispatchEnv<'_>,
        claimed: &mut HashSet<WidgetId>,
    ) {
        let Some(zone) = self.get(id) else {
            return;
        };
        if !zone.active {
            return;
        }

        let overlays = zone.overlays();
        let included = zone.included.clone();
        for child in overlays.into_iter().chain(included) {
            self.request_update(child, env, claimed);
        }

        let Some(zone) = self.get_mut(id) else {
            return;
        };
        let widgets: Vec<WidgetId> = zone.widgets().collect();
        for widget in widgets {
            if claimed.insert(widget) {
                zone.request_update_widget(widget, env);
            }
        }
    }

    /// `GoZone` semantics on a zone's associated groups. `Track` leaves every
    /// overlay; naming the active group toggles it off and reports `true` so
    /// the caller can return home.
    pub fn go_associated_zone(
        &mut self,
        id: ZoneId,
        name: &str,
        env: &mut DispatchEnv<'_>,
    ) -> bool {
        let Some(zone) = self.get(id) else {
            return false;
        };
        let groups: Vec<ZoneId> = zone.associated.values().flatten().copied().collect();
        let named = zone.associated.get(name).cloned().unwrap_or_default();

        if name == "Track" {
            for member in groups {
                self.deactivate(member, env);
            }
            return false;
        }

        if named.first().map_or(false, |&first| self.is_active(first)) {
            for member in named {
                self.deactivate(member, env);
            }
            return true;
        }

        for member in groups {
            self.deactivate(member, env);
        }
        for member in named {
            self.activate(member, env);
        }
        false
    }

    /// Activates the sub-zone group `name` of `id`, leaving the others.
    pub fn go_sub_zone(&mut self, id: ZoneId, name: &str, env: &mut DispatchEnv<'_>) {
        let Some(zone) = self.get(id) else {
            return;
        };
        let Some(named) = zone.sub_zones.get(name).cloned() else {
            tracing::debug!(zone = %zone.name(), sub_zone = name, "no such sub-zone");
            return;
        };
        let others: Vec<ZoneId> = zone
            .sub_zones
            .iter()
            .filter(|(key, _)| key.as_str() != name)
            .flat_map(|(_, zones)| zones.iter().copied())
            .collect();

        for other in others {
            self.deactivate(other, env);
        }
        for member in named {
            self.activate(member, env);
        }
    }

    /// Deactivates a sub-zone and reactivates the zone it is scoped to.
    pub fn leave_sub_zone(&mut self, id: ZoneId, env: &mut DispatchEnv<'_>) {
        let Some(enclosing) = self.get(id).and_then(|zone| zone.enclosing) else {
            return;
        };
        self.deactivate(id, env);
        self.activate(enclosing, env);
    }

    /// Re-affirms included zones and drops the selected-track overlays.
    pub fn on_track_deselection(&mut self, id: ZoneId, env: &mut DispatchEnv<'_>) {
        let Some(zone) = self.get_mut(id) else {
            return;
        };
        zone.active = true;
        let included = zone.included.clone();
        let selected: Vec<ZoneId> = zone
            .associated
            .iter()
            .filter(|(key, _)| {
                matches!(
                    key.as_str(),
                    "SelectedTrack"
                        | "SelectedTrackSend"
                        | "SelectedTrackReceive"
                        | "SelectedTrackFXMenu"
                )
            })
            .flat_map(|(_, zones)| zones.iter().copied())
            .collect();

        for child in included {
            self.activate(child, env);
        }
        for member in selected {
            self.deactivate(member, env);
        }
    }
}
