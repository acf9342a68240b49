//! Per-surface zone registry: the zone file index, zone construction and the
//! root activation pointers (home, focused FX, FX slots).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::action::{ActionRegistry, EngineAction, FocusedFx};
use crate::config::EngineConfig;
use crate::context::{param_index, ActionBinding, ActionContext, ContextSeed, DispatchEnv, Gesture};
use crate::lexer::expand_wildcard;
use crate::modifiers::ModifierManager;
use crate::steps::{list_files, ParameterSweep, StepSizeCache};
use crate::template::{
    expand_widget_line, modifier_code, parse_zone_text, read_zone_header, ActionTemplate,
    BindingTable, FxParamTable, ZoneBody, ZoneDefinition,
};
use crate::widget::{Surface, Widget, WidgetId};
use crate::zone::{Navigator, Zone, ZoneArena, ZoneId, ZoneScope};
use crate::{Result, SurfaceError};

pub const ZONE_FILE_EXTENSION: &str = "zon";

const HOME: &str = "Home";
const FOCUSED_FX_PARAM: &str = "FocusedFXParam";

/// Contexts produced while building one zone, added once the build is done.
type Bound = Vec<(WidgetId, u32, ActionContext)>;

#[derive(Debug)]
pub struct ZoneRegistry {
    surface: String,
    zone_folder: Option<PathBuf>,
    zone_files: BTreeMap<String, PathBuf>,
    /// Parsed definitions; `None` marks a file that failed to parse.
    definitions: HashMap<String, Option<Rc<ZoneDefinition>>>,
    steps: StepSizeCache,
    actions: Rc<ActionRegistry>,
    config: Rc<EngineConfig>,
    arena: ZoneArena,
    home: Option<ZoneId>,
    focused_fx_param: Option<ZoneId>,
    focused_fx: Vec<ZoneId>,
    selected_track_fx: Vec<ZoneId>,
    fx_slots: Vec<ZoneId>,
    focused_fx_mapping: bool,
    focused_fx_param_mapping: bool,
    last_focused_fx: Option<FocusedFx>,
}

impl ZoneRegistry {
    pub fn new(
        surface: impl Into<String>,
        zone_folder: Option<PathBuf>,
        actions: Rc<ActionRegistry>,
        config: Rc<EngineConfig>,
    ) -> Self {
        Self {
            surface: surface.into(),
            zone_folder,
            zone_files: BTreeMap::new(),
            definitions: HashMap::new(),
            steps: StepSizeCache::new(config.step_size_folder.clone()),
            actions,
            config,
            arena: ZoneArena::new(),
            home: None,
            focused_fx_param: None,
            focused_fx: Vec::new(),
            selected_track_fx: Vec::new(),
            fx_slots: Vec::new(),
            focused_fx_mapping: true,
            focused_fx_param_mapping: false,
            last_focused_fx: None,
        }
    }

    pub fn arena(&self) -> &ZoneArena {
        &self.arena
    }

    pub fn home(&self) -> Option<ZoneId> {
        self.home
    }

    pub fn focused_fx_param(&self) -> Option<ZoneId> {
        self.focused_fx_param
    }

    pub fn focused_fx_zones(&self) -> &[ZoneId] {
        &self.focused_fx
    }

    pub fn selected_track_fx_zones(&self) -> &[ZoneId] {
        &self.selected_track_fx
    }

    pub fn fx_slot_zones(&self) -> &[ZoneId] {
        &self.fx_slots
    }

    pub fn steps(&mut self) -> &mut StepSizeCache {
        &mut self.steps
    }

    pub fn is_focused_fx_mapping_enabled(&self) -> bool {
        self.focused_fx_mapping
    }

    pub fn is_focused_fx_param_mapping_enabled(&self) -> bool {
        self.focused_fx_param_mapping
    }

    pub fn is_initialized(&self) -> bool {
        self.home.is_some()
    }

    pub fn has_zone(&self, name: &str) -> bool {
        self.zone_files.contains_key(name) || self.definitions.contains_key(name)
    }

    pub fn zone_names(&self) -> impl Iterator<Item = &str> {
        self.zone_files.keys().map(String::as_str)
    }

    /// Indexes every zone file under the zone folder by its declared name,
    /// then the step-size files. Returns the number of zone files indexed.
    pub fn preprocess(&mut self) -> Result<usize> {
        let mut indexed = 0;

        if let Some(folder) = self.zone_folder.clone() {
            let paths = list_files(&folder, ZONE_FILE_EXTENSION)?;
            if paths.is_empty() {
                tracing::warn!(surface = %self.surface, folder = %folder.display(), "zone folder is missing or empty");
            }

            for path in paths {
                let header = match fs::read_to_string(&path) {
                    Ok(text) => read_zone_header(&text),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "could not read zone file");
                        continue;
                    }
                };
                match header {
                    Some((name, _alias)) => {
                        self.definitions.remove(&name);
                        self.zone_files.insert(name, path);
                        indexed += 1;
                    }
                    None => tracing::warn!(path = %path.display(), "no Zone header, skipped"),
                }
            }
            tracing::debug!(surface = %self.surface, zones = indexed, "indexed zone files");
        }

        self.steps.preprocess()?;
        Ok(indexed)
    }

    pub fn add_zone_file(&mut self, name: impl Into<String>, path: PathBuf) {
        let name = name.into();
        self.definitions.remove(&name);
        self.zone_files.insert(name, path);
    }

    /// Parses zone text directly, without a file behind it. Returns the
    /// declared zone name.
    pub fn add_zone_text(
        &mut self,
        text: &str,
        source: &Path,
        vocabulary: &ModifierManager,
    ) -> Result<String> {
        let definition = parse_zone_text(text, source, vocabulary)?;
        let name = definition.name.clone();
        self.definitions
            .insert(name.clone(), Some(Rc::new(definition)));
        Ok(name)
    }

    fn definition(&mut self, name: &str, vocabulary: &ModifierManager) -> Option<Rc<ZoneDefinition>> {
        if let Some(cached) = self.definitions.get(name) {
            return cached.clone();
        }
        let path = self.zone_files.get(name)?.clone();

        let parsed = fs::read_to_string(&path)
            .map_err(SurfaceError::from)
            .and_then(|text| parse_zone_text(&text, &path, vocabulary));
        let definition = match parsed {
            Ok(definition) => Some(Rc::new(definition)),
            Err(err) => {
                tracing::warn!(surface = %self.surface, zone = name, error = %err, "zone file rejected");
                None
            }
        };
        self.definitions.insert(name.to_string(), definition.clone());
        definition
    }

    /// Builds Home (and FocusedFXParam when present) and activates Home.
    pub fn initialize(&mut self, env: &mut DispatchEnv<'_>) -> Result<()> {
        self.release_roots();

        if !self.has_zone(HOME) {
            return Err(SurfaceError::MissingZone {
                surface: self.surface.clone(),
                zone: HOME.to_string(),
            });
        }

        let navigators = [Navigator::SelectedTrack];
        self.home = self
            .build_zones(HOME, &navigators, None, 0, env.surface, env.modifiers)
            .first()
            .copied();
        if self.home.is_none() {
            return Err(SurfaceError::MissingZone {
                surface: self.surface.clone(),
                zone: HOME.to_string(),
            });
        }

        if self.has_zone(FOCUSED_FX_PARAM) {
            self.focused_fx_param = self
                .build_zones(FOCUSED_FX_PARAM, &navigators, None, 0, env.surface, env.modifiers)
                .first()
                .copied();
        }

        self.go_home(env);
        Ok(())
    }

    fn release_roots(&mut self) {
        let roots: Vec<ZoneId> = self
            .home
            .take()
            .into_iter()
            .chain(self.focused_fx_param.take())
            .chain(self.focused_fx.drain(..))
            .chain(self.selected_track_fx.drain(..))
            .chain(self.fx_slots.drain(..))
            .collect();
        for root in roots {
            self.arena.release(root);
        }
    }

    /// Navigators a zone gets when something includes or associates it.
    pub fn navigators_for(&self, zone: &str, surface: &Surface) -> Vec<Navigator> {
        let channels = surface.channel_count();
        match zone {
            "MasterTrack" => vec![Navigator::MasterTrack],
            "Track" | "VCA" | "Folder" | "TrackSend" | "TrackReceive" | "TrackFXMenu" => (0
                ..channels)
                .map(|index| Navigator::Track {
                    channel: index + 1 + surface.channel_offset(),
                })
                .collect(),
            "SelectedTrack" | "SelectedTrackSend" | "SelectedTrackReceive"
            | "SelectedTrackFXMenu" => vec![Navigator::SelectedTrack; channels as usize],
            _ => vec![Navigator::SelectedTrack],
        }
    }

    /// Instantiates `name` once per navigator, with its included, associated
    /// and sub-zones. FX table zones only ever use the first navigator.
    pub fn build_zones(
        &mut self,
        name: &str,
        navigators: &[Navigator],
        enclosing: Option<ZoneId>,
        depth: usize,
        surface: &Surface,
        vocabulary: &ModifierManager,
    ) -> Vec<ZoneId> {
        if depth > self.config.max_zone_depth {
            tracing::warn!(surface = %self.surface, zone = name, depth, "zone nesting too deep, not built");
            return Vec::new();
        }
        let Some(definition) = self.definition(name, vocabulary) else {
            return Vec::new();
        };

        let navigators = match &definition.body {
            ZoneBody::FxParams(_) => &navigators[..navigators.len().min(1)],
            ZoneBody::Bindings(_) => navigators,
        };
        let enclosing_channel = enclosing
            .and_then(|id| self.arena.get(id))
            .map(|zone| zone.channel_number(surface))
            .filter(|&channel| channel != 0);

        let mut built = Vec::with_capacity(navigators.len());
        for (index, &navigator) in navigators.iter().enumerate() {
            let id = self.arena.insert_with(|id| {
                Zone::new(
                    ZoneScope {
                        id,
                        name: definition.name.clone(),
                        alias: definition.alias.clone(),
                        source: definition.source.clone(),
                        navigator,
                        slot_index: index,
                    },
                    enclosing,
                )
            });

            let bound = match &definition.body {
                ZoneBody::Bindings(table) => {
                    let expansion = Expansion {
                        member: index as u32 + 1,
                        expand_widgets: navigators.len() > 1,
                        enclosing_channel,
                    };
                    self.bind_templates(&definition.name, table, expansion, surface, vocabulary)
                }
                ZoneBody::FxParams(table) => {
                    self.bind_fx_table(&definition.name, table, surface, vocabulary)
                }
            };
            self.attach(id, bound);
            self.build_children(id, &definition, depth, surface, vocabulary);

            tracing::debug!(
                surface = %self.surface,
                zone = %definition.display_name(),
                bindings = self.arena.get(id).map_or(0, Zone::binding_count),
                "built zone"
            );
            built.push(id);
        }
        built
    }

    fn attach(&mut self, id: ZoneId, bound: Bound) {
        if let Some(zone) = self.arena.get_mut(id) {
            for (widget, modifier, context) in bound {
                zone.add_context(widget, modifier, context);
            }
        }
    }

    fn build_children(
        &mut self,
        id: ZoneId,
        definition: &ZoneDefinition,
        depth: usize,
        surface: &Surface,
        vocabulary: &ModifierManager,
    ) {
        let mut included = Vec::new();
        for name in &definition.included {
            let navigators = self.navigators_for(name, surface);
            included.extend(self.build_zones(name, &navigators, None, depth + 1, surface, vocabulary));
        }

        let mut associated = BTreeMap::new();
        for name in &definition.associated {
            if !self.has_zone(name) {
                continue;
            }
            let navigators = self.navigators_for(name, surface);
            let members = self.build_zones(name, &navigators, None, depth + 1, surface, vocabulary);
            if let Some(&first) = members.first() {
                self.add_radio_hooks(first, name, surface, vocabulary);
            }
            associated.insert(name.clone(), members);
        }

        let navigator = self.arena.get(id).map(|zone| zone.scope.navigator);
        let mut sub_zones = BTreeMap::new();
        if let Some(navigator) = navigator {
            for name in &definition.sub_zones {
                if !self.has_zone(name) {
                    continue;
                }
                let members =
                    self.build_zones(name, &[navigator], Some(id), depth + 1, surface, vocabulary);
                sub_zones.insert(name.clone(), members);
            }
        }

        if let Some(zone) = self.arena.get_mut(id) {
            zone.included.extend(included);
            zone.associated.extend(associated);
            zone.sub_zones.extend(sub_zones);
        }
    }

    /// VCA and Folder overlays report their mode to the host when they come
    /// and go.
    fn add_radio_hooks(
        &mut self,
        id: ZoneId,
        zone: &str,
        surface: &Surface,
        vocabulary: &ModifierManager,
    ) {
        let (activated, deactivated) = match zone {
            "VCA" => ("VCAModeActivated", "VCAModeDeactivated"),
            "Folder" => ("FolderModeActivated", "FolderModeDeactivated"),
            _ => return,
        };

        let mut bound = Bound::new();
        for (hook, action) in [("OnZoneActivation", activated), ("OnZoneDeactivation", deactivated)] {
            if let Some((widget_id, widget)) = lookup(surface, hook) {
                let context =
                    self.make_context(zone, action.to_string(), Vec::new(), Vec::new(), widget_id, widget, vocabulary);
                bound.push((widget_id, 0, context));
            }
        }
        self.attach(id, bound);
    }

    fn resolve_binding(&self, action: &str, params: &[String], vocabulary: &ModifierManager) -> ActionBinding {
        if let Some(engine) = EngineAction::parse(action, params, vocabulary) {
            return ActionBinding::Engine(engine);
        }
        match self.actions.get(action) {
            Some(host) => ActionBinding::Host(host),
            None => {
                tracing::debug!(surface = %self.surface, action, "unknown action, bound to NoAction");
                ActionBinding::Engine(EngineAction::NoAction)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn make_context(
        &mut self,
        zone: &str,
        action: String,
        params: Vec<String>,
        properties: Vec<Vec<String>>,
        widget_id: WidgetId,
        widget: &Widget,
        vocabulary: &ModifierManager,
    ) -> ActionContext {
        let binding = self.resolve_binding(&action, &params, vocabulary);
        let cached_steps = param_index(&params)
            .map(|param| self.steps.stepped_values(zone, param).to_vec())
            .unwrap_or_default();

        ActionContext::new(ContextSeed {
            action,
            binding,
            widget_id,
            widget,
            params,
            properties,
            cached_steps: &cached_steps,
            ticks: &self.config.ticks,
        })
    }

    fn bind_templates(
        &mut self,
        zone: &str,
        table: &BindingTable,
        expansion: Expansion,
        surface: &Surface,
        vocabulary: &ModifierManager,
    ) -> Bound {
        let mut bound = Bound::new();

        for by_modifier in table.values() {
            for (&modifier, templates) in by_modifier {
                for template in templates {
                    let Some((widget_id, widget)) = resolve_widget(surface, template, &expansion) else {
                        tracing::debug!(
                            surface = %self.surface,
                            zone,
                            widget = %expansion.widget_name(&template.widget),
                            "no such widget, binding dropped"
                        );
                        continue;
                    };
                    let action = expand_wildcard(&template.action, expansion.member);
                    let params = template
                        .params
                        .iter()
                        .map(|param| expand_wildcard(param, expansion.member))
                        .collect();

                    let mut context = self.make_context(
                        zone,
                        action,
                        params,
                        template.properties.clone(),
                        widget_id,
                        widget,
                        vocabulary,
                    );
                    if template.invert_feedback {
                        context.set_invert_feedback(true);
                    }
                    if template.hold {
                        context.set_hold_delay(Duration::from_millis(self.config.hold_delay_ms));
                    }
                    if template.decrease {
                        context.set_decrease();
                    } else if template.increase {
                        context.set_increase();
                    }
                    bound.push((widget_id, modifier, context));
                }
            }
        }

        bound
    }

    fn bind_fx_table(
        &mut self,
        zone: &str,
        table: &FxParamTable,
        surface: &Surface,
        vocabulary: &ModifierManager,
    ) -> Bound {
        let mut bound = Bound::new();

        for row in &table.rows {
            let width = row.params.len();
            let value_widgets = expand_widget_line(&row.value_widgets, width).unwrap_or_default();
            let name_displays = expand_widget_line(&row.name_displays, width).unwrap_or_default();
            let value_displays = expand_widget_line(&row.value_displays, width).unwrap_or_default();
            let modifier = row
                .modifier
                .as_deref()
                .map_or(0, |spec| modifier_code(spec, vocabulary));

            for (column, &param) in row.params.iter().enumerate() {
                if let Some((widget_id, widget)) =
                    value_widgets.get(column).and_then(|name| lookup(surface, name))
                {
                    let (action, params) = if param < 0 {
                        ("NoAction", Vec::new())
                    } else {
                        ("FXParam", vec![param.to_string()])
                    };
                    let mut context = self.make_context(
                        zone,
                        action.to_string(),
                        params,
                        Vec::new(),
                        widget_id,
                        widget,
                        vocabulary,
                    );
                    self.apply_fx_overrides(&mut context, table, param);
                    bound.push((widget_id, modifier, context));
                }

                let name_display = name_displays.get(column).and_then(|name| lookup(surface, name));
                if let (Some((widget_id, widget)), Some(label)) = (name_display, row.names.get(column)) {
                    let context = self.make_context(
                        zone,
                        "FixedTextDisplay".to_string(),
                        vec![label.clone()],
                        Vec::new(),
                        widget_id,
                        widget,
                        vocabulary,
                    );
                    bound.push((widget_id, modifier, context));
                }

                if let Some((widget_id, widget)) =
                    value_displays.get(column).and_then(|name| lookup(surface, name))
                {
                    let (action, params) = if param < 0 {
                        ("FixedTextDisplay", vec![String::new()])
                    } else {
                        ("FXParamValueDisplay", vec![param.to_string()])
                    };
                    let context = self.make_context(
                        zone,
                        action.to_string(),
                        params,
                        Vec::new(),
                        widget_id,
                        widget,
                        vocabulary,
                    );
                    bound.push((widget_id, modifier, context));
                }
            }
        }

        bound
    }

    /// Table overrides win over widget defaults and cached step sizes.
    fn apply_fx_overrides(&self, context: &mut ActionContext, table: &FxParamTable, param: i32) {
        if let Some(deltas) = table.acceleration.get(&param) {
            context.set_accelerated_deltas(deltas.clone());
        } else if !table.default_acceleration.is_empty() {
            context.set_accelerated_deltas(table.default_acceleration.clone());
        }
        if let Some(&(minimum, maximum)) = table.ranges.get(&param) {
            context.set_range(minimum, maximum);
        }
        if let Some(&step) = table.step_sizes.get(&param) {
            context.set_step_size(step);
        }
        if let Some(values) = table.step_values.get(&param) {
            context.set_stepped_values(values.clone());
        }
        match table.tick_counts.get(&param) {
            Some(ticks) => context.set_tick_counts(ticks.clone()),
            None => context.synthesize_tick_count(&self.config.ticks),
        }
        if let Some(colors) = table.colors.get(&param) {
            context.set_colors(colors.clone());
        }
        if let Some(mode) = table.widget_modes.get(&param) {
            context.set_widget_mode(mode.clone());
        }
    }

    fn drop_zones(&mut self, zones: Vec<ZoneId>, env: &mut DispatchEnv<'_>) {
        for zone in zones {
            self.arena.deactivate(zone, env);
            self.arena.release(zone);
        }
    }

    fn clear_fx_mapping(&mut self, env: &mut DispatchEnv<'_>) {
        let zones: Vec<ZoneId> = self
            .focused_fx
            .drain(..)
            .chain(self.selected_track_fx.drain(..))
            .chain(self.fx_slots.drain(..))
            .collect();
        self.drop_zones(zones, env);
    }

    pub fn go_home(&mut self, env: &mut DispatchEnv<'_>) {
        self.clear_fx_mapping(env);
        if let Some(home) = self.home {
            self.arena.activate(home, env);
        }
    }

    /// Selects an associated zone of Home. Naming the active one goes home.
    pub fn go_associated_zone(&mut self, name: &str, env: &mut DispatchEnv<'_>) {
        let Some(home) = self.home else {
            return;
        };
        self.clear_fx_mapping(env);
        if self.arena.go_associated_zone(home, name, env) {
            self.go_home(env);
        }
    }

    pub fn go_sub_zone(&mut self, zone: ZoneId, name: &str, env: &mut DispatchEnv<'_>) {
        self.arena.go_sub_zone(zone, name, env);
    }

    pub fn leave_sub_zone(&mut self, zone: ZoneId, env: &mut DispatchEnv<'_>) {
        self.arena.leave_sub_zone(zone, env);
    }

    fn build_fx_zone(
        &mut self,
        fx_name: &str,
        navigator: Navigator,
        slot: usize,
        env: &mut DispatchEnv<'_>,
    ) -> Option<ZoneId> {
        if !self.has_zone(fx_name) {
            return None;
        }
        let id = self
            .build_zones(fx_name, &[navigator], None, 0, env.surface, env.modifiers)
            .first()
            .copied()?;
        if let Some(zone) = self.arena.get_mut(id) {
            zone.scope.slot_index = slot;
        }
        self.arena.activate(id, env);
        Some(id)
    }

    /// Rebuilds the zone of the effect focused in the host.
    pub fn go_focused_fx(&mut self, env: &mut DispatchEnv<'_>) {
        let previous = std::mem::take(&mut self.focused_fx);
        self.drop_zones(previous, env);

        if let Some(focused) = env.resolver.focused_fx() {
            if let Some(id) = self.build_fx_zone(&focused.name, Navigator::FocusedFx, focused.slot, env) {
                self.focused_fx.push(id);
            }
        }
    }

    /// One zone per mapped effect on the selected track, in slot order.
    pub fn go_selected_track_fx(&mut self, env: &mut DispatchEnv<'_>) {
        let previous = std::mem::take(&mut self.selected_track_fx);
        self.drop_zones(previous, env);

        let Some(target) = env.resolver.resolve(Navigator::SelectedTrack) else {
            return;
        };
        for (slot, fx_name) in env.resolver.fx_names(target).into_iter().enumerate() {
            if let Some(id) = self.build_fx_zone(&fx_name, Navigator::SelectedTrack, slot, env) {
                self.selected_track_fx.push(id);
            }
        }
    }

    pub fn go_fx_slot(&mut self, navigator: Navigator, slot: usize, env: &mut DispatchEnv<'_>) {
        let Some(target) = env.resolver.resolve(navigator) else {
            return;
        };
        let Some(fx_name) = env.resolver.fx_name(target, slot) else {
            return;
        };
        if let Some(id) = self.build_fx_zone(&fx_name, navigator, slot, env) {
            self.fx_slots.push(id);
        }
    }

    pub fn on_track_selection(&mut self, env: &mut DispatchEnv<'_>) {
        let slots = std::mem::take(&mut self.fx_slots);
        self.drop_zones(slots, env);
    }

    pub fn on_track_deselection(&mut self, env: &mut DispatchEnv<'_>) {
        let Some(home) = self.home else {
            return;
        };
        let selected = std::mem::take(&mut self.selected_track_fx);
        self.drop_zones(selected, env);
        self.arena.on_track_deselection(home, env);
    }

    pub fn toggle_focused_fx_mapping(&mut self, env: &mut DispatchEnv<'_>) {
        self.focused_fx_mapping = !self.focused_fx_mapping;
        self.last_focused_fx = None;
        let focused = std::mem::take(&mut self.focused_fx);
        self.drop_zones(focused, env);
    }

    pub fn toggle_focused_fx_param_mapping(&mut self) {
        self.focused_fx_param_mapping = !self.focused_fx_param_mapping;
    }

    fn check_focused_fx(&mut self, env: &mut DispatchEnv<'_>) {
        if !self.focused_fx_mapping {
            return;
        }
        let current = env.resolver.focused_fx();
        if current != self.last_focused_fx {
            self.last_focused_fx = current;
            self.go_focused_fx(env);
        }
    }

    /// Roots in dispatch priority order.
    fn roots(&self) -> Vec<ZoneId> {
        let focused_param = self
            .focused_fx_param
            .filter(|_| self.focused_fx_param_mapping);
        focused_param
            .into_iter()
            .chain(self.focused_fx.iter().copied())
            .chain(self.selected_track_fx.iter().copied())
            .chain(self.fx_slots.iter().copied())
            .chain(self.home)
            .collect()
    }

    /// Offers one input to the roots in priority order. Returns whether a
    /// zone claimed it.
    pub fn dispatch(&mut self, widget: WidgetId, gesture: Gesture, env: &mut DispatchEnv<'_>) -> bool {
        let mut used = false;
        for root in self.roots() {
            self.arena.dispatch(root, widget, gesture, env, &mut used);
            if used {
                break;
            }
        }
        used
    }

    /// Periodic refresh: follows the host's focused effect, pulls feedback
    /// from every active zone and blanks widgets nothing claimed.
    pub fn request_update(&mut self, env: &mut DispatchEnv<'_>) {
        self.check_focused_fx(env);

        let mut claimed = HashSet::new();
        for root in self.roots() {
            self.arena.request_update(root, env, &mut claimed);
        }

        let unclaimed: Vec<WidgetId> = env
            .surface
            .widget_ids()
            .filter(|widget| !claimed.contains(widget))
            .collect();
        for widget in unclaimed {
            env.surface.clear(widget);
        }
    }

    pub fn update_current_modifiers(&mut self, modifiers: &ModifierManager) {
        let roots: Vec<ZoneId> = self
            .focused_fx_param
            .into_iter()
            .chain(self.focused_fx.iter().copied())
            .chain(self.selected_track_fx.iter().copied())
            .chain(self.fx_slots.iter().copied())
            .chain(self.home)
            .collect();
        for root in roots {
            self.arena.update_current_modifiers(root, modifiers);
        }
    }

    /// Writes step files for plugin zones that have none yet. Returns how
    /// many zones were calibrated.
    pub fn calibrate_missing_step_sizes(&mut self, sweep: &mut dyn ParameterSweep) -> Result<usize> {
        let zones: Vec<String> = self.zone_files.keys().cloned().collect();
        let mut calibrated = 0;
        for zone in zones {
            if self.steps.calibrate_zone(&zone, sweep)?.is_some() {
                calibrated += 1;
            }
        }
        Ok(calibrated)
    }
}

/// How `|` wildcards resolve for one zone instance.
#[derive(Debug, Clone, Copy)]
struct Expansion {
    /// 1-based index of the navigator the instance was built for.
    member: u32,
    expand_widgets: bool,
    enclosing_channel: Option<u32>,
}

impl Expansion {
    fn widget_name(&self, name: &str) -> String {
        let mut name = name.to_string();
        if self.expand_widgets {
            name = expand_wildcard(&name, self.member);
        }
        if let Some(channel) = self.enclosing_channel {
            name = expand_wildcard(&name, channel);
        }
        name
    }
}

/// Latest segment of the template's specifier that names a widget on
/// `surface`.
fn resolve_widget<'s>(
    surface: &'s Surface,
    template: &ActionTemplate,
    expansion: &Expansion,
) -> Option<(WidgetId, &'s Widget)> {
    template
        .candidates
        .iter()
        .rev()
        .find_map(|name| lookup(surface, &expansion.widget_name(name)))
        .or_else(|| lookup(surface, &expansion.widget_name(&template.widget)))
}

fn lookup<'s>(surface: &'s Surface, name: &str) -> Option<(WidgetId, &'s Widget)> {
    let id = surface.widget_by_name(name)?;
    Some((id, surface.widget(id)?))
}
