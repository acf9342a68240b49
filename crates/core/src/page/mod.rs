//! Pages: a set of control surfaces sharing one global modifier manager.
//!
//! Engine actions only queue [`SurfaceCommand`]s while a zone tree is being
//! walked. The page applies them afterwards, routes modifier changes to every
//! tree that depends on the changed manager, and forwards broadcast commands
//! to the surfaces that receive them.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use crate::action::{ActionRegistry, SurfaceCommand, TargetResolver};
use crate::config::{EngineConfig, PageConfig, SurfaceConfig};
use crate::context::{DispatchEnv, Gesture};
use crate::modifiers::ModifierManager;
use crate::registry::ZoneRegistry;
use crate::widget::{FeedbackEvent, Surface};
use crate::{Result, SurfaceError};

/// Command application rounds before the page gives up on a feedback loop.
const MAX_COMMAND_ROUNDS: usize = 64;

/// One surface of a page with its zone tree.
#[derive(Debug)]
pub struct ControlSurface {
    surface: Surface,
    zones: ZoneRegistry,
    local_modifiers: Option<ModifierManager>,
    broadcast: BTreeSet<String>,
    receive: BTreeSet<String>,
}

impl ControlSurface {
    pub fn from_config(
        config: &SurfaceConfig,
        engine: Rc<EngineConfig>,
        actions: Rc<ActionRegistry>,
    ) -> Self {
        let local_modifiers = config
            .local_modifiers
            .then(|| ModifierManager::new(&engine.modifiers));
        Self {
            surface: Surface::from_config(config),
            zones: ZoneRegistry::new(config.name.clone(), config.zone_folder.clone(), actions, engine),
            local_modifiers,
            broadcast: BTreeSet::new(),
            receive: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.surface.name()
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        &mut self.surface
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn zones_mut(&mut self) -> &mut ZoneRegistry {
        &mut self.zones
    }

    pub fn has_local_modifiers(&self) -> bool {
        self.local_modifiers.is_some()
    }

    pub fn local_modifiers(&self) -> Option<&ModifierManager> {
        self.local_modifiers.as_ref()
    }

    pub fn broadcasts(&self, zone: &str) -> bool {
        self.broadcast.contains(zone)
    }

    pub fn receives(&self, zone: &str) -> bool {
        self.receive.contains(zone)
    }

    /// Parses zone text into this surface's registry using the modifier
    /// vocabulary the surface resolves against.
    pub fn add_zone_text(&mut self, text: &str, source: &Path, global: &ModifierManager) -> Result<String> {
        let vocabulary = self.local_modifiers.as_ref().unwrap_or(global);
        self.zones.add_zone_text(text, source, vocabulary)
    }

    fn with_env<R>(
        &mut self,
        global: &ModifierManager,
        resolver: &dyn TargetResolver,
        now: Instant,
        commands: &mut Vec<SurfaceCommand>,
        f: impl FnOnce(&mut ZoneRegistry, &mut DispatchEnv<'_>) -> R,
    ) -> R {
        let mut env = DispatchEnv {
            resolver,
            surface: &mut self.surface,
            modifiers: self.local_modifiers.as_ref().unwrap_or(global),
            commands,
            now,
        };
        f(&mut self.zones, &mut env)
    }
}

/// Name a command is broadcast under, for the commands that propagate.
fn broadcast_key(command: &SurfaceCommand) -> Option<&str> {
    match command {
        SurfaceCommand::GoHome => Some("Home"),
        SurfaceCommand::GoAssociatedZone(zone) => Some(zone),
        SurfaceCommand::GoSelectedTrackFx => Some("SelectedTrackFX"),
        SurfaceCommand::ToggleFocusedFxMapping => Some("FocusedFX"),
        SurfaceCommand::ToggleFocusedFxParamMapping => Some("FocusedFXParam"),
        _ => None,
    }
}

struct Pending {
    surface: usize,
    command: SurfaceCommand,
    /// Received from another surface; never forwarded again.
    received: bool,
}

#[derive(Debug)]
pub struct Page {
    name: String,
    modifiers: ModifierManager,
    surfaces: Vec<ControlSurface>,
}

impl Page {
    pub fn new(name: impl Into<String>, engine: &EngineConfig) -> Self {
        Self {
            name: name.into(),
            modifiers: ModifierManager::new(&engine.modifiers),
            surfaces: Vec::new(),
        }
    }

    pub fn from_config(
        config: &PageConfig,
        engine: Rc<EngineConfig>,
        actions: Rc<ActionRegistry>,
    ) -> Self {
        let mut page = Self::new(config.name.clone(), &engine);
        for surface in &config.surfaces {
            page.add_surface(ControlSurface::from_config(surface, engine.clone(), actions.clone()));
        }
        page
    }

    pub fn add_surface(&mut self, surface: ControlSurface) -> usize {
        self.surfaces.push(surface);
        self.surfaces.len() - 1
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modifiers(&self) -> &ModifierManager {
        &self.modifiers
    }

    pub fn surfaces(&self) -> &[ControlSurface] {
        &self.surfaces
    }

    pub fn surface(&self, index: usize) -> Option<&ControlSurface> {
        self.surfaces.get(index)
    }

    pub fn surface_mut(&mut self, index: usize) -> Option<&mut ControlSurface> {
        self.surfaces.get_mut(index)
    }

    pub fn surface_index(&self, name: &str) -> Option<usize> {
        self.surfaces.iter().position(|surface| surface.name() == name)
    }

    /// Parses zone text into one surface's registry.
    pub fn add_zone_text(&mut self, surface: usize, text: &str, source: &Path) -> Result<String> {
        let Some(target) = self.surfaces.get_mut(surface) else {
            return Err(SurfaceError::msg(format!("no surface #{surface} on page {}", self.name)));
        };
        target.add_zone_text(text, source, &self.modifiers)
    }

    /// Indexes every surface's zone and step folders. A surface whose folders
    /// cannot be read is logged and left with whatever was indexed.
    pub fn preprocess(&mut self) -> usize {
        let mut total = 0;
        for surface in &mut self.surfaces {
            match surface.zones.preprocess() {
                Ok(count) => total += count,
                Err(err) => {
                    tracing::warn!(page = %self.name, surface = %surface.name(), error = %err, "zone preprocessing failed")
                }
            }
        }
        total
    }

    /// Builds and activates every surface's Home zone and fires the
    /// `OnInitialization` widgets. Returns how many surfaces came up; a
    /// surface without a Home zone is logged and stays uninitialised.
    pub fn initialize(&mut self, resolver: &dyn TargetResolver, now: Instant) -> usize {
        let mut initialized = 0;
        for index in 0..self.surfaces.len() {
            let mut commands = Vec::new();
            let surface = &mut self.surfaces[index];
            let outcome = surface.with_env(&self.modifiers, resolver, now, &mut commands, |zones, env| {
                zones.initialize(env)
            });
            match outcome {
                Ok(()) => {
                    initialized += 1;
                    tracing::info!(page = %self.name, surface = %surface.name(), zones = surface.zones.arena().len(), "surface initialised");
                }
                Err(err) => {
                    tracing::error!(page = %self.name, surface = %surface.name(), error = %err, "surface not initialised");
                    continue;
                }
            }
            self.apply_commands(index, commands, resolver, now);
            self.fire_hardwired(index, "OnInitialization", resolver, now);
        }
        initialized
    }

    /// Routes one input event to a surface's zone tree. Returns whether a
    /// binding claimed it.
    pub fn handle_input(
        &mut self,
        surface: usize,
        widget: &str,
        gesture: Gesture,
        resolver: &dyn TargetResolver,
        now: Instant,
    ) -> bool {
        let Some(target) = self.surfaces.get_mut(surface) else {
            return false;
        };
        tracing::trace!(surface = %target.name(), widget, ?gesture, "input");

        if !target.zones.is_initialized() {
            return false;
        }
        let Some(widget_id) = target.surface.widget_by_name(widget) else {
            tracing::debug!(surface = %target.name(), widget, "input from unknown widget");
            return false;
        };
        if let Gesture::Touch(value) = gesture {
            let channel = target.surface.channel_of(widget_id);
            target.surface.touch_channel(channel, value);
        }

        let mut commands = Vec::new();
        let used = target.with_env(&self.modifiers, resolver, now, &mut commands, |zones, env| {
            zones.dispatch(widget_id, gesture, env)
        });
        self.apply_commands(surface, commands, resolver, now);
        used
    }

    /// Periodic refresh of every initialised surface.
    pub fn request_update(&mut self, resolver: &dyn TargetResolver, now: Instant) {
        for index in 0..self.surfaces.len() {
            let surface = &mut self.surfaces[index];
            if !surface.zones.is_initialized() {
                continue;
            }
            let mut commands = Vec::new();
            surface.with_env(&self.modifiers, resolver, now, &mut commands, |zones, env| {
                zones.request_update(env)
            });
            self.apply_commands(index, commands, resolver, now);
        }
    }

    /// Drops FX slot zones and fires the `OnTrackSelection` widgets.
    pub fn on_track_selection(&mut self, resolver: &dyn TargetResolver, now: Instant) {
        for index in 0..self.surfaces.len() {
            let surface = &mut self.surfaces[index];
            if !surface.zones.is_initialized() {
                continue;
            }
            let mut commands = Vec::new();
            surface.with_env(&self.modifiers, resolver, now, &mut commands, |zones, env| {
                zones.on_track_selection(env)
            });
            self.apply_commands(index, commands, resolver, now);
            self.fire_hardwired(index, "OnTrackSelection", resolver, now);
        }
    }

    pub fn on_track_deselection(&mut self, resolver: &dyn TargetResolver, now: Instant) {
        for index in 0..self.surfaces.len() {
            let surface = &mut self.surfaces[index];
            if !surface.zones.is_initialized() {
                continue;
            }
            let mut commands = Vec::new();
            surface.with_env(&self.modifiers, resolver, now, &mut commands, |zones, env| {
                zones.on_track_deselection(env)
            });
            self.apply_commands(index, commands, resolver, now);
        }
    }

    fn fire_hardwired(&mut self, surface: usize, widget: &str, resolver: &dyn TargetResolver, now: Instant) {
        self.handle_input(surface, widget, Gesture::Press(1.0), resolver, now);
    }

    /// Drains the feedback every surface produced, tagged with its name.
    pub fn drain_feedback(&mut self) -> Vec<(String, FeedbackEvent)> {
        let mut drained = Vec::new();
        for surface in &mut self.surfaces {
            let name = surface.name().to_string();
            drained.extend(
                surface
                    .surface
                    .drain_feedback()
                    .into_iter()
                    .map(|event| (name.clone(), event)),
            );
        }
        drained
    }

    /// Applies commands queued by `origin`, then whatever those commands
    /// queue in turn, until the queue runs dry.
    pub fn apply_commands(
        &mut self,
        origin: usize,
        commands: Vec<SurfaceCommand>,
        resolver: &dyn TargetResolver,
        now: Instant,
    ) {
        let mut queue: VecDeque<Pending> = commands
            .into_iter()
            .map(|command| Pending { surface: origin, command, received: false })
            .collect();

        let mut rounds = 0;
        while !queue.is_empty() {
            rounds += 1;
            if rounds > MAX_COMMAND_ROUNDS {
                tracing::warn!(page = %self.name, pending = queue.len(), "engine commands keep requeueing, dropped");
                return;
            }

            let mut next = VecDeque::new();
            for pending in queue.drain(..) {
                if !pending.received {
                    self.forward(&pending, &mut next);
                }
                let mut produced = Vec::new();
                self.apply(pending.surface, pending.command, resolver, now, &mut produced);
                next.extend(produced.into_iter().map(|command| Pending {
                    surface: pending.surface,
                    command,
                    received: false,
                }));
            }
            queue = next;
        }
    }

    fn forward(&self, pending: &Pending, next: &mut VecDeque<Pending>) {
        let Some(key) = broadcast_key(&pending.command) else {
            return;
        };
        let Some(origin) = self.surfaces.get(pending.surface) else {
            return;
        };
        if !origin.broadcasts(key) {
            return;
        }

        for (index, surface) in self.surfaces.iter().enumerate() {
            if index != pending.surface && surface.receives(key) {
                tracing::debug!(from = %origin.name(), to = %surface.name(), zone = key, "broadcast");
                next.push_back(Pending {
                    surface: index,
                    command: pending.command.clone(),
                    received: true,
                });
            }
        }
    }

    fn apply(
        &mut self,
        index: usize,
        command: SurfaceCommand,
        resolver: &dyn TargetResolver,
        now: Instant,
        produced: &mut Vec<SurfaceCommand>,
    ) {
        match command {
            SurfaceCommand::SetModifier { name, engaged } => {
                self.change_modifiers(index, |manager| manager.set_engaged(&name, engaged));
                return;
            }
            SurfaceCommand::ClearModifiers => {
                self.change_modifiers(index, ModifierManager::clear);
                return;
            }
            _ => {}
        }

        let Some(surface) = self.surfaces.get_mut(index) else {
            return;
        };
        match command {
            SurfaceCommand::ToggleChannel(channel) => surface.surface.toggle_channel(channel),
            SurfaceCommand::SetBroadcast(zones) => surface.broadcast = zones.into_iter().collect(),
            SurfaceCommand::SetReceive(zones) => surface.receive = zones.into_iter().collect(),
            SurfaceCommand::ToggleFocusedFxParamMapping => surface.zones.toggle_focused_fx_param_mapping(),
            command => {
                surface.with_env(&self.modifiers, resolver, now, produced, |zones, env| match command {
                    SurfaceCommand::GoHome => zones.go_home(env),
                    SurfaceCommand::GoAssociatedZone(name) => zones.go_associated_zone(&name, env),
                    SurfaceCommand::GoSubZone { zone, name } => zones.go_sub_zone(zone, &name, env),
                    SurfaceCommand::LeaveSubZone { zone } => zones.leave_sub_zone(zone, env),
                    SurfaceCommand::GoSelectedTrackFx => zones.go_selected_track_fx(env),
                    SurfaceCommand::GoFxSlot { navigator, slot } => zones.go_fx_slot(navigator, slot, env),
                    SurfaceCommand::ToggleFocusedFxMapping => zones.toggle_focused_fx_mapping(env),
                    other => tracing::debug!(?other, "command handled elsewhere"),
                });
            }
        }
    }

    /// Changes the manager `index` resolves against and refreshes every zone
    /// tree that shares it.
    fn change_modifiers(&mut self, index: usize, change: impl FnOnce(&mut ModifierManager) -> bool) {
        let Some(surface) = self.surfaces.get_mut(index) else {
            return;
        };

        if let Some(local) = surface.local_modifiers.as_mut() {
            if change(local) {
                surface.zones.update_current_modifiers(local);
            }
            return;
        }

        if change(&mut self.modifiers) {
            for surface in self.surfaces.iter_mut().filter(|surface| !surface.has_local_modifiers()) {
                surface.zones.update_current_modifiers(&self.modifiers);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::action::{Action, Invocation, TargetHandle};
    use crate::config::WidgetConfig;
    use crate::widget::FeedbackKind;
    use crate::zone::Navigator;

    #[derive(Default)]
    struct Host {
        log: RefCell<Vec<String>>,
    }

    impl TargetResolver for Host {
        fn resolve(&self, navigator: Navigator) -> Option<TargetHandle> {
            match navigator {
                Navigator::Track { channel } => Some(TargetHandle(u64::from(channel))),
                _ => Some(TargetHandle(0)),
            }
        }
    }

    struct Logged(Rc<Host>);

    impl Action for Logged {
        fn perform(&self, invocation: &Invocation<'_>, value: f64) {
            self.0
                .log
                .borrow_mut()
                .push(format!("{}@{}={}", invocation.action, invocation.zone, value));
        }
    }

    fn surface_config(name: &str, local_modifiers: bool) -> SurfaceConfig {
        SurfaceConfig {
            name: name.into(),
            local_modifiers,
            channel_count: 1,
            widgets: vec![
                WidgetConfig::new("Play", FeedbackKind::TwoState),
                WidgetConfig::new("Shift", FeedbackKind::TwoState),
                WidgetConfig::new("Vca", FeedbackKind::TwoState),
                WidgetConfig::new("Fader1", FeedbackKind::Continuous),
            ],
            ..SurfaceConfig::default()
        }
    }

    fn page(host: &Rc<Host>, local: &[bool]) -> Page {
        let mut actions = ActionRegistry::new();
        actions.set_fallback(Rc::new(Logged(host.clone())));
        let config = PageConfig {
            name: "Main".into(),
            surfaces: local
                .iter()
                .enumerate()
                .map(|(index, &local)| surface_config(&format!("S{index}"), local))
                .collect(),
        };
        Page::from_config(&config, Rc::new(EngineConfig::default()), Rc::new(actions))
    }

    const HOME: &str = "Zone Home
Shift Shift
Play Play
Play+Shift Stop
Vca GoVCA
AssociatedZones
VCA
AssociatedZonesEnd
ZoneEnd
";

    const VCA: &str = "Zone VCA\nFader1 VCAVolume\nZoneEnd\n";

    fn load(page: &mut Page, surface: usize, zones: &[&str]) {
        for text in zones {
            page.add_zone_text(surface, text, Path::new("test.zon")).unwrap();
        }
    }

    fn take(host: &Host) -> Vec<String> {
        std::mem::take(&mut *host.log.borrow_mut())
    }

    #[test]
    fn surfaces_without_home_stay_down() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false, false]);
        load(&mut page, 0, &[HOME]);

        assert_eq!(page.initialize(&*host, Instant::now()), 1);
        assert!(page.surface(0).unwrap().zones().is_initialized());
        assert!(!page.surface(1).unwrap().zones().is_initialized());
        assert!(!page.handle_input(1, "Play", Gesture::Press(1.0), &*host, Instant::now()));
    }

    #[test]
    fn global_modifiers_reach_every_surface() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false, false]);
        load(&mut page, 0, &[HOME, VCA]);
        load(&mut page, 1, &[HOME, VCA]);
        let now = Instant::now();
        page.initialize(&*host, now);

        page.handle_input(0, "Shift", Gesture::Press(1.0), &*host, now);
        assert!(page.modifiers().is_engaged("Shift"));
        page.handle_input(1, "Play", Gesture::Press(1.0), &*host, now);
        page.handle_input(0, "Shift", Gesture::Press(0.0), &*host, now);
        page.handle_input(1, "Play", Gesture::Press(1.0), &*host, now);

        assert_eq!(take(&host), vec!["Stop@Home=1", "Play@Home=1"]);
    }

    #[test]
    fn local_modifiers_stay_on_their_surface() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[true, false]);
        load(&mut page, 0, &[HOME, VCA]);
        load(&mut page, 1, &[HOME, VCA]);
        let now = Instant::now();
        page.initialize(&*host, now);

        page.handle_input(0, "Shift", Gesture::Press(1.0), &*host, now);
        assert!(!page.modifiers().is_engaged("Shift"));
        page.handle_input(0, "Play", Gesture::Press(1.0), &*host, now);
        page.handle_input(1, "Play", Gesture::Press(1.0), &*host, now);

        assert_eq!(take(&host), vec!["Stop@Home=1", "Play@Home=1"]);
    }

    #[test]
    fn broadcast_zone_changes_reach_receivers() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false, false]);
        let sender = format!("{}OnInitialization Broadcast VCA\nZoneEnd\n", HOME.trim_end_matches("ZoneEnd\n"));
        let receiver = format!("{}OnInitialization Receive VCA\nZoneEnd\n", HOME.trim_end_matches("ZoneEnd\n"));
        load(&mut page, 0, &[&sender, VCA]);
        load(&mut page, 1, &[&receiver, VCA]);
        let now = Instant::now();
        page.initialize(&*host, now);
        assert!(page.surface(0).unwrap().broadcasts("VCA"));
        assert!(page.surface(1).unwrap().receives("VCA"));

        page.handle_input(0, "Vca", Gesture::Press(1.0), &*host, now);
        take(&host);
        page.handle_input(1, "Fader1", Gesture::Press(0.5), &*host, now);
        assert_eq!(take(&host), vec!["VCAVolume@VCA=0.5"]);
    }

    #[test]
    fn zone_changes_stay_local_without_broadcast() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false, false]);
        let home = format!("{}Fader1 TrackVolume\nZoneEnd\n", HOME.trim_end_matches("ZoneEnd\n"));
        load(&mut page, 0, &[&home, VCA]);
        load(&mut page, 1, &[&home, VCA]);
        let now = Instant::now();
        page.initialize(&*host, now);

        page.handle_input(0, "Vca", Gesture::Press(1.0), &*host, now);
        assert_eq!(take(&host), vec!["VCAModeActivated@VCA=1"]);
        page.handle_input(0, "Fader1", Gesture::Press(0.5), &*host, now);
        page.handle_input(1, "Fader1", Gesture::Press(0.5), &*host, now);
        assert_eq!(take(&host), vec!["VCAVolume@VCA=0.5", "TrackVolume@Home=0.5"]);
    }

    #[test]
    fn toggle_channel_flips_the_surface_state() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false]);
        load(&mut page, 0, &["Zone Home\nPlay ToggleChannel\nZoneEnd\n"]);
        let now = Instant::now();
        page.initialize(&*host, now);

        page.handle_input(0, "Play", Gesture::Press(1.0), &*host, now);
        assert!(page.surface(0).unwrap().surface().is_channel_toggled(0));
        page.handle_input(0, "Play", Gesture::Press(1.0), &*host, now);
        assert!(!page.surface(0).unwrap().surface().is_channel_toggled(0));
    }

    #[test]
    fn request_update_reports_feedback_per_surface() {
        let host = Rc::new(Host::default());
        let mut page = page(&host, &[false]);
        load(&mut page, 0, &["Zone Home\nFader1 TrackVolume\nZoneEnd\n"]);
        let now = Instant::now();
        page.initialize(&*host, now);
        let fader = page.surface(0).unwrap().surface().widget_by_name("Fader1").unwrap();
        page.surface_mut(0).unwrap().surface_mut().update_value(fader, 0.3);
        page.drain_feedback();

        page.request_update(&*host, now);
        let feedback = page.drain_feedback();
        assert!(feedback.contains(&(
            "S0".to_string(),
            FeedbackEvent::Value { widget: "Fader1".into(), value: 0.0 }
        )));
    }
}
