//! One binding made concrete: an action, the widget it is bound to, and the
//! value pipeline between them.

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::action::{
    Action, EngineAction, Feedback, Invocation, SurfaceCommand, TargetResolver,
};
use crate::config::TickConfig;
use crate::modifiers::ModifierManager;
use crate::values::{synthesized_tick_count, ColorSpec, Rgba, TransformDefaults, ValueSpec, ValueTransform};
use crate::widget::{Surface, Widget, WidgetId};
use crate::zone::ZoneScope;

/// What a binding dispatches to.
#[derive(Clone)]
pub enum ActionBinding {
    Engine(EngineAction),
    Host(Rc<dyn Action>),
}

impl std::fmt::Debug for ActionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(action) => f.debug_tuple("Engine").field(action).finish(),
            Self::Host(_) => f.write_str("Host"),
        }
    }
}

/// Input shapes a widget can produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    /// Absolute value: button press/release, fader position.
    Press(f64),
    /// Signed encoder delta.
    Relative(f64),
    /// Encoder delta with the surface's acceleration index.
    Accelerated { index: i32, delta: f64 },
    Touch(f64),
}

/// Borrowed engine state a context needs while it runs.
pub struct DispatchEnv<'a> {
    pub resolver: &'a dyn TargetResolver,
    pub surface: &'a mut Surface,
    pub modifiers: &'a ModifierManager,
    pub commands: &'a mut Vec<SurfaceCommand>,
    pub now: Instant,
}

/// Everything needed to build a context.
pub struct ContextSeed<'a> {
    pub action: String,
    pub binding: ActionBinding,
    pub widget_id: WidgetId,
    pub widget: &'a Widget,
    /// Tokens after the action name.
    pub params: Vec<String>,
    pub properties: Vec<Vec<String>>,
    pub cached_steps: &'a [f64],
    pub ticks: &'a TickConfig,
}

#[derive(Debug, Clone)]
pub struct ActionContext {
    name: String,
    binding: ActionBinding,
    widget: WidgetId,
    widget_name: String,
    params: Vec<String>,
    properties: Vec<Vec<String>>,
    int_param: i32,
    param_index: Option<usize>,
    string_param: String,
    no_feedback: bool,
    invert_feedback: bool,
    transform: ValueTransform,
    colors: ColorSpec,
    hold_delay: Option<Duration>,
    deferred: Option<(f64, Instant)>,
    widget_mode: Option<String>,
}

/// Range a host action gets when its binding names none.
pub fn default_range(action: &str) -> (f64, f64) {
    match action {
        "TrackVolumeDB" | "TrackSendVolumeDB" => (-144.0, 24.0),
        "TrackPanPercent" | "TrackPanWidthPercent" | "TrackPanLPercent" | "TrackPanRPercent" => {
            (-100.0, 100.0)
        }
        _ => (0.0, 1.0),
    }
}

/// Leading unsigned integer of the first parameter.
pub fn param_index(params: &[String]) -> Option<usize> {
    let first = params.first()?;
    let digits: String = first.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn int_param(params: &[String]) -> i32 {
    let Some(first) = params.first() else {
        return 0;
    };
    let (sign, rest) = match first.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, first.as_str()),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<i32>().map_or(0, |value| sign * value)
}

impl ActionContext {
    pub fn new(seed: ContextSeed<'_>) -> Self {
        let ContextSeed {
            action,
            binding,
            widget_id,
            widget,
            params,
            properties,
            cached_steps,
            ticks,
        } = seed;

        let transform = ValueSpec::parse(&params).resolve(&TransformDefaults {
            range: default_range(&action),
            widget_step_size: widget.step_size(),
            widget_acceleration: widget.acceleration(),
            cached_steps,
            ticks,
        });
        let colors = ColorSpec::parse(&params);
        let no_feedback = properties
            .iter()
            .any(|property| property.first().map(String::as_str) == Some("NoFeedback"));

        Self {
            int_param: int_param(&params),
            param_index: param_index(&params),
            string_param: params.first().cloned().unwrap_or_default(),
            name: action,
            binding,
            widget: widget_id,
            widget_name: widget.name().to_string(),
            params,
            properties,
            no_feedback,
            invert_feedback: false,
            transform,
            colors,
            hold_delay: None,
            deferred: None,
            widget_mode: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> &ActionBinding {
        &self.binding
    }

    pub fn widget(&self) -> WidgetId {
        self.widget
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn properties(&self) -> &[Vec<String>] {
        &self.properties
    }

    pub fn int_param(&self) -> i32 {
        self.int_param
    }

    pub fn param_index(&self) -> Option<usize> {
        self.param_index
    }

    pub fn string_param(&self) -> &str {
        &self.string_param
    }

    pub fn transform(&self) -> &ValueTransform {
        &self.transform
    }

    pub fn colors(&self) -> &ColorSpec {
        &self.colors
    }

    pub fn has_no_feedback(&self) -> bool {
        self.no_feedback
    }

    pub fn is_host_action(&self) -> bool {
        matches!(self.binding, ActionBinding::Host(_))
    }

    pub fn set_invert_feedback(&mut self, invert: bool) {
        self.invert_feedback = invert;
    }

    pub fn set_hold_delay(&mut self, delay: Duration) {
        self.hold_delay = Some(delay);
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    pub fn set_range(&mut self, minimum: f64, maximum: f64) {
        self.transform.set_range(minimum, maximum);
    }

    /// Encoder bound as an increment-only button.
    pub fn set_increase(&mut self) {
        self.transform.set_range(0.0, 2.0);
    }

    /// Encoder bound as a decrement-only button.
    pub fn set_decrease(&mut self) {
        self.transform.set_range(-2.0, 1.0);
    }

    pub fn set_step_size(&mut self, step_size: f64) {
        self.transform.delta = step_size;
    }

    pub fn set_stepped_values(&mut self, values: Vec<f64>) {
        self.transform.stepped_values = values;
        self.transform.stepped_index = 0;
    }

    pub fn set_accelerated_deltas(&mut self, deltas: Vec<f64>) {
        self.transform.accelerated_deltas = deltas;
    }

    pub fn set_tick_counts(&mut self, ticks: Vec<u32>) {
        self.transform.accelerated_ticks = ticks;
    }

    /// Recomputes the single tick threshold of a stepped binding from its
    /// step count and step size.
    pub fn synthesize_tick_count(&mut self, ticks: &TickConfig) {
        let transform = &mut self.transform;
        if transform.is_stepped() && transform.delta != 0.0 {
            let base = ticks.base_tick_count(transform.stepped_values.len());
            transform.accelerated_ticks = vec![synthesized_tick_count(base, transform.delta)];
        }
    }

    pub fn set_colors(&mut self, colors: Vec<Rgba>) {
        self.colors.values = colors;
    }

    pub fn set_widget_mode(&mut self, mode: impl Into<String>) {
        self.widget_mode = Some(mode.into());
    }

    fn invocation<'b>(&'b self, scope: &'b ZoneScope, resolver: &dyn TargetResolver) -> Invocation<'b> {
        Invocation {
            action: &self.name,
            widget: &self.widget_name,
            zone: scope.display_name(),
            slot_index: scope.slot_index,
            target: resolver.resolve(scope.navigator),
            int_param: self.int_param,
            param_index: self.param_index,
            string_param: &self.string_param,
            params: &self.params,
        }
    }

    pub fn handle(&mut self, gesture: Gesture, scope: &ZoneScope, env: &mut DispatchEnv<'_>) {
        match gesture {
            Gesture::Press(value) => self.do_action(scope, env, value),
            Gesture::Relative(delta) => self.do_relative(scope, env, delta),
            Gesture::Accelerated { index, delta } => self.do_accelerated(scope, env, index, delta),
            Gesture::Touch(value) => self.do_touch(scope, env, value),
        }
    }

    /// Absolute input. A hold binding only records the press; release cancels it.
    pub fn do_action(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>, value: f64) {
        if self.hold_delay.is_some() {
            self.deferred = if value != 0.0 { Some((value, env.now)) } else { None };
            return;
        }

        if let Some(value) = self.transform.press(value) {
            self.do_range_bound(scope, env, value);
        }
    }

    pub fn do_relative(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>, delta: f64) {
        if self.transform.is_stepped() {
            if let Some(value) = self.transform.step(delta) {
                self.do_range_bound(scope, env, value);
            }
            return;
        }

        let current = self.current_value(scope, env);
        let value = self.transform.relative(current, delta);
        self.do_range_bound(scope, env, value);
    }

    pub fn do_accelerated(
        &mut self,
        scope: &ZoneScope,
        env: &mut DispatchEnv<'_>,
        index: i32,
        delta: f64,
    ) {
        if self.transform.is_stepped() {
            if let Some(value) = self.transform.accelerated_step(index, delta) {
                self.do_range_bound(scope, env, value);
            }
        } else if !self.transform.accelerated_deltas.is_empty() {
            let current = self.current_value(scope, env);
            let value = self.transform.accelerated_delta(current, index, delta);
            self.do_range_bound(scope, env, value);
        } else {
            self.do_relative(scope, env, delta);
        }
    }

    pub fn do_touch(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>, value: f64) {
        if let ActionBinding::Host(action) = &self.binding {
            action.touch(&self.invocation(scope, env.resolver), value);
        }
    }

    /// Clamps into the binding's range, then performs.
    pub fn do_range_bound(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>, value: f64) {
        let value = self.transform.clamp(value);
        match &self.binding {
            ActionBinding::Host(action) => {
                action.perform(&self.invocation(scope, env.resolver), value);
            }
            ActionBinding::Engine(action) => self.perform_engine(action, scope, env, value),
        }
    }

    /// Fires a held press once it has been held past the hold delay.
    pub fn run_deferred(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>) {
        let (Some(delay), Some((value, pressed_at))) = (self.hold_delay, self.deferred) else {
            return;
        };
        if env.now.duration_since(pressed_at) > delay {
            self.deferred = None;
            self.do_range_bound(scope, env, value);
        }
    }

    fn current_value(&self, scope: &ZoneScope, env: &DispatchEnv<'_>) -> f64 {
        match &self.binding {
            ActionBinding::Host(action) => {
                action.current_normalized_value(&self.invocation(scope, env.resolver))
            }
            ActionBinding::Engine(_) => 0.0,
        }
    }

    fn perform_engine(
        &self,
        action: &EngineAction,
        scope: &ZoneScope,
        env: &mut DispatchEnv<'_>,
        value: f64,
    ) {
        let pressed = value != 0.0;
        let command = match action {
            EngineAction::NoAction | EngineAction::FixedText(_) => None,
            EngineAction::Modifier(name) => Some(SurfaceCommand::SetModifier {
                name: name.clone(),
                engaged: pressed,
            }),
            _ if !pressed => None,
            EngineAction::ClearModifiers => Some(SurfaceCommand::ClearModifiers),
            EngineAction::ToggleChannel => Some(SurfaceCommand::ToggleChannel(
                env.surface.channel_of(self.widget),
            )),
            EngineAction::GoHome => Some(SurfaceCommand::GoHome),
            EngineAction::GoAssociatedZone(name) => {
                Some(SurfaceCommand::GoAssociatedZone(name.clone()))
            }
            EngineAction::GoSubZone(name) => Some(SurfaceCommand::GoSubZone {
                zone: scope.id,
                name: name.clone(),
            }),
            EngineAction::LeaveSubZone => Some(SurfaceCommand::LeaveSubZone { zone: scope.id }),
            EngineAction::GoSelectedTrackFx => Some(SurfaceCommand::GoSelectedTrackFx),
            EngineAction::GoFxSlot(slot) => Some(SurfaceCommand::GoFxSlot {
                navigator: scope.navigator,
                slot: *slot,
            }),
            EngineAction::ToggleFocusedFxMapping => Some(SurfaceCommand::ToggleFocusedFxMapping),
            EngineAction::ToggleFocusedFxParamMapping => {
                Some(SurfaceCommand::ToggleFocusedFxParamMapping)
            }
            EngineAction::Broadcast(zones) => Some(SurfaceCommand::SetBroadcast(zones.clone())),
            EngineAction::Receive(zones) => Some(SurfaceCommand::SetReceive(zones.clone())),
        };

        if let Some(command) = command {
            tracing::trace!(action = %self.name, ?command, "queued");
            env.commands.push(command);
        }
    }

    fn engine_feedback(&self, action: &EngineAction, env: &DispatchEnv<'_>) -> Option<Feedback> {
        let on = |flag: bool| if flag { 1.0 } else { 0.0 };
        match action {
            EngineAction::NoAction => None,
            EngineAction::FixedText(text) => Some(Feedback::Text(text.clone())),
            EngineAction::Modifier(name) => Some(Feedback::Value(on(env.modifiers.is_engaged(name)))),
            EngineAction::ToggleChannel => {
                let channel = env.surface.channel_of(self.widget);
                Some(Feedback::Value(on(env.surface.is_channel_toggled(channel))))
            }
            _ => Some(Feedback::Value(0.0)),
        }
    }

    /// Pulls the current value from the action and pushes it to the widget.
    pub fn request_update(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>) {
        if let Some(mode) = &self.widget_mode {
            env.surface.update_mode(self.widget, mode);
        }
        if self.no_feedback {
            return;
        }

        let feedback = match &self.binding {
            ActionBinding::Host(action) => action.feedback(&self.invocation(scope, env.resolver)),
            ActionBinding::Engine(action) => self.engine_feedback(action, env),
        };

        match feedback {
            Some(Feedback::Value(value)) => self.update_widget_value(scope, env, value),
            Some(Feedback::Text(text)) => env.surface.update_text(self.widget, &text),
            None => env.surface.clear(self.widget),
        }
    }

    pub fn update_widget_value(&mut self, scope: &ZoneScope, env: &mut DispatchEnv<'_>, value: f64) {
        if self.transform.is_stepped() {
            self.transform.sync_to(value);
        }

        let shown = if self.invert_feedback { 1.0 - value } else { value };
        env.surface.update_value(self.widget, shown);

        if let Some(color) = self.colors.for_value(shown) {
            env.surface.update_color(self.widget, color);
        }
        if self.colors.track {
            let color = env
                .resolver
                .resolve(scope.navigator)
                .and_then(|target| env.resolver.target_color(target));
            if let Some(color) = color {
                env.surface.update_color(self.widget, color);
            }
        }
    }
}
