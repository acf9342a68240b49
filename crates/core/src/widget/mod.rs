//! Widget directory of one surface and the feedback it produces.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::{SurfaceConfig, WidgetConfig};
use crate::values::Rgba;

/// Virtual widgets every surface carries, fired by the engine itself.
pub const HARDWIRED_WIDGETS: [&str; 4] = [
    "OnInitialization",
    "OnTrackSelection",
    "OnZoneActivation",
    "OnZoneDeactivation",
];

/// Stable index of a widget within its [`Surface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WidgetId(pub usize);

/// How a widget renders outgoing values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackKind {
    /// Input only; nothing is ever sent back.
    #[default]
    None,
    /// Lamp or button LED: anything non-zero is on.
    TwoState,
    /// Motor fader, LED ring: the value as is.
    Continuous,
    /// Character display: values are rendered as text.
    Display,
    /// Level meter: the value clamped to `[0, 1]`.
    Meter,
}

/// What a [`FeedbackKind`] turned a value into.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Value(f64),
    Text(String),
    Nothing,
}

impl FeedbackKind {
    pub fn render_value(self, value: f64) -> Rendered {
        match self {
            Self::None => Rendered::Nothing,
            Self::TwoState => Rendered::Value(if value != 0.0 { 1.0 } else { 0.0 }),
            Self::Continuous => Rendered::Value(value),
            Self::Display => Rendered::Text(format!("{value:.2}")),
            Self::Meter => Rendered::Value(value.clamp(0.0, 1.0)),
        }
    }

    pub fn accepts_text(self) -> bool {
        self == Self::Display
    }

    pub fn accepts_color(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Outgoing message for the I/O layer.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    Value { widget: String, value: f64 },
    Text { widget: String, text: String },
    Color { widget: String, color: Rgba },
    Mode { widget: String, mode: String },
    ZoneActivated { zone: String },
}

#[derive(Debug, Clone)]
pub struct Widget {
    name: String,
    channel: u32,
    feedback: FeedbackKind,
    step_size: f64,
    acceleration: Vec<f64>,
    last_value: Option<f64>,
    last_text: Option<String>,
    last_color: Option<Rgba>,
    last_mode: Option<String>,
}

impl Widget {
    pub fn from_config(config: &WidgetConfig) -> Self {
        Self {
            name: config.name.clone(),
            channel: config
                .channel
                .unwrap_or_else(|| channel_from_name(&config.name)),
            feedback: config.feedback,
            step_size: config.step_size,
            acceleration: config.acceleration.clone(),
            last_value: None,
            last_text: None,
            last_color: None,
            last_mode: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based channel, or 0 for widgets that belong to no channel.
    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn feedback(&self) -> FeedbackKind {
        self.feedback
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn acceleration(&self) -> &[f64] {
        &self.acceleration
    }
}

/// Trailing decimal digits of a widget name: `Fader12` is channel 12.
pub fn channel_from_name(name: &str) -> u32 {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    name[name.len() - digits..].parse().unwrap_or(0)
}

/// One control surface: its widgets, channel touch/toggle state and pending
/// feedback.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    name: String,
    channel_count: u32,
    channel_offset: u32,
    widgets: Vec<Widget>,
    by_name: HashMap<String, WidgetId>,
    touched: BTreeSet<u32>,
    toggled: BTreeSet<u32>,
    outbox: Vec<FeedbackEvent>,
}

impl Surface {
    pub fn new(name: impl Into<String>, channel_count: u32) -> Self {
        let mut surface = Self {
            name: name.into(),
            channel_count,
            ..Self::default()
        };
        for hardwired in HARDWIRED_WIDGETS {
            surface.add_widget(&WidgetConfig::new(hardwired, FeedbackKind::None));
        }
        surface
    }

    pub fn from_config(config: &SurfaceConfig) -> Self {
        let mut surface = Self::new(config.name.clone(), config.channel_count);
        surface.channel_offset = config.channel_offset;
        for widget in &config.widgets {
            surface.add_widget(widget);
        }
        surface
    }

    /// Adds a widget, or replaces the definition of one with the same name.
    pub fn add_widget(&mut self, config: &WidgetConfig) -> WidgetId {
        let widget = Widget::from_config(config);
        if let Some(&id) = self.by_name.get(&config.name) {
            self.widgets[id.0] = widget;
            return id;
        }

        let id = WidgetId(self.widgets.len());
        self.by_name.insert(config.name.clone(), id);
        self.widgets.push(widget);
        id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn channel_offset(&self) -> u32 {
        self.channel_offset
    }

    pub fn widget_by_name(&self, name: &str) -> Option<WidgetId> {
        self.by_name.get(name).copied()
    }

    pub fn widget(&self, id: WidgetId) -> Option<&Widget> {
        self.widgets.get(id.0)
    }

    pub fn widget_name(&self, id: WidgetId) -> &str {
        self.widget(id).map_or("", Widget::name)
    }

    pub fn channel_of(&self, id: WidgetId) -> u32 {
        self.widget(id).map_or(0, Widget::channel)
    }

    pub fn widget_ids(&self) -> impl Iterator<Item = WidgetId> {
        (0..self.widgets.len()).map(WidgetId)
    }

    pub fn touch_channel(&mut self, channel: u32, value: f64) {
        if value != 0.0 {
            self.touched.insert(channel);
        } else {
            self.touched.remove(&channel);
        }
    }

    pub fn toggle_channel(&mut self, channel: u32) {
        if !self.toggled.remove(&channel) {
            self.toggled.insert(channel);
        }
    }

    pub fn is_channel_touched(&self, channel: u32) -> bool {
        self.touched.contains(&channel)
    }

    pub fn is_channel_toggled(&self, channel: u32) -> bool {
        self.toggled.contains(&channel)
    }

    pub fn update_value(&mut self, id: WidgetId, value: f64) {
        let Some(widget) = self.widgets.get_mut(id.0) else {
            return;
        };
        match widget.feedback.render_value(value) {
            Rendered::Value(value) => {
                if widget.last_value != Some(value) {
                    widget.last_value = Some(value);
                    self.outbox.push(FeedbackEvent::Value {
                        widget: widget.name.clone(),
                        value,
                    });
                }
            }
            Rendered::Text(text) => self.update_text(id, &text),
            Rendered::Nothing => {}
        }
    }

    pub fn update_text(&mut self, id: WidgetId, text: &str) {
        let Some(widget) = self.widgets.get_mut(id.0) else {
            return;
        };
        if !widget.feedback.accepts_text() || widget.last_text.as_deref() == Some(text) {
            return;
        }
        widget.last_text = Some(text.to_string());
        self.outbox.push(FeedbackEvent::Text {
            widget: widget.name.clone(),
            text: text.to_string(),
        });
    }

    pub fn update_color(&mut self, id: WidgetId, color: Rgba) {
        let Some(widget) = self.widgets.get_mut(id.0) else {
            return;
        };
        if !widget.feedback.accepts_color() || widget.last_color == Some(color) {
            return;
        }
        widget.last_color = Some(color);
        self.outbox.push(FeedbackEvent::Color {
            widget: widget.name.clone(),
            color,
        });
    }

    pub fn update_mode(&mut self, id: WidgetId, mode: &str) {
        let Some(widget) = self.widgets.get_mut(id.0) else {
            return;
        };
        if widget.last_mode.as_deref() == Some(mode) {
            return;
        }
        widget.last_mode = Some(mode.to_string());
        self.outbox.push(FeedbackEvent::Mode {
            widget: widget.name.clone(),
            mode: mode.to_string(),
        });
    }

    /// Zero value, empty text, blank color; only what differs is sent.
    pub fn clear(&mut self, id: WidgetId) {
        let Some(kind) = self.widget(id).map(Widget::feedback) else {
            return;
        };
        if kind.accepts_text() {
            self.update_text(id, "");
        } else {
            self.update_value(id, 0.0);
        }
        self.update_color(id, Rgba::default());
    }

    /// Like [`Surface::clear`] but forgets the cached state first, so the
    /// blanking is always sent.
    pub fn force_clear(&mut self, id: WidgetId) {
        if let Some(widget) = self.widgets.get_mut(id.0) {
            widget.last_value = None;
            widget.last_text = None;
            widget.last_color = None;
        }
        self.clear(id);
    }

    pub fn announce_zone(&mut self, zone: &str) {
        self.outbox.push(FeedbackEvent::ZoneActivated {
            zone: zone.to_string(),
        });
    }

    pub fn pending_feedback(&self) -> &[FeedbackEvent] {
        &self.outbox
    }

    pub fn drain_feedback(&mut self) -> Vec<FeedbackEvent> {
        std::mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> Surface {
        let mut config = SurfaceConfig {
            name: "Test".into(),
            channel_count: 8,
            ..SurfaceConfig::default()
        };
        config.widgets = vec![
            WidgetConfig::new("Fader3", FeedbackKind::Continuous),
            WidgetConfig::new("Mute3", FeedbackKind::TwoState),
            WidgetConfig::new("Display1", FeedbackKind::Display),
            WidgetConfig::new("Play", FeedbackKind::TwoState),
        ];
        Surface::from_config(&config)
    }

    #[test]
    fn hardwired_widgets_always_exist() {
        let surface = Surface::new("Bare", 1);
        for name in HARDWIRED_WIDGETS {
            assert!(surface.widget_by_name(name).is_some(), "{name}");
        }
    }

    #[test]
    fn channels_come_from_trailing_digits() {
        let surface = surface();
        let fader = surface.widget_by_name("Fader3").unwrap();
        let play = surface.widget_by_name("Play").unwrap();
        assert_eq!(surface.channel_of(fader), 3);
        assert_eq!(surface.channel_of(play), 0);
        assert_eq!(channel_from_name("Rotary12"), 12);
    }

    #[test]
    fn unchanged_values_are_not_resent() {
        let mut surface = surface();
        let fader = surface.widget_by_name("Fader3").unwrap();
        surface.update_value(fader, 0.5);
        surface.update_value(fader, 0.5);
        surface.update_value(fader, 0.7);

        let events = surface.drain_feedback();
        assert_eq!(events.len(), 2);
        assert!(surface.pending_feedback().is_empty());
    }

    #[test]
    fn feedback_kinds_shape_values() {
        let mut surface = surface();
        let mute = surface.widget_by_name("Mute3").unwrap();
        let display = surface.widget_by_name("Display1").unwrap();
        surface.update_value(mute, 0.3);
        surface.update_value(display, 0.25);

        assert_eq!(
            surface.drain_feedback(),
            vec![
                FeedbackEvent::Value {
                    widget: "Mute3".into(),
                    value: 1.0
                },
                FeedbackEvent::Text {
                    widget: "Display1".into(),
                    text: "0.25".into()
                },
            ]
        );
    }

    #[test]
    fn virtual_widgets_stay_silent() {
        let mut surface = surface();
        let hook = surface.widget_by_name("OnZoneActivation").unwrap();
        surface.update_value(hook, 1.0);
        surface.force_clear(hook);
        assert!(surface.drain_feedback().is_empty());
    }

    #[test]
    fn force_clear_always_sends() {
        let mut surface = surface();
        let play = surface.widget_by_name("Play").unwrap();
        surface.clear(play);
        assert_eq!(surface.drain_feedback().len(), 2);
        surface.clear(play);
        assert!(surface.drain_feedback().is_empty());
        surface.force_clear(play);
        assert_eq!(surface.drain_feedback().len(), 2);
    }

    #[test]
    fn touch_and_toggle_track_channels() {
        let mut surface = surface();
        surface.touch_channel(3, 1.0);
        surface.toggle_channel(2);
        assert!(surface.is_channel_touched(3));
        assert!(surface.is_channel_toggled(2));

        surface.touch_channel(3, 0.0);
        surface.toggle_channel(2);
        assert!(!surface.is_channel_touched(3));
        assert!(!surface.is_channel_toggled(2));
    }
}
