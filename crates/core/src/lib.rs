//! Core library for the surface integrator.
//!
//! Zone files describe which action each control-surface widget triggers,
//! under which modifier combination, and with which value transform. This
//! crate parses those files into zone trees, runs their activation rules and
//! drives bound actions through the value pipeline. Host behaviour and wire
//! I/O stay outside, behind [`Action`], [`TargetResolver`] and the
//! [`FeedbackEvent`] outbox.

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod lexer;
pub mod modifiers;
pub mod page;
pub mod registry;
pub mod steps;
pub mod template;
pub mod values;
pub mod widget;
pub mod zone;

pub use action::{
    Action, ActionRegistry, EngineAction, Feedback, FocusedFx, Invocation, SurfaceCommand,
    TargetHandle, TargetResolver,
};
pub use config::{AppConfig, EngineConfig, PageConfig, SurfaceConfig, WidgetConfig};
pub use context::{ActionBinding, ActionContext, DispatchEnv, Gesture};
pub use error::{Result, SurfaceError};
pub use modifiers::ModifierManager;
pub use page::{ControlSurface, Page};
pub use registry::ZoneRegistry;
pub use steps::{ParameterSweep, StepSizeCache};
pub use template::{parse_zone_text, ZoneDefinition};
pub use values::{Rgba, ValueTransform};
pub use widget::{FeedbackEvent, FeedbackKind, Surface, WidgetId};
pub use zone::{Navigator, Zone, ZoneArena, ZoneId};
