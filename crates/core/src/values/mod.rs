//! The numeric mini-language embedded in action parameters, and the value
//! transform it configures.
//!
//! Inside a `[ ... ]` span every token is one literal:
//!
//! | literal           | meaning                                 |
//! |-------------------|-----------------------------------------|
//! | `0.25`, `3`       | stepped value                           |
//! | `(0.05)`          | delta for relative input                |
//! | `(4)`             | single tick threshold                   |
//! | `(0.01,0.05,0.1)` | accelerated delta table                 |
//! | `(8,4,2,1)`       | accelerated tick table                  |
//! | `0.0>1.0`, `1-5`  | range, normalised so min <= max         |
//!
//! A `{ ... }` span holds colors: `#RRGGBB[AA]` entries, raw `r g b` triples
//! or the single word `Track`.

use serde::{Deserialize, Serialize};

use crate::config::TickConfig;

/// Everything the `[ ... ]` span of one binding declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSpec {
    pub stepped_values: Vec<f64>,
    pub delta: Option<f64>,
    pub accelerated_deltas: Vec<f64>,
    pub accelerated_ticks: Vec<u32>,
    pub range: Option<(f64, f64)>,
}

impl ValueSpec {
    /// Reads the first `[` to the last `]` of `params`. Tokens that match no
    /// literal form are ignored.
    pub fn parse(params: &[String]) -> Self {
        let mut spec = Self::default();

        let Some(open) = params.iter().position(|token| token == "[") else {
            return spec;
        };
        let Some(close) = params.iter().rposition(|token| token == "]") else {
            return spec;
        };
        if close <= open {
            return spec;
        }

        for token in &params[open + 1..close] {
            match parse_literal(token) {
                Some(Literal::Number(number)) => spec.stepped_values.push(number.value),
                Some(Literal::Group(numbers)) => spec.absorb_group(numbers),
                Some(Literal::Range(first, second)) => {
                    spec.range = Some(if second > first {
                        (first, second)
                    } else {
                        (second, first)
                    });
                }
                None => tracing::trace!(token = %token, "ignoring unrecognised value literal"),
            }
        }

        spec
    }

    // A lone decimal is a delta and a lone integer a tick count; the lexical
    // form is the only thing telling them apart.
    fn absorb_group(&mut self, numbers: Vec<Number>) {
        let all_integral = numbers.iter().all(|n| n.integral);
        let all_decimal = numbers.iter().all(|n| !n.integral);

        if numbers.len() == 1 {
            let number = numbers[0];
            if number.integral {
                self.accelerated_ticks.push(tick_count(number.value));
            } else {
                self.delta = Some(number.value);
            }
        } else if all_decimal {
            self.accelerated_deltas
                .extend(numbers.iter().map(|n| n.value));
        } else if all_integral {
            self.accelerated_ticks
                .extend(numbers.iter().map(|n| tick_count(n.value)));
        }
    }

    /// Applies the default cascade and produces the runtime transform.
    pub fn resolve(self, defaults: &TransformDefaults<'_>) -> ValueTransform {
        let delta = match self.delta {
            Some(delta) => delta,
            None => defaults.widget_step_size,
        };

        let accelerated_deltas = if self.accelerated_deltas.is_empty() {
            defaults.widget_acceleration.to_vec()
        } else {
            self.accelerated_deltas
        };

        let stepped_values = if self.stepped_values.is_empty() {
            defaults.cached_steps.to_vec()
        } else {
            self.stepped_values
        };

        let mut accelerated_ticks = self.accelerated_ticks;
        if !stepped_values.is_empty() && accelerated_ticks.is_empty() && delta != 0.0 {
            accelerated_ticks.push(synthesized_tick_count(
                defaults.ticks.base_tick_count(stepped_values.len()),
                delta,
            ));
        }
        if accelerated_ticks.is_empty() {
            accelerated_ticks.push(defaults.ticks.default_tick_count);
        }

        let (range_minimum, range_maximum) = self.range.unwrap_or(defaults.range);

        ValueTransform {
            range_minimum,
            range_maximum,
            stepped_values,
            stepped_index: 0,
            delta,
            accelerated_deltas,
            accelerated_ticks,
            accumulated_inc_ticks: 0,
            accumulated_dec_ticks: 0,
        }
    }
}

/// `round(base / (step * 10000))`, never below zero.
pub fn synthesized_tick_count(base_tick_count: u32, step_size: f64) -> u32 {
    let ticks = f64::from(base_tick_count) / (step_size * 10_000.0) + 0.5;
    tick_count(ticks.floor())
}

fn tick_count(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Fallbacks consulted when a binding leaves part of its value spec out.
#[derive(Debug, Clone, Copy)]
pub struct TransformDefaults<'a> {
    pub range: (f64, f64),
    pub widget_step_size: f64,
    pub widget_acceleration: &'a [f64],
    pub cached_steps: &'a [f64],
    pub ticks: &'a TickConfig,
}

/// Range, step table and acceleration state of one binding.
///
/// Methods return the value that should be dispatched, or `None` when the
/// input produces nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTransform {
    pub range_minimum: f64,
    pub range_maximum: f64,
    pub stepped_values: Vec<f64>,
    pub stepped_index: usize,
    /// Relative step size; zero means "use the raw delta".
    pub delta: f64,
    pub accelerated_deltas: Vec<f64>,
    pub accelerated_ticks: Vec<u32>,
    pub accumulated_inc_ticks: u32,
    pub accumulated_dec_ticks: u32,
}

impl Default for ValueTransform {
    fn default() -> Self {
        Self {
            range_minimum: 0.0,
            range_maximum: 1.0,
            stepped_values: Vec::new(),
            stepped_index: 0,
            delta: 0.0,
            accelerated_deltas: Vec::new(),
            accelerated_ticks: vec![10],
            accumulated_inc_ticks: 0,
            accumulated_dec_ticks: 0,
        }
    }
}

impl ValueTransform {
    pub fn is_stepped(&self) -> bool {
        !self.stepped_values.is_empty()
    }

    pub fn set_range(&mut self, minimum: f64, maximum: f64) {
        self.range_minimum = minimum;
        self.range_maximum = maximum;
    }

    pub fn clamp(&self, value: f64) -> f64 {
        let mut value = value;
        if value > self.range_maximum {
            value = self.range_maximum;
        }
        if value < self.range_minimum {
            value = self.range_minimum;
        }
        value
    }

    /// Absolute input. Stepped tables advance one entry per non-zero press;
    /// past the top entry they wrap only when the first entry is lower.
    pub fn press(&mut self, value: f64) -> Option<f64> {
        if !self.is_stepped() {
            return Some(value);
        }
        if value == 0.0 {
            return None;
        }

        let top = self.stepped_values.len() - 1;
        if self.stepped_index >= top {
            self.stepped_index = top;
            if self.stepped_values[0] < self.stepped_values[top] {
                self.stepped_index = 0;
            }
        } else {
            self.stepped_index += 1;
        }

        Some(self.stepped_values[self.stepped_index])
    }

    /// One stepped move in the direction of `delta`, clamped at both ends.
    pub fn step(&mut self, delta: f64) -> Option<f64> {
        if !self.is_stepped() {
            return None;
        }

        let top = self.stepped_values.len() - 1;
        if delta > 0.0 {
            self.stepped_index = (self.stepped_index + 1).min(top);
        } else {
            self.stepped_index = self.stepped_index.saturating_sub(1).min(top);
        }

        Some(self.stepped_values[self.stepped_index])
    }

    /// Plain relative move from `current`.
    pub fn relative(&self, current: f64, delta: f64) -> f64 {
        if self.delta != 0.0 {
            if delta > 0.0 {
                current + self.delta
            } else {
                current - self.delta
            }
        } else {
            current + delta
        }
    }

    /// Counts ticks towards the threshold for `acceleration_index`; the
    /// opposite counter decays by one per tick instead of resetting.
    pub fn accelerated_step(&mut self, acceleration_index: i32, delta: f64) -> Option<f64> {
        if !self.is_stepped() {
            return None;
        }

        if delta > 0.0 {
            self.accumulated_inc_ticks += 1;
            self.accumulated_dec_ticks = self.accumulated_dec_ticks.saturating_sub(1);
        } else if delta < 0.0 {
            self.accumulated_dec_ticks += 1;
            self.accumulated_inc_ticks = self.accumulated_inc_ticks.saturating_sub(1);
        }

        let threshold = clamped_entry(&self.accelerated_ticks, acceleration_index).unwrap_or(0);

        let fired = (delta > 0.0 && self.accumulated_inc_ticks >= threshold)
            || (delta < 0.0 && self.accumulated_dec_ticks >= threshold);
        if !fired {
            return None;
        }

        self.accumulated_inc_ticks = 0;
        self.accumulated_dec_ticks = 0;
        self.step(delta)
    }

    /// Adds or subtracts the accelerated delta for `acceleration_index`.
    pub fn accelerated_delta(&self, current: f64, acceleration_index: i32, delta: f64) -> f64 {
        let step = clamped_entry(&self.accelerated_deltas, acceleration_index).unwrap_or(0.0);
        if delta > 0.0 {
            current + step
        } else {
            current - step
        }
    }

    /// Moves the stepped cursor to the entry closest to `value`.
    pub fn sync_to(&mut self, value: f64) {
        let nearest = self
            .stepped_values
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - value)
                    .abs()
                    .partial_cmp(&(*b - value).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| index);

        if let Some(index) = nearest {
            self.stepped_index = index;
        }
    }
}

fn clamped_entry<T: Copy>(table: &[T], index: i32) -> Option<T> {
    if table.is_empty() {
        return None;
    }
    let index = usize::try_from(index.max(0)).unwrap_or(0).min(table.len() - 1);
    Some(table[index])
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Number {
    value: f64,
    integral: bool,
    signed: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(Number),
    Group(Vec<Number>),
    Range(f64, f64),
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn digits(&mut self) -> usize {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// `-?[0-9]+(\.[0-9]+)?`
    fn number(&mut self) -> Option<Number> {
        let start = self.pos;
        let signed = self.eat(b'-');
        if self.digits() == 0 {
            return None;
        }

        let mut integral = true;
        if self.eat(b'.') {
            if self.digits() == 0 {
                return None;
            }
            integral = false;
        }

        let value = self.text[start..self.pos].parse().ok()?;
        Some(Number {
            value,
            integral,
            signed,
        })
    }
}

fn parse_literal(token: &str) -> Option<Literal> {
    let mut cursor = Cursor::new(token);

    if cursor.eat(b'(') {
        let mut numbers = vec![cursor.number()?];
        while cursor.eat(b',') {
            numbers.push(cursor.number()?);
        }
        if !cursor.eat(b')') || !cursor.at_end() {
            return None;
        }
        return Some(Literal::Group(numbers));
    }

    let first = cursor.number()?;
    if cursor.at_end() {
        return Some(Literal::Number(first));
    }

    if cursor.eat(b'>') {
        let second = cursor.number()?;
        return cursor.at_end().then_some(Literal::Range(first.value, second.value));
    }

    // `lo-hi` only between unsigned integers; `-3-5` and `0.5-1.0` are noise.
    if first.integral && !first.signed && cursor.eat(b'-') {
        let second = cursor.number()?;
        if second.integral && !second.signed && cursor.at_end() {
            return Some(Literal::Range(first.value, second.value));
        }
    }

    None
}

/// 8-bit RGBA color sent to widgets that support it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    pub fn from_hex(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#')?;
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return None;
        }

        let channel = |index: usize| u8::from_str_radix(&hex[index..index + 2], 16).ok();
        let alpha = if hex.len() == 8 { channel(6)? } else { 255 };

        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: alpha,
        })
    }
}

/// Colors declared in the `{ ... }` span of one binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorSpec {
    pub values: Vec<Rgba>,
    /// Follow the target's own color instead of a fixed table.
    pub track: bool,
}

impl ColorSpec {
    /// Reads the first `{` to the following `}` of `params`.
    pub fn parse(params: &[String]) -> Self {
        let mut spec = Self::default();

        let Some(open) = params.iter().position(|token| token == "{") else {
            return spec;
        };
        let Some(close) = params[open..].iter().position(|token| token == "}") else {
            return spec;
        };

        let mut hex_colors = Vec::new();
        let mut raw_values = Vec::new();

        for token in &params[open + 1..open + close] {
            if token.starts_with('#') {
                hex_colors.extend(Rgba::from_hex(token));
            } else if token == "Track" {
                spec.track = true;
                break;
            } else if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
                let value = token.parse::<u32>().unwrap_or(u32::MAX).min(255);
                raw_values.push(value as u8);
            }
        }

        if !hex_colors.is_empty() {
            spec.values = hex_colors;
        } else if raw_values.len() >= 3 && raw_values.len() % 3 == 0 {
            spec.values = raw_values
                .chunks(3)
                .map(|rgb| Rgba::rgb(rgb[0], rgb[1], rgb[2]))
                .collect();
        }

        spec
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && !self.track
    }

    /// Off color for zero, on color for anything else.
    pub fn for_value(&self, value: f64) -> Option<Rgba> {
        let index = if value == 0.0 { 0 } else { 1 };
        self.values.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(text: &str) -> Vec<String> {
        crate::lexer::tokenize(text)
    }

    fn resolve(spec: ValueSpec, ticks: &TickConfig) -> ValueTransform {
        spec.resolve(&TransformDefaults {
            range: (0.0, 1.0),
            widget_step_size: 0.0,
            widget_acceleration: &[],
            cached_steps: &[],
            ticks,
        })
    }

    fn stepped(values: &[f64]) -> ValueTransform {
        ValueTransform {
            stepped_values: values.to_vec(),
            ..ValueTransform::default()
        }
    }

    #[test]
    fn classifies_every_literal_form() {
        let spec = ValueSpec::parse(&params(
            "[ 0.0 0.5 1 (0.05) (0.01,0.02) (8,4,2) 0.9>0.1 ]",
        ));

        assert_eq!(spec.stepped_values, vec![0.0, 0.5, 1.0]);
        assert_eq!(spec.delta, Some(0.05));
        assert_eq!(spec.accelerated_deltas, vec![0.01, 0.02]);
        assert_eq!(spec.accelerated_ticks, vec![8, 4, 2]);
        assert_eq!(spec.range, Some((0.1, 0.9)));
    }

    #[test]
    fn single_integer_group_is_a_tick_not_a_delta() {
        let spec = ValueSpec::parse(&params("[ (4) ]"));
        assert_eq!(spec.delta, None);
        assert_eq!(spec.accelerated_ticks, vec![4]);

        let spec = ValueSpec::parse(&params("[ (4.0) ]"));
        assert_eq!(spec.delta, Some(4.0));
        assert!(spec.accelerated_ticks.is_empty());
    }

    #[test]
    fn integer_dash_range_is_ordered() {
        let spec = ValueSpec::parse(&params("[ 24-2 ]"));
        assert_eq!(spec.range, Some((2.0, 24.0)));
        assert!(spec.stepped_values.is_empty());
    }

    #[test]
    fn mixed_groups_and_junk_are_ignored() {
        let spec = ValueSpec::parse(&params("[ (1,0.5) abc 1.2.3 -0.5-1 ]"));
        assert_eq!(spec, ValueSpec::default());
    }

    #[test]
    fn nothing_outside_the_brackets_is_read() {
        let spec = ValueSpec::parse(&params("3 0.5 (0.1)"));
        assert_eq!(spec, ValueSpec::default());
    }

    #[test]
    fn defaults_cascade_from_widget_and_cache() {
        let ticks = TickConfig::default();
        let transform = ValueSpec::default().resolve(&TransformDefaults {
            range: (-144.0, 24.0),
            widget_step_size: 0.001,
            widget_acceleration: &[0.01, 0.1],
            cached_steps: &[0.0, 0.25, 0.5, 0.75, 1.0],
            ticks: &ticks,
        });

        assert_eq!(transform.delta, 0.001);
        assert_eq!(transform.accelerated_deltas, vec![0.01, 0.1]);
        assert_eq!(transform.stepped_values.len(), 5);
        assert_eq!((transform.range_minimum, transform.range_maximum), (-144.0, 24.0));
        // base 100 for five steps: 100 / 10 + 0.5 rounds to 10.
        assert_eq!(transform.accelerated_ticks, vec![10]);
    }

    #[test]
    fn tick_synthesis_scales_with_step_size() {
        assert_eq!(synthesized_tick_count(150, 0.005), 3);
        assert_eq!(synthesized_tick_count(250, 0.0001), 250);
    }

    #[test]
    fn empty_spec_still_has_a_tick_entry() {
        let ticks = TickConfig::default();
        let transform = resolve(ValueSpec::default(), &ticks);
        assert_eq!(transform.accelerated_ticks, vec![10]);
        assert!(!transform.is_stepped());
    }

    #[test]
    fn ascending_table_wraps_on_press() {
        let mut transform = stepped(&[0.0, 0.5, 1.0]);
        let seen: Vec<f64> = (0..6).filter_map(|_| transform.press(1.0)).collect();
        assert_eq!(seen, vec![0.5, 1.0, 0.0, 0.5, 1.0, 0.0]);
    }

    #[test]
    fn descending_table_sticks_at_the_end() {
        let mut transform = stepped(&[1.0, 0.5, 0.0]);
        let seen: Vec<f64> = (0..5).filter_map(|_| transform.press(1.0)).collect();
        assert_eq!(seen, vec![0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn release_does_not_move_the_cursor() {
        let mut transform = stepped(&[0.0, 0.5, 1.0]);
        assert_eq!(transform.press(0.0), None);
        assert_eq!(transform.stepped_index, 0);
    }

    #[test]
    fn relative_steps_clamp_without_wrapping() {
        let mut transform = stepped(&[0.0, 0.5, 1.0]);
        assert_eq!(transform.step(-1.0), Some(0.0));
        assert_eq!(transform.step(1.0), Some(0.5));
        assert_eq!(transform.step(1.0), Some(1.0));
        assert_eq!(transform.step(1.0), Some(1.0));
    }

    #[test]
    fn four_ticks_advance_once_and_reverse_ticks_decay() {
        let mut transform = stepped(&[0.0, 0.25, 0.5, 0.75]);
        transform.accelerated_ticks = vec![4];

        assert_eq!(transform.accelerated_step(0, 1.0), None);
        assert_eq!(transform.accelerated_step(0, 1.0), None);
        assert_eq!(transform.accelerated_step(0, 1.0), None);
        assert_eq!(transform.accelerated_step(0, 1.0), Some(0.25));
        assert_eq!(transform.accumulated_inc_ticks, 0);

        transform.accelerated_step(0, 1.0);
        transform.accelerated_step(0, 1.0);
        transform.accelerated_step(0, -1.0);
        assert_eq!(transform.accumulated_inc_ticks, 1);
        assert_eq!(transform.accumulated_dec_ticks, 1);
    }

    #[test]
    fn acceleration_index_is_clamped_to_the_table() {
        let mut transform = stepped(&[0.0, 1.0]);
        transform.accelerated_ticks = vec![3, 1];
        assert_eq!(transform.accelerated_step(9, 1.0), Some(1.0));

        let continuous = ValueTransform {
            accelerated_deltas: vec![0.01, 0.1],
            ..ValueTransform::default()
        };
        assert!((continuous.accelerated_delta(0.5, -3, 1.0) - 0.51).abs() < 1e-9);
        assert!((continuous.accelerated_delta(0.5, 7, -1.0) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn clamp_respects_range() {
        let mut transform = ValueTransform::default();
        transform.set_range(-144.0, 24.0);
        assert_eq!(transform.clamp(100.0), 24.0);
        assert_eq!(transform.clamp(-200.0), -144.0);
        assert_eq!(transform.clamp(-6.0), -6.0);
    }

    #[test]
    fn relative_uses_configured_delta_sign_only() {
        let mut transform = ValueTransform::default();
        assert!((transform.relative(0.5, 0.2) - 0.7).abs() < 1e-9);
        transform.delta = 0.01;
        assert!((transform.relative(0.5, -0.2) - 0.49).abs() < 1e-9);
    }

    #[test]
    fn sync_picks_nearest_entry() {
        let mut transform = stepped(&[0.0, 0.33, 0.66, 1.0]);
        transform.sync_to(0.7);
        assert_eq!(transform.stepped_index, 2);
    }

    #[test]
    fn parses_hex_and_triple_colors() {
        let spec = ColorSpec::parse(&params("Play Play { #FF0000 #00ff0080 }"));
        assert_eq!(
            spec.values,
            vec![Rgba::rgb(255, 0, 0), Rgba { r: 0, g: 255, b: 0, a: 128 }]
        );

        let spec = ColorSpec::parse(&params("{ 0 0 0 300 12 7 }"));
        assert_eq!(spec.values, vec![Rgba::rgb(0, 0, 0), Rgba::rgb(255, 12, 7)]);
        assert_eq!(spec.for_value(0.0), Some(Rgba::rgb(0, 0, 0)));
        assert_eq!(spec.for_value(0.3), Some(Rgba::rgb(255, 12, 7)));
    }

    #[test]
    fn track_color_and_incomplete_triples() {
        assert!(ColorSpec::parse(&params("{ Track }")).track);
        assert!(ColorSpec::parse(&params("{ 1 2 }")).is_empty());
        assert!(Rgba::from_hex("#GG0000").is_none());
    }
}
