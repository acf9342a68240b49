//! Zone file parsing into binding templates.
//!
//! A zone file holds one `Zone <name> [<alias>]` ... `ZoneEnd` block. Inside
//! it are `IncludedZones`, `SubZones` and `AssociatedZones` lists, binding
//! lines of the form `<widget>[+<modifier>...] <Action> [params...]` and
//! `...Property` continuation lines that attach to the binding above them.
//! Files whose body starts with `FXParams` use the column-aligned FX table
//! form instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::lexer::{clean_line, expand_wildcard, tokenize};
use crate::modifiers::{ModifierManager, TOGGLE_OFFSET, TOUCH_OFFSET};
use crate::values::Rgba;
use crate::{Result, SurfaceError};

/// One binding line, before it is bound to concrete widgets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionTemplate {
    pub widget: String,
    /// Segments of the specifier that could name the widget, in order.
    pub candidates: Vec<String>,
    pub modifier: u32,
    pub action: String,
    /// Tokens after the action name.
    pub params: Vec<String>,
    /// Parameter lists of the `...Property` lines that followed.
    pub properties: Vec<Vec<String>>,
    pub invert_feedback: bool,
    pub hold: bool,
    pub increase: bool,
    pub decrease: bool,
}

/// Decoded `<widget>[+<segment>...]` specifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WidgetSpec {
    pub widget: String,
    pub candidates: Vec<String>,
    pub modifier: u32,
    pub invert_feedback: bool,
    pub hold: bool,
    pub increase: bool,
    pub decrease: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Touch,
    Toggle,
    Modifier(u32),
    InvertFeedback,
    Hold,
    Increase,
    Decrease,
    Name,
}

fn classify(segment: &str, vocabulary: &ModifierManager) -> Segment {
    if segment.contains("Touch") {
        return Segment::Touch;
    }
    match segment {
        "Toggle" => Segment::Toggle,
        "InvertFB" => Segment::InvertFeedback,
        "Hold" => Segment::Hold,
        "Increase" => Segment::Increase,
        "Decrease" => Segment::Decrease,
        other => vocabulary
            .weight_of(other)
            .map_or(Segment::Name, Segment::Modifier),
    }
}

/// Splits on `+`. The widget is the last segment that is not a keyword (or
/// the last segment when all of them are); keywords contribute their modifier
/// weight or flag. Earlier non-keyword segments stay in `candidates` so the
/// builder can fall back to one of them when the surface has no widget by the
/// preferred name.
pub fn parse_widget_spec(spec: &str, vocabulary: &ModifierManager) -> WidgetSpec {
    let segments: Vec<&str> = spec.split('+').collect();
    let classes: Vec<Segment> = segments
        .iter()
        .map(|segment| classify(segment, vocabulary))
        .collect();

    let widget_index = classes
        .iter()
        .rposition(|class| *class == Segment::Name)
        .unwrap_or(segments.len() - 1);

    let candidates = segments
        .iter()
        .zip(&classes)
        .enumerate()
        .filter(|(index, (_, class))| *index == widget_index || **class == Segment::Name)
        .map(|(_, (segment, _))| segment.to_string())
        .collect();

    let mut decoded = WidgetSpec {
        widget: segments[widget_index].to_string(),
        candidates,
        ..WidgetSpec::default()
    };

    for (index, class) in classes.into_iter().enumerate() {
        if index == widget_index {
            continue;
        }
        match class {
            Segment::Touch => decoded.modifier += TOUCH_OFFSET,
            Segment::Toggle => decoded.modifier += TOGGLE_OFFSET,
            Segment::Modifier(weight) => decoded.modifier += weight,
            Segment::InvertFeedback => decoded.invert_feedback = true,
            Segment::Hold => decoded.hold = true,
            Segment::Increase => decoded.increase = true,
            Segment::Decrease => decoded.decrease = true,
            Segment::Name => {}
        }
    }

    decoded
}

/// Modifier code of a bare `Shift+Touch`-style specifier with no widget.
pub fn modifier_code(spec: &str, vocabulary: &ModifierManager) -> u32 {
    spec.split('+')
        .map(|segment| match classify(segment, vocabulary) {
            Segment::Touch => TOUCH_OFFSET,
            Segment::Toggle => TOGGLE_OFFSET,
            Segment::Modifier(weight) => weight,
            _ => 0,
        })
        .sum()
}

/// Templates grouped by widget name, then by modifier code.
pub type BindingTable = BTreeMap<String, BTreeMap<u32, Vec<ActionTemplate>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneDefinition {
    pub name: String,
    pub alias: Option<String>,
    pub source: PathBuf,
    pub included: Vec<String>,
    pub sub_zones: Vec<String>,
    pub associated: Vec<String>,
    pub body: ZoneBody,
}

impl ZoneDefinition {
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoneBody {
    Bindings(BindingTable),
    FxParams(FxParamTable),
}

/// Column-aligned FX parameter shorthand. Per-parameter overrides are keyed
/// by parameter number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FxParamTable {
    pub rows: Vec<FxParamRow>,
    pub default_acceleration: Vec<f64>,
    pub acceleration: BTreeMap<i32, Vec<f64>>,
    pub ranges: BTreeMap<i32, (f64, f64)>,
    pub step_sizes: BTreeMap<i32, f64>,
    pub step_values: BTreeMap<i32, Vec<f64>>,
    pub tick_counts: BTreeMap<i32, Vec<u32>>,
    pub colors: BTreeMap<i32, Vec<Rgba>>,
    pub widget_modes: BTreeMap<i32, String>,
}

/// One `FXParams` line and the widget lines that follow it. Widget columns
/// hold raw names; a single `|` template is expanded against the row width.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FxParamRow {
    pub params: Vec<i32>,
    pub names: Vec<String>,
    pub value_widgets: Vec<String>,
    pub name_displays: Vec<String>,
    pub value_displays: Vec<String>,
    /// The single `FXWidgetModifiers` token, applied to every column.
    pub modifier: Option<String>,
}

/// Reads just the `Zone <name> [<alias>]` header from the first meaningful
/// line, as done when indexing a folder.
pub fn read_zone_header(text: &str) -> Option<(String, Option<String>)> {
    let line = text.lines().find_map(clean_line)?;
    let tokens = tokenize(line);
    if tokens.len() > 1 && tokens[0] == "Zone" {
        Some((tokens[1].clone(), tokens.get(2).cloned()))
    } else {
        None
    }
}

/// Expands a widget line to `count` names: already `count` wide, or one
/// `|` template repeated for channels `1..=count`.
pub fn expand_widget_line(tokens: &[String], count: usize) -> Option<Vec<String>> {
    if tokens.len() == count {
        return Some(tokens.to_vec());
    }
    if tokens.len() != 1 {
        return None;
    }
    Some(
        (1..=count)
            .map(|channel| expand_wildcard(&tokens[0], channel as u32))
            .collect(),
    )
}

/// Parses the first zone in `text`.
pub fn parse_zone_text(
    text: &str,
    source: &Path,
    vocabulary: &ModifierManager,
) -> Result<ZoneDefinition> {
    let lines: Vec<(usize, Vec<String>)> = text
        .lines()
        .enumerate()
        .filter_map(|(index, raw)| clean_line(raw).map(|line| (index + 1, tokenize(line))))
        .filter(|(_, tokens)| !tokens.is_empty())
        .collect();

    if lines.iter().any(|(_, tokens)| tokens[0] == "FXParams") {
        parse_fx_zone(&lines, source)
    } else {
        parse_binding_zone(&lines, source, vocabulary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Body,
    Included,
    SubZones,
    Associated,
}

fn parse_header(tokens: &[String], source: &Path, line: usize) -> Result<(String, Option<String>)> {
    match tokens.get(1) {
        Some(name) if !name.is_empty() => Ok((name.clone(), tokens.get(2).cloned())),
        _ => Err(SurfaceError::parse(source, line, "Zone needs a name")),
    }
}

fn parse_binding_zone(
    lines: &[(usize, Vec<String>)],
    source: &Path,
    vocabulary: &ModifierManager,
) -> Result<ZoneDefinition> {
    let mut header = None;
    let mut section = Section::Body;
    let mut included = Vec::new();
    let mut sub_zones = Vec::new();
    let mut associated = Vec::new();
    let mut bindings = BindingTable::new();
    let mut last_binding: Option<(String, u32)> = None;
    let mut last_line = 0;

    for (line, tokens) in lines {
        last_line = *line;
        let keyword = tokens[0].as_str();

        match keyword {
            "Zone" => {
                if header.is_some() {
                    return Err(SurfaceError::parse(source, *line, "nested Zone"));
                }
                header = Some(parse_header(tokens, source, *line)?);
            }
            "ZoneEnd" => {
                let Some((name, alias)) = header else {
                    return Err(SurfaceError::parse(source, *line, "ZoneEnd without Zone"));
                };
                return Ok(ZoneDefinition {
                    name,
                    alias,
                    source: source.to_path_buf(),
                    included,
                    sub_zones,
                    associated,
                    body: ZoneBody::Bindings(bindings),
                });
            }
            "IncludedZones" => section = Section::Included,
            "SubZones" => section = Section::SubZones,
            "AssociatedZones" => section = Section::Associated,
            "IncludedZonesEnd" | "SubZonesEnd" | "AssociatedZonesEnd" => section = Section::Body,
            _ if section == Section::Included => included.push(tokens[0].clone()),
            _ if section == Section::SubZones => sub_zones.push(tokens[0].clone()),
            _ if section == Section::Associated => associated.push(tokens[0].clone()),
            _ if tokens.len() < 2 => {
                tracing::warn!(path = %source.display(), line, token = keyword, "binding without an action");
            }
            _ if keyword.contains("Property") => {
                let attached = last_binding.as_ref().and_then(|(widget, modifier)| {
                    bindings
                        .get_mut(widget)
                        .and_then(|by_modifier| by_modifier.get_mut(modifier))
                        .and_then(|templates| templates.last_mut())
                });
                match attached {
                    Some(template) => template.properties.push(tokens[1..].to_vec()),
                    None => {
                        tracing::debug!(path = %source.display(), line, "property with no binding above it")
                    }
                }
            }
            _ => {
                let spec = parse_widget_spec(keyword, vocabulary);
                let template = ActionTemplate {
                    widget: spec.widget.clone(),
                    candidates: spec.candidates.clone(),
                    modifier: spec.modifier,
                    action: tokens[1].clone(),
                    params: tokens[2..].to_vec(),
                    properties: Vec::new(),
                    invert_feedback: spec.invert_feedback,
                    hold: spec.hold,
                    increase: spec.increase,
                    decrease: spec.decrease,
                };
                bindings
                    .entry(spec.widget.clone())
                    .or_default()
                    .entry(spec.modifier)
                    .or_default()
                    .push(template);
                last_binding = Some((spec.widget, spec.modifier));
            }
        }
    }

    Err(SurfaceError::parse(source, last_line, "missing ZoneEnd"))
}

fn number<T: std::str::FromStr>(token: &str, source: &Path, line: usize) -> Result<T> {
    token
        .parse()
        .map_err(|_| SurfaceError::parse(source, line, format!("bad number `{token}`")))
}

fn numbers<T: std::str::FromStr>(tokens: &[String], source: &Path, line: usize) -> Result<Vec<T>> {
    tokens.iter().map(|token| number(token, source, line)).collect()
}

fn tick(token: &str, source: &Path, line: usize) -> Result<u32> {
    let value: f64 = number(token, source, line)?;
    Ok(if value > 0.0 { value as u32 } else { 0 })
}

fn parse_fx_zone(lines: &[(usize, Vec<String>)], source: &Path) -> Result<ZoneDefinition> {
    let mut header = None;
    let mut table = FxParamTable::default();
    let mut last_line = 0;

    for (line, tokens) in lines {
        let line = *line;
        last_line = line;
        let keyword = tokens[0].as_str();

        if tokens.len() == 1 {
            if keyword == "ZoneEnd" {
                let Some((name, alias)) = header else {
                    return Err(SurfaceError::parse(source, line, "ZoneEnd without Zone"));
                };
                return Ok(ZoneDefinition {
                    name,
                    alias,
                    source: source.to_path_buf(),
                    included: Vec::new(),
                    sub_zones: Vec::new(),
                    associated: Vec::new(),
                    body: ZoneBody::FxParams(table),
                });
            }
            if keyword == "Zone" {
                return Err(SurfaceError::parse(source, line, "Zone needs a name"));
            }
            continue;
        }

        let rest = &tokens[1..];

        match keyword {
            "Zone" => header = Some(parse_header(tokens, source, line)?),
            "FXParams" => table.rows.push(FxParamRow {
                params: numbers(rest, source, line)?,
                ..FxParamRow::default()
            }),
            "DefaultAcceleration" => table.default_acceleration = numbers(rest, source, line)?,
            "FXParamNames" | "FXValueWidgets" | "FXParamNameDisplays" | "FXParamValueDisplays"
            | "FXWidgetModifiers" => {
                let Some(row) = table.rows.last_mut() else {
                    tracing::warn!(path = %source.display(), line, keyword, "FX row line before FXParams");
                    continue;
                };
                match keyword {
                    "FXParamNames" => row.names = rest.to_vec(),
                    "FXValueWidgets" => row.value_widgets = rest.to_vec(),
                    "FXParamNameDisplays" => row.name_displays = rest.to_vec(),
                    "FXParamValueDisplays" => row.value_displays = rest.to_vec(),
                    _ => row.modifier = Some(rest[0].clone()),
                }
            }
            "FXParamAcceleration" | "FXParamRange" | "FXParamStepSize" | "FXParamStepValues"
            | "FXParamTickCounts" | "FXParamColors" | "FXWidgetModes" => {
                if tokens.len() < 3 {
                    tracing::warn!(path = %source.display(), line, keyword, "missing parameter values");
                    continue;
                }
                let param: i32 = number(&tokens[1], source, line)?;
                let values = &tokens[2..];
                match keyword {
                    "FXParamAcceleration" => {
                        table.acceleration.insert(param, numbers(values, source, line)?);
                    }
                    "FXParamRange" => {
                        let range: Vec<f64> = numbers(values, source, line)?;
                        if range.len() < 2 {
                            return Err(SurfaceError::parse(source, line, "range needs two values"));
                        }
                        let (first, second) = (range[0], range[1]);
                        let ordered = if second > first { (first, second) } else { (second, first) };
                        table.ranges.insert(param, ordered);
                    }
                    "FXParamStepSize" => {
                        table.step_sizes.insert(param, number(&values[0], source, line)?);
                    }
                    "FXParamStepValues" => {
                        table.step_values.insert(param, numbers(values, source, line)?);
                    }
                    "FXParamTickCounts" => {
                        let ticks = values
                            .iter()
                            .map(|token| tick(token, source, line))
                            .collect::<Result<Vec<_>>>()?;
                        table.tick_counts.insert(param, ticks);
                    }
                    "FXParamColors" => {
                        let colors = values.iter().filter_map(|token| Rgba::from_hex(token)).collect();
                        table.colors.insert(param, colors);
                    }
                    _ => {
                        table.widget_modes.insert(param, values[0].clone());
                    }
                }
            }
            _ => tracing::debug!(path = %source.display(), line, keyword, "unknown FX table line"),
        }
    }

    Err(SurfaceError::parse(source, last_line, "missing ZoneEnd"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> ModifierManager {
        ModifierManager::default()
    }

    fn parse(text: &str) -> Result<ZoneDefinition> {
        parse_zone_text(text, Path::new("Test.zon"), &vocabulary())
    }

    fn bindings(definition: &ZoneDefinition) -> &BindingTable {
        match &definition.body {
            ZoneBody::Bindings(table) => table,
            ZoneBody::FxParams(_) => panic!("expected a binding zone"),
        }
    }

    #[test]
    fn widget_first_then_modifier() {
        let spec = parse_widget_spec("Fader1+Shift", &vocabulary());
        assert_eq!(spec.widget, "Fader1");
        assert_eq!(spec.modifier, 4);
    }

    #[test]
    fn modifier_first_then_widget() {
        let spec = parse_widget_spec("Shift+Control+Fader1", &vocabulary());
        assert_eq!(spec.widget, "Fader1");
        assert_eq!(spec.modifier, 20);
    }

    #[test]
    fn touch_toggle_and_flags() {
        let spec = parse_widget_spec("FaderTouch+Toggle+Hold+InvertFB+Decrease+Fader2", &vocabulary());
        assert_eq!(spec.widget, "Fader2");
        assert_eq!(spec.modifier, TOUCH_OFFSET + TOGGLE_OFFSET);
        assert!(spec.hold && spec.invert_feedback && spec.decrease);
        assert!(!spec.increase);
    }

    #[test]
    fn unknown_segments_are_ignored() {
        let spec = parse_widget_spec("Play+Nothing", &vocabulary());
        assert_eq!(spec.widget, "Nothing");
        assert_eq!(spec.candidates, vec!["Play", "Nothing"]);
        assert_eq!(spec.modifier, 0);
        let spec = parse_widget_spec("Nothing+Shift", &vocabulary());
        assert_eq!(spec.widget, "Nothing");
        assert_eq!(spec.candidates, vec!["Nothing"]);
        assert_eq!(spec.modifier, 4);
    }

    #[test]
    fn last_unknown_segment_names_the_widget() {
        let spec = parse_widget_spec("Foo+Fader1", &vocabulary());
        assert_eq!(spec.widget, "Fader1");
        assert_eq!(spec.modifier, 0);

        let spec = parse_widget_spec("Shift+Foo+Fader1", &vocabulary());
        assert_eq!(spec.widget, "Fader1");
        assert_eq!(spec.candidates, vec!["Foo", "Fader1"]);
        assert_eq!(spec.modifier, 4);
    }

    #[test]
    fn all_keyword_specifier_falls_back_to_last_segment() {
        let spec = parse_widget_spec("Shift+Hold", &vocabulary());
        assert_eq!(spec.widget, "Hold");
        assert_eq!(spec.candidates, vec!["Hold"]);
        assert_eq!(spec.modifier, 4);
        assert!(!spec.hold);
    }

    #[test]
    fn touch_named_widget_alone() {
        let spec = parse_widget_spec("FaderTouch1", &vocabulary());
        assert_eq!(spec.widget, "FaderTouch1");
        assert_eq!(spec.modifier, 0);
    }

    #[test]
    fn bare_modifier_codes() {
        assert_eq!(modifier_code("Shift+Touch", &vocabulary()), 5);
        assert_eq!(modifier_code("Nothing", &vocabulary()), 0);
    }

    #[test]
    fn parses_binding_line_with_modifier() {
        let definition = parse("Zone Home\nFader1+Shift TrackVolume\nZoneEnd\n").unwrap();
        let table = bindings(&definition);
        let template = &table["Fader1"][&4][0];
        assert_eq!(template.widget, "Fader1");
        assert_eq!(template.modifier, 4);
        assert_eq!(template.action, "TrackVolume");
        assert!(template.params.is_empty());
    }

    #[test]
    fn parses_sections_alias_and_properties() {
        let text = r#"
            // Home zone for the test surface
            Zone Home "Main Home"
                IncludedZones
                    Buttons
                    Track
                IncludedZonesEnd
                AssociatedZones
                    VCA
                    Folder
                AssociatedZonesEnd
                SubZones
                    Sends
                SubZonesEnd
                Display1 TrackNameDisplay
                    DisplayProperty NoFeedback
                    DisplayProperty Font 2
                Rotary1 TrackPan [ (0.01) ]
            ZoneEnd
            Zone Ignored
            ZoneEnd
        "#;
        let definition = parse(text).unwrap();

        assert_eq!(definition.name, "Home");
        assert_eq!(definition.display_name(), "Main Home");
        assert_eq!(definition.included, vec!["Buttons", "Track"]);
        assert_eq!(definition.associated, vec!["VCA", "Folder"]);
        assert_eq!(definition.sub_zones, vec!["Sends"]);

        let table = bindings(&definition);
        let display = &table["Display1"][&0][0];
        assert_eq!(
            display.properties,
            vec![vec!["NoFeedback".to_string()], vec!["Font".into(), "2".into()]]
        );
        assert_eq!(table["Rotary1"][&0][0].params, vec!["[", "(0.01)", "]"]);
    }

    #[test]
    fn repeated_bindings_accumulate() {
        let definition = parse("Zone Home\nPlay Play\nPlay Stop\nZoneEnd").unwrap();
        assert_eq!(bindings(&definition)["Play"][&0].len(), 2);
    }

    #[test]
    fn missing_zone_end_is_an_error() {
        let err = parse("Zone Home\nPlay Play\n").unwrap_err();
        assert!(matches!(err, SurfaceError::Parse { line: 2, .. }));
    }

    #[test]
    fn nameless_zone_is_an_error() {
        assert!(parse("Zone\nZoneEnd").is_err());
    }

    #[test]
    fn header_is_read_from_first_line_only() {
        assert_eq!(
            read_zone_header("// c\nZone \"VST: ReaEQ (Cockos)\" EQ\nPlay Play\n"),
            Some(("VST: ReaEQ (Cockos)".to_string(), Some("EQ".to_string())))
        );
        assert_eq!(read_zone_header("Play Play\nZone Home\n"), None);
    }

    #[test]
    fn widget_lines_expand_or_fail() {
        let line = vec!["Rotary|".to_string()];
        assert_eq!(
            expand_widget_line(&line, 3),
            Some(vec!["Rotary1".into(), "Rotary2".into(), "Rotary3".into()])
        );
        let line: Vec<String> = vec!["A".into(), "B".into()];
        assert_eq!(expand_widget_line(&line, 3), None);
        assert_eq!(expand_widget_line(&line, 2), Some(line.clone()));
    }

    #[test]
    fn parses_fx_table() {
        let text = r#"
            Zone "VST: ReaComp (Cockos)" Comp
                FXParams 0 1 -1
                FXParamNames Thresh Ratio None
                FXValueWidgets Rotary|
                FXParamNameDisplays DisplayUpper|
                FXParamValueDisplays DisplayLower|
                FXWidgetModifiers Shift
                DefaultAcceleration 0.001 0.01
                FXParamRange 0 1.0 0.25
                FXParamStepSize 1 0.05
                FXParamStepValues 1 0.0 0.5 1.0
                FXParamTickCounts 1 8 4
                FXParamColors 0 #FF0000 #00FF00
                FXWidgetModes 0 Dot
            ZoneEnd
        "#;
        let definition = parse(text).unwrap();
        assert_eq!(definition.name, "VST: ReaComp (Cockos)");

        let ZoneBody::FxParams(table) = &definition.body else {
            panic!("expected FX table");
        };
        let row = &table.rows[0];
        assert_eq!(row.params, vec![0, 1, -1]);
        assert_eq!(row.names, vec!["Thresh", "Ratio", "None"]);
        assert_eq!(row.value_widgets, vec!["Rotary|"]);
        assert_eq!(row.modifier.as_deref(), Some("Shift"));
        assert_eq!(table.default_acceleration, vec![0.001, 0.01]);
        assert_eq!(table.ranges[&0], (0.25, 1.0));
        assert_eq!(table.step_sizes[&1], 0.05);
        assert_eq!(table.step_values[&1], vec![0.0, 0.5, 1.0]);
        assert_eq!(table.tick_counts[&1], vec![8, 4]);
        assert_eq!(table.colors[&0].len(), 2);
        assert_eq!(table.widget_modes[&0], "Dot");
    }

    #[test]
    fn malformed_fx_number_reports_line() {
        let err = parse("Zone FX\nFXParams 0 x\nZoneEnd").unwrap_err();
        match err {
            SurfaceError::Parse { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains('x'));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
