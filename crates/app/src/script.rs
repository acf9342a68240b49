//! Scripted host used by `simulate`: a recording action table, a resolver
//! over a toy track list, and the line-oriented input script format.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use surface_integrator_core::lexer::{clean_line, tokenize};
use surface_integrator_core::{
    Action, Feedback, FocusedFx, Gesture, Invocation, Navigator, Page, Result, SurfaceError,
    TargetHandle, TargetResolver,
};

const MASTER: u64 = 0;

/// Remembers every value the surfaces set and reports it back as feedback.
#[derive(Debug, Default)]
pub struct ScriptHost {
    selected: Cell<Option<u64>>,
    focused: RefCell<Option<FocusedFx>>,
    chains: RefCell<BTreeMap<u64, Vec<String>>>,
    values: RefCell<HashMap<String, f64>>,
}

impl ScriptHost {
    fn key(invocation: &Invocation<'_>) -> String {
        format!(
            "{}:{:?}:{:?}",
            invocation.action,
            invocation.target.map(|target| target.0),
            invocation.param_index
        )
    }

    fn label(target: Option<TargetHandle>) -> String {
        match target {
            Some(TargetHandle(MASTER)) => "Master".to_string(),
            Some(TargetHandle(track)) => format!("Track {track}"),
            None => String::new(),
        }
    }
}

impl TargetResolver for ScriptHost {
    fn resolve(&self, navigator: Navigator) -> Option<TargetHandle> {
        match navigator {
            Navigator::Track { channel } => Some(TargetHandle(u64::from(channel))),
            Navigator::SelectedTrack => self.selected.get().map(TargetHandle),
            Navigator::MasterTrack => Some(TargetHandle(MASTER)),
            Navigator::FocusedFx => self.focused.borrow().as_ref().map(|fx| fx.target),
        }
    }

    fn focused_fx(&self) -> Option<FocusedFx> {
        self.focused.borrow().clone()
    }

    fn fx_names(&self, target: TargetHandle) -> Vec<String> {
        self.chains.borrow().get(&target.0).cloned().unwrap_or_default()
    }
}

/// Fallback action: prints what ran and stores the value.
pub struct ConsoleAction(pub Rc<ScriptHost>);

impl Action for ConsoleAction {
    fn perform(&self, invocation: &Invocation<'_>, value: f64) {
        println!(
            "  {} {} [{}] = {value:.3}",
            invocation.zone,
            invocation.action,
            ScriptHost::label(invocation.target)
        );
        self.0.values.borrow_mut().insert(ScriptHost::key(invocation), value);
    }

    fn touch(&self, invocation: &Invocation<'_>, value: f64) {
        println!("  {} {} touch {value}", invocation.zone, invocation.action);
    }

    fn current_normalized_value(&self, invocation: &Invocation<'_>) -> f64 {
        self.0
            .values
            .borrow()
            .get(&ScriptHost::key(invocation))
            .copied()
            .unwrap_or(0.0)
    }

    fn feedback(&self, invocation: &Invocation<'_>) -> Option<Feedback> {
        match invocation.action {
            "TrackNameDisplay" => Some(Feedback::Text(ScriptHost::label(invocation.target))),
            "FXParamValueDisplay" => {
                let key = format!(
                    "FXParam:{:?}:{:?}",
                    invocation.target.map(|target| target.0),
                    invocation.param_index
                );
                let value = self.0.values.borrow().get(&key).copied().unwrap_or(0.0);
                Some(Feedback::Text(format!("{value:.2}")))
            }
            _ => Some(Feedback::Value(self.current_normalized_value(invocation))),
        }
    }
}

/// Replays `script` against `page`, printing the feedback after each line.
pub fn run(page: &mut Page, host: &ScriptHost, script: &str, source: &Path) -> Result<()> {
    let start = Instant::now();
    let mut elapsed = Duration::ZERO;

    for (index, raw) in script.lines().enumerate() {
        let Some(line) = clean_line(raw) else {
            continue;
        };
        let line_number = index + 1;
        let tokens = tokenize(line);
        let bad = |message: &str| SurfaceError::parse(source, line_number, message);
        println!("> {line}");

        match tokens[0].as_str() {
            "tick" => {
                let millis = match tokens.get(1) {
                    Some(token) => token.parse::<u64>().map_err(|_| bad("tick takes milliseconds"))?,
                    None => 0,
                };
                elapsed += Duration::from_millis(millis);
                page.request_update(host, start + elapsed);
            }
            "select" => {
                let track = tokens
                    .get(1)
                    .and_then(|token| token.parse::<u64>().ok())
                    .ok_or_else(|| bad("select takes a track number"))?;
                host.selected.set(Some(track));
                page.on_track_selection(host, start + elapsed);
            }
            "deselect" => {
                host.selected.set(None);
                page.on_track_deselection(host, start + elapsed);
            }
            "chain" => {
                let track = tokens
                    .get(1)
                    .and_then(|token| token.parse::<u64>().ok())
                    .ok_or_else(|| bad("chain takes a track number and effect names"))?;
                host.chains.borrow_mut().insert(track, tokens[2..].to_vec());
            }
            "focus" => {
                let (Some(track), Some(slot), Some(name)) = (
                    tokens.get(1).and_then(|token| token.parse::<u64>().ok()),
                    tokens.get(2).and_then(|token| token.parse::<usize>().ok()),
                    tokens.get(3),
                ) else {
                    return Err(bad("focus takes a track, a slot and an effect name"));
                };
                *host.focused.borrow_mut() = Some(FocusedFx {
                    target: TargetHandle(track),
                    slot,
                    name: name.clone(),
                });
            }
            "unfocus" => *host.focused.borrow_mut() = None,
            verb => {
                let gesture = gesture(verb, &tokens[1..]).ok_or_else(|| bad("unrecognised input line"))?;
                let target = &tokens[1];
                let (surface, widget) = match target.split_once('/') {
                    Some((surface, widget)) => {
                        let index = page
                            .surface_index(surface)
                            .ok_or_else(|| bad("no such surface on the page"))?;
                        (index, widget)
                    }
                    None => (0, target.as_str()),
                };
                if !page.handle_input(surface, widget, gesture, host, start + elapsed) {
                    println!("  (unclaimed)");
                }
            }
        }

        for (surface, event) in page.drain_feedback() {
            println!("  {surface} <- {event:?}");
        }
    }

    Ok(())
}

fn number(token: Option<&String>) -> Option<f64> {
    token.and_then(|token| token.parse().ok())
}

/// `press W [value]`, `release W`, `turn W delta`, `accel W index delta`,
/// `touch W value`.
fn gesture(verb: &str, args: &[String]) -> Option<Gesture> {
    args.first()?;
    match verb {
        "press" => Some(Gesture::Press(number(args.get(1)).unwrap_or(1.0))),
        "release" => Some(Gesture::Press(0.0)),
        "turn" => Some(Gesture::Relative(number(args.get(1))?)),
        "accel" => Some(Gesture::Accelerated {
            index: args.get(1)?.parse().ok()?,
            delta: number(args.get(2))?,
        }),
        "touch" => Some(Gesture::Touch(number(args.get(1)).unwrap_or(1.0))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn script_verbs_map_to_gestures() {
        assert_eq!(gesture("press", &args(&["Play"])), Some(Gesture::Press(1.0)));
        assert_eq!(gesture("release", &args(&["Play"])), Some(Gesture::Press(0.0)));
        assert_eq!(gesture("turn", &args(&["Rotary1", "-0.1"])), Some(Gesture::Relative(-0.1)));
        assert_eq!(
            gesture("accel", &args(&["Rotary1", "3", "1"])),
            Some(Gesture::Accelerated { index: 3, delta: 1.0 })
        );
        assert_eq!(gesture("turn", &args(&["Rotary1"])), None);
        assert_eq!(gesture("press", &[]), None);
        assert_eq!(gesture("wiggle", &args(&["Play"])), None);
    }

    #[test]
    fn resolver_follows_selection_and_focus() {
        let host = ScriptHost::default();
        assert_eq!(host.resolve(Navigator::SelectedTrack), None);
        host.selected.set(Some(4));
        assert_eq!(host.resolve(Navigator::SelectedTrack), Some(TargetHandle(4)));
        assert_eq!(host.resolve(Navigator::Track { channel: 2 }), Some(TargetHandle(2)));

        host.chains.borrow_mut().insert(4, args(&["ReaEQ", "ReaComp"]));
        assert_eq!(host.fx_name(TargetHandle(4), 1).as_deref(), Some("ReaComp"));
        assert_eq!(host.fx_name(TargetHandle(4), 2), None);
    }
}
