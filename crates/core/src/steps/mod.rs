//! Step-size files: the discrete values a stepped effect parameter can take.
//!
//! A file starts with `StepSizes "<zone display name>"` followed by one
//! `<param> <step0> <step1> ...` line per parameter. Files are indexed by
//! header during preprocessing and parsed the first time a zone asks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::lexer::{clean_line, tokenize};
use crate::{Result, SurfaceError};

pub const STEP_FILE_EXTENSION: &str = "stp";

/// Parameter index to its stepped values.
pub type StepTable = BTreeMap<usize, Vec<f64>>;

/// Probes issued per parameter while calibrating, evenly spaced over `[0, 1]`.
pub const CALIBRATION_PROBES: usize = 101;
/// Parameters that settle on more distinct values than this are continuous.
pub const MAX_CALIBRATED_STEPS: usize = 29;

const FORBIDDEN_FILE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, PartialEq)]
pub struct StepSizeFile {
    pub zone: String,
    pub steps: StepTable,
}

/// Every file under `dir` with `extension`, recursively, in path order. A
/// missing directory yields nothing.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    if dir.is_dir() {
        collect_files(dir, extension, &mut found)?;
    }
    found.sort();
    Ok(found)
}

fn collect_files(dir: &Path, extension: &str, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, extension, found)?;
        } else if path.extension().map_or(false, |ext| ext == extension) {
            found.push(path);
        }
    }
    Ok(())
}

/// Zone name from the `StepSizes` header, if the first meaningful line is one.
pub fn read_step_header(text: &str) -> Option<String> {
    let line = text.lines().find_map(clean_line)?;
    let tokens = tokenize(line);
    match tokens.as_slice() {
        [keyword, zone, ..] if keyword == "StepSizes" => Some(zone.clone()),
        _ => None,
    }
}

pub fn parse_step_sizes(text: &str, source: &Path) -> Result<StepSizeFile> {
    let mut zone: Option<String> = None;
    let mut steps = StepTable::new();

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let Some(line) = clean_line(raw) else {
            continue;
        };
        let tokens = tokenize(line);

        if tokens[0] == "StepSizes" {
            match tokens.get(1) {
                Some(name) => zone = Some(name.clone()),
                None => {
                    return Err(SurfaceError::parse(source, line_number, "StepSizes needs a zone name"))
                }
            }
            continue;
        }

        if zone.is_none() {
            return Err(SurfaceError::parse(
                source,
                line_number,
                "step values before the StepSizes header",
            ));
        }

        let param: usize = tokens[0].parse().map_err(|_| {
            SurfaceError::parse(
                source,
                line_number,
                format!("`{}` is not a parameter number", tokens[0]),
            )
        })?;

        let values = tokens[1..]
            .iter()
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    SurfaceError::parse(source, line_number, format!("`{token}` is not a step value"))
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if values.len() < 2 {
            tracing::debug!(path = %source.display(), line = line_number, param, "too few steps, skipped");
            continue;
        }
        steps.insert(param, values);
    }

    let zone = zone.ok_or_else(|| SurfaceError::parse(source, 1, "missing StepSizes header"))?;
    Ok(StepSizeFile { zone, steps })
}

pub fn render_step_sizes(zone: &str, steps: &StepTable) -> String {
    let mut out = format!("StepSizes \"{zone}\"\n");
    for (param, values) in steps {
        out.push_str(&param.to_string());
        for value in values {
            out.push_str(&format!(" {value:.6}"));
        }
        out.push('\n');
    }
    out
}

/// Replaces characters most filesystems reject with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_FILE_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Writes `<folder>/<sanitised zone>.stp` and returns its path.
pub fn write_step_sizes(folder: &Path, zone: &str, steps: &StepTable) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let path = folder.join(format!("{}.{STEP_FILE_EXTENSION}", sanitize_file_name(zone)));
    fs::write(&path, render_step_sizes(zone, steps))?;
    Ok(path)
}

/// Host side of a calibration run.
pub trait ParameterSweep {
    /// Instantiates the effect for probing; `false` when the host cannot.
    fn open(&mut self, fx_name: &str) -> bool;

    fn parameter_count(&self) -> usize;

    /// Sets `param` to `value` and reads back what the effect settled on.
    fn probe(&mut self, param: usize, value: f64) -> f64;

    fn close(&mut self) {}
}

/// Effect name behind a plugin zone name, for zones worth calibrating.
pub fn calibration_target(zone: &str) -> Option<&str> {
    zone.strip_prefix("VST: ")
        .or_else(|| zone.strip_prefix("VST3: "))
}

/// Sweeps every parameter of the open effect and keeps those that settle on
/// a small set of distinct values.
pub fn calibrate(sweep: &mut dyn ParameterSweep) -> StepTable {
    let mut table = StepTable::new();

    for param in 0..sweep.parameter_count() {
        let mut steps = vec![0.0];
        for probe in 0..CALIBRATION_PROBES {
            let value = probe as f64 / (CALIBRATION_PROBES - 1) as f64;
            let settled = sweep.probe(param, value);
            if steps.last() != Some(&settled) {
                steps.push(settled);
            }
        }
        if (2..=MAX_CALIBRATED_STEPS).contains(&steps.len()) {
            table.insert(param, steps);
        }
    }

    table
}

/// Index of step files by zone name plus the tables loaded so far.
#[derive(Debug, Clone, Default)]
pub struct StepSizeCache {
    folder: Option<PathBuf>,
    files: BTreeMap<String, PathBuf>,
    loaded: BTreeMap<String, StepTable>,
}

impl StepSizeCache {
    pub fn new(folder: Option<PathBuf>) -> Self {
        Self {
            folder,
            ..Self::default()
        }
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// Indexes every step file in the folder by its header. Returns how many
    /// were found.
    pub fn preprocess(&mut self) -> Result<usize> {
        let Some(folder) = self.folder.clone() else {
            return Ok(0);
        };

        let mut indexed = 0;
        for path in list_files(&folder, STEP_FILE_EXTENSION)? {
            let text = fs::read_to_string(&path)?;
            match read_step_header(&text) {
                Some(zone) => {
                    self.files.insert(zone, path);
                    indexed += 1;
                }
                None => tracing::warn!(path = %path.display(), "step file without a StepSizes header"),
            }
        }

        tracing::debug!(folder = %folder.display(), files = indexed, "indexed step files");
        Ok(indexed)
    }

    pub fn add_file(&mut self, zone: impl Into<String>, path: PathBuf) {
        self.files.insert(zone.into(), path);
    }

    pub fn has_file(&self, zone: &str) -> bool {
        self.files.contains_key(zone)
    }

    pub fn insert(&mut self, zone: impl Into<String>, table: StepTable) {
        self.loaded.insert(zone.into(), table);
    }

    /// Stepped values of `param` in `zone`, loading the zone's file on first
    /// use. Unknown zones and parameters give an empty slice.
    pub fn stepped_values(&mut self, zone: &str, param: usize) -> &[f64] {
        if !self.loaded.contains_key(zone) {
            let table = self.load(zone);
            self.loaded.insert(zone.to_string(), table);
        }

        self.loaded
            .get(zone)
            .and_then(|table| table.get(&param))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn load(&self, zone: &str) -> StepTable {
        let Some(path) = self.files.get(zone) else {
            return StepTable::new();
        };

        let parsed = fs::read_to_string(path)
            .map_err(SurfaceError::from)
            .and_then(|text| parse_step_sizes(&text, path));
        match parsed {
            Ok(file) => file.steps,
            Err(err) => {
                tracing::warn!(zone, error = %err, "could not load step sizes");
                StepTable::new()
            }
        }
    }

    /// Calibrates a plugin zone that has no step file yet, writes the result
    /// when a folder is configured and caches it. Returns the table built.
    pub fn calibrate_zone(
        &mut self,
        zone: &str,
        sweep: &mut dyn ParameterSweep,
    ) -> Result<Option<StepTable>> {
        if self.has_file(zone) {
            return Ok(None);
        }
        let Some(fx_name) = calibration_target(zone) else {
            return Ok(None);
        };
        if !sweep.open(fx_name) {
            tracing::warn!(zone, "host could not open effect for calibration");
            return Ok(None);
        }

        let table = calibrate(sweep);
        sweep.close();

        if let Some(folder) = self.folder.clone() {
            let path = write_step_sizes(&folder, zone, &table)?;
            self.files.insert(zone.to_string(), path);
        }
        self.loaded.insert(zone.to_string(), table.clone());
        Ok(Some(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY_STEPS: &str = "StepSizes \"VST: Delay\"\n0 0.0 0.5 1.0\n3 0 0.25 0.5 0.75 1 // modes\n7 0.5\n";

    #[test]
    fn parses_headers_and_rows() {
        let file = parse_step_sizes(DELAY_STEPS, Path::new("Delay.stp")).unwrap();
        assert_eq!(file.zone, "VST: Delay");
        assert_eq!(file.steps[&0], vec![0.0, 0.5, 1.0]);
        assert_eq!(file.steps[&3].len(), 5);
        assert!(!file.steps.contains_key(&7));
    }

    #[test]
    fn bad_numbers_report_their_line() {
        let err = parse_step_sizes("StepSizes X\n\n1 0.0 nope\n", Path::new("X.stp")).unwrap_err();
        match err {
            SurfaceError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(parse_step_sizes("1 0.0 1.0\n", Path::new("X.stp")).is_err());
    }

    #[test]
    fn rendered_files_read_back() {
        let mut steps = StepTable::new();
        steps.insert(2, vec![0.0, 0.5, 1.0]);
        let text = render_step_sizes("VST: Comp", &steps);
        assert_eq!(text, "StepSizes \"VST: Comp\"\n2 0.000000 0.500000 1.000000\n");
        assert_eq!(read_step_header(&text).as_deref(), Some("VST: Comp"));
    }

    #[test]
    fn file_names_are_sanitised() {
        assert_eq!(sanitize_file_name("VST: Comp (x86/64)"), "VST_ Comp (x86_64)");
    }

    #[test]
    fn cache_indexes_and_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("vendor");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("delay.stp"), DELAY_STEPS).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut cache = StepSizeCache::new(Some(dir.path().to_path_buf()));
        assert_eq!(cache.preprocess().unwrap(), 1);
        assert!(cache.has_file("VST: Delay"));
        assert_eq!(cache.stepped_values("VST: Delay", 0), &[0.0, 0.5, 1.0]);
        assert!(cache.stepped_values("VST: Delay", 9).is_empty());
        assert!(cache.stepped_values("VST: Other", 0).is_empty());
    }

    #[test]
    fn missing_folder_is_empty() {
        let mut cache = StepSizeCache::new(Some(PathBuf::from("/definitely/not/here")));
        assert_eq!(cache.preprocess().unwrap(), 0);
    }

    struct Switches {
        opened: Option<String>,
    }

    impl ParameterSweep for Switches {
        fn open(&mut self, fx_name: &str) -> bool {
            self.opened = Some(fx_name.to_string());
            true
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn probe(&mut self, param: usize, value: f64) -> f64 {
            match param {
                // Three-way switch.
                0 => (value * 2.0).round() / 2.0,
                _ => value,
            }
        }
    }

    #[test]
    fn calibration_keeps_only_switch_like_parameters() {
        let mut sweep = Switches { opened: None };
        let table = calibrate(&mut sweep);
        assert_eq!(table.get(&0), Some(&vec![0.0, 0.5, 1.0]));
        assert!(!table.contains_key(&1));
    }

    #[test]
    fn calibrate_zone_writes_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = StepSizeCache::new(Some(dir.path().to_path_buf()));
        let mut sweep = Switches { opened: None };

        let table = cache.calibrate_zone("VST3: Switcher", &mut sweep).unwrap();
        assert!(table.is_some());
        assert_eq!(sweep.opened.as_deref(), Some("Switcher"));
        assert!(cache.has_file("VST3: Switcher"));
        assert!(dir.path().join("VST3_ Switcher.stp").exists());

        assert!(cache.calibrate_zone("VST3: Switcher", &mut sweep).unwrap().is_none());
        assert!(cache.calibrate_zone("Track", &mut sweep).unwrap().is_none());
    }
}
