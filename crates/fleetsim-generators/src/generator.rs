//! Generator variants and their value-production rules.

use crate::error::{GeneratorError, Result};
use crate::handlers::{CustomHandler, HandlerRegistry};
use crate::value::TelemetryValue;
use chrono::{DateTime, Utc};
use fleetsim_core::{DataType, Distribution, GeneratorSpec, GeneratorType};
use fxhash::FxHasher;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as _, Exp, Normal};
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader, Read};

/// Derives the deterministic PRNG seed for one attribute of one device.
pub fn attribute_seed(device_id: &str, attr_name: &str) -> u64 {
    let mut hasher = FxHasher::default();
    device_id.hash(&mut hasher);
    attr_name.hash(&mut hasher);
    hasher.finish()
}

const DEFAULT_MIN: f64 = 0.0;
const DEFAULT_MAX: f64 = 100.0;
const DEFAULT_PRECISION: u32 = 2;

/// Stateful value producer for one telemetry attribute.
pub enum ValueGenerator {
    Random(RandomState),
    Sequence(SequenceState),
    Constant(ConstantState),
    Replay(ReplayState),
    Custom(CustomState),
}

impl ValueGenerator {
    /// Builds a generator from its validated spec. Replay generators open
    /// their data file here, at device start.
    pub fn from_spec(
        spec: &GeneratorSpec,
        data_type: DataType,
        device_id: &str,
        attr_name: &str,
        registry: &HandlerRegistry,
    ) -> Result<Self> {
        match spec.kind {
            GeneratorType::Random => Ok(ValueGenerator::Random(RandomState {
                rng: StdRng::seed_from_u64(attribute_seed(device_id, attr_name)),
                min: spec.min,
                max: spec.max,
                distribution: spec.distribution,
                mean: spec.mean,
                stddev: spec.stddev,
                rate: spec.rate,
                precision: spec.precision.unwrap_or(DEFAULT_PRECISION),
                data_type,
            })),
            GeneratorType::Sequence => {
                let start = spec.start.unwrap_or(0.0);
                Ok(ValueGenerator::Sequence(SequenceState {
                    current: start,
                    step: spec.step,
                    min: spec.min,
                    max: spec.max,
                    wrap: spec.wrap,
                    exhausted: false,
                    data_type,
                }))
            }
            GeneratorType::Constant => {
                let value = spec.value.as_ref().ok_or(GeneratorError::MissingValue)?;
                Ok(ValueGenerator::Constant(ConstantState {
                    value: TelemetryValue::from_json(value, data_type),
                }))
            }
            GeneratorType::Replay => {
                let path = spec
                    .data_file
                    .as_deref()
                    .ok_or(GeneratorError::MissingDataFile)?;
                let column = spec.column.as_deref().unwrap_or(attr_name);
                let rows = load_replay_rows(path, column, data_type)?;
                Ok(ValueGenerator::Replay(ReplayState {
                    rows,
                    index: 0,
                    loop_replay: spec.loop_replay,
                }))
            }
            GeneratorType::Custom => {
                let name = spec.handler.as_deref().unwrap_or_default();
                let handler = registry
                    .get(name)
                    .ok_or_else(|| GeneratorError::UnknownHandler(name.to_string()))?;
                Ok(ValueGenerator::Custom(CustomState {
                    handler,
                    device_id: device_id.to_string(),
                    attr_name: attr_name.to_string(),
                    params: spec.params.clone().unwrap_or_default(),
                }))
            }
        }
    }

    /// Produces the next value.
    pub fn next(&mut self, now: DateTime<Utc>) -> TelemetryValue {
        match self {
            ValueGenerator::Random(s) => s.next(),
            ValueGenerator::Sequence(s) => s.next(),
            ValueGenerator::Constant(s) => s.value.clone(),
            ValueGenerator::Replay(s) => s.next(),
            ValueGenerator::Custom(s) => (s.handler)(&s.device_id, &s.attr_name, &s.params, now),
        }
    }
}

pub struct RandomState {
    rng: StdRng,
    min: Option<f64>,
    max: Option<f64>,
    distribution: Distribution,
    mean: Option<f64>,
    stddev: Option<f64>,
    rate: Option<f64>,
    precision: u32,
    data_type: DataType,
}

impl RandomState {
    fn next(&mut self) -> TelemetryValue {
        let min = self.min.unwrap_or(DEFAULT_MIN);
        let max = self.max.unwrap_or(DEFAULT_MAX).max(min);

        let raw = match self.distribution {
            Distribution::Uniform => self.rng.gen_range(min..=max),
            Distribution::Normal => {
                let mean = self.mean.unwrap_or((min + max) / 2.0);
                let stddev = self.stddev.unwrap_or(((max - min) / 6.0).abs().max(f64::EPSILON));
                let sample = Normal::new(mean, stddev)
                    .map(|d| d.sample(&mut self.rng))
                    .unwrap_or(mean);
                self.clamp(sample)
            }
            Distribution::Exponential => {
                let rate = self
                    .rate
                    .unwrap_or_else(|| 1.0 / self.mean.unwrap_or(1.0).max(f64::EPSILON));
                let sample = Exp::new(rate)
                    .map(|d| d.sample(&mut self.rng))
                    .unwrap_or(0.0);
                self.clamp(sample)
            }
        };

        typed_number(raw, self.data_type, self.precision, self.min, self.max)
    }

    fn clamp(&self, v: f64) -> f64 {
        let mut v = v;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }
}

pub struct SequenceState {
    current: f64,
    step: f64,
    min: Option<f64>,
    max: Option<f64>,
    wrap: bool,
    exhausted: bool,
    data_type: DataType,
}

impl SequenceState {
    fn next(&mut self) -> TelemetryValue {
        let value = self.current;

        if !self.exhausted {
            let next = self.current + self.step;
            self.current = if self.step > 0.0 {
                match self.max {
                    Some(max) if next > max => {
                        if self.wrap {
                            self.min.unwrap_or(max)
                        } else {
                            self.exhausted = true;
                            max
                        }
                    }
                    _ => next,
                }
            } else {
                match self.min {
                    Some(min) if next < min => {
                        if self.wrap {
                            self.max.unwrap_or(min)
                        } else {
                            self.exhausted = true;
                            min
                        }
                    }
                    _ => next,
                }
            };
        }

        typed_number(value, self.data_type, u32::MAX, None, None)
    }
}

pub struct ConstantState {
    value: TelemetryValue,
}

pub struct ReplayState {
    rows: Vec<TelemetryValue>,
    index: usize,
    loop_replay: bool,
}

impl ReplayState {
    fn next(&mut self) -> TelemetryValue {
        let value = self.rows[self.index].clone();
        if self.index + 1 < self.rows.len() {
            self.index += 1;
        } else if self.loop_replay {
            self.index = 0;
        }
        // loop_replay=false holds the final row
        value
    }
}

pub struct CustomState {
    handler: CustomHandler,
    device_id: String,
    attr_name: String,
    params: serde_json::Map<String, serde_json::Value>,
}

/// Rounds and coerces a raw sample into the attribute's data type.
fn typed_number(
    raw: f64,
    data_type: DataType,
    precision: u32,
    min: Option<f64>,
    max: Option<f64>,
) -> TelemetryValue {
    match data_type {
        DataType::Integer => {
            let mut v = raw.round_ties_even();
            if let Some(min) = min {
                v = v.max(min.ceil());
            }
            if let Some(max) = max {
                v = v.min(max.floor());
            }
            TelemetryValue::Integer(v as i64)
        }
        _ => {
            let v = if precision == u32::MAX {
                raw
            } else {
                let factor = 10f64.powi(precision as i32);
                (raw * factor).round() / factor
            };
            TelemetryValue::Float(v)
        }
    }
}

/// Loads replay rows from a CSV (header row) or JSON-lines / JSON-array file.
fn load_replay_rows(path: &str, column: &str, data_type: DataType) -> Result<Vec<TelemetryValue>> {
    let file = std::fs::File::open(path).map_err(|e| GeneratorError::ReplayFile {
        path: path.to_string(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let rows = if path.ends_with(".csv") {
        load_csv_rows(reader, path, column, data_type)?
    } else {
        load_json_rows(reader, path, column, data_type)?
    };

    if rows.is_empty() {
        return Err(GeneratorError::ReplayEmpty(path.to_string()));
    }
    Ok(rows)
}

fn load_csv_rows(
    reader: impl BufRead,
    path: &str,
    column: &str,
    data_type: DataType,
) -> Result<Vec<TelemetryValue>> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            return Err(GeneratorError::ReplayFile {
                path: path.to_string(),
                source: e,
            })
        }
        None => return Ok(Vec::new()),
    };

    let col_index = header
        .split(',')
        .map(str::trim)
        .position(|h| h == column)
        .ok_or_else(|| GeneratorError::ReplayColumn {
            path: path.to_string(),
            column: column.to_string(),
        })?;

    let mut rows = Vec::new();
    for line in lines {
        let line = line.map_err(|e| GeneratorError::ReplayFile {
            path: path.to_string(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let cell = line.split(',').nth(col_index).unwrap_or("").trim();
        rows.push(parse_scalar(cell, data_type));
    }
    Ok(rows)
}

fn load_json_rows(
    mut reader: impl BufRead,
    path: &str,
    column: &str,
    data_type: DataType,
) -> Result<Vec<TelemetryValue>> {
    let mut content = String::new();
    reader
        .read_to_string(&mut content)
        .map_err(|e| GeneratorError::ReplayFile {
            path: path.to_string(),
            source: e,
        })?;

    let values: Vec<serde_json::Value> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    };

    let rows = values
        .iter()
        .map(|v| match v {
            serde_json::Value::Object(map) => map
                .get(column)
                .map(|cell| TelemetryValue::from_json(cell, data_type))
                .unwrap_or(TelemetryValue::Float(0.0)),
            other => TelemetryValue::from_json(other, data_type),
        })
        .collect();
    Ok(rows)
}

fn parse_scalar(cell: &str, data_type: DataType) -> TelemetryValue {
    if let Ok(b) = cell.parse::<bool>() {
        if data_type == DataType::Boolean {
            return TelemetryValue::Boolean(b);
        }
    }
    if let Ok(f) = cell.parse::<f64>() {
        return match data_type {
            DataType::Integer => TelemetryValue::Integer(f.round_ties_even() as i64),
            _ => TelemetryValue::Float(f),
        };
    }
    TelemetryValue::Text(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_builtins()
    }

    fn build(spec: &GeneratorSpec, data_type: DataType) -> ValueGenerator {
        ValueGenerator::from_spec(spec, data_type, "dev-0", "temperature", &registry()).unwrap()
    }

    fn next_f64(gen: &mut ValueGenerator) -> f64 {
        match gen.next(Utc::now()) {
            TelemetryValue::Float(v) => v,
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_uniform_stays_in_bounds() {
        let spec = GeneratorSpec {
            min: Some(20.0),
            max: Some(30.0),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        for _ in 0..1000 {
            let v = next_f64(&mut gen);
            assert!((20.0..=30.0).contains(&v), "value {} out of range", v);
        }
    }

    #[test]
    fn test_random_is_deterministic_per_seed() {
        let spec = GeneratorSpec::default();
        let mut a = build(&spec, DataType::Number);
        let mut b = build(&spec, DataType::Number);
        for _ in 0..50 {
            assert_eq!(next_f64(&mut a), next_f64(&mut b));
        }

        // A different attribute name yields a different stream
        let mut c =
            ValueGenerator::from_spec(&spec, DataType::Number, "dev-0", "humidity", &registry())
                .unwrap();
        let equal = (0..50).all(|_| next_f64(&mut a) == next_f64(&mut c));
        assert!(!equal);
    }

    #[test]
    fn test_normal_clamped_to_bounds() {
        let spec = GeneratorSpec {
            distribution: Distribution::Normal,
            min: Some(0.0),
            max: Some(1.0),
            mean: Some(0.5),
            stddev: Some(10.0),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        for _ in 0..500 {
            let v = next_f64(&mut gen);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_exponential_non_negative() {
        let spec = GeneratorSpec {
            distribution: Distribution::Exponential,
            rate: Some(2.0),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        for _ in 0..200 {
            assert!(next_f64(&mut gen) >= 0.0);
        }
    }

    #[test]
    fn test_integer_rounds_half_to_even() {
        assert_eq!(
            typed_number(2.5, DataType::Integer, 2, None, None),
            TelemetryValue::Integer(2)
        );
        assert_eq!(
            typed_number(3.5, DataType::Integer, 2, None, None),
            TelemetryValue::Integer(4)
        );
        assert_eq!(
            typed_number(7.2, DataType::Integer, 2, Some(8.0), None),
            TelemetryValue::Integer(8)
        );
    }

    #[test]
    fn test_precision_default_two_decimals() {
        let spec = GeneratorSpec {
            min: Some(0.0),
            max: Some(1.0),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        for _ in 0..100 {
            let v = next_f64(&mut gen);
            assert_eq!(v, (v * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_sequence_advances_and_wraps() {
        let spec = GeneratorSpec {
            kind: GeneratorType::Sequence,
            start: Some(0.0),
            step: 5.0,
            min: Some(0.0),
            max: Some(10.0),
            wrap: true,
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        let values: Vec<f64> = (0..6).map(|_| next_f64(&mut gen)).collect();
        assert_eq!(values, vec![0.0, 5.0, 10.0, 0.0, 5.0, 10.0]);
    }

    #[test]
    fn test_sequence_clamps_without_wrap() {
        let spec = GeneratorSpec {
            kind: GeneratorType::Sequence,
            start: Some(0.0),
            step: 4.0,
            max: Some(10.0),
            wrap: false,
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        let values: Vec<f64> = (0..6).map(|_| next_f64(&mut gen)).collect();
        assert_eq!(values, vec![0.0, 4.0, 8.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_sequence_negative_step() {
        let spec = GeneratorSpec {
            kind: GeneratorType::Sequence,
            start: Some(10.0),
            step: -5.0,
            min: Some(0.0),
            max: Some(10.0),
            wrap: true,
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        let values: Vec<f64> = (0..5).map(|_| next_f64(&mut gen)).collect();
        assert_eq!(values, vec![10.0, 5.0, 0.0, 10.0, 5.0]);
    }

    #[test]
    fn test_constant_emits_typed_value() {
        let spec = GeneratorSpec {
            kind: GeneratorType::Constant,
            value: Some(serde_json::json!("active")),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::String);
        assert_eq!(gen.next(Utc::now()), TelemetryValue::Text("active".to_string()));
        assert_eq!(gen.next(Utc::now()), TelemetryValue::Text("active".to_string()));
    }

    #[test]
    fn test_replay_csv_loops() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "time,temperature,humidity").unwrap();
        writeln!(file, "1,20.5,60").unwrap();
        writeln!(file, "2,21.0,61").unwrap();
        writeln!(file, "3,21.5,62").unwrap();
        file.flush().unwrap();

        let spec = GeneratorSpec {
            kind: GeneratorType::Replay,
            data_file: Some(file.path().to_string_lossy().into_owned()),
            loop_replay: true,
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        let values: Vec<f64> = (0..5).map(|_| next_f64(&mut gen)).collect();
        assert_eq!(values, vec![20.5, 21.0, 21.5, 20.5, 21.0]);
    }

    #[test]
    fn test_replay_holds_last_without_loop() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "temperature").unwrap();
        writeln!(file, "1.0").unwrap();
        writeln!(file, "2.0").unwrap();
        file.flush().unwrap();

        let spec = GeneratorSpec {
            kind: GeneratorType::Replay,
            data_file: Some(file.path().to_string_lossy().into_owned()),
            loop_replay: false,
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        let values: Vec<f64> = (0..4).map(|_| next_f64(&mut gen)).collect();
        assert_eq!(values, vec![1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_replay_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"temperature": 18.0, "status": "ok"}}"#).unwrap();
        writeln!(file, r#"{{"temperature": 19.0, "status": "ok"}}"#).unwrap();
        file.flush().unwrap();

        let spec = GeneratorSpec {
            kind: GeneratorType::Replay,
            data_file: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let mut gen = build(&spec, DataType::Number);
        assert_eq!(next_f64(&mut gen), 18.0);
        assert_eq!(next_f64(&mut gen), 19.0);
    }

    #[test]
    fn test_replay_missing_column() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2").unwrap();
        file.flush().unwrap();

        let spec = GeneratorSpec {
            kind: GeneratorType::Replay,
            data_file: Some(file.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let err =
            ValueGenerator::from_spec(&spec, DataType::Number, "dev-0", "temperature", &registry());
        assert!(matches!(err, Err(GeneratorError::ReplayColumn { .. })));
    }

    #[test]
    fn test_unknown_custom_handler() {
        let spec = GeneratorSpec {
            kind: GeneratorType::Custom,
            handler: Some("nope".to_string()),
            ..Default::default()
        };
        let err =
            ValueGenerator::from_spec(&spec, DataType::Number, "dev-0", "temperature", &registry());
        assert!(matches!(err, Err(GeneratorError::UnknownHandler(_))));
    }

    #[test]
    fn test_attribute_seed_is_stable() {
        assert_eq!(
            attribute_seed("dev-0", "temperature"),
            attribute_seed("dev-0", "temperature")
        );
        assert_ne!(
            attribute_seed("dev-0", "temperature"),
            attribute_seed("dev-1", "temperature")
        );
    }
}
