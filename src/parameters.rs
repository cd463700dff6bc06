//! Parameter snapshot loaded once per run.
//!
//! Parameters are addressed as `"Collection.Name"`. A [`ParameterLoader`]
//! returns raw entries, possibly carrying a unit; [`ParameterSnapshot::load`]
//! resolves units to SI base values, applies fixed overrides, and freezes the
//! result. The snapshot is read-only for the rest of the run.
//!
//! # Unit resolution
//!
//! | unit                     | factor                     |
//! |--------------------------|----------------------------|
//! | `""`, `dBm`, `dB`, `deg` | 1 (value passes through)   |
//! | `[p n u m k M G]Hz`, `s`, `V`, `W`, `A` | SI prefix scale |
//!
//! Entries with any other unit are treated as broken and skipped with a warning;
//! one broken parameter never prevents the rest of the snapshot from loading.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, ScanError};

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag
    Bool(bool),
    /// Numeric value, units already applied
    Number(f64),
    /// Free text (e.g. a readout mode)
    Text(String),
    /// Ordered list (e.g. a threshold list)
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Numeric view; booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(v) => Some(*v),
            ParamValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Boolean view; numbers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            ParamValue::Number(v) => Some(*v != 0.0),
            _ => None,
        }
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    fn scaled(self, factor: f64) -> Self {
        match self {
            ParamValue::Number(v) => ParamValue::Number(v * factor),
            ParamValue::List(items) => {
                ParamValue::List(items.into_iter().map(|v| v.scaled(factor)).collect())
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Number(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::List(v.into_iter().map(ParamValue::Number).collect())
    }
}

/// One entry as delivered by a parameter store, before unit resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawParameter {
    /// `"Collection.Name"` key
    pub key: String,
    /// Value in the store's units
    pub value: ParamValue,
    /// Unit string, if the store attaches one
    pub units: Option<String>,
}

impl RawParameter {
    /// Entry without a unit
    pub fn plain(key: &str, value: impl Into<ParamValue>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            units: None,
        }
    }

    /// Entry carrying a unit
    pub fn with_units(key: &str, value: impl Into<ParamValue>, units: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
            units: Some(units.to_string()),
        }
    }
}

/// Source of experiment parameters, queried exactly once per run.
#[async_trait]
pub trait ParameterLoader: Send + Sync {
    /// Fetch every parameter the store knows about.
    async fn load(&self) -> AppResult<Vec<RawParameter>>;
}

/// In-memory parameter store.
#[derive(Debug, Clone, Default)]
pub struct StaticParameters {
    entries: Vec<RawParameter>,
}

impl StaticParameters {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unitless entry
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.entries.push(RawParameter::plain(key, value));
        self
    }

    /// Add an entry carrying a unit
    pub fn with_units(mut self, key: &str, value: impl Into<ParamValue>, units: &str) -> Self {
        self.entries.push(RawParameter::with_units(key, value, units));
        self
    }
}

#[async_trait]
impl ParameterLoader for StaticParameters {
    async fn load(&self) -> AppResult<Vec<RawParameter>> {
        Ok(self.entries.clone())
    }
}

/// JSON parameter file: `{ "Collection": { "name": value | {"value": v, "units": u} } }`.
#[derive(Debug, Clone)]
pub struct JsonParameterFile {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileEntry {
    Quantity {
        value: ParamValue,
        #[serde(default)]
        units: String,
    },
    Plain(ParamValue),
}

impl JsonParameterFile {
    /// Loader reading from `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ParameterLoader for JsonParameterFile {
    async fn load(&self) -> AppResult<Vec<RawParameter>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let doc: BTreeMap<String, BTreeMap<String, FileEntry>> = serde_json::from_str(&text)?;

        let mut entries = Vec::new();
        for (collection, params) in doc {
            for (name, entry) in params {
                let key = format!("{}.{}", collection, name);
                entries.push(match entry {
                    FileEntry::Quantity { value, units } => RawParameter {
                        key,
                        value,
                        units: Some(units),
                    },
                    FileEntry::Plain(value) => RawParameter {
                        key,
                        value,
                        units: None,
                    },
                });
            }
        }
        Ok(entries)
    }
}

/// Scale factor that converts a value in `units` to its SI base unit.
///
/// Returns `None` for units the engine does not know how to resolve.
pub fn unit_factor(units: &str) -> Option<f64> {
    match units {
        "" | "dBm" | "dB" | "deg" => return Some(1.0),
        _ => {}
    }

    let base = ["Hz", "s", "V", "W", "A"]
        .into_iter()
        .find(|base| units.ends_with(base))?;
    let prefix = &units[..units.len() - base.len()];
    match prefix {
        "" => Some(1.0),
        "p" => Some(1e-12),
        "n" => Some(1e-9),
        "u" | "µ" => Some(1e-6),
        "m" => Some(1e-3),
        "k" => Some(1e3),
        "M" => Some(1e6),
        "G" => Some(1e9),
        _ => None,
    }
}

/// Immutable mapping of `"Collection.Name"` keys to resolved values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSnapshot {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSnapshot {
    /// Load from `loader`, resolve units, then apply `fixed` overrides.
    pub async fn load(
        loader: &dyn ParameterLoader,
        fixed: &[(String, ParamValue)],
    ) -> AppResult<Self> {
        let raw = loader.load().await?;
        let mut values = BTreeMap::new();

        for entry in raw {
            if !entry.key.contains('.') {
                tracing::warn!(key = %entry.key, "Skipping parameter without collection prefix");
                continue;
            }
            let units = entry.units.as_deref().unwrap_or("");
            match unit_factor(units) {
                Some(factor) => {
                    values.insert(entry.key, entry.value.scaled(factor));
                }
                None => {
                    tracing::warn!(
                        key = %entry.key,
                        units,
                        "Skipping broken parameter: unknown unit"
                    );
                }
            }
        }

        for (key, value) in fixed {
            if !key.contains('.') {
                return Err(ScanError::Configuration(format!(
                    "Fixed parameter '{}' must be of the form Collection.Name",
                    key
                )));
            }
            values.insert(key.clone(), value.clone());
        }

        tracing::debug!(count = values.len(), "Parameter snapshot loaded");
        Ok(Self { values })
    }

    /// Build a snapshot from already-resolved values.
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, ParamValue)>,
        K: Into<String>,
    {
        Self {
            values: values.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Whether `key` exists
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, key: &str) -> AppResult<&ParamValue> {
        self.values
            .get(key)
            .ok_or_else(|| ScanError::MissingParameter(key.to_string()))
    }

    /// Numeric parameter
    pub fn f64(&self, key: &str) -> AppResult<f64> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| type_error(key, "number"))
    }

    /// Boolean parameter; numbers are accepted (non-zero is true)
    pub fn bool(&self, key: &str) -> AppResult<bool> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| type_error(key, "bool"))
    }

    /// Text parameter
    pub fn str(&self, key: &str) -> AppResult<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| type_error(key, "string"))
    }

    /// List parameter
    pub fn list(&self, key: &str) -> AppResult<&[ParamValue]> {
        match self.require(key)? {
            ParamValue::List(items) => Ok(items),
            _ => Err(type_error(key, "list")),
        }
    }

    /// List of numbers
    pub fn f64_list(&self, key: &str) -> AppResult<Vec<f64>> {
        self.list(key)?
            .iter()
            .map(|v| v.as_f64().ok_or_else(|| type_error(key, "list of numbers")))
            .collect()
    }

    /// Entries of one collection as `(name, value)`, in name order.
    pub fn collection<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ParamValue)> + 'a {
        self.values.iter().filter_map(move |(key, value)| {
            let (c, name) = key.split_once('.')?;
            (c == collection).then_some((name, value))
        })
    }

    /// Snapshot grouped by collection, for artifact headers.
    pub fn to_nested_json(&self) -> serde_json::Value {
        let mut nested: BTreeMap<&str, BTreeMap<&str, String>> = BTreeMap::new();
        for (key, value) in &self.values {
            if let Some((collection, name)) = key.split_once('.') {
                nested
                    .entry(collection)
                    .or_default()
                    .insert(name, value.to_string());
            }
        }
        serde_json::json!(nested)
    }
}

fn type_error(key: &str, expected: &'static str) -> ScanError {
    ScanError::ParameterType {
        name: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unit_factor() {
        assert_eq!(unit_factor("MHz"), Some(1e6));
        assert_eq!(unit_factor("us"), Some(1e-6));
        assert_eq!(unit_factor("ms"), Some(1e-3));
        assert_eq!(unit_factor("dBm"), Some(1.0));
        assert_eq!(unit_factor(""), Some(1.0));
        assert_eq!(unit_factor("furlong"), None);
        assert_eq!(unit_factor("xHz"), None);
    }

    #[tokio::test]
    async fn test_load_resolves_units_and_skips_broken() {
        let store = StaticParameters::new()
            .with_units("StateReadout.pmt_readout_duration", 100.0, "us")
            .with_units("RabiFlopping.frequency", 2.5, "MHz")
            .with_units("Broken.param", 1.0, "furlong")
            .with("StateReadout.readout_mode", "pmt");

        let snapshot = ParameterSnapshot::load(&store, &[]).await.unwrap();
        assert!((snapshot.f64("StateReadout.pmt_readout_duration").unwrap() - 1e-4).abs() < 1e-15);
        assert_eq!(snapshot.f64("RabiFlopping.frequency").unwrap(), 2.5e6);
        assert_eq!(snapshot.str("StateReadout.readout_mode").unwrap(), "pmt");
        assert!(!snapshot.contains("Broken.param"));
    }

    #[tokio::test]
    async fn test_fixed_overrides_win() {
        let store = StaticParameters::new().with("StateReadout.repeat_each_measurement", 100.0);
        let fixed = vec![(
            "StateReadout.repeat_each_measurement".to_string(),
            ParamValue::Number(10.0),
        )];
        let snapshot = ParameterSnapshot::load(&store, &fixed).await.unwrap();
        assert_eq!(snapshot.f64("StateReadout.repeat_each_measurement").unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_fixed_override_requires_collection() {
        let fixed = vec![("repeat".to_string(), ParamValue::Number(10.0))];
        let result = ParameterSnapshot::load(&StaticParameters::new(), &fixed).await;
        assert!(matches!(result, Err(ScanError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_json_parameter_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "StateReadout": {{
                    "threshold_list": [5, 20],
                    "pmt_readout_duration": {{"value": 250, "units": "us"}},
                    "readout_mode": "pmt"
                }},
                "line_trigger_settings": {{ "enabled": false }}
            }}"#
        )
        .unwrap();

        let loader = JsonParameterFile::new(file.path());
        let snapshot = ParameterSnapshot::load(&loader, &[]).await.unwrap();
        assert_eq!(
            snapshot.f64_list("StateReadout.threshold_list").unwrap(),
            vec![5.0, 20.0]
        );
        let duration = snapshot.f64("StateReadout.pmt_readout_duration").unwrap();
        assert!((duration - 2.5e-4).abs() < 1e-15);
        assert!(!snapshot.bool("line_trigger_settings.enabled").unwrap());
    }

    #[test]
    fn test_typed_accessor_errors() {
        let snapshot = ParameterSnapshot::from_values([("A.b", ParamValue::from("text"))]);
        assert!(matches!(
            snapshot.f64("A.b"),
            Err(ScanError::ParameterType { .. })
        ));
        assert!(matches!(
            snapshot.f64("A.missing"),
            Err(ScanError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_collection_iteration() {
        let snapshot = ParameterSnapshot::from_values([
            ("TrapFrequencies.axial_frequency", ParamValue::from(1e6)),
            ("TrapFrequencies.radial_frequency_1", ParamValue::from(2.8e6)),
            ("StateReadout.readout_mode", ParamValue::from("pmt")),
        ]);
        let names: Vec<&str> = snapshot.collection("TrapFrequencies").map(|(n, _)| n).collect();
        assert_eq!(names, vec!["axial_frequency", "radial_frequency_1"]);
    }
}
