//! Configuration document consumed by `Plan::from_config`.
//!
//! The document is an explicit value: nothing is read from process-wide
//! state. Intervals and offsets are written as `{days, hours, minutes,
//! seconds}` maps, timestamps as RFC 3339 strings.

use crate::error::ConfigurationError;
use crate::store::{Node, Offset, SeriesSource, TimeGrid, VariableRef, VariableSpec, VariableSpecKind};
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalConfig {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub seconds: i64,
}

impl IntervalConfig {
    pub fn to_duration(&self) -> Duration {
        Duration::days(self.days) + Duration::hours(self.hours) + Duration::minutes(self.minutes) + Duration::seconds(self.seconds)
    }

    pub fn days(days: i64) -> Self { Self { days, ..Default::default() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginConfig {
    pub node_id: i64,
    pub var_id: String,
    #[serde(default)]
    pub x_offset: IntervalConfig,
    #[serde(default)]
    pub y_offset: f64,
}

impl OriginConfig {
    fn resolve(&self) -> (VariableRef, Offset) {
        (
            VariableRef::new(self.node_id, &self.var_id),
            Offset { x_offset: self.x_offset.to_duration(), y_offset: self.y_offset },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariableKindConfig {
    Observed {
        #[serde(default)]
        series: Vec<SeriesSource>,
    },
    Derived {
        origin: OriginConfig,
    },
    Interpolated {
        origin_1: OriginConfig,
        origin_2: OriginConfig,
        interpolation_coefficient: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub kind: VariableKindConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub geom: Option<(f64, f64)>,
    #[serde(default)]
    pub timestart: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timeend: Option<DateTime<Utc>>,
    #[serde(default)]
    pub time_interval: Option<IntervalConfig>,
    pub variables: Vec<VariableConfig>,
}

/// Type tag plus everything a function variant needs to build itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
    /// `(min, low_guide, high_guide, max)` per parameter name.
    #[serde(default)]
    pub constraints: BTreeMap<String, [f64; 4]>,
    /// Boundary names of variable-arity functions.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Subset of `inputs` that tolerates missing data.
    #[serde(default)]
    pub optional_inputs: Vec<String>,
    #[serde(default)]
    pub expression: Option<String>,
}

impl FunctionConfig {
    pub fn new(type_tag: &str) -> Self { Self { type_tag: type_tag.into(), ..Default::default() } }

    pub fn parameter(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureConfig {
    pub id: String,
    pub function: FunctionConfig,
    #[serde(default)]
    pub boundaries: IndexMap<String, VariableRef>,
    #[serde(default)]
    pub outputs: IndexMap<String, VariableRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub timestart: DateTime<Utc>,
    pub timeend: DateTime<Utc>,
    pub time_interval: IntervalConfig,
    /// Forecast origin; defaults to `timeend`.
    #[serde(default)]
    pub forecast_date: Option<DateTime<Utc>>,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub procedures: Vec<ProcedureConfig>,
}

impl PlanConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(s).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigurationError::Parse(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn window(&self) -> Result<TimeGrid, ConfigurationError> {
        TimeGrid::new(self.timestart, self.timeend, self.time_interval.to_duration())
    }

    pub fn forecast_origin(&self) -> DateTime<Utc> { self.forecast_date.unwrap_or(self.timeend) }

    /// Builds the node declarations. Node windows fall back to the plan
    /// window field by field.
    pub fn build_nodes(&self) -> Result<Vec<Node>, ConfigurationError> {
        let plan_window = self.window()?;
        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for nc in &self.nodes {
            if !seen.insert(nc.id) {
                return Err(ConfigurationError::DuplicateNode(crate::store::NodeId(nc.id)));
            }
            let grid = TimeGrid::new(
                nc.timestart.unwrap_or(plan_window.start),
                nc.timeend.unwrap_or(plan_window.end),
                nc.time_interval.map_or(plan_window.interval, |i| i.to_duration()),
            )?;
            let mut node = Node::new(nc.id, nc.name.as_deref().unwrap_or(""), grid);
            node.location = nc.geom;

            for vc in &nc.variables {
                let kind = match &vc.kind {
                    VariableKindConfig::Observed { series } => VariableSpecKind::Observed { sources: series.clone() },
                    VariableKindConfig::Derived { origin } => {
                        let (origin, offset) = origin.resolve();
                        VariableSpecKind::Derived { origin, offset }
                    }
                    VariableKindConfig::Interpolated { origin_1, origin_2, interpolation_coefficient } => {
                        VariableSpecKind::Interpolated {
                            first: origin_1.resolve(),
                            second: origin_2.resolve(),
                            coefficient: *interpolation_coefficient,
                        }
                    }
                };
                let spec = VariableSpec {
                    name: vc.name.clone().unwrap_or_else(|| vc.id.clone()),
                    unit: vc.unit.clone(),
                    kind,
                };
                node.add_variable(&vc.id, spec)?;
            }
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"{
        "timestart": "2024-01-01T00:00:00Z",
        "timeend": "2024-01-10T00:00:00Z",
        "time_interval": {"days": 1},
        "forecast_date": "2024-01-06T00:00:00Z",
        "nodes": [
            {"id": 1, "name": "upstream", "geom": [-58.4, -34.6], "variables": [
                {"id": "Q", "kind": "observed", "series": [{"name": "gauge", "series_id": 101}]},
                {"id": "P", "kind": "observed"}
            ]},
            {"id": 2, "name": "downstream", "variables": [
                {"id": "Q", "kind": "observed"},
                {"id": "Qlag", "kind": "derived",
                 "origin": {"node_id": 1, "var_id": "Q", "x_offset": {"days": 1}, "y_offset": 0.5}},
                {"id": "Qmix", "kind": "interpolated", "interpolation_coefficient": 0.5,
                 "origin_1": {"node_id": 1, "var_id": "Q"},
                 "origin_2": {"node_id": 2, "var_id": "Q"}}
            ]}
        ],
        "procedures": [
            {"id": "route", "function": {"type": "lag", "parameters": {"lag": 1}},
             "boundaries": {"input": {"node_id": 1, "var_id": "Q"}},
             "outputs": {"output": {"node_id": 2, "var_id": "Q"}}}
        ]
    }"#;

    #[test]
    fn test_parse_sample_document() {
        let config = PlanConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.time_interval.to_duration(), Duration::days(1));
        assert_eq!(config.procedures[0].function.type_tag, "lag");

        let nodes = config.build_nodes().unwrap();
        assert_eq!(nodes[0].location, Some((-58.4, -34.6)));
        assert_eq!(nodes[1].grid.len(), 10);
        match &nodes[1].variables[&crate::store::VarId::from("Qlag")].kind {
            VariableSpecKind::Derived { origin, offset } => {
                assert_eq!(origin, &VariableRef::new(1, "Q"));
                assert_eq!(offset.x_offset, Duration::days(1));
                assert_eq!(offset.y_offset, 0.5);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut config = PlanConfig::from_json_str(SAMPLE).unwrap();
        config.nodes[1].id = 1;
        assert!(matches!(config.build_nodes(), Err(ConfigurationError::DuplicateNode(_))));
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut config = PlanConfig::from_json_str(SAMPLE).unwrap();
        config.nodes[0].variables[1].id = "Q".into();
        assert!(matches!(config.build_nodes(), Err(ConfigurationError::DuplicateVariable { .. })));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let err = PlanConfig::from_json_str("{\"timestart\": 3}").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = PlanConfig::from_path(file.path()).unwrap();
        assert_eq!(config.forecast_origin().to_rfc3339(), "2024-01-06T00:00:00+00:00");
    }
}
