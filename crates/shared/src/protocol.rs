use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{domain::ProjectId, error::SortKeyProblem};

pub const YEAR_PLACEHOLDER: &str = "{year}";

pub fn projects_by_year_route() -> &'static str {
    "api/full_projects/year/{year}"
}

pub fn working_directory_route() -> &'static str {
    "api/full_projects/workingdir"
}

pub fn years_route() -> &'static str {
    "api/projects/year"
}

pub fn version_route() -> &'static str {
    "api/version"
}

/// Projects keyed by identifier, exactly as the server delivers them.
///
/// Keys iterate in ascending identifier order, which is what makes ties in
/// `sort_index` resolve the same way on every run.
pub type ProjectMap = BTreeMap<ProjectId, ProjectRecord>;

/// A server-defined project export. Only `extras.sort_index` is interpreted;
/// everything else passes through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectRecord(Value);

impl ProjectRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn extras(&self) -> Option<&Map<String, Value>> {
        self.0.get("extras").and_then(Value::as_object)
    }

    pub fn sort_index(&self) -> Result<SortIndex, SortKeyProblem> {
        let extras = self.extras().ok_or(SortKeyProblem::MissingExtras)?;
        let raw = extras
            .get("sort_index")
            .ok_or(SortKeyProblem::MissingSortIndex)?;
        SortIndex::from_json(raw)
    }
}

/// Opaque build metadata reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionInfo(Value);

impl VersionInfo {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Ordering key of a project.
///
/// Numbers compare by value with each other and sort before all strings;
/// strings compare bytewise.
#[derive(Debug, Clone)]
pub enum SortIndex {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SortIndex {
    pub fn from_json(value: &Value) -> Result<Self, SortKeyProblem> {
        match value {
            Value::Null => Err(SortKeyProblem::NullSortIndex),
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    return Ok(Self::Integer(int));
                }
                match number.as_f64() {
                    // folds -0.0 into 0.0
                    Some(float) if float == 0.0 => Ok(Self::Float(0.0)),
                    Some(float) => Ok(Self::Float(float)),
                    None => Err(SortKeyProblem::UnsupportedType("number")),
                }
            }
            Value::Bool(_) => Err(SortKeyProblem::UnsupportedType("boolean")),
            Value::Array(_) => Err(SortKeyProblem::UnsupportedType("array")),
            Value::Object(_) => Err(SortKeyProblem::UnsupportedType("object")),
        }
    }
}

// 2^63, the first float above every i64.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn cmp_integer_float(int: i64, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_BOUND {
        return Ordering::Less;
    }
    if float < -I64_BOUND {
        return Ordering::Greater;
    }
    // floor lies in [-2^63, 2^63) here, so the cast is exact.
    let floor = float.floor();
    int.cmp(&(floor as i64)).then(if float > floor {
        Ordering::Less
    } else {
        Ordering::Equal
    })
}

impl Ord for SortIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => {
                a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b))
            }
            (Self::Integer(a), Self::Float(b)) => cmp_integer_float(*a, *b),
            (Self::Float(a), Self::Integer(b)) => cmp_integer_float(*b, *a).reverse(),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Text(_), _) => Ordering::Greater,
            (_, Self::Text(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for SortIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortIndex {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortIndex {}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YearValue {
    Text(String),
    Number(i64),
}

/// Years as listed by the server. The server keeps years as integers, older
/// deployments send strings; both come out as strings here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearsPayload(pub Vec<String>);

impl<'de> Deserialize<'de> for YearsPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<YearValue>::deserialize(deserializer)?;
        Ok(Self(
            values
                .into_iter()
                .map(|value| match value {
                    YearValue::Text(text) => text,
                    YearValue::Number(number) => number.to_string(),
                })
                .collect(),
        ))
    }
}
