use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Closed set of product models that per-model throughput yield is broken down by.
///
/// Each tag has three spellings: the document key (`SXM4`, also the `Display`/`FromStr`
/// form), the fragment used in flat legacy column names (`sxm4`), and the model
/// name stored in `weekly_tpy_model_metrics.model` (`Tesla SXM4`).
#[derive(
    AsRefStr, EnumIter, EnumString, Display, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone,
)]
pub enum ModelTag {
    #[strum(serialize = "SXM4")]
    Sxm4,
    #[strum(serialize = "SXM5")]
    Sxm5,
}

impl ModelTag {
    pub fn doc_key(&self) -> &'static str {
        match self {
            ModelTag::Sxm4 => "SXM4",
            ModelTag::Sxm5 => "SXM5",
        }
    }

    pub fn column_fragment(&self) -> &'static str {
        match self {
            ModelTag::Sxm4 => "sxm4",
            ModelTag::Sxm5 => "sxm5",
        }
    }

    pub fn model_name(&self) -> &'static str {
        match self {
            ModelTag::Sxm4 => "Tesla SXM4",
            ModelTag::Sxm5 => "Tesla SXM5",
        }
    }

    pub fn from_model_name(name: &str) -> Option<ModelTag> {
        ModelTag::iter().find(|tag| tag.model_name() == name)
    }
}

/// Fixed-point percentage with exactly two fractional digits, held as hundredths.
///
/// Stored in `DECIMAL(5,2)` columns. SQLite hands these back as REAL or INTEGER
/// depending on the value, so reads go through `f64` and are rounded to the
/// nearest hundredth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const HUNDRED: Percent = Percent(10_000);

    pub fn from_hundredths(hundredths: i64) -> Self {
        Percent(hundredths)
    }

    pub fn from_f64(value: f64) -> Self {
        Percent((value * 100.0).round() as i64)
    }

    pub fn hundredths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_in_range(self) -> bool {
        (Self::ZERO..=Self::HUNDRED).contains(&self)
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        f64::deserialize(deserializer).map(Percent::from_f64)
    }
}

impl FromSql for Percent {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        f64::column_result(value).map(Percent::from_f64)
    }
}

impl ToSql for Percent {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_f64()))
    }
}

/// Station lists arrive as serialized JSON text. In the embedded document they
/// are stored as structured lists; any other text (including JSON scalars such
/// as `null`) is kept verbatim as a JSON string. A non-null column therefore
/// never reads back as null.
pub fn parse_stations(text: Option<String>) -> Option<Value> {
    text.map(|text| match serde_json::from_str(&text) {
        Ok(value @ (Value::Array(_) | Value::Object(_))) => value,
        _ => Value::String(text),
    })
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HardcodedMetrics {
    pub stations: Option<Value>,
    pub tpy: Option<Percent>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DynamicMetrics {
    pub stations: Option<Value>,
    pub tpy: Option<Percent>,
    #[serde(rename = "stationCount")]
    pub station_count: Option<i64>,
}

/// Hardcoded and dynamically computed throughput yield for one model in one week.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelMetrics {
    pub hardcoded: HardcodedMetrics,
    pub dynamic: DynamicMetrics,
}

impl ModelMetrics {
    pub fn from_columns(
        hardcoded_stations: Option<String>,
        hardcoded_tpy: Option<Percent>,
        dynamic_stations: Option<String>,
        dynamic_tpy: Option<Percent>,
        dynamic_station_count: Option<i64>,
    ) -> Self {
        ModelMetrics {
            hardcoded: HardcodedMetrics {
                stations: parse_stations(hardcoded_stations),
                tpy: hardcoded_tpy,
            },
            dynamic: DynamicMetrics {
                stations: parse_stations(dynamic_stations),
                tpy: dynamic_tpy,
                station_count: dynamic_station_count,
            },
        }
    }

    /// True when every field is null
    pub fn is_empty(&self) -> bool {
        self.hardcoded.stations.is_none()
            && self.hardcoded.tpy.is_none()
            && self.dynamic.stations.is_none()
            && self.dynamic.tpy.is_none()
            && self.dynamic.station_count.is_none()
    }

    pub fn tpy_values(&self) -> impl Iterator<Item = Percent> {
        [self.hardcoded.tpy, self.dynamic.tpy].into_iter().flatten()
    }
}

/// Contents of the `weekly_throughput_yield_model_specific` document: one entry
/// for every known model, always. Unknown keys are rejected on read.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelSpecificMetrics {
    #[serde(rename = "SXM4")]
    pub sxm4: ModelMetrics,
    #[serde(rename = "SXM5")]
    pub sxm5: ModelMetrics,
}

impl ModelSpecificMetrics {
    pub fn get(&self, tag: ModelTag) -> &ModelMetrics {
        match tag {
            ModelTag::Sxm4 => &self.sxm4,
            ModelTag::Sxm5 => &self.sxm5,
        }
    }

    pub fn get_mut(&mut self, tag: ModelTag) -> &mut ModelMetrics {
        match tag {
            ModelTag::Sxm4 => &mut self.sxm4,
            ModelTag::Sxm5 => &mut self.sxm5,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModelTag, &ModelMetrics)> {
        ModelTag::iter().map(move |tag| (tag, self.get(tag)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, metrics)| metrics.is_empty())
    }
}
