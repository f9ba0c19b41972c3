use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaViolation;
use crate::instrument::{InstrumentError, InstrumentReference, InstrumentRiskMetric};
use crate::nullable::Nullable;
use crate::validate::validate;

/// Discriminator of the only item type defined so far
pub const INSTRUMENT_TYPE: &str = "instrument";

/// Nested group keys of an instrument item, in wire order
pub const GROUP_NAMES: [&str; 7] = [
    "instrumentreference",
    "instrumentriskmetric",
    "instrumentcashflow",
    "instrumenttimebucketmeasures",
    "instrumenterror",
    "accounttimebucketmeasures",
    "accountcashflow",
];

/// Root envelope of one analysis run within a job.
///
/// Identifiers are set once at construction and cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMessage {
    jobidentifier: String,
    analysisidentifier: String,
    data: Vec<DataItem>,
}

impl AnalysisMessage {
    /// Build and validate a message
    pub fn new(
        jobidentifier: impl Into<String>,
        analysisidentifier: impl Into<String>,
        data: Vec<DataItem>,
    ) -> Result<Self, SchemaViolation> {
        let message = Self {
            jobidentifier: jobidentifier.into(),
            analysisidentifier: analysisidentifier.into(),
            data,
        };
        validate(&message)?;
        Ok(message)
    }

    pub fn job_identifier(&self) -> &str {
        &self.jobidentifier
    }

    pub fn analysis_identifier(&self) -> &str {
        &self.analysisidentifier
    }

    pub fn data(&self) -> &[DataItem] {
        &self.data
    }

    /// First instrument identifier referenced anywhere in the message
    pub fn first_instrument(&self) -> Option<&str> {
        self.data.iter().find_map(DataItem::instrument_identifier)
    }

    /// First account identifier referenced anywhere in the message
    pub fn first_account(&self) -> Option<&str> {
        self.data.iter().find_map(DataItem::account_identifier)
    }
}

/// One entry of `data`, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataItem {
    Instrument(InstrumentItem),
}

impl DataItem {
    pub fn type_name(&self) -> &'static str {
        match self {
            DataItem::Instrument(_) => INSTRUMENT_TYPE,
        }
    }

    pub fn instrument_identifier(&self) -> Option<&str> {
        match self {
            DataItem::Instrument(item) => item.instrument_identifier(),
        }
    }

    pub fn account_identifier(&self) -> Option<&str> {
        match self {
            DataItem::Instrument(item) => item.account_identifier(),
        }
    }
}

/// Results computed for one instrument. Every group is optional; an absent
/// group was not computed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentItem {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentreference: Nullable<InstrumentReference>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentriskmetric: Nullable<Vec<InstrumentRiskMetric>>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentcashflow: Nullable<Value>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumenttimebucketmeasures: Nullable<Value>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumenterror: Nullable<Vec<InstrumentError>>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub accounttimebucketmeasures: Nullable<Value>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub accountcashflow: Nullable<Value>,
}

impl InstrumentItem {
    /// Identifier from the reference, else the first risk metric, else the first error
    pub fn instrument_identifier(&self) -> Option<&str> {
        if let Some(reference) = self.instrumentreference.as_value() {
            return Some(&reference.instrumentidentifier);
        }
        if let Some(metric) = self.risk_metrics().first() {
            return Some(&metric.instrumentidentifier);
        }
        self.errors().first().map(|e| e.instrumentidentifier.as_str())
    }

    pub fn account_identifier(&self) -> Option<&str> {
        self.instrumentreference
            .as_value()
            .and_then(|r| r.accountidentifier.as_value())
            .map(String::as_str)
    }

    pub fn risk_metrics(&self) -> &[InstrumentRiskMetric] {
        self.instrumentriskmetric.as_value().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn errors(&self) -> &[InstrumentError] {
        self.instrumenterror.as_value().map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether the named group carries a value. Lists must be non-empty.
    pub fn is_populated(&self, group: &str) -> bool {
        match group {
            "instrumentreference" => self.instrumentreference.is_value(),
            "instrumentriskmetric" => !self.risk_metrics().is_empty(),
            "instrumentcashflow" => self.instrumentcashflow.is_value(),
            "instrumenttimebucketmeasures" => self.instrumenttimebucketmeasures.is_value(),
            "instrumenterror" => !self.errors().is_empty(),
            "accounttimebucketmeasures" => self.accounttimebucketmeasures.is_value(),
            "accountcashflow" => self.accountcashflow.is_value(),
            _ => false,
        }
    }

    pub fn populated_groups(&self) -> usize {
        GROUP_NAMES.iter().filter(|g| self.is_populated(g)).count()
    }
}

/// Serialize a message to its wire form
pub fn encode(message: &AnalysisMessage) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}

fn required_identifier(root: &serde_json::Map<String, Value>, key: &str) -> Result<String, SchemaViolation> {
    match root.get(key) {
        None | Some(Value::Null) => Err(SchemaViolation::new(key, "missing identifier")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SchemaViolation::new(key, "identifier must be a string")),
    }
}

/// Parse and validate a wire payload. On failure the violation names the first
/// offending field; malformed JSON reports path `$`.
pub fn decode(bytes: &[u8]) -> Result<AnalysisMessage, SchemaViolation> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| SchemaViolation::new("$", format!("malformed JSON: {}", e)))?;
    let Value::Object(mut root) = value else {
        return Err(SchemaViolation::new("$", "message must be a JSON object"));
    };

    let jobidentifier = required_identifier(&root, "jobidentifier")?;
    let analysisidentifier = required_identifier(&root, "analysisidentifier")?;

    let raw_items = match root.remove("data") {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => return Err(SchemaViolation::new("data", "missing data array")),
        Some(_) => return Err(SchemaViolation::new("data", "data must be an array")),
    };

    let mut data = Vec::with_capacity(raw_items.len());
    for (i, raw) in raw_items.into_iter().enumerate() {
        data.push(decode_item(i, raw)?);
    }

    AnalysisMessage::new(jobidentifier, analysisidentifier, data)
}

fn decode_item(index: usize, raw: Value) -> Result<DataItem, SchemaViolation> {
    let path = format!("data[{}]", index);
    let Value::Object(mut fields) = raw else {
        return Err(SchemaViolation::new(path, "item must be a JSON object"));
    };

    match fields.get("type") {
        Some(Value::String(t)) if t == INSTRUMENT_TYPE => {}
        Some(Value::String(t)) => {
            return Err(SchemaViolation::new(
                format!("{}.type", path),
                format!("unknown item type '{}'", t),
            ))
        }
        _ => return Err(SchemaViolation::new(format!("{}.type", path), "missing item type")),
    }
    fields.remove("type");

    let mut item = InstrumentItem::default();
    for group in GROUP_NAMES {
        let Some(value) = fields.remove(group) else {
            continue;
        };
        let group_path = format!("{}.{}", path, group);
        match group {
            "instrumentreference" => item.instrumentreference = parse_group(&group_path, value)?,
            "instrumentriskmetric" => item.instrumentriskmetric = parse_list(&group_path, value)?,
            "instrumenterror" => item.instrumenterror = parse_list(&group_path, value)?,
            "instrumentcashflow" => item.instrumentcashflow = value.into_nullable(),
            "instrumenttimebucketmeasures" => item.instrumenttimebucketmeasures = value.into_nullable(),
            "accounttimebucketmeasures" => item.accounttimebucketmeasures = value.into_nullable(),
            "accountcashflow" => item.accountcashflow = value.into_nullable(),
            _ => {}
        }
    }

    Ok(DataItem::Instrument(item))
}

trait IntoNullable {
    fn into_nullable(self) -> Nullable<Value>;
}

impl IntoNullable for Value {
    fn into_nullable(self) -> Nullable<Value> {
        match self {
            Value::Null => Nullable::Null,
            other => Nullable::Value(other),
        }
    }
}

fn parse_group<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<Nullable<T>, SchemaViolation> {
    if value.is_null() {
        return Ok(Nullable::Null);
    }
    serde_json::from_value(value)
        .map(Nullable::Value)
        .map_err(|e| SchemaViolation::new(path, e.to_string()))
}

fn parse_list<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<Nullable<Vec<T>>, SchemaViolation> {
    let entries = match value {
        Value::Null => return Ok(Nullable::Null),
        Value::Array(entries) => entries,
        _ => return Err(SchemaViolation::new(path, "expected an array")),
    };
    let mut parsed = Vec::with_capacity(entries.len());
    for (j, entry) in entries.into_iter().enumerate() {
        let entry_path = format!("{}[{}]", path, j);
        let value = serde_json::from_value(entry).map_err(|e| SchemaViolation::new(entry_path, e.to_string()))?;
        parsed.push(value);
    }
    Ok(Nullable::Value(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_only_item() -> DataItem {
        let mut error = InstrumentError::new("Bond_1", 1, "High prepayment rate", "Warning");
        error.modulecode = Nullable::Value(101);
        DataItem::Instrument(InstrumentItem {
            instrumenterror: Nullable::Value(vec![error]),
            ..Default::default()
        })
    }

    #[test]
    fn test_new_validates_identifiers() {
        let err = AnalysisMessage::new("", "an-1", vec![error_only_item()]).unwrap_err();
        assert_eq!(err.path, "jobidentifier");
        let err = AnalysisMessage::new("job-1", " ", vec![error_only_item()]).unwrap_err();
        assert_eq!(err.path, "analysisidentifier");
    }

    #[test]
    fn test_encode_omits_absent_groups() {
        let msg = AnalysisMessage::new("job-1", "an-1", vec![error_only_item()]).unwrap();
        let json: Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        let item = &json["data"][0];
        assert_eq!(item["type"], "instrument");
        assert!(item.get("instrumentriskmetric").is_none());
        assert_eq!(item["instrumenterror"][0]["modulecode"], 101);
    }

    #[test]
    fn test_round_trip_preserves_absent_null_and_zero() {
        let mut metric = InstrumentRiskMetric::new("Bond_1", "Base", "Standard Risk Model", "Risk Assessment", "2025-01-15", 1.0);
        metric.lgd = Nullable::Value(0.0);
        metric.ead = Nullable::Null;
        let item = DataItem::Instrument(InstrumentItem {
            instrumentriskmetric: Nullable::Value(vec![metric]),
            instrumentcashflow: Nullable::Null,
            accountcashflow: Nullable::Value(serde_json::json!({"flows": [0, 125.5]})),
            ..Default::default()
        });
        let original = AnalysisMessage::new("job-1", "an-1", vec![item]).unwrap();

        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);

        let DataItem::Instrument(item) = &decoded.data()[0];
        let metric = &item.risk_metrics()[0];
        assert_eq!(metric.lgd, Nullable::Value(0.0));
        assert_eq!(metric.ead, Nullable::Null);
        assert!(metric.ccf.is_absent());
        assert!(item.instrumentcashflow.is_null());
        assert!(item.instrumenttimebucketmeasures.is_absent());
    }

    #[test]
    fn test_decode_unknown_type() {
        let payload = br#"{"jobidentifier":"job-1","analysisidentifier":"an-1","data":[
            {"type":"instrument","instrumenterror":[{"instrumentidentifier":"B","errorcode":1,"errormessage":"m","severity":"Warning"}]},
            {"type":"instrument","instrumentcashflow":{"a":1}},
            {"type":"portfolio"}
        ]}"#;
        let err = decode(payload).unwrap_err();
        assert_eq!(err.path, "data[2].type");
    }

    #[test]
    fn test_decode_missing_identifier() {
        let err = decode(br#"{"analysisidentifier":"an-1","data":[]}"#).unwrap_err();
        assert_eq!(err.path, "jobidentifier");
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.path, "$");
    }

    #[test]
    fn test_decode_bad_group_entry_path() {
        let payload = br#"{"jobidentifier":"job-1","analysisidentifier":"an-1","data":[
            {"type":"instrument","instrumentriskmetric":[
                {"instrumentidentifier":"B","scenarioidentifier":"Base","modelname":"m","modeloutput":"o","asofdate":"2025-01-15","term":1.0},
                {"instrumentidentifier":"B","term":"one"}
            ]}
        ]}"#;
        let err = decode(payload).unwrap_err();
        assert_eq!(err.path, "data[0].instrumentriskmetric[1]");
    }

    #[test]
    fn test_first_instrument_falls_back_to_errors() {
        let msg = AnalysisMessage::new("job-1", "an-1", vec![error_only_item()]).unwrap();
        assert_eq!(msg.first_instrument(), Some("Bond_1"));
        assert_eq!(msg.first_account(), None);
    }
}
