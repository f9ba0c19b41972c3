use crate::error::SchemaViolation;
use crate::message::{AnalysisMessage, DataItem, InstrumentItem};

/// Check a message against the schema. Reports the first offending field.
///
/// - both identifiers must be non-blank
/// - every item must populate at least one nested group
/// - a risk metric carrying an expected credit loss must also carry a
///   probability of default, a loss given default and an exposure at default
pub fn validate(message: &AnalysisMessage) -> Result<(), SchemaViolation> {
    if message.job_identifier().trim().is_empty() {
        return Err(SchemaViolation::new("jobidentifier", "identifier must not be empty"));
    }
    if message.analysis_identifier().trim().is_empty() {
        return Err(SchemaViolation::new("analysisidentifier", "identifier must not be empty"));
    }

    for (i, item) in message.data().iter().enumerate() {
        match item {
            DataItem::Instrument(instrument) => validate_instrument(i, instrument)?,
        }
    }
    Ok(())
}

fn validate_instrument(index: usize, item: &InstrumentItem) -> Result<(), SchemaViolation> {
    if item.populated_groups() == 0 {
        return Err(SchemaViolation::new(
            format!("data[{}]", index),
            "item has no populated groups",
        ));
    }

    for (j, metric) in item.risk_metrics().iter().enumerate() {
        if metric.expectedcreditlossamount.is_value() && !metric.has_default_statistics() {
            return Err(SchemaViolation::new(
                format!("data[{}].instrumentriskmetric[{}].expectedcreditlossamount", index, j),
                "expected credit loss requires probability of default, lgd and ead",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{InstrumentError, InstrumentReference, InstrumentRiskMetric};
    use crate::nullable::Nullable;

    fn metric() -> InstrumentRiskMetric {
        InstrumentRiskMetric::new("Bond_1", "Base", "Standard Risk Model", "Risk Assessment", "2025-01-15", 1.0)
    }

    fn item_with_metrics(metrics: Vec<InstrumentRiskMetric>) -> DataItem {
        DataItem::Instrument(InstrumentItem {
            instrumentriskmetric: Nullable::Value(metrics),
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_item_is_rejected() {
        let reference = DataItem::Instrument(InstrumentItem {
            instrumentreference: Nullable::Value(InstrumentReference::new("Bond_1")),
            ..Default::default()
        });
        let empty = DataItem::Instrument(InstrumentItem {
            instrumentcashflow: Nullable::Null,
            instrumenterror: Nullable::Value(vec![]),
            ..Default::default()
        });
        let err = AnalysisMessage::new("job-1", "an-1", vec![reference, empty]).unwrap_err();
        assert_eq!(err.path, "data[1]");
    }

    #[test]
    fn test_ecl_without_default_statistics() {
        let complete = {
            let mut m = metric();
            m.expectedcreditlossamount = Nullable::Value(5400.0);
            m.cumulativepd = Nullable::Value(0.012);
            m.lgd = Nullable::Value(0.45);
            m.ead = Nullable::Value(1_000_000.0);
            m
        };
        let mut missing_ead = complete.clone();
        missing_ead.ead = Nullable::Absent;

        let err = AnalysisMessage::new("job-1", "an-1", vec![item_with_metrics(vec![complete, missing_ead])])
            .unwrap_err();
        assert_eq!(err.path, "data[0].instrumentriskmetric[1].expectedcreditlossamount");
    }

    #[test]
    fn test_null_ecl_needs_no_statistics() {
        let mut m = metric();
        m.expectedcreditlossamount = Nullable::Null;
        assert!(AnalysisMessage::new("job-1", "an-1", vec![item_with_metrics(vec![m])]).is_ok());
    }

    #[test]
    fn test_error_only_item_is_valid() {
        let item = DataItem::Instrument(InstrumentItem {
            instrumenterror: Nullable::Value(vec![InstrumentError::new("Bond_1", 1, "warn", "Warning")]),
            ..Default::default()
        });
        assert!(AnalysisMessage::new("job-1", "an-1", vec![item]).is_ok());
    }

    #[test]
    fn test_empty_data_is_valid() {
        assert!(AnalysisMessage::new("job-1", "an-1", vec![]).is_ok());
    }
}
