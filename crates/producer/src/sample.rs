//! Realistic sample messages for smoke tests and demos.

use chrono::{Duration, NaiveDate, Utc};
use finstream_metadata::{InstrumentDefaults, RiskDefaults, SampleConfig};
use finstream_model::{
    AnalysisMessage, DataItem, InstrumentError, InstrumentItem, InstrumentReference,
    InstrumentRiskMetric, Nullable, SchemaViolation,
};
use uuid::Uuid;

const NOTIONAL: f64 = 1_000_000.0;

fn date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub struct SampleGenerator {
    instrument: InstrumentDefaults,
    risk: RiskDefaults,
}

impl SampleGenerator {
    pub fn new(config: &SampleConfig) -> Self {
        Self {
            instrument: config.instrument.clone(),
            risk: config.risk.clone(),
        }
    }

    fn portfolio(&self) -> String {
        format!("{}_01", self.instrument.portfolio_prefix)
    }

    /// A five-year fixed-rate bond held on the asset side
    pub fn instrument_reference(&self, analysis_id: &str, job_id: &str) -> InstrumentReference {
        let today = Utc::now().date_naive();
        let maturity = date(today + Duration::days(1825));

        let mut r = InstrumentReference::new(format!("Bond_{}", &Uuid::new_v4().simple().to_string()[..8]));
        r.analysisidentifier = Nullable::Value(analysis_id.to_string());
        r.asofdate = Nullable::Value(date(today));
        r.accountidentifier = Nullable::Value("TPS/CD/CP_AFS".to_string());
        r.accountname = Nullable::Null;
        r.instrumentname = Nullable::Null;
        r.description = Nullable::Value("Corporate Bond Investment".to_string());
        r.instrumenttype = Nullable::Value(self.instrument.instrument_type.clone());
        r.originationdate = Nullable::Value(date(today - Duration::days(30)));
        r.maturitydate = Nullable::Value(maturity.clone());
        r.amortizationtype = Nullable::Value("Constant installment".to_string());
        r.amortizationenddate = Nullable::Value(maturity);
        r.instrumentcurrency = Nullable::Value(self.instrument.currency.clone());
        r.unpaidprincipalbalance = Nullable::Value("1000000".to_string());
        r.marketpriceoverride = Nullable::Value("102.5".to_string());
        r.currentbookpriceoverride = Nullable::Value("100".to_string());
        r.interestratetype = Nullable::Value("Fixed".to_string());
        r.interestpaymentfrequency = Nullable::Value("Semi-Annual".to_string());
        r.currentrate = Nullable::Value(0.0325);
        r.portfolioidentifier = Nullable::Value(self.portfolio());
        r.interestratespread = Nullable::Value(0.0);
        r.interestrateindexmultiplier = Nullable::Value(0.0);
        r.interestrateindex = Nullable::Value("10YT".to_string());
        r.lifetimeinterestratecap = Nullable::Value(99.0);
        r.lifetimeinterestratefloor = Nullable::Value(0.0);
        r.periodicinterestratecap = Nullable::Value(99.0);
        r.periodicratefloor = Nullable::Value(0.0);
        r.daycount = Nullable::Value(self.instrument.day_count.clone());
        r.optionadjustedspreadoverride = Nullable::Value(0.0);
        r.servicingspread = Nullable::Value(0.0);
        r.company = Nullable::Value(self.instrument.company.clone());
        r.discountcurve = Nullable::Value(self.instrument.discount_curve.clone());
        r.accountside = Nullable::Value(self.instrument.account_side.clone());
        r.jobidentifier = Nullable::Value(job_id.to_string());
        r.cashfloworder = Nullable::Value(10_000);
        r.cashflowsource = Nullable::Value("API model".to_string());
        r.cashflowmodelname = Nullable::Value("Standard Cash Flow Model".to_string());
        r.prepaymentorder = Nullable::Value(10_000);
        r.prepaymentsource = Nullable::Value("Statistical model".to_string());
        r.prepaymentmodelname = Nullable::Value("Standard Prepayment Model".to_string());
        r.prepaymentshift = Nullable::Value(0.0);
        r.prepaymentscalingfactor = Nullable::Value(1.0);
        r
    }

    /// One-year risk metrics per as-of date
    pub fn risk_metrics(&self, instrument_id: &str, as_of_dates: &[String]) -> Vec<InstrumentRiskMetric> {
        let lgd = self.risk.default_lgd;
        let pd = self.risk.default_pd;

        as_of_dates
            .iter()
            .map(|as_of| {
                let mut m = InstrumentRiskMetric::new(
                    instrument_id,
                    self.risk.scenario_identifier.clone(),
                    self.risk.model_name.clone(),
                    self.risk.model_output.clone(),
                    as_of.clone(),
                    1.0,
                );
                m.annualizedcumulativepd = Nullable::Value(pd);
                m.forwardpd = Nullable::Value(0.011);
                m.cumulativepd = Nullable::Value(pd);
                m.marginalpd = Nullable::Value(0.001);
                m.lgd = Nullable::Value(lgd);
                m.lossrateannualized = Nullable::Value(0.0054);
                m.lossratecumulative = Nullable::Value(0.0054);
                m.ead = Nullable::Value(NOTIONAL);
                m.forwardprepaymentrate = Nullable::Value(0.15);
                m.recovery = Nullable::Value(1.0 - lgd);
                m.annualizedpdoneyearprojection = Nullable::Value(0.013);
                m.stage1conditionalannualizedcumulativepd = Nullable::Value(0.01);
                m.stage2conditionalannualizedcumulativepd = Nullable::Value(0.05);
                m.stage3conditionalannualizedcumulativepd = Nullable::Value(0.95);
                m.impliedstagerating = Nullable::Value("Investment Grade".to_string());
                m.expectedcreditlossamount = Nullable::Value(5400.0);
                m.expectedcreditlossamountlifetimeprojection = Nullable::Value(27_000.0);
                m.expectedcreditlossamountoneyearprojection = Nullable::Value(5400.0);
                m.exposure = Nullable::Value(NOTIONAL);
                m.grossinterestincome = Nullable::Value(32_500.0);
                m.riskweightedassets = Nullable::Value(NOTIONAL * self.risk.risk_weight);
                m.stage1portion = Nullable::Value(0.85);
                m.stage2portion = Nullable::Value(0.12);
                m.stage3portion = Nullable::Value(0.03);
                m.transitionprobabilityfromstage1tostage2 = Nullable::Value(0.05);
                m.transitionprobabilityfromstage1tostage3 = Nullable::Value(0.002);
                m.transitionprobabilityfromstage2tostage1 = Nullable::Value(0.15);
                m.transitionprobabilityfromstage2tostage3 = Nullable::Value(0.08);
                m.transitionprobabilityfromstage3tostage2 = Nullable::Value(0.1);
                m.balancegrowthrate = Nullable::Value(0.02);
                m.edfimpliedrating = Nullable::Value("BBB".to_string());
                m
            })
            .collect()
    }

    pub fn errors(&self, analysis_id: &str, job_id: &str, instrument_id: &str) -> Vec<InstrumentError> {
        let mut e = InstrumentError::new(
            instrument_id,
            1,
            format!("Warning: High prepayment rate detected for instrument {}", instrument_id),
            "Warning",
        );
        e.analysisidentifier = Nullable::Value(analysis_id.to_string());
        e.jobidentifier = Nullable::Value(job_id.to_string());
        e.modulecode = Nullable::Value(101);
        e.asofdate = Nullable::Null;
        e.scenarioidentifier = Nullable::Null;
        e.portfolioidentifier = Nullable::Value(self.portfolio());
        vec![e]
    }

    /// A complete message: one instrument with a reference, metrics for today
    /// and one year out, and a warning
    pub fn generate(&self) -> Result<AnalysisMessage, SchemaViolation> {
        let job_id = Uuid::new_v4().to_string();
        let analysis_id = Uuid::new_v4().to_string();

        let reference = self.instrument_reference(&analysis_id, &job_id);
        let instrument_id = reference.instrumentidentifier.clone();
        let today = Utc::now().date_naive();
        let dates = [date(today), date(today + Duration::days(365))];

        let item = InstrumentItem {
            instrumentriskmetric: Nullable::Value(self.risk_metrics(&instrument_id, &dates)),
            instrumenterror: Nullable::Value(self.errors(&analysis_id, &job_id, &instrument_id)),
            instrumentreference: Nullable::Value(reference),
            instrumentcashflow: Nullable::Null,
            instrumenttimebucketmeasures: Nullable::Null,
            accounttimebucketmeasures: Nullable::Null,
            accountcashflow: Nullable::Null,
        };

        AnalysisMessage::new(job_id, analysis_id, vec![DataItem::Instrument(item)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_valid_and_complete() {
        let generator = SampleGenerator::new(&SampleConfig::default());
        let message = generator.generate().unwrap();
        assert_eq!(message.data().len(), 1);

        let DataItem::Instrument(item) = &message.data()[0];
        let reference = item.instrumentreference.as_value().unwrap();
        assert!(reference.instrumentidentifier.starts_with("Bond_"));
        assert_eq!(reference.instrumentcurrency, Nullable::Value("USD".to_string()));
        assert_eq!(reference.portfolioidentifier, Nullable::Value("CORPORATE_BONDS_01".to_string()));
        assert_eq!(item.risk_metrics().len(), 2);
        assert!(item.risk_metrics().iter().all(|m| m.has_default_statistics()));
        assert_eq!(item.errors()[0].modulecode, Nullable::Value(101));
        assert!(item.instrumentcashflow.is_null());
    }

    #[test]
    fn test_risk_defaults_flow_into_metrics() {
        let mut config = SampleConfig::default();
        config.risk.default_lgd = 0.6;
        config.risk.risk_weight = 1.0;
        let generator = SampleGenerator::new(&config);
        let metrics = generator.risk_metrics("Bond_1", &["2025-01-15".to_string()]);
        assert_eq!(metrics[0].lgd, Nullable::Value(0.6));
        assert_eq!(metrics[0].riskweightedassets, Nullable::Value(NOTIONAL));
        assert_eq!(metrics[0].scenarioidentifier, "Base");
    }

    #[test]
    fn test_messages_have_unique_identifiers() {
        let generator = SampleGenerator::new(&SampleConfig::default());
        let a = generator.generate().unwrap();
        let b = generator.generate().unwrap();
        assert_ne!(a.job_identifier(), b.job_identifier());
    }
}
