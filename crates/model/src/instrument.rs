use serde::{Deserialize, Serialize};

use crate::nullable::Nullable;

/// Descriptive attributes of an instrument and the account that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentReference {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub analysisidentifier: Nullable<String>,
    pub instrumentidentifier: String,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub asofdate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub accountidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub accountname: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentname: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub description: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumenttype: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentsubtype: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub consumerproductcategory: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub originationdate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub maturitydate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub amortizationtype: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub amortizationenddate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub isinterestonly: Nullable<bool>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cashflowtype: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub instrumentcurrency: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub notionalportion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub unpaidprincipalbalance: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub currentcommitmentamount: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub marketpriceoverride: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub fixedpaymentamount: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub currentbookpriceoverride: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestratetype: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestpaymentfrequency: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub curerate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub fixedrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub currentrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub portfolioidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestratespread: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestrateindexmultiplier: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestrateindex: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lifetimeinterestratecap: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lifetimeinterestratefloor: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub periodicinterestratecap: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub periodicratefloor: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestrateresetfirstdate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub interestrateresetfrequency: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub daycount: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub optionadjustedspreadoverride: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub modified: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub parmarketprice: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub servicingspread: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub company: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub discountcurve: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub accountside: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub jobidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cashfloworder: Nullable<i64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cashflowsource: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cashflowmodelname: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentorder: Nullable<i64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentsource: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentmodelname: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentshift: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentscalingfactor: Nullable<f64>,
}

impl InstrumentReference {
    /// Build with the required attributes; everything else starts absent.
    pub fn new(instrumentidentifier: impl Into<String>) -> Self {
        Self {
            analysisidentifier: Nullable::Absent,
            instrumentidentifier: instrumentidentifier.into(),
            asofdate: Nullable::Absent,
            accountidentifier: Nullable::Absent,
            accountname: Nullable::Absent,
            instrumentname: Nullable::Absent,
            description: Nullable::Absent,
            instrumenttype: Nullable::Absent,
            instrumentsubtype: Nullable::Absent,
            consumerproductcategory: Nullable::Absent,
            originationdate: Nullable::Absent,
            maturitydate: Nullable::Absent,
            amortizationtype: Nullable::Absent,
            amortizationenddate: Nullable::Absent,
            isinterestonly: Nullable::Absent,
            cashflowtype: Nullable::Absent,
            instrumentcurrency: Nullable::Absent,
            notionalportion: Nullable::Absent,
            unpaidprincipalbalance: Nullable::Absent,
            currentcommitmentamount: Nullable::Absent,
            marketpriceoverride: Nullable::Absent,
            fixedpaymentamount: Nullable::Absent,
            currentbookpriceoverride: Nullable::Absent,
            interestratetype: Nullable::Absent,
            interestpaymentfrequency: Nullable::Absent,
            curerate: Nullable::Absent,
            fixedrate: Nullable::Absent,
            currentrate: Nullable::Absent,
            portfolioidentifier: Nullable::Absent,
            interestratespread: Nullable::Absent,
            interestrateindexmultiplier: Nullable::Absent,
            interestrateindex: Nullable::Absent,
            lifetimeinterestratecap: Nullable::Absent,
            lifetimeinterestratefloor: Nullable::Absent,
            periodicinterestratecap: Nullable::Absent,
            periodicratefloor: Nullable::Absent,
            interestrateresetfirstdate: Nullable::Absent,
            interestrateresetfrequency: Nullable::Absent,
            daycount: Nullable::Absent,
            optionadjustedspreadoverride: Nullable::Absent,
            modified: Nullable::Absent,
            parmarketprice: Nullable::Absent,
            servicingspread: Nullable::Absent,
            company: Nullable::Absent,
            discountcurve: Nullable::Absent,
            accountside: Nullable::Absent,
            jobidentifier: Nullable::Absent,
            cashfloworder: Nullable::Absent,
            cashflowsource: Nullable::Absent,
            cashflowmodelname: Nullable::Absent,
            prepaymentorder: Nullable::Absent,
            prepaymentsource: Nullable::Absent,
            prepaymentmodelname: Nullable::Absent,
            prepaymentshift: Nullable::Absent,
            prepaymentscalingfactor: Nullable::Absent,
        }
    }
}

/// One risk calculation for an instrument under a scenario at an as-of date.
///
/// PD = probability of default, LGD = loss given default, EAD = exposure at
/// default, ECL = expected credit loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRiskMetric {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub analysisidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub reportingdate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub inputscenarioidentifier: Nullable<String>,
    pub instrumentidentifier: String,
    pub scenarioidentifier: String,
    pub modelname: String,
    pub modeloutput: String,
    pub asofdate: String,
    /// Horizon in years
    pub term: f64,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub timesegment: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub annualizedcumulativepd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub forwardpd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cumulativepd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub marginalpd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub maturityriskpd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub maturityriskel: Nullable<f64>,
    /// Loss given default
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lgd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub maturityrisklgd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lossrateannualized: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lossratecumulative: Nullable<f64>,
    /// Exposure at default
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub ead: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub ccf: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub ugd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub prepaymentrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub forwardprepaymentrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub cumulativeprepaymentrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub recovery: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub netchargeoff: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub annualizedpdoneyearprojection: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage1conditionalannualizedcumulativepd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage2conditionalannualizedcumulativepd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage3conditionalannualizedcumulativepd: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub impliedstagerating: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub netchargeoffamount: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub collateralvalue: Nullable<f64>,
    /// Expected credit loss (requires PD, LGD and EAD)
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub expectedcreditlossamount: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub expectedcreditlossamountlifetimeprojection: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub expectedcreditlossamountoneyearprojection: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub exposure: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub grossinterestincome: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub totalinterestexpense: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub riskweightedassets: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage1portion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage2portion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub stage3portion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transitionprobabilityfromstage1tostage2: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transitionprobabilityfromstage1tostage3: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transitionprobabilityfromstage2tostage1: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transitionprobabilityfromstage2tostage3: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transitionprobabilityfromstage3tostage2: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub balancegrowthrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub lgdvariance: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub transactionsequence: Nullable<i64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub creditotherthantemporaryimpairment: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub noncreditotherthantemporaryimpairment: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub temporaryimpairment: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub othercomprehensiveincome: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub otherthantemporaryimpairmentprobability: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub jobidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub valuedate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub decayrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub rateresponserate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub usagerate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub liquidityhaircut: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub singlemonthlymortalityrate: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub edfimpliedrating: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub optionarmminimumpaymentportion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub optionarminterestonlyportion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub optionarmprincipalandinterestportion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub forbearanceportion: Nullable<f64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub forwarddecayrate: Nullable<f64>,
}

impl InstrumentRiskMetric {
    /// Build with the required attributes; everything else starts absent.
    pub fn new(
        instrumentidentifier: impl Into<String>,
        scenarioidentifier: impl Into<String>,
        modelname: impl Into<String>,
        modeloutput: impl Into<String>,
        asofdate: impl Into<String>,
        term: f64,
    ) -> Self {
        Self {
            analysisidentifier: Nullable::Absent,
            reportingdate: Nullable::Absent,
            inputscenarioidentifier: Nullable::Absent,
            instrumentidentifier: instrumentidentifier.into(),
            scenarioidentifier: scenarioidentifier.into(),
            modelname: modelname.into(),
            modeloutput: modeloutput.into(),
            asofdate: asofdate.into(),
            term,
            timesegment: Nullable::Absent,
            annualizedcumulativepd: Nullable::Absent,
            forwardpd: Nullable::Absent,
            cumulativepd: Nullable::Absent,
            marginalpd: Nullable::Absent,
            maturityriskpd: Nullable::Absent,
            maturityriskel: Nullable::Absent,
            lgd: Nullable::Absent,
            maturityrisklgd: Nullable::Absent,
            lossrateannualized: Nullable::Absent,
            lossratecumulative: Nullable::Absent,
            ead: Nullable::Absent,
            ccf: Nullable::Absent,
            ugd: Nullable::Absent,
            prepaymentrate: Nullable::Absent,
            forwardprepaymentrate: Nullable::Absent,
            cumulativeprepaymentrate: Nullable::Absent,
            recovery: Nullable::Absent,
            netchargeoff: Nullable::Absent,
            annualizedpdoneyearprojection: Nullable::Absent,
            stage1conditionalannualizedcumulativepd: Nullable::Absent,
            stage2conditionalannualizedcumulativepd: Nullable::Absent,
            stage3conditionalannualizedcumulativepd: Nullable::Absent,
            impliedstagerating: Nullable::Absent,
            netchargeoffamount: Nullable::Absent,
            collateralvalue: Nullable::Absent,
            expectedcreditlossamount: Nullable::Absent,
            expectedcreditlossamountlifetimeprojection: Nullable::Absent,
            expectedcreditlossamountoneyearprojection: Nullable::Absent,
            exposure: Nullable::Absent,
            grossinterestincome: Nullable::Absent,
            totalinterestexpense: Nullable::Absent,
            riskweightedassets: Nullable::Absent,
            stage1portion: Nullable::Absent,
            stage2portion: Nullable::Absent,
            stage3portion: Nullable::Absent,
            transitionprobabilityfromstage1tostage2: Nullable::Absent,
            transitionprobabilityfromstage1tostage3: Nullable::Absent,
            transitionprobabilityfromstage2tostage1: Nullable::Absent,
            transitionprobabilityfromstage2tostage3: Nullable::Absent,
            transitionprobabilityfromstage3tostage2: Nullable::Absent,
            balancegrowthrate: Nullable::Absent,
            lgdvariance: Nullable::Absent,
            transactionsequence: Nullable::Absent,
            creditotherthantemporaryimpairment: Nullable::Absent,
            noncreditotherthantemporaryimpairment: Nullable::Absent,
            temporaryimpairment: Nullable::Absent,
            othercomprehensiveincome: Nullable::Absent,
            otherthantemporaryimpairmentprobability: Nullable::Absent,
            jobidentifier: Nullable::Absent,
            valuedate: Nullable::Absent,
            decayrate: Nullable::Absent,
            rateresponserate: Nullable::Absent,
            usagerate: Nullable::Absent,
            liquidityhaircut: Nullable::Absent,
            singlemonthlymortalityrate: Nullable::Absent,
            edfimpliedrating: Nullable::Absent,
            optionarmminimumpaymentportion: Nullable::Absent,
            optionarminterestonlyportion: Nullable::Absent,
            optionarmprincipalandinterestportion: Nullable::Absent,
            forbearanceportion: Nullable::Absent,
            forwarddecayrate: Nullable::Absent,
        }
    }

    /// Whether any probability-of-default measure is populated
    pub fn has_pd(&self) -> bool {
        [
            &self.annualizedcumulativepd,
            &self.forwardpd,
            &self.cumulativepd,
            &self.marginalpd,
            &self.maturityriskpd,
        ]
        .iter()
        .any(|pd| pd.is_value())
    }

    /// PD, LGD and EAD are all populated
    pub fn has_default_statistics(&self) -> bool {
        self.has_pd() && self.lgd.is_value() && self.ead.is_value()
    }
}

/// A validation or calculation error reported for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentError {
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub analysisidentifier: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub jobidentifier: Nullable<String>,
    pub instrumentidentifier: String,
    pub errorcode: i64,
    pub errormessage: String,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub modulecode: Nullable<i64>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub asofdate: Nullable<String>,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub scenarioidentifier: Nullable<String>,
    /// "Warning", "Error", ...
    pub severity: String,
    #[serde(default, skip_serializing_if = "Nullable::is_absent")]
    pub portfolioidentifier: Nullable<String>,
}

impl InstrumentError {
    /// Build with the required attributes; everything else starts absent.
    pub fn new(
        instrumentidentifier: impl Into<String>,
        errorcode: i64,
        errormessage: impl Into<String>,
        severity: impl Into<String>,
    ) -> Self {
        Self {
            analysisidentifier: Nullable::Absent,
            jobidentifier: Nullable::Absent,
            instrumentidentifier: instrumentidentifier.into(),
            errorcode,
            errormessage: errormessage.into(),
            modulecode: Nullable::Absent,
            asofdate: Nullable::Absent,
            scenarioidentifier: Nullable::Absent,
            severity: severity.into(),
            portfolioidentifier: Nullable::Absent,
        }
    }

    /// Ordinal used to aggregate severities: higher is worse, unknown labels rank 0
    pub fn severity_rank(&self) -> u8 {
        match self.severity.to_ascii_lowercase().as_str() {
            "info" | "information" => 1,
            "warning" => 2,
            "error" => 3,
            "fatal" | "critical" => 4,
            _ => 0,
        }
    }
}
