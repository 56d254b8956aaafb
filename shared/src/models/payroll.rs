//! Payroll inputs and breakdown

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaxCategory {
    Single,
    Married,
    Parent,
}

/// Progressive band: `tax = taxable * rate - subtract` when `taxable <= limit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBand {
    /// `None` marks the unbounded top band
    pub limit: Option<Decimal>,
    pub rate: Decimal,
    pub subtract: Decimal,
}

/// Statutory parameters; supplied per request or from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollConfig {
    pub ssc_rate: Decimal,
    pub ssc_weekly_cap: Decimal,
    pub ssc_threshold_weekly: Decimal,
    #[serde(default)]
    pub cola_weekly: Decimal,
    /// Employer maternity fund contribution rate
    #[serde(default)]
    pub maternity_rate: Decimal,
    pub bands: BTreeMap<TaxCategory, Vec<TaxBand>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRequest {
    pub gross_annual: Decimal,
    pub category: TaxCategory,
    #[serde(default)]
    pub cola_eligible: bool,
    /// Overrides the configured parameters
    pub config: Option<PayrollConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollBreakdown {
    pub gross_annual: Decimal,
    pub cola_annual: Decimal,
    pub weekly_gross: Decimal,
    pub ssc_weekly: Decimal,
    pub ssc_annual: Decimal,
    pub taxable: Decimal,
    pub tax: Decimal,
    /// Employer side, not deducted from net
    pub maternity_fund: Decimal,
    pub net_annual: Decimal,
    pub net_monthly: Decimal,
    /// Index of the band that produced `tax`
    pub band_index: usize,
}

/// Echo of the inputs plus the breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollResponse {
    pub inputs: PayrollInputs,
    pub breakdown: PayrollBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollInputs {
    pub gross_annual: Decimal,
    pub category: TaxCategory,
    pub cola_eligible: bool,
}
