//! Malta payroll calculator
//!
//! Pure function of the inputs and the statutory parameters. The band table
//! is configuration: it comes with the request or from the file named by
//! `PAYROLL_BANDS_PATH`; nothing here assumes specific values.

use rust_decimal::{Decimal, RoundingStrategy};
use shared::error::{AppError, ErrorCode};
use shared::models::{
    PayrollBreakdown, PayrollConfig, PayrollInputs, PayrollRequest, PayrollResponse, TaxCategory,
};
use std::path::Path;
use thiserror::Error;

const WEEKS_PER_YEAR: Decimal = Decimal::from_parts(52, 0, 0, false, 0);
const MONTHS_PER_YEAR: Decimal = Decimal::from_parts(12, 0, 0, false, 0);

#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("No payroll configuration supplied or configured")]
    ConfigMissing,

    #[error("No tax bands configured for category {0:?}")]
    BandsMissing(TaxCategory),

    #[error("{0}")]
    Invalid(String),

    #[error("Failed to load payroll configuration: {0}")]
    Load(String),
}

pub type PayrollResult<T> = Result<T, PayrollError>;

impl From<PayrollError> for AppError {
    fn from(err: PayrollError) -> Self {
        let message = err.to_string();
        match err {
            PayrollError::ConfigMissing | PayrollError::BandsMissing(_) => {
                AppError::with_message(ErrorCode::PayrollBandsMissing, message)
            }
            PayrollError::Invalid(_) => AppError::validation(message),
            PayrollError::Load(_) => AppError::internal(message),
        }
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Read a [`PayrollConfig`] from a JSON file
pub fn load_config(path: impl AsRef<Path>) -> PayrollResult<PayrollConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PayrollError::Load(format!("{}: {e}", path.display())))?;
    let config: PayrollConfig =
        serde_json::from_str(&raw).map_err(|e| PayrollError::Load(format!("{}: {e}", path.display())))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &PayrollConfig) -> PayrollResult<()> {
    if config.ssc_rate < Decimal::ZERO || config.ssc_weekly_cap < Decimal::ZERO {
        return Err(PayrollError::Invalid("SSC parameters must not be negative".into()));
    }
    for (category, bands) in &config.bands {
        // Only the last band may be unbounded, and limits must ascend
        let mut last_limit: Option<Decimal> = None;
        for (i, band) in bands.iter().enumerate() {
            match band.limit {
                Some(limit) => {
                    if last_limit.is_some_and(|prev| limit <= prev) {
                        return Err(PayrollError::Invalid(format!(
                            "{category:?} band {i} limit does not ascend"
                        )));
                    }
                    last_limit = Some(limit);
                }
                None if i + 1 != bands.len() => {
                    return Err(PayrollError::Invalid(format!(
                        "{category:?} band {i} is unbounded but not last"
                    )));
                }
                None => {}
            }
        }
    }
    Ok(())
}

/// Compute the breakdown for a request
///
/// Parameters in the request take precedence over `default_config`.
pub fn compute(
    request: &PayrollRequest,
    default_config: Option<&PayrollConfig>,
) -> PayrollResult<PayrollResponse> {
    let config = match (&request.config, default_config) {
        (Some(own), _) => {
            validate_config(own)?;
            own
        }
        (None, Some(configured)) => configured,
        (None, None) => return Err(PayrollError::ConfigMissing),
    };
    let breakdown = compute_breakdown(
        request.gross_annual,
        request.category,
        request.cola_eligible,
        config,
    )?;
    Ok(PayrollResponse {
        inputs: PayrollInputs {
            gross_annual: request.gross_annual,
            category: request.category,
            cola_eligible: request.cola_eligible,
        },
        breakdown,
    })
}

fn in_range(value: Option<Decimal>) -> PayrollResult<Decimal> {
    value.ok_or_else(|| PayrollError::Invalid("amount out of range".into()))
}

pub fn compute_breakdown(
    gross_annual: Decimal,
    category: TaxCategory,
    cola_eligible: bool,
    config: &PayrollConfig,
) -> PayrollResult<PayrollBreakdown> {
    if gross_annual < Decimal::ZERO {
        return Err(PayrollError::Invalid("gross_annual must not be negative".into()));
    }
    let bands = config
        .bands
        .get(&category)
        .filter(|b| !b.is_empty())
        .ok_or(PayrollError::BandsMissing(category))?;

    let cola_annual = if cola_eligible {
        in_range(config.cola_weekly.checked_mul(WEEKS_PER_YEAR))?
    } else {
        Decimal::ZERO
    };
    let gross = in_range(gross_annual.checked_add(cola_annual))?;

    let weekly_gross = in_range(gross.checked_div(WEEKS_PER_YEAR))?;
    let ssc_uncapped = in_range(weekly_gross.checked_mul(config.ssc_rate))?;
    let ssc_weekly = if weekly_gross >= config.ssc_threshold_weekly {
        ssc_uncapped.min(config.ssc_weekly_cap)
    } else {
        ssc_uncapped
    };
    let ssc_annual = money(in_range(ssc_weekly.checked_mul(WEEKS_PER_YEAR))?);

    let taxable = in_range(gross.checked_sub(ssc_annual))?.max(Decimal::ZERO);

    let band_index = bands
        .iter()
        .position(|b| b.limit.is_none_or(|limit| limit >= taxable))
        .unwrap_or(bands.len() - 1);
    let band = &bands[band_index];
    let banded = in_range(taxable.checked_mul(band.rate))?;
    let tax = money(in_range(banded.checked_sub(band.subtract))?.max(Decimal::ZERO));

    let net_annual = money(in_range(
        gross.checked_sub(tax).and_then(|v| v.checked_sub(ssc_annual)),
    )?);
    let net_monthly = money(in_range(net_annual.checked_div(MONTHS_PER_YEAR))?);
    let maternity_fund = money(in_range(gross.checked_mul(config.maternity_rate))?);

    Ok(PayrollBreakdown {
        gross_annual: money(gross),
        cola_annual: money(cola_annual),
        weekly_gross: money(weekly_gross),
        ssc_weekly: money(ssc_weekly),
        ssc_annual,
        taxable: money(taxable),
        tax,
        maternity_fund,
        net_annual,
        net_monthly,
        band_index,
    })
}
