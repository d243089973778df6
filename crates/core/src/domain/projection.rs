use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompoundFrequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    /// No intermediate compounding; interest is added once a year.
    #[serde(alias = "none", alias = "manual")]
    Yearly,
}

impl CompoundFrequency {
    pub fn periods_per_year(self) -> f64 {
        match self {
            Self::Daily => 365.0,
            Self::Weekly => 52.0,
            Self::Monthly => 12.0,
            Self::Yearly => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl FromStr for CompoundFrequency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" | "none" | "manual" => Ok(Self::Yearly),
            other => anyhow::bail!("unknown compound frequency: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub initial_value: f64,
    pub final_value: f64,
    pub profit: f64,
    pub roi_pct: f64,
}

/// `A * (1 + r/n)^(n * days/365)` with `r = apy_pct / 100`.
pub fn compound_value(amount: f64, apy_pct: f64, days: f64, freq: CompoundFrequency) -> f64 {
    let n = freq.periods_per_year();
    let r = apy_pct / 100.0;
    amount * (1.0 + r / n).powf(n * days / 365.0)
}

pub fn project_return(
    amount: f64,
    apy_pct: f64,
    days: u32,
    freq: CompoundFrequency,
) -> anyhow::Result<Projection> {
    ensure!(
        amount.is_finite() && amount > 0.0,
        "investment amount must be positive (got {amount})"
    );
    ensure!(
        apy_pct.is_finite() && apy_pct > -100.0,
        "apy must be a finite percentage above -100 (got {apy_pct})"
    );

    let final_value = compound_value(amount, apy_pct, f64::from(days), freq);
    let profit = final_value - amount;

    Ok(Projection {
        initial_value: amount,
        final_value,
        profit,
        roi_pct: profit / amount * 100.0,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodReturns {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
    pub yearly: f64,
}

/// Non-compounded payouts for one period of each length.
pub fn period_returns(amount: f64, apy_pct: f64) -> PeriodReturns {
    let yearly = amount * apy_pct / 100.0;
    PeriodReturns {
        daily: round2(yearly / 365.0),
        weekly: round2(yearly / 52.0),
        monthly: round2(yearly / 12.0),
        yearly: round2(yearly),
    }
}

/// Maps a dashboard period selector to days; unknown selectors mean one year.
pub fn period_days(period: &str) -> u32 {
    match period.trim() {
        "1d" => 1,
        "1w" => 7,
        "1m" => 30,
        "3m" => 90,
        "6m" => 180,
        "all" => 730,
        _ => 365,
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_compounding_matches_closed_form() {
        let amount = 1_000.0;
        let apy = 12.0;
        for days in [1u32, 30, 90, 365, 730] {
            let p = project_return(amount, apy, days, CompoundFrequency::Daily).unwrap();
            let expected = amount * (1.0 + 0.12 / 365.0f64).powi(days as i32);
            assert!((p.final_value - expected).abs() < 1e-6, "days={days}");

            let roi = (p.final_value - amount) / amount * 100.0;
            assert!((p.roi_pct - roi).abs() < 1e-9);
            assert!((p.profit - (p.final_value - amount)).abs() < 1e-9);
        }
    }

    #[test]
    fn less_frequent_compounding_earns_less() {
        let daily = compound_value(10_000.0, 20.0, 365.0, CompoundFrequency::Daily);
        let monthly = compound_value(10_000.0, 20.0, 365.0, CompoundFrequency::Monthly);
        let yearly = compound_value(10_000.0, 20.0, 365.0, CompoundFrequency::Yearly);
        assert!(daily > monthly && monthly > yearly);
        assert!((yearly - 12_000.0).abs() < 1e-6);
    }

    #[test]
    fn zero_days_keeps_principal() {
        let p = project_return(500.0, 30.0, 0, CompoundFrequency::Weekly).unwrap();
        assert_eq!(p.final_value, 500.0);
        assert_eq!(p.roi_pct, 0.0);
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert!(project_return(0.0, 5.0, 30, CompoundFrequency::Daily).is_err());
    }

    #[test]
    fn period_returns_are_simple_interest() {
        let r = period_returns(3_650.0, 10.0);
        assert_eq!(r.daily, 1.0);
        assert_eq!(r.yearly, 365.0);
    }

    #[test]
    fn parses_frequency_aliases() {
        assert_eq!("none".parse::<CompoundFrequency>().unwrap(), CompoundFrequency::Yearly);
        assert_eq!("Weekly".parse::<CompoundFrequency>().unwrap(), CompoundFrequency::Weekly);
        assert!("hourly".parse::<CompoundFrequency>().is_err());
        assert_eq!(period_days("3m"), 90);
        assert_eq!(period_days("bogus"), 365);
    }
}
