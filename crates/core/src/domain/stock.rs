use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

pub const MAX_SYMBOL_LEN: usize = 10;

/// Normalized ticker symbol: 1..=10 ASCII alphanumerics, `.` or `-`, upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    #[error("symbol must be 1-10 characters (got {0})")]
    Length(usize),

    #[error("symbol contains invalid character {0:?}")]
    InvalidChar(char),
}

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let s = raw.trim();
        let len = s.chars().count();
        if !(1..=MAX_SYMBOL_LEN).contains(&len) {
            return Err(SymbolError::Length(len));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '.' || *c == '-'))
        {
            return Err(SymbolError::InvalidChar(c));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cached knowledge about one ticker. The store owns the durable copy; this is the
/// request-scoped value rehydrated from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockRecord {
    #[serde(rename = "ticker")]
    pub symbol: Symbol,
    pub name: Option<String>,
    pub description: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<i64>,
    pub no_shares: Option<i64>,
    pub trail_pe_ratio: Option<f64>,
    pub fwd_pe_ratio: Option<f64>,
    pub d_yield: Option<f64>,
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,
    pub eps: Option<Value>,
    pub last_cache_time: Option<DateTime<Utc>>,
    pub timeseries: Option<Value>,
}

impl StockRecord {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            name: None,
            description: None,
            exchange: None,
            sector: None,
            industry: None,
            market_cap: None,
            no_shares: None,
            trail_pe_ratio: None,
            fwd_pe_ratio: None,
            d_yield: None,
            high_52w: None,
            low_52w: None,
            eps: None,
            last_cache_time: None,
            timeseries: None,
        }
    }

    /// Overwrites every upstream-derived field and stamps the refresh time.
    pub fn apply_payload(&mut self, payload: StockPayload, refreshed_at: DateTime<Utc>) {
        let overview = CompanyOverview::from_value(&payload.overview);

        self.name = overview.name;
        self.description = overview.description;
        self.exchange = overview.exchange;
        self.sector = overview.sector;
        self.industry = overview.industry;
        self.market_cap = overview.market_cap;
        self.no_shares = overview.no_shares;
        self.trail_pe_ratio = overview.trail_pe_ratio;
        self.fwd_pe_ratio = overview.fwd_pe_ratio;
        self.d_yield = overview.d_yield;
        self.high_52w = overview.high_52w;
        self.low_52w = overview.low_52w;
        self.eps = overview.eps;
        self.timeseries = Some(payload.timeseries);
        self.last_cache_time = Some(refreshed_at);
    }
}

/// Raw bodies of one successful refresh: `TIME_SERIES_DAILY` and `OVERVIEW`.
#[derive(Debug, Clone, PartialEq)]
pub struct StockPayload {
    pub timeseries: Value,
    pub overview: Value,
}

/// Descriptive fields extracted from an `OVERVIEW` body. Alpha Vantage encodes every
/// number as a string and uses "None" or "-" for missing values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyOverview {
    pub name: Option<String>,
    pub description: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<i64>,
    pub no_shares: Option<i64>,
    pub trail_pe_ratio: Option<f64>,
    pub fwd_pe_ratio: Option<f64>,
    pub d_yield: Option<f64>,
    pub high_52w: Option<f64>,
    pub low_52w: Option<f64>,
    pub eps: Option<Value>,
}

impl CompanyOverview {
    pub fn from_value(v: &Value) -> Self {
        let text = |key: &str| v.get(key).and_then(Value::as_str).and_then(clean);

        let eps = text("EPS").map(|reported| {
            json!([{
                "fiscalDateEnding": text("LatestQuarter"),
                "reportedEPS": reported,
            }])
        });

        Self {
            name: text("Name"),
            description: text("Description"),
            exchange: text("Exchange"),
            sector: text("Sector").map(|s| title_case(&s)),
            industry: text("Industry").map(|s| title_case(&s)),
            market_cap: text("MarketCapitalization").and_then(|s| parse_int(&s)),
            no_shares: text("SharesOutstanding").and_then(|s| parse_int(&s)),
            trail_pe_ratio: text("TrailingPE").and_then(|s| s.parse().ok()),
            fwd_pe_ratio: text("ForwardPE").and_then(|s| s.parse().ok()),
            d_yield: text("DividendYield").and_then(|s| s.parse().ok()),
            high_52w: text("52WeekHigh").and_then(|s| s.parse().ok()),
            low_52w: text("52WeekLow").and_then(|s| s.parse().ok()),
            eps,
        }
    }
}

fn clean(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() || t == "-" || t.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(t.to_string())
}

fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
}

/// "TECHNOLOGY" -> "Technology", "REAL ESTATE & REITS" -> "Real Estate & Reits".
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
