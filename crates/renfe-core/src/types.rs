//! Data types for the Renfe scraper
//!
//! This module contains all the core data structures used throughout the library.
//! All types implement Serialize and Deserialize for JSON compatibility with
//! the tool layer.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{RenfeError, Result};

/// Largest page size a caller may request
pub const MAX_PER_PAGE: u32 = 50;

/// How far in the past a departure date may be
pub const MAX_PAST_DAYS: i64 = 1;

/// How far in the future a departure date may be
pub const MAX_FUTURE_DAYS: i64 = 365;

/// A Renfe station, resolved by the schedule lookup before a scrape
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Station {
    /// Renfe station code (e.g., "60000" for Madrid Puerta de Atocha)
    pub code: String,
    /// Display name
    pub name: String,
}

impl Station {
    /// Create a new station
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

/// One fare search: a one-way trip on a given day, plus the page to return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub origin: Station,
    pub destination: Station,
    pub date: NaiveDate,
    /// Page number (1-based)
    pub page: u32,
    /// Items per page, in `1..=MAX_PER_PAGE`
    pub per_page: u32,
}

impl SearchRequest {
    /// Create a request for the first page with the given page size
    pub fn new(origin: Station, destination: Station, date: NaiveDate) -> Self {
        Self {
            origin,
            destination,
            date,
            page: 1,
            per_page: 10,
        }
    }

    /// Select a page
    pub fn with_page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    /// Check the structural invariants of the request.
    ///
    /// The date horizon is normally enforced by the caller's date parsing;
    /// it is checked again here against `today`.
    pub fn validate(&self, today: NaiveDate) -> Result<()> {
        if self.origin.code == self.destination.code {
            return Err(RenfeError::InvalidRequest(
                "origin and destination must differ".to_string(),
            ));
        }
        if self.page == 0 {
            return Err(RenfeError::InvalidRequest("page must be >= 1".to_string()));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(RenfeError::InvalidRequest(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        let offset = (self.date - today).num_days();
        if offset < -MAX_PAST_DAYS || offset > MAX_FUTURE_DAYS {
            return Err(RenfeError::InvalidRequest(format!(
                "date must be within {} day(s) in the past and {} days in the future",
                MAX_PAST_DAYS, MAX_FUTURE_DAYS
            )));
        }
        Ok(())
    }
}

/// Whether a train can currently be booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    SoldOut,
    /// The upstream record did not carry recognisable availability fields
    Unknown,
}

/// A price in euros, held as integer cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Euros {
    cents: u64,
}

impl Euros {
    pub fn from_cents(cents: u64) -> Self {
        Self { cents }
    }

    pub fn cents(&self) -> u64 {
        self.cents
    }

    /// Parse a Renfe price string such as `"45,60"`, `"45.6"` or `"45"`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_end_matches('€').trim();
        if text.is_empty() {
            return None;
        }
        let normalized = text.replace(',', ".");
        let (whole, frac) = match normalized.split_once('.') {
            Some((w, f)) => (w, f),
            None => (normalized.as_str(), ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole: u64 = whole.parse().ok()?;
        let frac_cents = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().ok()? * 10,
            _ => frac.parse::<u64>().ok()?,
        };
        whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .map(Self::from_cents)
    }

    /// Convert a numeric price, rounding to the nearest cent.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        Some(Self::from_cents((value * 100.0).round() as u64))
    }
}

impl std::fmt::Display for Euros {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02} €", self.cents / 100, self.cents % 100)
    }
}

/// Ticket price of a train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Price {
    Amount(Euros),
    Unavailable,
}

impl Price {
    pub fn amount(&self) -> Option<Euros> {
        match self {
            Price::Amount(e) => Some(*e),
            Price::Unavailable => None,
        }
    }
}

/// Fare and availability of one train, as listed by Renfe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainFare {
    /// Train type (e.g., AVE, ALVIA, AVLO)
    pub train_type: String,
    pub departure: NaiveTime,
    pub arrival: NaiveTime,
    /// Journey duration in minutes
    pub duration_minutes: u32,
    pub price: Price,
    pub availability: Availability,
}

/// Position of a page within the full result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
    /// Current page number (1-based)
    pub page: u32,
    pub per_page: u32,
    /// Number of fares across all pages
    pub total_items: usize,
}

impl PaginationState {
    pub fn new(page: u32, per_page: u32, total_items: usize) -> Self {
        Self {
            page,
            per_page,
            total_items,
        }
    }

    /// Number of pages needed for `total_items`
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        self.total_items.div_ceil(self.per_page as usize) as u32
    }

    /// Whether there are more pages available
    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages()
    }
}

/// One page of fares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarePage {
    /// Fares on the current page, in upstream order
    pub fares: Vec<TrainFare>,
    pub pagination: PaginationState,
}

impl FarePage {
    pub fn new(fares: Vec<TrainFare>, pagination: PaginationState) -> Self {
        Self { fares, pagination }
    }
}
