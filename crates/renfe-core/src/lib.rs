//! Renfe Fare Scraper Core Library
//!
//! This crate fetches train fares from venta.renfe.com by driving the
//! site's DWR remote-call protocol directly, without a browser.
//!
//! # Features
//! - One isolated protocol session per search, wiped when it ends
//! - Reply decoding with a literal grammar (no script evaluation)
//! - Shared rate limiter with exponential backoff on failures
//! - Paginated, typed fare results
//! - Redacted logging of tokens and cookies

pub mod client;
pub mod config;
pub mod error;
pub mod ids;
pub mod limiter;
pub mod mapper;
pub mod protocol;
pub mod redact;
pub mod scraper;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{CookieJar, Endpoints, Transport, UrlPolicy};
pub use config::{RateLimitConfig, ScraperConfig, TransportConfig};
pub use error::{NetworkErrorKind, RenfeError, Result};
pub use limiter::RateLimiter;
pub use scraper::RenfeScraper;
pub use session::{ProtocolSession, SessionManager, SessionState};
pub use types::{
    Availability, Euros, FarePage, PaginationState, Price, SearchRequest, Station, TrainFare,
};
