//! Main Renfe Scraper API
//!
//! This module provides the high-level API for fetching fares from
//! venta.renfe.com. It combines the transport, the shared rate limiter, a
//! per-scrape protocol session and the fare mapper behind one call.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::client::{Endpoints, Transport, UrlPolicy};
use crate::config::ScraperConfig;
use crate::error::{RenfeError, Result};
use crate::limiter::RateLimiter;
use crate::mapper::{map_fares, paginate};
use crate::protocol::Framing;
use crate::redact::Redactor;
use crate::session::SessionManager;
use crate::types::{FarePage, SearchRequest, Station};

/// Main scraper API for venta.renfe.com
///
/// Each call to [`fetch_fares`](Self::fetch_fares) runs its own protocol
/// session. Concurrent calls share the connection pool and the rate
/// limiter, nothing else.
///
/// # Example
/// ```no_run
/// use chrono::NaiveDate;
/// use renfe_core::{RenfeScraper, SearchRequest, Station};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let scraper = RenfeScraper::from_env()?;
///
///     let request = SearchRequest::new(
///         Station::new("60000", "MADRID"),
///         Station::new("71801", "BARCELONA"),
///         NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
///     );
///     let page = scraper.fetch_fares(&request).await?;
///     println!("Found {} fares", page.pagination.total_items);
///
///     Ok(())
/// }
/// ```
pub struct RenfeScraper {
    transport: Transport,
    limiter: Arc<RateLimiter>,
    endpoints: Endpoints,
    framing: Framing,
    redactor: Redactor,
}

impl RenfeScraper {
    /// Create a new scraper with default configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    ///
    /// # Example
    /// ```
    /// use renfe_core::RenfeScraper;
    ///
    /// let scraper = RenfeScraper::new().expect("Failed to create scraper");
    /// ```
    pub fn new() -> Result<Self> {
        Self::with_config(ScraperConfig::default())
    }

    /// Create a scraper configured from the environment.
    ///
    /// # Errors
    /// Returns `RenfeError::Config` for malformed variables.
    pub fn from_env() -> Result<Self> {
        Self::with_config(ScraperConfig::from_env()?)
    }

    /// Create a scraper with custom configuration.
    pub fn with_config(config: ScraperConfig) -> Result<Self> {
        config.rate_limit.validate()?;
        let transport = Transport::new(&config.transport)?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Ok(Self::with_parts(
            transport,
            limiter,
            Endpoints::default(),
            Redactor::new(config.log_sensitive_data),
        ))
    }

    /// Create a scraper from pre-built parts.
    ///
    /// This is useful for testing, or to share one rate limiter between
    /// several scrapers.
    ///
    /// # Arguments
    /// * `transport` - HTTP transport, usually with a matching `UrlPolicy`
    /// * `limiter` - Rate limiter shared by every scrape
    /// * `endpoints` - URLs of the protocol steps
    /// * `redactor` - Log redaction setting
    pub fn with_parts(
        transport: Transport,
        limiter: Arc<RateLimiter>,
        endpoints: Endpoints,
        redactor: Redactor,
    ) -> Self {
        Self {
            transport,
            limiter,
            endpoints,
            framing: Framing::default(),
            redactor,
        }
    }

    /// Create a scraper that talks plain HTTP to a local server.
    ///
    /// # Arguments
    /// * `base_url` - e.g. `http://127.0.0.1:8080`
    /// * `config` - Limiter and transport settings
    pub fn for_local_server(base_url: &str, config: ScraperConfig) -> Result<Self> {
        config.rate_limit.validate()?;
        let transport = Transport::with_policy(&config.transport, UrlPolicy::loopback())?;
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Ok(Self::with_parts(
            transport,
            limiter,
            Endpoints::with_base_url(base_url),
            Redactor::new(config.log_sensitive_data),
        ))
    }

    /// Replace the reply framing sentinels.
    ///
    /// # Errors
    /// Returns `RenfeError::Config` if any sentinel is empty.
    pub fn with_framing(mut self, framing: Framing) -> Result<Self> {
        framing.validate()?;
        self.framing = framing;
        Ok(self)
    }

    /// The rate limiter shared by this scraper's scrapes
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch one page of fares for a one-way trip.
    ///
    /// # Arguments
    /// * `request` - Stations, departure date and page selection
    ///
    /// # Returns
    /// * `Ok(FarePage)` with the fares of the requested page, in upstream order
    /// * `Err(RenfeError::InvalidRequest)` if the request fails validation
    ///
    /// # Errors
    /// See [`RenfeError`]; every variant has a fixed
    /// [`user_message`](RenfeError::user_message).
    ///
    /// # Example
    /// ```no_run
    /// use chrono::NaiveDate;
    /// use renfe_core::{RenfeScraper, SearchRequest, Station};
    ///
    /// # async fn example() -> Result<(), renfe_core::RenfeError> {
    /// let scraper = RenfeScraper::new()?;
    /// let request = SearchRequest::new(
    ///     Station::new("60000", "MADRID"),
    ///     Station::new("71801", "BARCELONA"),
    ///     NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
    /// )
    /// .with_page(2, 5);
    /// let page = scraper.fetch_fares(&request).await?;
    /// for fare in page.fares {
    ///     println!("{} {} {:?}", fare.train_type, fare.departure, fare.price);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch_fares(&self, request: &SearchRequest) -> Result<FarePage> {
        self.fetch_fares_as_of(request, chrono::Local::now().date_naive())
            .await
    }

    /// Fetch fares, validating the departure date against `today`.
    pub async fn fetch_fares_as_of(
        &self,
        request: &SearchRequest,
        today: NaiveDate,
    ) -> Result<FarePage> {
        request.validate(today)?;

        let started = Instant::now();
        info!(
            origin = %request.origin.code,
            destination = %request.destination.code,
            date = %request.date,
            page = request.page,
            per_page = request.per_page,
            "fetching fares"
        );

        let mut manager = SessionManager::new(
            &self.transport,
            &self.limiter,
            &self.endpoints,
            &self.framing,
            self.redactor,
        );
        let trains = match manager.run(request).await {
            Ok(trains) => trains,
            Err(err) => {
                warn!(
                    error = %err,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "fare scrape failed"
                );
                return Err(err);
            }
        };

        let page = paginate(map_fares(&trains), request.page, request.per_page);
        info!(
            total = page.pagination.total_items,
            returned = page.fares.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "fares fetched"
        );
        Ok(page)
    }

    /// Fetch fares with the date given as `YYYY-MM-DD`.
    ///
    /// # Arguments
    /// * `origin` - Departure station
    /// * `destination` - Arrival station
    /// * `date` - Departure date, e.g. `"2025-12-01"`
    /// * `page` - Page number (1-based)
    /// * `per_page` - Items per page, at most 50
    pub async fn fetch_fares_for(
        &self,
        origin: Station,
        destination: Station,
        date: &str,
        page: u32,
        per_page: u32,
    ) -> Result<FarePage> {
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| {
            RenfeError::InvalidRequest(format!("invalid date '{}', expected YYYY-MM-DD", date))
        })?;
        let request = SearchRequest::new(origin, destination, date).with_page(page, per_page);
        self.fetch_fares(&request).await
    }
}
