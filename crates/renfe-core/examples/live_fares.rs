use chrono::{Days, Local};
use renfe_core::{Availability, RenfeScraper, SearchRequest, Station};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("renfe_core=info")))
        .init();

    let scraper = RenfeScraper::from_env()?;

    let date = Local::now()
        .date_naive()
        .checked_add_days(Days::new(14))
        .ok_or("date out of range")?;
    let request = SearchRequest::new(
        Station::new("60000", "MADRID-PUERTA DE ATOCHA"),
        Station::new("71801", "BARCELONA-SANTS"),
        date,
    )
    .with_page(1, 20);

    println!("🔍 Searching fares {} → {} on {}...\n", request.origin.name, request.destination.name, date);

    let page = match scraper.fetch_fares(&request).await {
        Ok(page) => page,
        Err(err) => {
            eprintln!("❌ {}", err.user_message());
            return Err(err.into());
        }
    };

    println!(
        "Found {} fares (page {}/{}):",
        page.pagination.total_items,
        page.pagination.page,
        page.pagination.total_pages()
    );
    for fare in &page.fares {
        let price = fare
            .price
            .amount()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "—".to_string());
        let status = match fare.availability {
            Availability::Available => "available",
            Availability::SoldOut => "sold out",
            Availability::Unknown => "unknown",
        };
        println!(
            "  {:<6} {} → {} ({} min)  {:>10}  {}",
            fare.train_type,
            fare.departure.format("%H:%M"),
            fare.arrival.format("%H:%M"),
            fare.duration_minutes,
            price,
            status
        );
    }

    Ok(())
}
