//! Mapping of decoded train lists to fares
//!
//! The train list is a map whose `listadoTrenes` entry holds one element per
//! direction, each with a `listviajeViewEnlaceBean` list of trains. Mapping
//! never fails: rows that cannot be read are skipped and fields that cannot
//! be trusted degrade to `Availability::Unknown`.

use chrono::{NaiveTime, Timelike};
use tracing::debug;

use crate::protocol::Value;
use crate::types::{Availability, Euros, FarePage, PaginationState, Price, TrainFare};

// Field names of the upstream train list
const DIRECTIONS: &str = "listadoTrenes";
const TRAINS: &str = "listviajeViewEnlaceBean";
const TRAIN_TYPE: &str = "tipoTrenUno";
const DEPARTURE: &str = "horaSalida";
const ARRIVAL: &str = "horaLlegada";
const DURATION: &str = "duracionViajeTotalEnMinutos";
const PRICE: &str = "tarifaMinima";
const FULL: &str = "completo";
const UNAVAILABLE_REASON: &str = "razonNoDisponible";
const WHEELCHAIR_ONLY: &str = "soloPlazaH";

/// Reason codes that still allow booking
const BOOKABLE_REASONS: &[&str] = &["", "8"];

const DEFAULT_TRAIN_TYPE: &str = "N/A";

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Map a decoded train list to fares, in upstream order.
pub fn map_fares(trains: &Value) -> Vec<TrainFare> {
    let Some(directions) = trains.get(DIRECTIONS).and_then(Value::as_list) else {
        debug!("train list has no {} entry", DIRECTIONS);
        return Vec::new();
    };

    let mut fares = Vec::new();
    for (direction, entry) in directions.iter().enumerate() {
        let rows = entry.get(TRAINS).and_then(Value::as_list).unwrap_or_default();
        for (index, row) in rows.iter().enumerate() {
            match map_row(row) {
                Some(fare) => fares.push(fare),
                None => debug!(direction, index, "skipping train without readable times"),
            }
        }
    }
    fares
}

fn map_row(row: &Value) -> Option<TrainFare> {
    let departure = parse_time(row.get(DEPARTURE)?)?;
    let arrival = parse_time(row.get(ARRIVAL)?)?;

    let train_type = row
        .get(TRAIN_TYPE)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TRAIN_TYPE)
        .to_string();

    let duration_minutes = row
        .get(DURATION)
        .and_then(parse_minutes)
        .unwrap_or_else(|| elapsed_minutes(departure, arrival));

    let (price, availability) = classify(row);

    Some(TrainFare {
        train_type,
        departure,
        arrival,
        duration_minutes,
        price,
        availability,
    })
}

fn parse_time(value: &Value) -> Option<NaiveTime> {
    let text = value.as_str()?.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
}

fn parse_minutes(value: &Value) -> Option<u32> {
    let minutes = match value {
        Value::Number(n) => *n,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if minutes.is_finite() && minutes >= 0.0 && minutes <= u32::MAX as f64 {
        Some(minutes.round() as u32)
    } else {
        None
    }
}

/// Minutes from departure to arrival, crossing midnight when arrival is earlier
fn elapsed_minutes(departure: NaiveTime, arrival: NaiveTime) -> u32 {
    let minutes = |t: NaiveTime| i64::from(t.hour()) * 60 + i64::from(t.minute());
    (minutes(arrival) - minutes(departure)).rem_euclid(MINUTES_PER_DAY) as u32
}

enum PriceField {
    Missing,
    Invalid,
    Amount(Euros),
}

fn price_field(row: &Value) -> PriceField {
    match row.get(PRICE) {
        None | Some(Value::Null) => PriceField::Missing,
        Some(Value::String(s)) if s.trim().is_empty() => PriceField::Missing,
        Some(Value::String(s)) => Euros::parse(s).map_or(PriceField::Invalid, PriceField::Amount),
        Some(Value::Number(n)) => Euros::from_f64(*n).map_or(PriceField::Invalid, PriceField::Amount),
        Some(_) => PriceField::Invalid,
    }
}

/// Read a boolean flag; `Err` when present with another type
fn flag(row: &Value, key: &str) -> Result<Option<bool>, ()> {
    match row.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
        Some(_) => Err(()),
    }
}

/// Read the unavailability reason code; numeric codes are accepted
fn reason(row: &Value) -> Result<Option<String>, ()> {
    match row.get(UNAVAILABLE_REASON) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => Ok(Some(format!("{}", *n as u64))),
        Some(_) => Err(()),
    }
}

fn classify(row: &Value) -> (Price, Availability) {
    let price = match price_field(row) {
        PriceField::Missing => return (Price::Unavailable, Availability::SoldOut),
        PriceField::Invalid => return (Price::Unavailable, Availability::Unknown),
        PriceField::Amount(amount) => amount,
    };

    let (Ok(full), Ok(wheelchair_only), Ok(reason)) =
        (flag(row, FULL), flag(row, WHEELCHAIR_ONLY), reason(row))
    else {
        return (Price::Amount(price), Availability::Unknown);
    };

    let (full, wheelchair_only, reason) = match (full, wheelchair_only, reason) {
        (None, None, None) => return (Price::Unavailable, Availability::Unknown),
        (Some(f), Some(w), Some(r)) => (f, w, r),
        _ => return (Price::Amount(price), Availability::Unknown),
    };

    if !BOOKABLE_REASONS.contains(&reason.as_str()) {
        return (Price::Amount(price), Availability::Unknown);
    }
    if full || wheelchair_only {
        return (Price::Amount(price), Availability::SoldOut);
    }
    (Price::Amount(price), Availability::Available)
}

/// Select one page of fares.
///
/// Pages beyond the end yield an empty page; `total_items` always counts
/// every fare.
///
/// # Example
/// ```
/// use renfe_core::mapper::paginate;
///
/// let page = paginate(Vec::new(), 3, 10);
/// assert!(page.fares.is_empty());
/// assert_eq!(page.pagination.total_items, 0);
/// ```
pub fn paginate(fares: Vec<TrainFare>, page: u32, per_page: u32) -> FarePage {
    let total_items = fares.len();
    let start = (page.saturating_sub(1) as usize).saturating_mul(per_page as usize);
    let selected = fares
        .into_iter()
        .skip(start)
        .take(per_page as usize)
        .collect();
    FarePage::new(selected, PaginationState::new(page, per_page, total_items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_literal;
    use proptest::prelude::*;

    fn row(extra: &str) -> String {
        format!(
            "{{tipoTrenUno:'AVE',horaSalida:'08:30',horaLlegada:'11:00',duracionViajeTotalEnMinutos:150,{}}}",
            extra
        )
    }

    fn single(row: &str) -> TrainFare {
        let text = format!("{{listadoTrenes:[{{listviajeViewEnlaceBean:[{}]}}]}}", row);
        let fares = map_fares(&parse_literal(&text).unwrap());
        assert_eq!(fares.len(), 1);
        fares.into_iter().next().unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_available_train() {
        let fare = single(&row(
            "tarifaMinima:'45,60',completo:false,razonNoDisponible:'',soloPlazaH:false",
        ));
        assert_eq!(fare.train_type, "AVE");
        assert_eq!(fare.departure, time(8, 30));
        assert_eq!(fare.arrival, time(11, 0));
        assert_eq!(fare.duration_minutes, 150);
        assert_eq!(fare.price, Price::Amount(Euros::from_cents(4560)));
        assert_eq!(fare.availability, Availability::Available);
    }

    #[test]
    fn test_reason_eight_is_available() {
        let fare = single(&row(
            "tarifaMinima:'20',completo:false,razonNoDisponible:'8',soloPlazaH:false",
        ));
        assert_eq!(fare.availability, Availability::Available);
    }

    #[test]
    fn test_missing_price_is_sold_out() {
        for price in ["", "tarifaMinima:null,", "tarifaMinima:'',"] {
            let fare = single(&row(&format!(
                "{}completo:false,razonNoDisponible:'',soloPlazaH:false",
                price
            )));
            assert_eq!(fare.price, Price::Unavailable);
            assert_eq!(fare.availability, Availability::SoldOut);
        }
    }

    #[test]
    fn test_full_train_is_sold_out() {
        let fare = single(&row(
            "tarifaMinima:'45,60',completo:true,razonNoDisponible:'',soloPlazaH:false",
        ));
        assert_eq!(fare.availability, Availability::SoldOut);
        assert_eq!(fare.price.amount(), Some(Euros::from_cents(4560)));

        let fare = single(&row(
            "tarifaMinima:'45,60',completo:false,razonNoDisponible:'',soloPlazaH:true",
        ));
        assert_eq!(fare.availability, Availability::SoldOut);
    }

    #[test]
    fn test_missing_flags_are_unknown() {
        let fare = single(&row("tarifaMinima:'45,60'"));
        assert_eq!(fare.availability, Availability::Unknown);
        assert_eq!(fare.price, Price::Unavailable);
    }

    #[test]
    fn test_unexpected_values_are_unknown() {
        let cases = [
            "tarifaMinima:'45,60',completo:'yes',razonNoDisponible:'',soloPlazaH:false",
            "tarifaMinima:'45,60',completo:false,razonNoDisponible:'99',soloPlazaH:false",
            "tarifaMinima:'gratis',completo:false,razonNoDisponible:'',soloPlazaH:false",
            "tarifaMinima:'45,60',completo:false,soloPlazaH:false",
            "tarifaMinima:{a:1},completo:false,razonNoDisponible:'',soloPlazaH:false",
        ];
        for case in cases {
            assert_eq!(single(&row(case)).availability, Availability::Unknown, "{}", case);
        }
    }

    #[test]
    fn test_unrecognised_field_values_map_to_unknown() {
        // Unknown keys carry no availability signal; unknown values in the
        // availability fields do.
        let extra = "nuevoCampo:[1,2,{x:null}]";
        let recognised = single(&row(&format!(
            "tarifaMinima:'45,60',completo:false,razonNoDisponible:'',soloPlazaH:false,{}",
            extra
        )));
        assert_eq!(recognised.availability, Availability::Available);

        let unrecognised = single(&row(&format!(
            "tarifaMinima:'45,60',completo:false,razonNoDisponible:'X1',soloPlazaH:false,{}",
            extra
        )));
        assert_eq!(unrecognised.availability, Availability::Unknown);
        assert_eq!(unrecognised.price, Price::Amount(Euros::from_cents(4560)));
    }

    #[test]
    fn test_numeric_price() {
        let fare = single(&row(
            "tarifaMinima:45.6,completo:false,razonNoDisponible:'',soloPlazaH:false",
        ));
        assert_eq!(fare.price, Price::Amount(Euros::from_cents(4560)));
    }

    #[test]
    fn test_missing_train_type_defaults() {
        let fare = single("{horaSalida:'08:30',horaLlegada:'09:00'}");
        assert_eq!(fare.train_type, "N/A");
        assert_eq!(fare.duration_minutes, 30);
    }

    #[test]
    fn test_duration_fallback_wraps_midnight() {
        let fare = single("{horaSalida:'23:10',horaLlegada:'01:05'}");
        assert_eq!(fare.duration_minutes, 115);
    }

    #[test]
    fn test_rows_without_times_are_skipped() {
        let text = "{listadoTrenes:[{listviajeViewEnlaceBean:[\
                    {horaSalida:'08:30'},\
                    {horaSalida:'25:99',horaLlegada:'10:00'},\
                    {horaSalida:'07:00',horaLlegada:'09:30'}]}]}";
        let fares = map_fares(&parse_literal(text).unwrap());
        assert_eq!(fares.len(), 1);
        assert_eq!(fares[0].departure, time(7, 0));
    }

    #[test]
    fn test_directions_are_flattened_in_order() {
        let text = "{listadoTrenes:[\
                    {listviajeViewEnlaceBean:[{horaSalida:'10:00',horaLlegada:'12:00'}]},\
                    {listviajeViewEnlaceBean:[{horaSalida:'06:00',horaLlegada:'08:00'}]}]}";
        let fares = map_fares(&parse_literal(text).unwrap());
        assert_eq!(fares.len(), 2);
        assert_eq!(fares[0].departure, time(10, 0));
        assert_eq!(fares[1].departure, time(6, 0));
    }

    #[test]
    fn test_unexpected_shape_yields_no_fares() {
        assert!(map_fares(&Value::Null).is_empty());
        assert!(map_fares(&parse_literal("{listadoTrenes:'none'}").unwrap()).is_empty());
        assert!(map_fares(&parse_literal("{listadoTrenes:[1,null]}").unwrap()).is_empty());
    }

    fn fares(n: usize) -> Vec<TrainFare> {
        (0..n)
            .map(|i| TrainFare {
                train_type: format!("T{}", i),
                departure: time(6, 0),
                arrival: time(8, 0),
                duration_minutes: 120,
                price: Price::Unavailable,
                availability: Availability::Unknown,
            })
            .collect()
    }

    #[test]
    fn test_paginate_second_page() {
        let page = paginate(fares(12), 2, 5);
        let types: Vec<_> = page.fares.iter().map(|f| f.train_type.as_str()).collect();
        assert_eq!(types, ["T5", "T6", "T7", "T8", "T9"]);
        assert_eq!(page.pagination, PaginationState::new(2, 5, 12));
        assert!(page.pagination.has_next_page());
    }

    #[test]
    fn test_paginate_beyond_end() {
        let page = paginate(fares(12), 4, 5);
        assert!(page.fares.is_empty());
        assert_eq!(page.pagination.total_items, 12);
    }

    proptest! {
        #[test]
        fn prop_paginate_matches_slice(n in 0usize..200, page in 1u32..30, per_page in 1u32..=50) {
            let all = fares(n);
            let result = paginate(all.clone(), page, per_page);
            let start = ((page - 1) * per_page) as usize;
            let end = (page * per_page) as usize;
            let expected: &[TrainFare] = if start >= n { &[] } else { &all[start..end.min(n)] };
            prop_assert_eq!(&result.fares[..], expected);
            prop_assert_eq!(result.pagination.total_items, n);
        }
    }
}
