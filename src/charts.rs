//! Chart series derived from a filtered listing set.

use polars::prelude::*;
use serde::Serialize;

use crate::dates::{day_key, parse_listing_date};
use crate::error::DashboardError;
use crate::models::ListingRecord;

/// One point of the daily price line chart.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DailyPoint {
    /// Calendar day, `YYYY-MM-DD`.
    pub day: String,
    pub average_price: f64,
    pub listings: u64,
}

/// One point of the price/mileage scatter chart.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ScatterPoint {
    pub x: u64,
    pub y: f64,
    pub label: String,
    pub url: Option<String>,
}

/// Average price and listing count per listing day, ascending by day.
///
/// Only priced listings with a readable `date_listed` contribute.
pub fn time_series(records: &[ListingRecord]) -> Result<Vec<DailyPoint>, DashboardError> {
    let (days, prices): (Vec<String>, Vec<f64>) = records
        .iter()
        .filter_map(|r| {
            let price = r.price.filter(|p| *p > 0.0)?;
            let listed = parse_listing_date(r.date_listed.as_deref()?)?;
            Some((day_key(&listed), price))
        })
        .unzip();

    if days.is_empty() {
        return Ok(Vec::new());
    }

    let df = df!("day" => &days, "price" => &prices)?;
    let daily = df
        .lazy()
        .group_by([col("day")])
        .agg([
            col("price").mean().alias("average_price"),
            len().alias("listings"),
        ])
        .sort(["day"], SortMultipleOptions::default())
        .collect()?;

    let days: Vec<String> = daily
        .column("day")?
        .str()?
        .into_iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();
    let averages: Vec<f64> = daily
        .column("average_price")?
        .f64()?
        .into_iter()
        .flatten()
        .collect();
    let counts = daily.column("listings")?.cast(&DataType::UInt64)?;
    let counts: Vec<u64> = counts.u64()?.into_iter().flatten().collect();

    Ok(days
        .into_iter()
        .zip(averages)
        .zip(counts)
        .map(|((day, average_price), listings)| DailyPoint {
            day,
            average_price,
            listings,
        })
        .collect())
}

/// Mileage against price for listings that carry both.
pub fn scatter_points(records: &[ListingRecord]) -> Vec<ScatterPoint> {
    records
        .iter()
        .filter_map(|r| {
            let (mileage, price) = (r.mileage?, r.price?);
            let mut label = format!("{} {} {}", r.year, r.make, r.model);
            if let Some(trim) = &r.trim {
                label.push(' ');
                label.push_str(trim);
            }
            Some(ScatterPoint {
                x: mileage,
                y: price,
                label,
                url: r.url.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(price: Option<f64>, mileage: Option<u64>, listed: &str) -> ListingRecord {
        ListingRecord {
            source: "cars".into(),
            year: "2017".into(),
            make: "Subaru".into(),
            model: "Outback".into(),
            price,
            mileage,
            date_listed: Some(listed.into()),
            ..Default::default()
        }
    }

    mod time_series_tests {
        use super::*;

        #[test]
        fn test_groups_by_day_ascending() {
            let records = vec![
                record(Some(300.0), None, "2/1/24"),
                record(Some(100.0), None, "1/1/24"),
                record(Some(200.0), None, "2/1/24"),
                record(None, None, "1/1/24"),
                record(Some(999.0), None, "broken"),
            ];
            let points = time_series(&records).unwrap();
            assert_eq!(
                points,
                vec![
                    DailyPoint {
                        day: "2024-01-01".into(),
                        average_price: 100.0,
                        listings: 1
                    },
                    DailyPoint {
                        day: "2024-01-02".into(),
                        average_price: 250.0,
                        listings: 2
                    },
                ]
            );
        }

        #[test]
        fn test_empty_input() {
            assert!(time_series(&[]).unwrap().is_empty());
        }
    }

    mod scatter_points_tests {
        use super::*;

        #[test]
        fn test_requires_price_and_mileage() {
            let records = vec![
                record(Some(12000.0), Some(80000), "1/1/24"),
                record(None, Some(1000), "1/1/24"),
                record(Some(5000.0), None, "1/1/24"),
            ];
            let points = scatter_points(&records);
            assert_eq!(points.len(), 1);
            assert_eq!(points[0].x, 80000);
            assert_eq!(points[0].y, 12000.0);
            assert_eq!(points[0].label, "2017 Subaru Outback");
        }

        #[test]
        fn test_label_includes_trim() {
            let records = vec![ListingRecord {
                trim: Some("Limited".into()),
                ..record(Some(1.0), Some(1), "1/1/24")
            }];
            assert_eq!(scatter_points(&records)[0].label, "2017 Subaru Outback Limited");
        }
    }
}
