// Aggregation Engine - yearly totals and averages per institution
//
// Precision boundary: totals are exact decimal sums. Only the average goes
// through f64 (total / count) before being lifted back into a Decimal, so
// averages may carry representable imprecision while totals never do.

use crate::entities::{Institution, SupportRecord};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// YEAR ORDERING
// ============================================================================

/// Ordering function for year labels
pub type YearOrder = fn(&str, &str) -> Ordering;

/// Natural order for year labels: numeric when both parse, lexical otherwise
pub fn compare_years(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Grouping key: institution identity + exact year text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub institution_id: String,
    pub year: String,
}

/// Derived per (institution, year); recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyAggregate {
    pub institution: Institution,
    pub year: String,
    pub total: Decimal,
    pub average: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargestSupport {
    pub year: String,
    pub institution: Institution,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtremeAverages {
    pub largest_year: String,
    pub largest_average: Decimal,
    pub smallest_year: String,
    pub smallest_average: Decimal,
}

/// Mean widened through f64, mirroring the double-based source semantics
fn float_average(total: Decimal, count: usize) -> Decimal {
    let mean = total.to_f64().unwrap_or_default() / count as f64;

    // Shortest round-trip text keeps 5.5 as 5.5 rather than its binary expansion
    Decimal::from_str(&mean.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(mean))
        .unwrap_or_default()
}

// ============================================================================
// AGGREGATION ENGINE
// ============================================================================

pub struct AggregationEngine {
    /// How year labels are enumerated for output and tie-breaking
    pub year_order: YearOrder,
}

impl AggregationEngine {
    pub fn new() -> Self {
        AggregationEngine {
            year_order: compare_years,
        }
    }

    pub fn with_year_order(year_order: YearOrder) -> Self {
        AggregationEngine { year_order }
    }

    /// One aggregate per distinct (institution, year) in `records`
    pub fn by_institution_and_year(
        &self,
        records: &[SupportRecord],
    ) -> HashMap<AggregateKey, YearlyAggregate> {
        let mut groups: HashMap<AggregateKey, (Institution, Decimal, usize)> = HashMap::new();

        for record in records {
            let key = AggregateKey {
                institution_id: record.institution.id.clone(),
                year: record.year.clone(),
            };

            let entry = groups
                .entry(key)
                .or_insert_with(|| (record.institution.clone(), Decimal::ZERO, 0));
            entry.1 += record.amount;
            entry.2 += 1;
        }

        groups
            .into_iter()
            .map(|(key, (institution, total, count))| {
                let aggregate = YearlyAggregate {
                    institution,
                    year: key.year.clone(),
                    total,
                    average: float_average(total, count),
                    count,
                };
                (key, aggregate)
            })
            .collect()
    }

    /// Aggregates of one institution keyed by year
    pub fn by_year(&self, records: &[SupportRecord]) -> HashMap<String, YearlyAggregate> {
        self.by_institution_and_year(records)
            .into_values()
            .map(|aggregate| (aggregate.year.clone(), aggregate))
            .collect()
    }

    /// Year → aggregates of every institution active that year
    ///
    /// Institutions within a year are sorted by name (then id) so scans over
    /// the result are reproducible.
    pub fn all_years_across_institutions(
        &self,
        records: &[SupportRecord],
    ) -> HashMap<String, Vec<YearlyAggregate>> {
        let mut by_year: HashMap<String, Vec<YearlyAggregate>> = HashMap::new();

        for aggregate in self.by_institution_and_year(records).into_values() {
            by_year
                .entry(aggregate.year.clone())
                .or_default()
                .push(aggregate);
        }

        for aggregates in by_year.values_mut() {
            aggregates.sort_by(|a, b| {
                a.institution
                    .name
                    .cmp(&b.institution.name)
                    .then_with(|| a.institution.id.cmp(&b.institution.id))
            });
        }

        by_year
    }

    /// Year labels of `by_year` in ascending order
    pub fn years_ascending<'a, V>(&self, by_year: &'a HashMap<String, V>) -> Vec<&'a String> {
        let mut years: Vec<&String> = by_year.keys().collect();
        years.sort_by(|a, b| (self.year_order)(a.as_str(), b.as_str()));
        years
    }

    /// Strictly greatest yearly total across all institutions
    ///
    /// Scans years ascending, institutions by name; the first maximum seen
    /// wins ties. `None` when there is nothing to scan.
    pub fn largest(
        &self,
        by_year: &HashMap<String, Vec<YearlyAggregate>>,
    ) -> Option<LargestSupport> {
        let mut best: Option<&YearlyAggregate> = None;

        for year in self.years_ascending(by_year) {
            for aggregate in &by_year[year] {
                let beats = match best {
                    Some(current) => aggregate.total > current.total,
                    None => true,
                };
                if beats {
                    best = Some(aggregate);
                }
            }
        }

        best.map(|aggregate| LargestSupport {
            year: aggregate.year.clone(),
            institution: aggregate.institution.clone(),
            amount: aggregate.total,
        })
    }

    /// Years with the largest and smallest average for one institution
    ///
    /// Single pass in ascending year order with strict comparisons, so the
    /// earliest year keeps a tie. `None` for empty input.
    pub fn extreme_averages(
        &self,
        by_year: &HashMap<String, YearlyAggregate>,
    ) -> Option<ExtremeAverages> {
        let mut largest: Option<&YearlyAggregate> = None;
        let mut smallest: Option<&YearlyAggregate> = None;

        for year in self.years_ascending(by_year) {
            let aggregate = &by_year[year];

            if largest.map_or(true, |current| aggregate.average > current.average) {
                largest = Some(aggregate);
            }
            if smallest.map_or(true, |current| aggregate.average < current.average) {
                smallest = Some(aggregate);
            }
        }

        match (largest, smallest) {
            (Some(max), Some(min)) => Some(ExtremeAverages {
                largest_year: max.year.clone(),
                largest_average: max.average,
                smallest_year: min.year.clone(),
                smallest_average: min.average,
            }),
            _ => None,
        }
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
