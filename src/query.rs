// Query Facade - ingestion and the five analytical queries
//
// Every call reads a fresh snapshot from the store, computes in-process and
// returns a typed result. This is the only place where "nothing to report"
// becomes NotFound.

use crate::aggregation::{AggregationEngine, YearlyAggregate};
use crate::db::Event;
use crate::entities::{Institution, InstitutionCatalog, SupportRecord};
use crate::error::{FinanceError, Result};
use crate::forecast::ForecastEngine;
use crate::parser::{decode_payload, RecordNormalizer};
use crate::store::SupportStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Actor recorded on ingestion audit events
pub const INGEST_ACTOR: &str = "finance-support";

/// Event type appended once per ingested batch
pub const UPLOAD_EVENT: &str = "support_data_uploaded";

// ============================================================================
// RESULT TYPES
// ============================================================================

/// Outcome of one ingestion batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Institution columns resolved by this batch
    pub institutions: usize,
    /// Institutions this batch created
    pub registered: usize,
    pub inserted: usize,
    /// Records skipped because an identical one was already stored
    pub duplicates: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankName {
    pub bank_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankListResult {
    pub banks: Vec<BankName>,
}

impl BankListResult {
    pub fn names(&self) -> Vec<&str> {
        self.banks.iter().map(|b| b.bank_name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyStatics {
    pub year: String,
    pub total_amount: Decimal,
    /// Institution name → that institution's total for the year
    pub detail_amount: BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlyStaticsResult {
    /// Ascending by year
    pub statics: Vec<YearlyStatics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestSupportResult {
    pub year: String,
    #[serde(rename = "bank")]
    pub institution_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtremeAveragesResult {
    pub largest_year: String,
    pub largest_amount: Decimal,
    pub smallest_year: String,
    pub smallest_amount: Decimal,
    #[serde(rename = "bank")]
    pub institution_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastResult {
    #[serde(rename = "bankId")]
    pub institution_id: String,
    pub year: String,
    pub month: String,
    pub amount: Decimal,
}

// ============================================================================
// QUERY FACADE
// ============================================================================

pub struct QueryFacade<S: SupportStore> {
    store: S,
    normalizer: RecordNormalizer,
    aggregation: AggregationEngine,
    forecaster: ForecastEngine,
}

impl<S: SupportStore> QueryFacade<S> {
    pub fn new(store: S) -> Self {
        QueryFacade {
            store,
            normalizer: RecordNormalizer::new(),
            aggregation: AggregationEngine::new(),
            forecaster: ForecastEngine::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decode, normalize and persist one uploaded table as a single batch
    ///
    /// Nothing is written when decoding or normalization fails.
    pub fn ingest(&self, payload: Option<&[u8]>) -> Result<IngestReport> {
        let table = decode_payload(payload)?;
        let normalized = self.normalizer.normalize(&table)?;

        let report = self.store.in_batch(|store| {
            let mut catalog = InstitutionCatalog::new(store);
            for name in &normalized.institutions {
                catalog.resolve(name)?;
            }

            let mut inserted = 0;
            let mut duplicates = 0;
            for row in &normalized.records {
                let institution = catalog.resolve(&row.institution)?;
                let record =
                    SupportRecord::new(institution, row.year.as_str(), row.month.as_str(), row.amount);

                if store.save_support_record(&record)? {
                    inserted += 1;
                } else {
                    duplicates += 1;
                }
            }

            let report = IngestReport {
                institutions: catalog.institutions().len(),
                registered: catalog.registered_count(),
                inserted,
                duplicates,
            };

            let batch_id = uuid::Uuid::new_v4().to_string();
            store.record_event(&Event::new(
                UPLOAD_EVENT,
                "support_batch",
                &batch_id,
                serde_json::to_value(&report)?,
                INGEST_ACTOR,
            ))?;

            Ok(report)
        })?;

        info!(
            institutions = report.institutions,
            registered = report.registered,
            inserted = report.inserted,
            duplicates = report.duplicates,
            "ingested support data"
        );

        Ok(report)
    }

    /// Every registered institution, in registration order
    pub fn bank_list(&self) -> Result<BankListResult> {
        let institutions = self.store.list_institutions()?;
        if institutions.is_empty() {
            return Err(FinanceError::not_found("no institutions are registered"));
        }

        info!(count = institutions.len(), "listed institutions");
        Ok(BankListResult {
            banks: institutions
                .into_iter()
                .map(|institution| BankName {
                    bank_name: institution.name,
                })
                .collect(),
        })
    }

    /// Per-year totals with a per-institution breakdown
    pub fn yearly_statics(&self) -> Result<YearlyStaticsResult> {
        let by_year = self.all_years()?;

        let statics: Vec<YearlyStatics> = self
            .aggregation
            .years_ascending(&by_year)
            .into_iter()
            .map(|year| {
                let aggregates = &by_year[year];
                YearlyStatics {
                    year: year.clone(),
                    total_amount: aggregates.iter().map(|a| a.total).sum(),
                    detail_amount: aggregates
                        .iter()
                        .map(|a| (a.institution.name.clone(), a.total))
                        .collect(),
                }
            })
            .collect();

        info!(years = statics.len(), "computed yearly statics");
        Ok(YearlyStaticsResult { statics })
    }

    /// The (year, institution) with the greatest yearly total
    pub fn largest_support(&self) -> Result<LargestSupportResult> {
        let by_year = self.all_years()?;

        let largest = self
            .aggregation
            .largest(&by_year)
            .ok_or_else(|| FinanceError::not_found("no yearly totals to compare"))?;

        info!(year = %largest.year, institution = %largest.institution.name, amount = %largest.amount, "found largest support");
        Ok(LargestSupportResult {
            year: largest.year,
            institution_name: largest.institution.name,
        })
    }

    /// Years with the largest and smallest average support for one institution
    pub fn extreme_averages(&self, name: &str) -> Result<ExtremeAveragesResult> {
        let institution = self.institution_named(name)?;
        let records = self.store.find_support_records_by_institution(&institution)?;

        let extremes = self
            .aggregation
            .extreme_averages(&self.aggregation.by_year(&records))
            .ok_or_else(|| FinanceError::not_found(format!("no support records for {}", name)))?;

        info!(
            institution = name,
            largest_year = %extremes.largest_year,
            smallest_year = %extremes.smallest_year,
            "found extreme averages"
        );
        Ok(ExtremeAveragesResult {
            largest_year: extremes.largest_year,
            largest_amount: extremes.largest_average,
            smallest_year: extremes.smallest_year,
            smallest_amount: extremes.smallest_average,
            institution_name: institution.name,
        })
    }

    /// Next year's support for one institution and calendar month
    ///
    /// `month` matches stored labels exactly ("2", not "02").
    pub fn forecast(&self, name: &str, month: &str) -> Result<ForecastResult> {
        let institution = self.institution_named(name)?;

        let mut records = self
            .store
            .find_support_records_by_institution_and_month(&institution, month)?;
        if records.is_empty() {
            return Err(FinanceError::not_found(format!(
                "no support records for {} in month {}",
                name, month
            )));
        }

        let year_order = self.aggregation.year_order;
        records.sort_by(|a, b| year_order(a.year.as_str(), b.year.as_str()));

        let (observations, years): (Vec<Decimal>, Vec<String>) = records
            .into_iter()
            .map(|record| (record.amount, record.year))
            .unzip();

        let forecast = self.forecaster.forecast_next_period(&observations, &years)?;

        info!(institution = name, month, year = %forecast.year, amount = %forecast.amount, "forecast support");
        Ok(ForecastResult {
            institution_id: institution.id,
            year: forecast.year,
            month: month.to_string(),
            amount: forecast.amount,
        })
    }

    fn institution_named(&self, name: &str) -> Result<Institution> {
        self.store
            .find_institutions_by_name(name)?
            .into_iter()
            .next()
            .ok_or_else(|| FinanceError::not_found(format!("institution {}", name)))
    }

    /// Aggregates of every institution grouped by year; empty is NotFound
    fn all_years(&self) -> Result<HashMap<String, Vec<YearlyAggregate>>> {
        let mut records = Vec::new();
        for institution in self.store.list_institutions()? {
            records.extend(self.store.find_support_records_by_institution(&institution)?);
        }

        let by_year = self.aggregation.all_years_across_institutions(&records);
        if by_year.is_empty() {
            return Err(FinanceError::not_found("no support records"));
        }

        Ok(by_year)
    }
}

// ============================================================================
// TESTS
// ============================================================================
