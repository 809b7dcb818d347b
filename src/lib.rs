// Finance Support - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod aggregation;
pub mod db;
pub mod entities;
pub mod error;
pub mod forecast;
pub mod parser;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use aggregation::{
    compare_years, AggregateKey, AggregationEngine, ExtremeAverages, LargestSupport,
    YearOrder, YearlyAggregate,
};
pub use db::{
    count_support_records, events_of_type, insert_event, setup_database, Event, SqliteStore,
};
pub use entities::{Institution, InstitutionCatalog, SupportRecord};
pub use error::{BadInputReason, FinanceError, Outcome, Result};
pub use forecast::{CubicTrend, Forecast, ForecastEngine, MIN_OBSERVATIONS};
pub use parser::{
    decode_payload, read_table, strip_unit_suffix, NormalizedRecord, NormalizedTable,
    RecordNormalizer,
};
pub use query::{
    BankListResult, BankName, ExtremeAveragesResult, ForecastResult, IngestReport,
    LargestSupportResult, QueryFacade, YearlyStatics, YearlyStaticsResult, UPLOAD_EVENT,
};
pub use store::{MemoryStore, SupportStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
