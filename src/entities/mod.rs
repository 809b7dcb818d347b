// Entity Models
//
// Institution: stable identity (UUID) + display name
// SupportRecord: one (institution, year, month, amount) disbursement fact

pub mod institution;
pub mod support;

pub use institution::{Institution, InstitutionCatalog};
pub use support::SupportRecord;
