//! Repository traits for metadata operations.

pub mod audit;
pub mod index;
pub mod records;
pub mod versions;

pub use audit::AuditRepo;
pub use index::IndexRepo;
pub use records::RecordRepo;
pub use versions::VersionRepo;
