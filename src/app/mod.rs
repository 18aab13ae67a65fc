// 應用層：把事件來源接到模組傳輸上

pub mod catalog;
pub mod ingest;

pub use catalog::{list_categories, map_status, CategoryListing, MapDirectoryStatus};
pub use ingest::{parse_mode, DryRunSummary, IngestReport, IngestService};
