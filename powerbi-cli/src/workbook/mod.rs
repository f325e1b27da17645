pub mod column;
pub mod formula;
pub mod package;
pub mod placeholder;
pub mod sheet_patch;
pub mod source;
pub mod splice;

pub use package::WorkbookPackage;
pub use placeholder::placeholder_workbook;
pub use splice::{SourceReport, SpliceSummary, splice_reports, validate_sheet_mapping};
