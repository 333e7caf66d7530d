//! Types that represent the core data model, such as `Record`, `Amount` and `Category`.
mod amount;
mod category;
mod date;
mod record;

pub use amount::{Amount, AmountError};
pub use category::{Catalogue, Category, DEFAULT_ALIASES, DEFAULT_CATEGORIES, UNCATEGORIZED};
pub use date::{Period, TxnDate};
pub use record::{
    Classification, ClassifyInput, Direction, RawLineItem, Record, RecordStage, SplitFlag,
    UNKNOWN_ACCOUNT,
};
