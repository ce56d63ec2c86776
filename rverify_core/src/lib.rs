pub mod comparators;
pub mod highlight;
pub mod manager;
pub mod rules;
pub mod session;
pub mod table;

pub use comparators::{Comparator, ComparatorRegistry};
pub use highlight::{highlight, HighlightOptions, HighlighterResult};
pub use manager::{CompareRequest, ComparePair, ComparisonManager};
pub use rules::CompiledRules;
pub use session::{Queue, Session, SessionManager, SessionState};
pub use table::{decode_tables, encode_tables, Table};
