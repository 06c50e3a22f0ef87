pub mod utils;

mod listing;

pub use utils::test_db;
pub use utils::test_utils;
