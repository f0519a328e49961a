pub mod error;
pub mod time;

pub use error::{NutrioError, Result};
pub use time::{Clock, ManualClock, SystemClock};
