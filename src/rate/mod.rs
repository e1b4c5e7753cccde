pub mod governor;

pub use governor::{Clock, RateGovernor, RateStatus, TokioClock};
