//! Persistence: counters, analytics and the pool behind them.

pub mod db {
    pub use crate::db::*;
}

pub mod rate_limit {
    pub use crate::rate_limit::*;
}

pub mod analytics {
    pub use crate::analytics::*;
}
