pub mod api;
pub mod events;
pub mod models;
pub mod query;

pub use models::timestamp;
pub use query::{Filter, Order, Record, Select, record};
