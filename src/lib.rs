pub mod booking;
pub mod config;
pub mod driver;
pub mod model;
pub mod observability;
pub mod store;
