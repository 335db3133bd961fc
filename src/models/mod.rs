pub mod booking;
pub mod provider;
pub mod tracking;
