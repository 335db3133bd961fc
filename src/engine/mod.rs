pub mod clusters;
pub mod lifecycle;
pub mod tracking;
