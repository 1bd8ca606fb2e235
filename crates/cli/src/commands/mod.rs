pub mod containment;
pub mod healing;
pub mod status;
pub mod suppression;
