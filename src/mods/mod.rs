pub mod analyze;
pub mod verify;
