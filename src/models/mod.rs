pub mod listing;
pub mod prediction;
pub mod task;
