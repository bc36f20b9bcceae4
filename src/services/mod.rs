pub mod cache;
pub mod clock;
pub mod inference;
pub mod prediction;
pub mod queue;
pub mod submitter;
pub mod worker;
