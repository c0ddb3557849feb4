pub mod discoverer;
pub mod tracker;
