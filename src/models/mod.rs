pub mod review;
pub mod token;
pub mod workflow;
