pub mod jobs;
pub mod naming;
pub mod outcome;
pub mod runtime;
