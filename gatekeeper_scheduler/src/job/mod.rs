pub mod handler;
pub mod job_scheduler;
