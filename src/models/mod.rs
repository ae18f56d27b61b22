pub mod annotation;
pub mod job;
pub mod projection;
