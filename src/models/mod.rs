pub mod job;
pub mod notification;
pub mod nutrition;
pub mod outcome;
