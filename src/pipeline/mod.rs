//! Background analysis pipeline: one job per captured meal photo, plus the
//! sweeper that reclaims photos no job will come back for.

pub mod classifier;
pub mod job;
pub mod lifecycle;
pub mod notifier;
pub mod runner;
pub mod sweeper;
