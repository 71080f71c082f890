pub mod checkers;
pub mod dispatcher;
pub mod models;
pub mod push;
pub mod recorder;
pub mod scheduler;
