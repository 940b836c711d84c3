pub mod connect;
pub mod hook;
pub mod project;
pub mod review;
pub mod task;
