pub mod agent;
pub mod controller;
pub mod errors;
pub mod models;
pub mod normalizer;
pub mod providers;
pub mod sink;
pub mod store;
