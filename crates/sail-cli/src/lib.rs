pub mod runner;
mod schema;
