pub mod db;
pub mod models;

pub use db::{Db, DbHandle, ReviewSubmission};
