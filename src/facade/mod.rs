mod database;

pub use database::SoftDeleteDb;
