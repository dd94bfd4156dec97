pub mod csv;
pub mod tender;
