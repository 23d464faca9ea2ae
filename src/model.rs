pub mod row;
pub mod xml;
