pub mod contact_reader;
pub mod product_reader;
pub mod report_writer;
