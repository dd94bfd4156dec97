pub mod cart_reader;
pub mod payment_writer;
