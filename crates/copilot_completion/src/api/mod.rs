pub mod client;
pub mod model;
pub mod stream_parser;
