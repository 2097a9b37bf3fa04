pub mod barcode;
pub mod blast;
pub mod command;
pub mod fastx;
pub mod file;
pub mod kraken;
pub mod pod5;
pub mod resolver;
pub mod streams;
pub mod system;
pub mod taxonomy;
