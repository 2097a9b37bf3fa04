pub mod long_read;
