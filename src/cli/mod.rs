pub mod args;

use clap::Parser;

pub use args::{Arguments, InputKind};

pub fn parse() -> Arguments {
    Arguments::parse()
}
