mod reader;

pub use reader::{parse, parse_all};
