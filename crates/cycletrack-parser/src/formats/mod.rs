mod common;
mod pne;
mod toyo;

pub use pne::PneParser;
pub use toyo::ToyoParser;

pub(crate) use common::{
    numeric_file_stem, parse_optional_f64, parse_required_f64, parse_required_u32,
    parse_toyo_datetime,
};
