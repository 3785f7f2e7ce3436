pub mod disclosure;
pub mod exchange;
pub mod selective_disclosure;
pub mod status;
pub mod token;
pub mod util;
