mod amount;
mod helpers;

pub mod op;
mod secret;

pub use amount::{Amount, AmountConversionError, DEFAULT_CURRENCY_CODE, MINOR_UNITS_PER_MAJOR};
pub use helpers::{parse_boolean_flag, parse_env_var};
pub use secret::Secret;
