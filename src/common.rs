pub(crate) mod constants;
pub(crate) mod error;
pub(crate) mod key;
