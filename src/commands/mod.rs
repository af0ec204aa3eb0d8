pub(crate) mod ports;
pub(crate) mod run;
