//! Command implementations for fwbankctl

pub mod compare;
pub mod decode;
pub mod simulate;
