//! Service launchers

pub mod local;
