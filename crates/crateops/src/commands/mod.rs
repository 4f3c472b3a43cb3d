//! Command implementations

pub mod doctor;

pub mod info;

pub mod run;
