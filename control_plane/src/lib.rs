#![warn(
    clippy::pedantic,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::needless_pass_by_value,
    clippy::needless_continue,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::struct_field_names
)]

pub mod controller;
pub mod kubernetes;
pub mod names;
pub mod options;
pub mod queue;
pub mod references;
pub mod reconcilers;
pub mod resources;
pub mod status;
pub mod store;
