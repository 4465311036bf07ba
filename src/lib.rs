//! specmock: keeps a Docker-hosted OpenAPI mock server in step with a spec
//! file on disk.

pub mod cli;
pub mod config;
pub mod error;
pub mod mock;
pub mod testing;
pub mod validate;
