//! Deploy Key Rotator Library
//!
//! Rotates repository deploy keys and owner access tokens for CI teams, keeping
//! private material in a secret backend and public keys on GitHub.

pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod github;
pub mod keygen;
pub mod models;
pub mod rotation;
pub mod template;

pub use backends::Backend;
pub use config::Config;
pub use error::{InspectionError, RotationError};
pub use models::{load_teams, BooleanString, Repository, Team};
pub use rotation::{decide, execute, RotationOptions, RotationVerdict, Rotator, RunSummary, TokenCache};
pub use template::{ResolvedPaths, Template, Templates};
