//! provisioner prelude

pub use crate::{
    anyhow::{self, Context, Result},
    tokio,
    tracing::{self, debug, error, info, instrument, trace, warn},
};

pub use std::sync::Arc;
