//! Engine tests: real worker pools driving small compiled scripts

pub(crate) mod helpers;
mod migration_tests;
