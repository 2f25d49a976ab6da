#![allow(dead_code)]

pub use dagmaster_test_utils::builders;
pub use dagmaster_test_utils::{init_tracing, wait_until, with_timeout};

pub type TestResult = anyhow::Result<()>;
