pub(crate) mod helpers;
pub(crate) mod sweep;
pub(crate) mod synthesize;
pub(crate) mod worker;
