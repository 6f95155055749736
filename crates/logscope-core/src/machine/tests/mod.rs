//! Window machine tests.
//!
//! - Scenario tests: full event sequences through the reducer covering the
//!   major flows (cold start, paging, retries, reload, tailing)
//! - Property tests: proptest-based randomized checks of the reducer's
//!   invariants
