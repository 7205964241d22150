//! Integration tests for the authorization subsystem.
//!
//! Each file exercises one seam end to end through `SecurityManager`:
//! membership closure math, policy inheritance, cached read paths under
//! concurrent load, session key lifecycles and the password rules.


mod concurrency_tests;
mod membership_tests;
