//! Step definitions and scenarios for `tests/features/session.feature`.

mod bdd_steps;
mod scenarios;
mod test_helpers;
