//! Behavioural scenarios for the connection facade.

mod session;
