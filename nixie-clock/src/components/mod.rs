//! Contains the building blocks the clock engine is made of.
//!
//! The engine owns one instance of each: a sorted calendar of sleep events,
//! the table of upcoming offset transitions, and the builder that turns the
//! weekly sleep rules into calendar entries.

pub mod event_list;
pub mod schedule;
pub mod transitions;
