//! Integration and property tests for the STP workspace
