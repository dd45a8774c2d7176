//! End-to-end tests for the s2s proxy. See `tests/`.
