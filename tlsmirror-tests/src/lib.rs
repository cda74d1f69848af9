//! End-to-end tests for tlsmirror live under `tests/`.
