//! Helpers for tests: throwaway databases and a scriptable payment gateway.
pub mod prepare_env;
pub mod simulated_gateway;
