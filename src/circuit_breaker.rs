use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the counter store.
pub type StoreBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for counter-store operations.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While the breaker is open the rate limiter skips the store entirely and
/// fails open, so a dead database costs nothing per request.
pub fn create_store_circuit_breaker() -> StoreBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}
