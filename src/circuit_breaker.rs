use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the text-generation service.
pub type GenerationBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Consecutive failures before the generation breaker opens.
pub const GENERATION_FAILURE_THRESHOLD: u32 = 5;

/// Creates the circuit breaker for LLM generation calls.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// While OPEN, calls are rejected without reaching the provider and surface as
/// transient errors, so the affected leads become per-item errors.
pub fn create_generation_circuit_breaker() -> GenerationBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy =
        failure_policy::consecutive_failures(GENERATION_FAILURE_THRESHOLD, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::futures::CircuitBreaker;
    use failsafe::Error;

    #[tokio::test]
    async fn test_opens_after_consecutive_generation_failures() {
        let cb = create_generation_circuit_breaker();

        for _ in 0..GENERATION_FAILURE_THRESHOLD {
            let result = cb.call(async { Err::<String, &str>("provider down") }).await;
            assert!(matches!(result, Err(Error::Inner("provider down"))));
        }

        let result = cb.call(async { Ok::<String, &str>("ok".into()) }).await;
        assert!(matches!(result, Err(Error::Rejected)));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let cb = create_generation_circuit_breaker();
        let result = cb.call(async { Ok::<u32, &str>(42) }).await;
        assert!(matches!(result, Ok(42)));
    }
}
