//! Bounded delivery of page requests.

use std::sync::Arc;
use std::time::Duration;

use crate::host::{DeliveryError, PageTransport, ScriptInjector};
use crate::protocol::{PageReply, PageRequest};
use crate::state::TargetId;
use crate::time_source::TimeSource;

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery failed after {attempts} attempts: {last_error}")]
pub struct DeliveryFailure {
    pub attempts: u32,
    #[source]
    pub last_error: DeliveryError,
}

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub attempts: u32,
    /// Wait after reinjecting on a no-receiver failure.
    pub reinject_settle: Duration,
    /// Wait after any other failure.
    pub retry_delay: Duration,
}

pub struct Courier {
    transport: Arc<dyn PageTransport>,
    injector: Arc<dyn ScriptInjector>,
    clock: Arc<dyn TimeSource>,
    policy: DeliveryPolicy,
}

impl Courier {
    pub fn new(
        transport: Arc<dyn PageTransport>,
        injector: Arc<dyn ScriptInjector>,
        clock: Arc<dyn TimeSource>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            transport,
            injector,
            clock,
            policy,
        }
    }

    /// Send `request`, retrying up to the policy's attempt count.
    ///
    /// A no-receiver failure reinjects the executor before the next attempt.
    /// No retry happens after the final attempt.
    pub fn deliver(
        &self,
        target: TargetId,
        request: &PageRequest,
    ) -> Result<PageReply, DeliveryFailure> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;

        loop {
            log_indented!(
                "Sending {} to target {target}, attempt {attempt}",
                request.type_name()
            );
            let error = match self.transport.send(target, request) {
                Ok(reply) => return Ok(reply),
                Err(error) => error,
            };
            log_warning!("Delivery failed ({attempt}/{attempts}): {error}");

            if attempt >= attempts {
                return Err(DeliveryFailure {
                    attempts: attempt,
                    last_error: error,
                });
            }

            if error.is_no_receiver() {
                match self.injector.inject(target) {
                    Ok(()) => self.clock.sleep(self.policy.reinject_settle),
                    Err(e) => log_warning!("Reinjection into target {target} failed: {e:#}"),
                }
            } else {
                self.clock.sleep(self.policy.retry_delay);
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{MockPageTransport, MockScriptInjector};
    use crate::time_source::SimulatedTimeSource;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<SimulatedTimeSource> {
        Arc::new(SimulatedTimeSource::fast_forward(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ))
    }

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy {
            attempts: 3,
            reinject_settle: Duration::from_millis(500),
            retry_delay: Duration::from_millis(1000),
        }
    }

    fn courier(
        transport: MockPageTransport,
        injector: MockScriptInjector,
        clock: Arc<SimulatedTimeSource>,
    ) -> Courier {
        crate::logger::Log::set_enabled(false);
        Courier::new(Arc::new(transport), Arc::new(injector), clock, policy())
    }

    fn ping() -> PageRequest {
        PageRequest::Ping { timestamp: 0 }
    }

    #[test]
    fn test_first_attempt_success() {
        let mut transport = MockPageTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(PageReply::ok()));
        let courier = courier(transport, MockScriptInjector::new(), clock());
        assert!(courier.deliver(TargetId(1), &ping()).unwrap().success);
    }

    #[test]
    fn test_unreachable_target_tried_exactly_three_times() {
        let clock = clock();
        let start = clock.now_millis();
        let mut transport = MockPageTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|_, _| Err(DeliveryError::Failed("tab crashed".into())));
        let mut injector = MockScriptInjector::new();
        injector.expect_inject().never();

        let failure = courier(transport, injector, clock.clone())
            .deliver(TargetId(1), &ping())
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_error, DeliveryError::Failed("tab crashed".into()));
        // Two waits of 1s, none after the last attempt
        assert_eq!(clock.now_millis() - start, 2000);
    }

    #[test]
    fn test_no_receiver_reinjects_between_attempts() {
        let clock = clock();
        let start = clock.now_millis();
        let mut transport = MockPageTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|_, _| Err(DeliveryError::NoReceiver));
        let mut injector = MockScriptInjector::new();
        injector.expect_inject().times(2).returning(|_| Ok(()));

        let failure = courier(transport, injector, clock.clone())
            .deliver(TargetId(1), &ping())
            .unwrap_err();
        assert!(failure.last_error.is_no_receiver());
        assert_eq!(clock.now_millis() - start, 1000);
    }

    #[test]
    fn test_recovers_after_reinjection() {
        let mut transport = MockPageTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DeliveryError::NoReceiver));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(PageReply::completed(0.0, crate::state::Phase::Idle)));
        let mut injector = MockScriptInjector::new();
        injector.expect_inject().times(1).returning(|_| Ok(()));

        let reply = courier(transport, injector, clock())
            .deliver(TargetId(1), &ping())
            .unwrap();
        assert_eq!(reply.current_angle, Some(0.0));
    }

    #[test]
    fn test_failed_reinjection_does_not_wait() {
        let clock = clock();
        let start = clock.now_millis();
        let mut transport = MockPageTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_, _| Err(DeliveryError::NoReceiver));
        let mut injector = MockScriptInjector::new();
        injector
            .expect_inject()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("denied")));

        let courier = Courier::new(
            Arc::new(transport),
            Arc::new(injector),
            clock.clone(),
            DeliveryPolicy {
                attempts: 2,
                ..policy()
            },
        );
        assert_eq!(courier.deliver(TargetId(1), &ping()).unwrap_err().attempts, 2);
        assert_eq!(clock.now_millis(), start);
    }
}
