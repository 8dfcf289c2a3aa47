//! In-process page messaging.
//!
//! [`LoopbackBridge`] plays the role of the browser between the coordinator
//! and page executors living in the same process: injection instantiates an
//! executor for a target, and messages are handed to it directly. Faults can
//! be queued to exercise the delivery retry paths.

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{DeliveryError, PageTransport, ScriptInjector};
use crate::protocol::{PageReply, PageRequest};
use crate::state::TargetId;

/// Something that answers page requests inside a target.
pub trait PageEndpoint: Send + Sync {
    fn handle(&self, request: &PageRequest) -> PageReply;

    /// The page is navigating away.
    fn unload(&self);
}

pub type EndpointFactory = Box<dyn Fn(TargetId) -> Arc<dyn PageEndpoint> + Send + Sync>;

pub struct LoopbackBridge {
    factory: EndpointFactory,
    endpoints: Mutex<HashMap<TargetId, Arc<dyn PageEndpoint>>>,
    faults: Mutex<VecDeque<DeliveryError>>,
    refuse_injection: AtomicBool,
    sends: AtomicUsize,
    injections: AtomicUsize,
}

impl LoopbackBridge {
    pub fn new(factory: EndpointFactory) -> Self {
        Self {
            factory,
            endpoints: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            refuse_injection: AtomicBool::new(false),
            sends: AtomicUsize::new(0),
            injections: AtomicUsize::new(0),
        }
    }

    /// Fail the next sends with `error`, in order, before any endpoint is consulted.
    pub fn queue_fault(&self, error: DeliveryError) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    pub fn refuse_injection(&self, refuse: bool) {
        self.refuse_injection.store(refuse, Ordering::SeqCst);
    }

    /// Simulate navigation: the executor is torn down and must be reinjected.
    pub fn unload(&self, target: TargetId) {
        let endpoint = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&target);
        if let Some(endpoint) = endpoint {
            endpoint.unload();
        }
    }

    pub fn endpoint(&self, target: TargetId) -> Option<Arc<dyn PageEndpoint>> {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&target)
            .cloned()
    }

    pub fn is_injected(&self, target: TargetId) -> bool {
        self.endpoint(target).is_some()
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn injection_count(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }
}

impl PageTransport for LoopbackBridge {
    fn send(&self, target: TargetId, request: &PageRequest) -> Result<PageReply, DeliveryError> {
        self.sends.fetch_add(1, Ordering::SeqCst);

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = fault {
            return Err(error);
        }

        // Lock released before handling: a sequence can run for a long time
        let endpoint = self.endpoint(target).ok_or(DeliveryError::NoReceiver)?;
        Ok(endpoint.handle(request))
    }
}

impl ScriptInjector for LoopbackBridge {
    fn inject(&self, target: TargetId) -> Result<()> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        if self.refuse_injection.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot access contents of page {target}");
        }
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints
            .entry(target)
            .or_insert_with(|| (self.factory)(target));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo;

    impl PageEndpoint for Echo {
        fn handle(&self, request: &PageRequest) -> PageReply {
            match request {
                PageRequest::Ping { timestamp } => PageReply::pong(*timestamp),
                _ => PageReply::ok(),
            }
        }

        fn unload(&self) {}
    }

    fn bridge() -> LoopbackBridge {
        LoopbackBridge::new(Box::new(|_| Arc::new(Echo)))
    }

    #[test]
    fn test_send_without_injection_has_no_receiver() {
        let bridge = bridge();
        let err = bridge
            .send(TargetId(1), &PageRequest::Ping { timestamp: 1 })
            .unwrap_err();
        assert!(err.is_no_receiver());
    }

    #[test]
    fn test_injection_then_delivery() {
        let bridge = bridge();
        bridge.inject(TargetId(1)).unwrap();
        bridge.inject(TargetId(1)).unwrap();
        assert_eq!(bridge.injection_count(), 2);
        let reply = bridge
            .send(TargetId(1), &PageRequest::Ping { timestamp: 9 })
            .unwrap();
        assert_eq!(reply.timestamp, Some(9));

        bridge.unload(TargetId(1));
        assert!(!bridge.is_injected(TargetId(1)));
    }

    #[test]
    fn test_queued_faults_are_consumed_in_order() {
        let bridge = bridge();
        bridge.inject(TargetId(1)).unwrap();
        bridge.queue_fault(DeliveryError::Timeout(Duration::from_secs(5)));
        bridge.queue_fault(DeliveryError::Failed("boom".into()));

        let ping = PageRequest::Ping { timestamp: 0 };
        assert!(matches!(
            bridge.send(TargetId(1), &ping),
            Err(DeliveryError::Timeout(_))
        ));
        assert_eq!(
            bridge.send(TargetId(1), &ping),
            Err(DeliveryError::Failed("boom".into()))
        );
        assert!(bridge.send(TargetId(1), &ping).is_ok());
        assert_eq!(bridge.send_count(), 3);
    }

    #[test]
    fn test_refused_injection() {
        let bridge = bridge();
        bridge.refuse_injection(true);
        assert!(bridge.inject(TargetId(3)).is_err());
        assert!(!bridge.is_injected(TargetId(3)));
    }
}
