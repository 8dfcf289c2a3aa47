//! Target reachability checks.
//!
//! Before a sequence is sent the coordinator needs a loaded, ordinary page
//! whose executor answers. Unusable pages are reported as structured
//! [`ProbeFailure`]s: they are skip decisions, not errors.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{RESTRICTED_PAGES, RESTRICTED_URL_PREFIXES};
use crate::host::{LoadStatus, PageTransport, ScriptInjector, TargetHost, TargetInfo};
use crate::protocol::PageRequest;
use crate::state::TargetId;
use crate::time_source::TimeSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeReason {
    NotFound,
    UrlInaccessible,
    StillLoading,
    SpecialPage,
}

impl ProbeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeReason::NotFound => "not-found",
            ProbeReason::UrlInaccessible => "url-inaccessible",
            ProbeReason::StillLoading => "still-loading",
            ProbeReason::SpecialPage => "special-page",
        }
    }
}

impl fmt::Display for ProbeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a target cannot be rotated, with whatever the host told us about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub target: TargetId,
    pub reason: ProbeReason,
    pub url: Option<String>,
    pub status: Option<LoadStatus>,
}

impl ProbeFailure {
    fn new(target: TargetId, reason: ProbeReason) -> Self {
        Self {
            target,
            reason,
            url: None,
            status: None,
        }
    }

    fn about(info: &TargetInfo, reason: ProbeReason) -> Self {
        Self {
            target: info.id,
            reason,
            url: info.url.clone(),
            status: Some(info.status),
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target {} {} (url: {}, status: {})",
            self.target,
            self.reason,
            self.url.as_deref().unwrap_or("undefined"),
            self.status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into())
        )
    }
}

/// A target that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachable {
    pub target: TargetId,
    pub url: String,
}

/// Internal browser pages and extension pages never host the executor.
pub fn is_special_page(url: &str) -> bool {
    RESTRICTED_URL_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
        || RESTRICTED_PAGES.iter().any(|page| url.contains(page))
}

pub struct Prober {
    targets: Arc<dyn TargetHost>,
    transport: Arc<dyn PageTransport>,
    injector: Arc<dyn ScriptInjector>,
    clock: Arc<dyn TimeSource>,
    loading_retry_interval: Duration,
    injection_settle: Duration,
}

impl Prober {
    pub fn new(
        targets: Arc<dyn TargetHost>,
        transport: Arc<dyn PageTransport>,
        injector: Arc<dyn ScriptInjector>,
        clock: Arc<dyn TimeSource>,
        loading_retry_interval: Duration,
        injection_settle: Duration,
    ) -> Self {
        Self {
            targets,
            transport,
            injector,
            clock,
            loading_retry_interval,
            injection_settle,
        }
    }

    /// Decide whether `target` can be rotated.
    ///
    /// With `retry_on_loading`, a page that is still loading gets one more
    /// look after the loading retry interval.
    pub fn check_target(
        &self,
        target: TargetId,
        retry_on_loading: bool,
    ) -> Result<Reachable, ProbeFailure> {
        let info = match self.targets.get(target) {
            Ok(Some(info)) => info,
            Ok(None) => return Err(ProbeFailure::new(target, ProbeReason::NotFound)),
            Err(e) => {
                log_warning!("Lookup of target {target} failed: {e:#}");
                return Err(ProbeFailure::new(target, ProbeReason::NotFound));
            }
        };

        let Some(url) = info.url.clone() else {
            return Err(ProbeFailure::about(&info, ProbeReason::UrlInaccessible));
        };

        if info.status != LoadStatus::Complete {
            if retry_on_loading && info.status == LoadStatus::Loading {
                log_indented!(
                    "Target {target} still loading, checking again in {}ms",
                    self.loading_retry_interval.as_millis()
                );
                self.clock.sleep(self.loading_retry_interval);

                match self.targets.get(target) {
                    Ok(Some(retry)) if retry.status == LoadStatus::Complete => {
                        if let Some(url) = retry.url.clone() {
                            if is_special_page(&url) {
                                return Err(ProbeFailure::about(&retry, ProbeReason::SpecialPage));
                            }
                            return Ok(Reachable { target, url });
                        }
                    }
                    Ok(_) => {}
                    Err(e) => log_warning!("Retry lookup of target {target} failed: {e:#}"),
                }
            }
            return Err(ProbeFailure::about(&info, ProbeReason::StillLoading));
        }

        if is_special_page(&url) {
            return Err(ProbeFailure::about(&info, ProbeReason::SpecialPage));
        }

        Ok(Reachable { target, url })
    }

    /// Whether the executor in `target` answers a liveness probe.
    pub fn is_alive(&self, target: TargetId) -> bool {
        let ping = PageRequest::Ping {
            timestamp: self.clock.now_millis(),
        };
        match self.transport.send(target, &ping) {
            Ok(reply) => reply.success,
            Err(e) => {
                log_indented!("Executor in target {target} not responding: {e}");
                false
            }
        }
    }

    /// Make sure an executor is listening in `target`, injecting one if not.
    pub fn ensure_executor(&self, target: TargetId) -> Result<()> {
        if self.is_alive(target) {
            return Ok(());
        }

        log_decorated!("Injecting page executor into target {target}");
        self.injector
            .inject(target)
            .with_context(|| format!("Failed to inject executor into target {target}"))?;
        self.clock.sleep(self.injection_settle);
        Ok(())
    }
}
