//! Cross-engine domain exclusion.
//!
//! Both engines claim a domain before working on it, so the same domain is
//! never crawled by the presence and the consent engine at the same time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    active: Mutex<HashSet<String>>,
    released: Notify,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Set of domains currently being crawled.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    inner: Arc<Inner>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `domain` is free and claim it.
    pub async fn claim(&self, domain: &str) -> DomainClaim {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            if self.inner.active().insert(domain.to_string()) {
                return DomainClaim {
                    inner: Arc::clone(&self.inner),
                    domain: domain.to_string(),
                };
            }
            tracing::debug!("{} is being crawled elsewhere, waiting", domain);
            notified.await;
        }
    }

    /// Claim `domain` only if nobody holds it.
    pub fn try_claim(&self, domain: &str) -> Option<DomainClaim> {
        self.inner
            .active()
            .insert(domain.to_string())
            .then(|| DomainClaim {
                inner: Arc::clone(&self.inner),
                domain: domain.to_string(),
            })
    }

    pub fn is_claimed(&self, domain: &str) -> bool {
        self.inner.active().contains(domain)
    }
}

/// Exclusive hold on a domain, released on drop.
#[derive(Debug)]
pub struct DomainClaim {
    inner: Arc<Inner>,
    domain: String,
}

impl DomainClaim {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Drop for DomainClaim {
    fn drop(&mut self) {
        self.inner.active().remove(&self.domain);
        self.inner.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_claim_excludes_second_holder() {
        let registry = DomainRegistry::new();
        let claim = registry.claim("example.com").await;
        assert!(registry.is_claimed("example.com"));
        assert!(registry.try_claim("example.com").is_none());
        assert!(registry.try_claim("other.com").is_some());

        drop(claim);
        assert!(!registry.is_claimed("example.com"));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let registry = DomainRegistry::new();
        let claim = registry.claim("example.com").await;

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let claim = registry.claim("example.com").await;
                claim.domain().to_string()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(claim);
        let domain = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert_eq!(domain, "example.com");
    }
}
