//! Consumer name generation.
//!
//! Names look like `{group}-{hostname}-{n}` (or `{group}-consumer-{n}` when the
//! host name cannot be resolved). `n` comes from one counter shared by every
//! consumer in the process, so two consumers never get the same name even when
//! they join different groups at the same moment.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Generates consumer names from an atomic sequence starting at 1.
#[derive(Debug)]
pub struct NameGenerator {
    counter: AtomicU64,
}

impl NameGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    /// Generate a name using the local host name.
    pub fn generate(&self, group: &str) -> String {
        self.generate_with_host(group, local_hostname().as_deref())
    }

    /// Generate a name for an explicit host; `None` selects the fallback form.
    pub fn generate_with_host(&self, group: &str, host: Option<&str>) -> String {
        let sequence = self.next_sequence();
        match host {
            Some(host) => format!("{}-{}-{}", group, host, sequence),
            None => format!("{}-consumer-{}", group, sequence),
        }
    }

    /// Restart the sequence at 1.
    pub fn reset(&self) {
        self.counter.store(1, Ordering::SeqCst);
    }

    fn next_sequence(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_NAMES: NameGenerator = NameGenerator::new();

/// Generate a consumer name from the process-wide sequence.
pub fn generate_consumer_name(group: &str) -> String {
    PROCESS_NAMES.generate(group)
}

/// Reset the process-wide sequence. Intended for test isolation.
pub fn reset_instance_counter() {
    PROCESS_NAMES.reset();
}

/// Serializes tests that touch the process-wide sequence.
#[cfg(test)]
pub(crate) fn process_names_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Use `configured` when it is set and non-blank, otherwise generate one.
pub fn resolve_consumer_name(configured: Option<&str>, group: &str) -> String {
    match configured.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => generate_consumer_name(group),
    }
}

fn local_hostname() -> Option<String> {
    match hostname::get() {
        Ok(name) => match name.into_string() {
            Ok(name) if !name.is_empty() => Some(name),
            _ => {
                warn!("Host name is empty or not valid UTF-8, using fallback consumer name");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "Failed to resolve host name, using fallback consumer name");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_primary_form() {
        let names = NameGenerator::new();
        assert_eq!(names.generate_with_host("billing", Some("node-a")), "billing-node-a-1");
        assert_eq!(names.generate_with_host("billing", Some("node-a")), "billing-node-a-2");
    }

    #[test]
    fn test_fallback_form_shares_counter() {
        let names = NameGenerator::new();
        assert_eq!(names.generate_with_host("billing", Some("h")), "billing-h-1");
        assert_eq!(names.generate_with_host("audit", None), "audit-consumer-2");
    }

    #[test]
    fn test_reset() {
        let names = NameGenerator::new();
        names.generate_with_host("g", None);
        names.generate_with_host("g", None);
        names.reset();
        assert_eq!(names.generate_with_host("g", None), "g-consumer-1");
    }

    #[test]
    fn test_generate_uses_group_prefix() {
        let names = NameGenerator::new();
        let name = names.generate("billing");
        assert!(name.starts_with("billing-"));
        assert!(name.ends_with("-1"));
    }

    #[test]
    fn test_unique_across_threads_and_groups() {
        let names = Arc::new(NameGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let names = Arc::clone(&names);
                std::thread::spawn(move || {
                    let group = format!("group-{}", i % 2);
                    (0..250)
                        .map(|_| names.generate_with_host(&group, Some("host")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut sequences = HashSet::new();
        for handle in handles {
            for name in handle.join().unwrap() {
                let seq = name.rsplit('-').next().unwrap().to_string();
                assert!(sequences.insert(seq), "duplicate sequence in {}", name);
            }
        }
        assert_eq!(sequences.len(), 2000);
    }

    #[test]
    fn test_process_wide_names_are_unique() {
        let _guard = process_names_lock();
        let a = generate_consumer_name("billing");
        let b = generate_consumer_name("billing");
        let c = generate_consumer_name("audit");
        assert_ne!(a, b);
        assert!(c.starts_with("audit-"));
    }

    #[test]
    fn test_resolve_prefers_configured_name() {
        let _guard = process_names_lock();
        assert_eq!(resolve_consumer_name(Some("worker-7"), "g"), "worker-7");
        assert!(resolve_consumer_name(Some("   "), "g").starts_with("g-"));
        assert!(resolve_consumer_name(None, "g").starts_with("g-"));
    }

    #[test]
    fn test_reset_instance_counter() {
        let _guard = process_names_lock();
        generate_consumer_name("billing");
        generate_consumer_name("billing");

        reset_instance_counter();
        assert!(generate_consumer_name("billing").ends_with("-1"));
        assert!(generate_consumer_name("audit").ends_with("-2"));
    }
}
