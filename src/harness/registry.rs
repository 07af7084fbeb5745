//! Test registry
//!
//! Holds every registered (name, targets, handler) entry in registration
//! order. Registration is additive: names are not de-duplicated, and two
//! entries with the same name both run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Result;
use crate::exec::{Harness, Target};

/// Code that builds, runs and checks one test on one target
#[async_trait]
pub trait TestHandler: Send + Sync {
    async fn run(&self, harness: &Harness, name: &str, target: Target) -> Result<()>;
}

/// Adapter turning an async closure into a [`TestHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TestHandler for FnHandler<F>
where
    F: Fn(Harness, String, Target) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, harness: &Harness, name: &str, target: Target) -> Result<()> {
        (self.0)(harness.clone(), name.to_string(), target).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TestHandler>
where
    F: Fn(Harness, String, Target) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A registered test
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    /// Targets this test may run on; never empty
    pub targets: Vec<Target>,
    pub handler: Arc<dyn TestHandler>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// Ordered table of registered tests
#[derive(Debug, Default, Clone)]
pub struct TestRegistry {
    tests: Vec<TestCase>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` once per name
    ///
    /// An empty `targets` slice means every target.
    pub fn register<I, S>(&mut self, handler: Arc<dyn TestHandler>, names: I, targets: &[Target])
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.add(name, targets, Arc::clone(&handler));
        }
    }

    /// Register a single test
    pub fn add(&mut self, name: impl Into<String>, targets: &[Target], handler: Arc<dyn TestHandler>) {
        let targets = if targets.is_empty() {
            Target::ALL.to_vec()
        } else {
            let mut unique = Vec::with_capacity(targets.len());
            for target in targets {
                if !unique.contains(target) {
                    unique.push(*target);
                }
            }
            unique
        };
        let name = name.into();
        tracing::trace!(%name, ?targets, "Registered test");
        self.tests.push(TestCase {
            name,
            targets,
            handler,
        });
    }

    /// First entry registered under `name`
    pub fn find(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter()
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// One `name: target, target` line per entry, for `--list`
    pub fn listing(&self) -> Vec<String> {
        self.tests
            .iter()
            .map(|t| {
                let targets: Vec<&str> = t.targets.iter().map(|t| t.as_str()).collect();
                format!("{}: {}", t.name, targets.join(", "))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn TestHandler> {
        handler_fn(|_, _, _| async { Ok(()) })
    }

    #[test]
    fn test_register_is_additive() {
        let mut registry = TestRegistry::new();
        registry.register(noop(), ["a.c", "b.c"], &[Target::Emulator]);
        registry.register(noop(), ["c.c"], &[Target::Hardware]);

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.listing(),
            vec!["a.c: emulator", "b.c: emulator", "c.c: hardware"]
        );
    }

    #[test]
    fn test_empty_targets_means_all() {
        let mut registry = TestRegistry::new();
        registry.add("everywhere", &[], noop());
        assert_eq!(
            registry.find("everywhere").unwrap().targets,
            Target::ALL.to_vec()
        );
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let mut registry = TestRegistry::new();
        registry.add("dup", &[Target::Emulator], noop());
        registry.add("dup", &[Target::Simulator], noop());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("dup").unwrap().targets, vec![Target::Emulator]);
    }

    #[test]
    fn test_find_missing() {
        let registry = TestRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.find("nope").is_none());
    }

    #[tokio::test]
    async fn test_handler_fn_receives_arguments() {
        use crate::common::config::Config;
        use crate::common::Error;

        let handler = handler_fn(|_, name, target| async move {
            if name == "ok" && target == Target::Simulator {
                Ok(())
            } else {
                Err(Error::TestFailure(format!("{name} on {target}")))
            }
        });
        let harness = Harness::new(Config::default());

        assert!(handler.run(&harness, "ok", Target::Simulator).await.is_ok());
        let err = handler
            .run(&harness, "bad", Target::Emulator)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad on emulator");
    }
}
