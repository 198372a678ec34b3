use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{GateError, GateResult};

pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, GateResult<()>> + Send + Sync>;

/// A periodic job. `schedule` is a six-field cron expression (seconds first).
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    pub schedule: String,
    pub handler: JobHandler,
}

impl JobDefinition {
    pub fn new<F>(name: &str, schedule: &str, handler: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, GateResult<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
            handler: Arc::new(handler),
        }
    }
}

/// Jobs known to this process. Binaries build one at startup and register
/// everything they run explicitly.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, JobDefinition>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: JobDefinition) -> GateResult<()> {
        if definition.name.trim().is_empty() {
            return Err(GateError::Validation("job name cannot be empty".to_string()));
        }

        if definition.schedule.split_whitespace().count() != 6 {
            return Err(GateError::Validation(format!(
                "job {} has invalid schedule '{}'",
                definition.name, definition.schedule
            )));
        }

        if self.jobs.contains_key(&definition.name) {
            return Err(GateError::Validation(format!(
                "job {} is already registered",
                definition.name
            )));
        }

        log::info!("Registered job {} ({})", definition.name, definition.schedule);
        self.jobs.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Runs a registered job once, outside its schedule.
    pub async fn run(&self, name: &str) -> GateResult<()> {
        let definition = self
            .get(name)
            .ok_or_else(|| GateError::NotFound(format!("job {} is not registered", name)))?;

        (definition.handler)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(name: &str, counter: Arc<AtomicUsize>) -> JobDefinition {
        JobDefinition::new(name, "0 * * * * *", move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_registered_job_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry.register(counting_job("reconcile", counter.clone())).unwrap();

        registry.run("reconcile").await.unwrap();
        registry.run("reconcile").await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(matches!(
            registry.run("missing").await,
            Err(GateError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = JobRegistry::new();
        registry.register(counting_job("bootstrap", counter.clone())).unwrap();

        let result = registry.register(counting_job("bootstrap", counter));
        assert!(matches!(result, Err(GateError::Validation(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bad_schedule_rejected() {
        let mut registry = JobRegistry::new();
        let definition = JobDefinition::new("gifts", "@hourly", || {
            Box::pin(async { Ok(()) })
        });

        assert!(matches!(
            registry.register(definition),
            Err(GateError::Validation(_))
        ));
        assert!(registry.is_empty());
    }
}
