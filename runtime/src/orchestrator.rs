use core_affinity::CoreId;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::Result;

/// A named, bounded rayon pool, optionally pinned to a set of cores.
pub struct ResourceGroup {
    pub name: String,
    pub pool: Arc<ThreadPool>,
    pub cores: Vec<usize>,
}

impl ResourceGroup {
    pub fn new(name: &str, num_threads: usize, core_ids: Option<Vec<usize>>) -> Result<Self> {
        let thread_name_prefix = format!("pano-{}-", name);

        let core_ids_cloned = core_ids.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}{}", thread_name_prefix, i))
            .start_handler(move |i| {
                if let Some(ref cores) = core_ids_cloned {
                    if let Some(&core_index) = cores.get(i % cores.len().max(1)) {
                        core_affinity::set_for_current(CoreId { id: core_index });
                    }
                }
            })
            .build()
            .map_err(|e| crate::Error::ThreadPool(e.to_string()))?;

        debug!(group = name, threads = pool.current_num_threads(), "resource group created");
        Ok(Self {
            name: name.to_string(),
            pool: Arc::new(pool),
            cores: core_ids.unwrap_or_default(),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `f` inside the pool; rayon calls made by `f` stay on its threads.
    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }
}

/// Ids of the cores the process may run on.
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .map(|ids| ids.into_iter().map(|c| c.id).collect())
        .unwrap_or_default()
}

pub struct TaskScheduler {
    groups: Mutex<HashMap<String, Arc<ResourceGroup>>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_group(&self, name: &str, num_threads: usize, cores: Option<Vec<usize>>) -> Result<Arc<ResourceGroup>> {
        let group = Arc::new(ResourceGroup::new(name, num_threads, cores)?);
        self.groups.lock().insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<ResourceGroup>> {
        self.groups.lock().get(name).cloned()
    }

    /// Returns the group called `name`, creating it when absent or when its
    /// size differs from `num_threads`.
    pub fn get_or_create_group(
        &self,
        name: &str,
        num_threads: usize,
        cores: Option<Vec<usize>>,
    ) -> Result<Arc<ResourceGroup>> {
        let mut groups = self.groups.lock();
        if let Some(group) = groups.get(name) {
            if group.num_threads() == num_threads && cores.as_deref().unwrap_or(&[]) == group.cores.as_slice() {
                return Ok(group.clone());
            }
        }
        let group = Arc::new(ResourceGroup::new(name, num_threads, cores)?);
        groups.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn remove_group(&self, name: &str) -> Option<Arc<ResourceGroup>> {
        self.groups.lock().remove(name)
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_SCHEDULER: OnceLock<TaskScheduler> = OnceLock::new();

pub fn scheduler() -> &'static TaskScheduler {
    GLOBAL_SCHEDULER.get_or_init(TaskScheduler::new)
}
