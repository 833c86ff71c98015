use parking_lot::Mutex;
use rayon::ThreadPoolBuilder;
use std::env;
use std::sync::OnceLock;

use crate::CoreError;

pub const CPU_THREADS_ENV: &str = "PANO_CPU_THREADS";

static THREAD_POOL_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize the global Rayon thread pool used by CPU-parallel routines.
///
/// Priority:
/// 1. `num_threads` argument
/// 2. `PANO_CPU_THREADS` environment variable
/// 3. Rayon default
///
/// Only the first call configures the pool; later calls return its outcome.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> crate::Result<()> {
    let res = THREAD_POOL_INIT.get_or_init(|| {
        let configured_threads = match num_threads {
            Some(n) => Some(n),
            None => read_cpu_threads_from_env()?,
        };

        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("pano-cpu-{i}"));
        if let Some(n) = configured_threads {
            if n == 0 {
                return Err(format!("{CPU_THREADS_ENV} must be >= 1"));
            }
            builder = builder.num_threads(n);
        }

        builder.build_global().map_err(|e| e.to_string())
    });
    res.clone().map_err(CoreError::ThreadPool)
}

/// Thread count requested through `PANO_CPU_THREADS`, if set.
pub fn read_cpu_threads_from_env() -> Result<Option<usize>, String> {
    let raw = match env::var(CPU_THREADS_ENV) {
        Ok(v) => v,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(format!("failed to read {CPU_THREADS_ENV}: {e}")),
    };

    let parsed: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("{CPU_THREADS_ENV} must be a positive integer, got '{raw}'"))?;
    if parsed == 0 {
        return Err(format!("{CPU_THREADS_ENV} must be >= 1"));
    }
    Ok(Some(parsed))
}

const MAX_POOLED_BUFFERS: usize = 32;

/// A global pool of `f32` scratch buffers reused across warps and blends.
pub struct BufferPool {
    pool: Mutex<Vec<Vec<f32>>>,
}

static GLOBAL_BUFFER_POOL: OnceLock<BufferPool> = OnceLock::new();

impl BufferPool {
    pub fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
        }
    }

    pub fn global() -> &'static BufferPool {
        GLOBAL_BUFFER_POOL.get_or_init(BufferPool::new)
    }

    /// Get a zero-filled buffer of exactly `len` elements.
    pub fn get(&self, len: usize) -> Vec<f32> {
        let recycled = {
            let mut pool = self.pool.lock();
            pool.iter()
                .position(|b| b.capacity() >= len)
                .map(|i| pool.swap_remove(i))
        };
        let mut buf = recycled.unwrap_or_else(|| Vec::with_capacity(len));
        buf.clear();
        buf.resize(len, 0.0);
        buf
    }

    /// Return a buffer to the pool for later reuse.
    pub fn return_buffer(&self, mut buf: Vec<f32>) {
        let mut pool = self.pool.lock();
        if pool.len() < MAX_POOLED_BUFFERS {
            buf.clear();
            pool.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
