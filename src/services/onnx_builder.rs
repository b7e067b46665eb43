// ONNX Runtime session construction and pooling
//
// Picks the best execution provider compiled in via Cargo features and falls
// back to plain CPU inference.

use anyhow::{Context, Result};
use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

#[cfg(feature = "openvino")]
use ort::execution_providers::OpenVINOExecutionProvider;

#[cfg(feature = "xnnpack")]
use ort::execution_providers::XNNPACKExecutionProvider;

/// Thread count for ONNX Runtime CPU inference.
///
/// Windows is capped at 6 threads: beyond that, synchronization overhead
/// outweighs the extra cores (microsoft/onnxruntime#3713).
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

/// Accelerated providers compiled into this binary, in order of preference.
///
/// Each entry is (lookup key, display name, provider).
fn accelerated_providers() -> Vec<(&'static str, &'static str, ExecutionProviderDispatch)> {
    #[allow(unused_mut)]
    let mut providers: Vec<(&'static str, &'static str, ExecutionProviderDispatch)> = Vec::new();

    #[cfg(feature = "tensorrt")]
    providers.push((
        "tensorrt",
        "TensorRT",
        TensorRTExecutionProvider::default().build().error_on_failure(),
    ));

    #[cfg(feature = "cuda")]
    providers.push((
        "cuda",
        "CUDA",
        CUDAExecutionProvider::default().build().error_on_failure(),
    ));

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    providers.push((
        "coreml",
        "CoreML",
        CoreMLExecutionProvider::default().build().error_on_failure(),
    ));

    #[cfg(all(target_os = "windows", feature = "directml"))]
    providers.push((
        "directml",
        "DirectML",
        DirectMLExecutionProvider::default().build().error_on_failure(),
    ));

    #[cfg(feature = "openvino")]
    providers.push((
        "openvino",
        "OpenVINO-CPU",
        OpenVINOExecutionProvider::default()
            .with_device_type("CPU")
            .build()
            .error_on_failure(),
    ));

    #[cfg(feature = "xnnpack")]
    providers.push((
        "xnnpack",
        "XNNPACK",
        XNNPACKExecutionProvider::default().build().error_on_failure(),
    ));

    providers
}

fn commit_with_provider(
    model_bytes: &[u8],
    name: &str,
    provider: ExecutionProviderDispatch,
) -> ort::Result<Session> {
    let builder = Session::builder()?.with_execution_providers([provider])?;

    // DirectML needs sequential execution and no memory pattern to stay stable
    let builder = if name == "DirectML" {
        builder
            .with_parallel_execution(false)?
            .with_memory_pattern(false)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
    } else {
        builder.with_optimization_level(GraphOptimizationLevel::Level3)?
    };

    builder
        .with_intra_threads(optimal_intra_op_threads())?
        .with_inter_threads(1)?
        .commit_from_memory(model_bytes)
}

fn build_cpu_session(model_bytes: &[u8], model_name: &str) -> Result<(String, Session)> {
    let session = commit_with_provider(
        model_bytes,
        "CPU",
        CPUExecutionProvider::default().build(),
    )
    .with_context(|| {
        format!(
            "Failed to load {} ONNX model ({:.1} MB). \
            This usually means the file is corrupt, not an ONNX model, \
            or uses an opset this ONNX Runtime does not support",
            model_name,
            model_bytes.len() as f64 / 1_048_576.0
        )
    })?;
    Ok(("CPU".to_string(), session))
}

/// Build an ONNX Runtime session.
///
/// `backend` forces a provider by name (`cpu`, `cuda`, `tensorrt`, `coreml`,
/// `directml`, `openvino`, `xnnpack`); `None` or `auto` tries every compiled-in
/// accelerator before falling back to CPU.
///
/// Returns the name of the backend that was used alongside the session.
pub fn build_session(
    model_bytes: &[u8],
    model_name: &str,
    backend: Option<&str>,
) -> Result<(String, Session)> {
    let forced = backend
        .map(|b| b.trim().to_lowercase())
        .filter(|b| !b.is_empty() && b != "auto");

    if let Some(forced) = forced {
        info!("INFERENCE_BACKEND={}, forcing backend for {}", forced, model_name);

        if forced == "cpu" {
            let built = build_cpu_session(model_bytes, model_name)?;
            info!("✓ Forced CPU backend for {}", model_name);
            return Ok(built);
        }

        match accelerated_providers()
            .into_iter()
            .find(|(key, _, _)| *key == forced)
        {
            Some((_, backend_name, provider)) => {
                let session = commit_with_provider(model_bytes, backend_name, provider)
                    .with_context(|| format!("Failed to load {} with {}", model_name, backend_name))?;
                info!("✓ Forced {} backend for {}", backend_name, model_name);
                return Ok((backend_name.to_string(), session));
            }
            None => warn!(
                "Backend '{}' is unknown or not compiled in, falling back to auto-detection for {}",
                forced, model_name
            ),
        }
    }

    for (_, backend_name, provider) in accelerated_providers() {
        match commit_with_provider(model_bytes, backend_name, provider) {
            Ok(session) => {
                info!("✓ Using {} acceleration for {}", backend_name, model_name);
                return Ok((backend_name.to_string(), session));
            }
            Err(e) => debug!("{} unavailable for {}: {}", backend_name, model_name, e),
        }
    }

    let built = build_cpu_session(model_bytes, model_name)?;
    warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    Ok(built)
}

/// Pool of ONNX sessions shared by concurrent requests.
///
/// Sessions are handed out as [`PooledSession`] guards and return to the pool
/// when the guard drops, including on error paths.
pub struct SessionPool {
    sessions: Mutex<VecDeque<Session>>,
    released: Condvar,
    in_use: AtomicUsize,
    /// Sessions owned by the pool plus slots reserved for sessions being built
    allocated: AtomicUsize,
    capacity: usize,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(VecDeque::with_capacity(capacity)),
            released: Condvar::new(),
            in_use: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Add a session outside the reservation protocol (the start-up session)
    pub fn add_session(&self, session: Session) {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        self.push_idle(session);
    }

    /// Claim room for one more session, or `None` when the pool is full.
    ///
    /// Concurrent callers can never reserve past `capacity`.
    pub fn try_reserve(&self) -> Option<SlotReservation<'_>> {
        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotReservation {
                pool: self,
                filled: false,
            })
    }

    fn push_idle(&self, session: Session) {
        self.sessions.lock().push_back(session);
        self.released.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Sessions owned by the pool (idle or checked out) plus those being built
    pub fn total(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Take a session, blocking until one is released if all are busy.
    pub fn acquire(&self) -> PooledSession<'_> {
        let mut sessions = self.sessions.lock();
        loop {
            if let Some(session) = sessions.pop_front() {
                self.in_use.fetch_add(1, Ordering::SeqCst);
                return PooledSession {
                    pool: self,
                    session: Some(session),
                };
            }
            self.released.wait(&mut sessions);
        }
    }

    fn release(&self, session: Session) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        self.push_idle(session);
    }

    /// Drop every idle session
    pub fn drain_all(&self) -> usize {
        let drained: Vec<Session> = self.sessions.lock().drain(..).collect();
        self.allocated.fetch_sub(drained.len(), Ordering::SeqCst);
        drained.len()
    }
}

/// A pool slot held while its session is being built.
///
/// Dropping it unfilled gives the slot back.
pub struct SlotReservation<'a> {
    pool: &'a SessionPool,
    filled: bool,
}

impl SlotReservation<'_> {
    pub fn fill(mut self, session: Session) {
        self.filled = true;
        self.pool.push_idle(session);
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.filled {
            self.pool.allocated.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A session checked out of a [`SessionPool`].
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session.as_ref().expect("session present until drop")
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().expect("session present until drop")
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
