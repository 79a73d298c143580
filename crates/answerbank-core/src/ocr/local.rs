//! Local OCR engine lifecycle and recognition.
//!
//! The engine itself is pluggable through [`EngineFactory`]. One
//! [`OcrEngineHandle`] owns the engine instance behind a single mutex that
//! guards initialization, device switches and inference alike; engines are
//! not assumed to tolerate concurrent calls.

use super::preprocess::{self, Variant};
use crate::error::OcrError;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Compute device an engine is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Gpu,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Gpu => "gpu",
            Device::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gpu" => Ok(Device::Gpu),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

/// A detection + recognition engine bound to one device.
pub trait RecognitionEngine: Send {
    /// Recognize text lines in a PNG image, top to bottom.
    fn recognize(&mut self, png: &[u8]) -> Result<Vec<String>, OcrError>;
}

/// Creates engines on demand.
pub trait EngineFactory: Send + Sync {
    fn create(&self, device: Device) -> Result<Box<dyn RecognitionEngine>, OcrError>;
}

enum Slot {
    Uninitialized,
    Ready {
        engine: Box<dyn RecognitionEngine>,
        device: Device,
    },
    /// Initialization failed on every device; cleared by `reinitialize`.
    Failed,
}

/// Owned handle to the local OCR engine.
///
/// Lifecycle: uninitialized → ready on a device → (reinitialized on another
/// device) → shut down. Initialization is lazy on first use.
pub struct OcrEngineHandle {
    factory: Box<dyn EngineFactory>,
    preferred: Device,
    slot: Mutex<Slot>,
}

impl fmt::Debug for OcrEngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrEngineHandle")
            .field("preferred", &self.preferred)
            .field("device", &self.device())
            .finish()
    }
}

impl OcrEngineHandle {
    pub fn new(factory: Box<dyn EngineFactory>, preferred: Device) -> Self {
        Self {
            factory,
            preferred,
            slot: Mutex::new(Slot::Uninitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device of the live engine, if initialized.
    pub fn device(&self) -> Option<Device> {
        match &*self.lock() {
            Slot::Ready { device, .. } => Some(*device),
            _ => None,
        }
    }

    /// Initialize on the preferred device, falling back to CPU.
    ///
    /// No-op if an engine is already live.
    pub fn initialize(&self) -> Result<Device, OcrError> {
        let mut slot = self.lock();
        self.ensure_ready(&mut slot)
    }

    /// Drop the current engine and bind a new one to `device`.
    pub fn reinitialize(&self, device: Device) -> Result<Device, OcrError> {
        let mut slot = self.lock();
        *slot = Slot::Uninitialized;
        self.create_into(&mut slot, device)
    }

    /// Release the engine. The next use initializes again.
    pub fn shutdown(&self) {
        *self.lock() = Slot::Uninitialized;
        tracing::debug!("Local OCR engine shut down");
    }

    /// Run recognition, initializing lazily.
    ///
    /// A failure on the GPU reinitializes the engine on CPU and retries once.
    pub fn recognize(&self, png: &[u8]) -> Result<Vec<String>, OcrError> {
        let mut slot = self.lock();
        self.ensure_ready(&mut slot)?;

        let (result, device) = match &mut *slot {
            Slot::Ready { engine, device } => (engine.recognize(png), *device),
            _ => return Err(OcrError::Engine("engine not initialized".into())),
        };

        match result {
            Err(e) if device == Device::Gpu => {
                tracing::warn!("Local OCR failed on GPU ({e}), switching to CPU");
                *slot = Slot::Uninitialized;
                self.create_into(&mut slot, Device::Cpu)?;
                match &mut *slot {
                    Slot::Ready { engine, .. } => engine.recognize(png),
                    _ => Err(OcrError::Engine("engine not initialized".into())),
                }
            }
            other => other,
        }
    }

    fn ensure_ready(&self, slot: &mut Slot) -> Result<Device, OcrError> {
        match slot {
            Slot::Ready { device, .. } => return Ok(*device),
            Slot::Failed => {
                return Err(OcrError::Engine(
                    "initialization previously failed on every device".into(),
                ))
            }
            Slot::Uninitialized => {}
        }

        let result = match self.create_into(slot, self.preferred) {
            Err(e) if self.preferred == Device::Gpu => {
                tracing::warn!("Local OCR GPU initialization failed ({e}), falling back to CPU");
                self.create_into(slot, Device::Cpu)
            }
            other => other,
        };
        if result.is_err() {
            *slot = Slot::Failed;
        }
        result
    }

    fn create_into(&self, slot: &mut Slot, device: Device) -> Result<Device, OcrError> {
        let engine = self.factory.create(device)?;
        tracing::info!("Local OCR engine initialized on {device}");
        *slot = Slot::Ready { engine, device };
        Ok(device)
    }
}

/// Local OCR backend: preprocessing variants over a shared engine handle.
#[derive(Debug, Clone)]
pub struct LocalOcr {
    handle: Arc<OcrEngineHandle>,
}

impl LocalOcr {
    pub fn new(handle: Arc<OcrEngineHandle>) -> Self {
        Self { handle }
    }

    /// Try each preprocessing variant until one yields text.
    ///
    /// Multi-line output is joined with spaces.
    pub async fn recognize(&self, bytes: &[u8]) -> Option<String> {
        for variant in Variant::ALL {
            let handle = Arc::clone(&self.handle);
            let raw = bytes.to_vec();
            let joined = tokio::task::spawn_blocking(move || {
                let png = preprocess::prepare(&raw, variant);
                handle.recognize(&png)
            })
            .await;

            match joined {
                Ok(Ok(lines)) => {
                    let text = lines
                        .iter()
                        .map(|l| l.trim())
                        .filter(|l| !l.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ");
                    if !text.is_empty() {
                        tracing::debug!("Local OCR succeeded with {variant:?} preprocessing");
                        return Some(text);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Local OCR failed ({variant:?}): {e}"),
                Err(e) => tracing::error!("Local OCR task panicked: {e}"),
            }
        }
        None
    }
}

/// Engine factory that shells out to an OCR command line.
///
/// Secondary to the ONNX engine; used when no model directory is configured.
///
/// The command is split on whitespace; `{image}` is replaced by the path of
/// a scratch PNG and `{device}` by `gpu`/`cpu`. Without an `{image}`
/// argument the path is appended. Each non-empty stdout line is one
/// recognized line.
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
    program: String,
    args: Vec<String>,
}

impl CommandEngineFactory {
    pub fn parse(command: &str) -> Result<Self, OcrError> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| OcrError::Engine("empty OCR command".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self, device: Device) -> Result<Box<dyn RecognitionEngine>, OcrError> {
        let program = which::which(&self.program).map_err(|e| {
            OcrError::Engine(format!("OCR command '{}' not found: {e}", self.program))
        })?;
        Ok(Box::new(CommandEngine {
            program,
            args: self.args.clone(),
            device,
        }))
    }
}

struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    device: Device,
}

impl RecognitionEngine for CommandEngine {
    fn recognize(&mut self, png: &[u8]) -> Result<Vec<String>, OcrError> {
        let scratch = tempfile::Builder::new()
            .prefix("answerbank-ocr")
            .suffix(".png")
            .tempfile()?;
        std::fs::write(scratch.path(), png)?;
        let image_path = scratch.path().to_string_lossy().into_owned();

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{image}", &image_path)
                    .replace("{device}", self.device.as_str())
            })
            .collect();
        if !self.args.iter().any(|a| a.contains("{image}")) {
            args.push(image_path);
        }

        let output = Command::new(&self.program).args(&args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Factory whose GPU engines can be made to fail at creation or inference.
    struct MockFactory {
        gpu_create_fails: bool,
        gpu_inference_fails: bool,
        created: Arc<AtomicU32>,
        replies: Arc<Mutex<Vec<Vec<String>>>>,
    }

    struct MockEngine {
        device: Device,
        fail: bool,
        replies: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl RecognitionEngine for MockEngine {
        fn recognize(&mut self, _png: &[u8]) -> Result<Vec<String>, OcrError> {
            if self.fail {
                return Err(OcrError::Engine(format!("{} inference failed", self.device)));
            }
            let mut replies = self.replies.lock().unwrap();
            Ok(if replies.is_empty() {
                Vec::new()
            } else {
                replies.remove(0)
            })
        }
    }

    impl EngineFactory for MockFactory {
        fn create(&self, device: Device) -> Result<Box<dyn RecognitionEngine>, OcrError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if device == Device::Gpu && self.gpu_create_fails {
                return Err(OcrError::Engine("no CUDA device".into()));
            }
            Ok(Box::new(MockEngine {
                device,
                fail: device == Device::Gpu && self.gpu_inference_fails,
                replies: Arc::clone(&self.replies),
            }))
        }
    }

    fn factory(create_fails: bool, inference_fails: bool, replies: Vec<Vec<&str>>) -> MockFactory {
        MockFactory {
            gpu_create_fails: create_fails,
            gpu_inference_fails: inference_fails,
            created: Arc::new(AtomicU32::new(0)),
            replies: Arc::new(Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.into_iter().map(String::from).collect())
                    .collect(),
            )),
        }
    }

    #[test]
    fn test_initialization_is_lazy_and_once() {
        let f = factory(false, false, vec![vec!["x"], vec!["y"]]);
        let created = Arc::clone(&f.created);
        let handle = OcrEngineHandle::new(Box::new(f), Device::Gpu);
        assert_eq!(handle.device(), None);
        assert_eq!(created.load(Ordering::SeqCst), 0);

        handle.recognize(b"png").unwrap();
        handle.recognize(b"png").unwrap();
        assert_eq!(handle.device(), Some(Device::Gpu));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gpu_init_failure_falls_back_to_cpu() {
        let handle = OcrEngineHandle::new(Box::new(factory(true, false, vec![])), Device::Gpu);
        assert_eq!(handle.initialize().unwrap(), Device::Cpu);
        assert_eq!(handle.device(), Some(Device::Cpu));
    }

    #[test]
    fn test_gpu_inference_failure_retries_on_cpu() {
        let handle =
            OcrEngineHandle::new(Box::new(factory(false, true, vec![vec!["a + b"]])), Device::Gpu);
        assert_eq!(handle.recognize(b"png").unwrap(), vec!["a + b"]);
        assert_eq!(handle.device(), Some(Device::Cpu));
    }

    #[test]
    fn test_reinitialize_and_shutdown() {
        let handle = OcrEngineHandle::new(Box::new(factory(false, false, vec![])), Device::Cpu);
        handle.initialize().unwrap();
        assert_eq!(handle.reinitialize(Device::Gpu).unwrap(), Device::Gpu);
        handle.shutdown();
        assert_eq!(handle.device(), None);
    }

    #[tokio::test]
    async fn test_local_ocr_tries_variants_until_text() {
        let f = factory(false, false, vec![vec![], vec!["  x^2 ", "", "+ 1"]]);
        let ocr = LocalOcr::new(Arc::new(OcrEngineHandle::new(Box::new(f), Device::Cpu)));
        assert_eq!(ocr.recognize(b"raw").await.as_deref(), Some("x^2 + 1"));
    }

    #[tokio::test]
    async fn test_local_ocr_gives_up_after_all_variants() {
        let f = factory(false, false, vec![]);
        let ocr = LocalOcr::new(Arc::new(OcrEngineHandle::new(Box::new(f), Device::Cpu)));
        assert_eq!(ocr.recognize(b"raw").await, None);
    }

    #[test]
    fn test_command_factory_rejects_missing_program() {
        let factory = CommandEngineFactory::parse("definitely-not-an-ocr-binary {image}").unwrap();
        assert!(factory.create(Device::Cpu).is_err());
        assert!(CommandEngineFactory::parse("   ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_engine_substitutes_device() {
        let factory = CommandEngineFactory::parse("echo {device} ok").unwrap();
        let mut engine = factory.create(Device::Cpu).unwrap();
        let lines = engine.recognize(b"png").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("cpu ok "));
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("GPU".parse::<Device>(), Ok(Device::Gpu));
        assert!("tpu".parse::<Device>().is_err());
    }
}
