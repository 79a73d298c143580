//! ONNX Runtime OCR engine for PaddleOCR-style exported models.
//!
//! A model directory holds three files:
//!
//! - `det.onnx`: DB text detector, `[1, 3, H, W]` in, `[1, 1, H, W]` probability map out
//! - `rec.onnx`: CRNN/SVTR recognizer, `[1, 3, 48, W]` in, `[1, T, C]` class scores out
//! - `dict.txt`: one character per line; class 0 is the CTC blank
//!
//! Each engine owns its two sessions, bound to one device at creation.

use super::local::{Device, EngineFactory, RecognitionEngine};
use crate::error::OcrError;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::Session;
use ort::value::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DET_MODEL: &str = "det.onnx";
const REC_MODEL: &str = "rec.onnx";
const DICT_FILE: &str = "dict.txt";

/// Longest side fed to the detector.
const DET_MAX_SIDE: u32 = 960;
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Probability above which a pixel counts as text.
const DET_THRESHOLD: f32 = 0.3;
/// Minimum mean probability inside a kept box.
const BOX_THRESHOLD: f32 = 0.6;
const UNCLIP_RATIO: f32 = 1.5;
const MIN_BOX_SIDE: u32 = 3;
/// Boxes whose tops differ by less than this are on the same line.
const SAME_LINE_PX: u32 = 10;

const REC_HEIGHT: u32 = 48;
const REC_MIN_WIDTH: u32 = 320;
/// Lines recognized with a lower mean confidence are dropped.
const DROP_SCORE: f32 = 0.5;

/// Axis-aligned text box in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TextBox {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl TextBox {
    fn width(&self) -> u32 {
        self.right - self.left
    }

    fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Creates ONNX engines from a model directory.
#[derive(Debug, Clone)]
pub struct OnnxEngineFactory {
    det_model: PathBuf,
    rec_model: PathBuf,
    charset: Arc<Vec<String>>,
}

impl OnnxEngineFactory {
    /// Check the model files and load the character dictionary.
    pub fn from_dir(dir: &Path) -> Result<Self, OcrError> {
        if !Self::model_exists(dir) {
            return Err(OcrError::Engine(format!(
                "model directory {} must contain {DET_MODEL}, {REC_MODEL} and {DICT_FILE}",
                dir.display()
            )));
        }
        let dict = std::fs::read_to_string(dir.join(DICT_FILE))?;
        let charset = load_charset(&dict);
        if charset.len() <= 1 {
            return Err(OcrError::Engine(format!(
                "{} has no characters",
                dir.join(DICT_FILE).display()
            )));
        }

        tracing::debug!(
            "ONNX OCR models in {} ({} classes)",
            dir.display(),
            charset.len() + 1
        );
        Ok(Self {
            det_model: dir.join(DET_MODEL),
            rec_model: dir.join(REC_MODEL),
            charset: Arc::new(charset),
        })
    }

    /// Check whether the model files exist on disk.
    pub fn model_exists(dir: &Path) -> bool {
        [DET_MODEL, REC_MODEL, DICT_FILE]
            .iter()
            .all(|name| dir.join(name).is_file())
    }
}

impl EngineFactory for OnnxEngineFactory {
    fn create(&self, device: Device) -> Result<Box<dyn RecognitionEngine>, OcrError> {
        let det = load_session(&self.det_model, device)?;
        let rec = load_session(&self.rec_model, device)?;
        Ok(Box::new(OnnxEngine {
            det_input: input_name(&det),
            rec_input: input_name(&rec),
            det,
            rec,
            charset: Arc::clone(&self.charset),
        }))
    }
}

fn load_session(path: &Path, device: Device) -> Result<Session, OcrError> {
    let session = match device {
        Device::Cpu => Session::builder()
            .map_err(|e| OcrError::Engine(format!("Failed to create ONNX session builder: {e}")))?
            .commit_from_file(path)
            .map_err(|e| OcrError::Engine(format!("Failed to load {}: {e}", path.display())))?,
        Device::Gpu => load_cuda_session(path)?,
    };
    tracing::debug!("Loaded {} on {device}", path.display());
    Ok(session)
}

#[cfg(feature = "cuda")]
fn load_cuda_session(path: &Path) -> Result<Session, OcrError> {
    Session::builder()
        .map_err(|e| OcrError::Engine(format!("Failed to create ONNX session builder: {e}")))?
        .with_execution_providers([ort::ep::CUDA::default().build().error_on_failure()])
        .map_err(|e| OcrError::Engine(format!("CUDA execution provider unavailable: {e}")))?
        .commit_from_file(path)
        .map_err(|e| OcrError::Engine(format!("Failed to load {}: {e}", path.display())))
}

#[cfg(not(feature = "cuda"))]
fn load_cuda_session(_path: &Path) -> Result<Session, OcrError> {
    Err(OcrError::Engine(
        "GPU requested but answerbank was built without the `cuda` feature".into(),
    ))
}

fn input_name(session: &Session) -> String {
    session
        .inputs()
        .first()
        .map(|i| i.name().to_string())
        .unwrap_or_else(|| "x".to_string())
}

/// Detection + recognition over two ONNX sessions.
struct OnnxEngine {
    det: Session,
    det_input: String,
    rec: Session,
    rec_input: String,
    charset: Arc<Vec<String>>,
}

impl RecognitionEngine for OnnxEngine {
    fn recognize(&mut self, png: &[u8]) -> Result<Vec<String>, OcrError> {
        let image = image::load_from_memory(png)?.to_rgb8();
        let boxes = self.detect(&image)?;
        tracing::debug!("Detected {} text boxes", boxes.len());

        let mut lines = Vec::with_capacity(boxes.len());
        for b in boxes {
            let crop = imageops::crop_imm(&image, b.left, b.top, b.width(), b.height()).to_image();
            if let Some((text, score)) = self.read_line(&crop)? {
                if score >= DROP_SCORE {
                    lines.push(text);
                } else {
                    tracing::trace!("Dropped low-confidence line {text:?} ({score:.2})");
                }
            }
        }
        Ok(lines)
    }
}

impl OnnxEngine {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<TextBox>, OcrError> {
        let (width, height) = det_size(image.width(), image.height());
        let resized = imageops::resize(image, width, height, FilterType::Triangle);
        let tensor = Value::from_array((
            vec![1i64, 3, height as i64, width as i64],
            to_bgr_chw(&resized, |c, v| (v / 255.0 - DET_MEAN[c]) / DET_STD[c]),
        ))
        .map_err(|e| OcrError::Engine(format!("Failed to create input tensor: {e}")))?;

        let outputs = self
            .det
            .run(ort::inputs![self.det_input.as_str() => tensor])
            .map_err(|e| OcrError::Engine(format!("Text detection failed: {e}")))?;
        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| OcrError::Engine("detector produced no output".into()))?;
        let (shape, probs) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Engine(format!("Failed to extract probability map: {e}")))?;
        if shape.len() != 4 || probs.len() != (width * height) as usize {
            return Err(OcrError::Engine(format!(
                "Unexpected probability map shape: {shape:?}"
            )));
        }

        Ok(extract_boxes(probs, width, height)
            .into_iter()
            .map(|b| scale_box(b, (width, height), (image.width(), image.height())))
            .collect())
    }

    /// Recognize one cropped line; `None` when nothing decodes.
    fn read_line(&mut self, crop: &RgbImage) -> Result<Option<(String, f32)>, OcrError> {
        let (resized_width, padded_width) = rec_width(crop.width(), crop.height());
        let resized = imageops::resize(crop, resized_width, REC_HEIGHT, FilterType::Triangle);
        let mut input = vec![0.0f32; (3 * REC_HEIGHT * padded_width) as usize];
        let chw = to_bgr_chw(&resized, |_, v| (v / 255.0 - 0.5) / 0.5);
        let plane = (REC_HEIGHT * resized_width) as usize;
        for c in 0..3 {
            for y in 0..REC_HEIGHT as usize {
                let src = c * plane + y * resized_width as usize;
                let dst = (c * REC_HEIGHT as usize + y) * padded_width as usize;
                input[dst..dst + resized_width as usize]
                    .copy_from_slice(&chw[src..src + resized_width as usize]);
            }
        }

        let tensor = Value::from_array((
            vec![1i64, 3, REC_HEIGHT as i64, padded_width as i64],
            input,
        ))
        .map_err(|e| OcrError::Engine(format!("Failed to create input tensor: {e}")))?;
        let outputs = self
            .rec
            .run(ort::inputs![self.rec_input.as_str() => tensor])
            .map_err(|e| OcrError::Engine(format!("Text recognition failed: {e}")))?;
        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| OcrError::Engine("recognizer produced no output".into()))?;
        let (shape, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| OcrError::Engine(format!("Failed to extract class scores: {e}")))?;
        if shape.len() != 3 {
            return Err(OcrError::Engine(format!(
                "Unexpected recognizer output shape: {shape:?}"
            )));
        }

        Ok(ctc_decode(scores, shape[2] as usize, &self.charset))
    }
}

/// Dictionary lines plus the trailing space class.
fn load_charset(dict: &str) -> Vec<String> {
    let mut charset: Vec<String> = dict
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    charset.push(" ".to_string());
    charset
}

/// Detector input size: longest side capped, both sides multiples of 32.
fn det_size(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let ratio = if longest > DET_MAX_SIDE {
        DET_MAX_SIDE as f32 / longest as f32
    } else {
        1.0
    };
    let round = |side: u32| (((side as f32 * ratio) / 32.0).round() as u32).max(1) * 32;
    (round(width), round(height))
}

/// Recognizer widths: the aspect-preserving resize and the zero-padded tensor width.
fn rec_width(width: u32, height: u32) -> (u32, u32) {
    let ratio = width as f32 / height.max(1) as f32;
    let resized = ((REC_HEIGHT as f32 * ratio).ceil() as u32).max(1);
    (resized, resized.max(REC_MIN_WIDTH))
}

/// Planar BGR floats, normalized per channel by `norm(channel, value)`.
fn to_bgr_chw(image: &RgbImage, norm: impl Fn(usize, f32) -> f32) -> Vec<f32> {
    let plane = (image.width() * image.height()) as usize;
    let mut out = vec![0.0f32; 3 * plane];
    for (i, pixel) in image.pixels().enumerate() {
        let [r, g, b] = pixel.0;
        for (c, v) in [b, g, r].into_iter().enumerate() {
            out[c * plane + i] = norm(c, v as f32);
        }
    }
    out
}

/// Connected text regions of a probability map, in reading order.
fn extract_boxes(probs: &[f32], width: u32, height: u32) -> Vec<TextBox> {
    let (w, h) = (width as usize, height as usize);
    let mut seen = vec![false; w * h];
    let mut boxes = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if seen[start] || probs[start] <= DET_THRESHOLD {
            continue;
        }
        seen[start] = true;
        queue.push_back(start);
        let (mut left, mut top, mut right, mut bottom) = (w, h, 0, 0);

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            left = left.min(x);
            right = right.max(x);
            top = top.min(y);
            bottom = bottom.max(y);

            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for n in neighbors.into_iter().flatten() {
                if !seen[n] && probs[n] > DET_THRESHOLD {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }

        let b = TextBox {
            left: left as u32,
            top: top as u32,
            right: right as u32 + 1,
            bottom: bottom as u32 + 1,
        };
        if b.width().min(b.height()) < MIN_BOX_SIDE {
            continue;
        }
        if box_score(probs, w, &b) < BOX_THRESHOLD {
            continue;
        }
        let b = unclip(b, width, height);
        if b.width().min(b.height()) < MIN_BOX_SIDE + 2 {
            continue;
        }
        boxes.push(b);
    }

    sort_reading_order(&mut boxes);
    boxes
}

/// Mean probability inside the box.
fn box_score(probs: &[f32], stride: usize, b: &TextBox) -> f32 {
    let mut sum = 0.0;
    for y in b.top..b.bottom {
        let row = y as usize * stride;
        sum += probs[row + b.left as usize..row + b.right as usize]
            .iter()
            .sum::<f32>();
    }
    sum / (b.width() * b.height()) as f32
}

/// Grow the shrunk detector box back out by `area * ratio / perimeter`.
fn unclip(b: TextBox, width: u32, height: u32) -> TextBox {
    let (bw, bh) = (b.width() as f32, b.height() as f32);
    let d = (bw * bh * UNCLIP_RATIO / (2.0 * (bw + bh))).round() as u32;
    TextBox {
        left: b.left.saturating_sub(d),
        top: b.top.saturating_sub(d),
        right: (b.right + d).min(width),
        bottom: (b.bottom + d).min(height),
    }
}

fn scale_box(b: TextBox, from: (u32, u32), to: (u32, u32)) -> TextBox {
    let sx = to.0 as f32 / from.0 as f32;
    let sy = to.1 as f32 / from.1 as f32;
    let left = ((b.left as f32 * sx) as u32).min(to.0.saturating_sub(1));
    let top = ((b.top as f32 * sy) as u32).min(to.1.saturating_sub(1));
    TextBox {
        left,
        top,
        right: ((b.right as f32 * sx).ceil() as u32).clamp(left + 1, to.0),
        bottom: ((b.bottom as f32 * sy).ceil() as u32).clamp(top + 1, to.1),
    }
}

/// Top to bottom; boxes on the same line left to right.
fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by_key(|b| (b.top, b.left));
    for i in 1..boxes.len() {
        let mut j = i;
        while j > 0
            && boxes[j].top.abs_diff(boxes[j - 1].top) < SAME_LINE_PX
            && boxes[j].left < boxes[j - 1].left
        {
            boxes.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Greedy CTC decode of `[T, classes]` scores.
///
/// Returns the text and the mean confidence of its characters.
fn ctc_decode(scores: &[f32], classes: usize, charset: &[String]) -> Option<(String, f32)> {
    if classes == 0 {
        return None;
    }
    let mut text = String::new();
    let mut confidence = Vec::new();
    let mut prev = 0;
    for step in scores.chunks_exact(classes) {
        let (best, score) = step
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, s)| if s > acc.1 { (i, s) } else { acc });
        if best != 0 && best != prev {
            if let Some(ch) = charset.get(best - 1) {
                text.push_str(ch);
                confidence.push(score);
            }
        }
        prev = best;
    }
    if text.trim().is_empty() {
        return None;
    }
    let mean = confidence.iter().sum::<f32>() / confidence.len() as f32;
    Some((text, mean))
}
