//! TensorFlow Lite C API adapters for the detector, hand landmark and
//! gesture classifier models.

use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::{
    ffi::{CStr, CString},
    os::raw::{c_char, c_int, c_void},
    ptr,
};
use tracing::info;

use crate::gesture::landmarks_to_pixels;
use crate::{Detector, Frame, GestureClassifier, HandLandmarker, RawDetections};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

// TfLiteType values
const TFLITE_FLOAT32: c_int = 1;
const TFLITE_UINT8: c_int = 3;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[cfg_attr(not(feature = "vision-coral"), allow(dead_code))]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *const TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorName(tensor: *const TfLiteTensor) -> *const c_char;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;
    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
    fn TfLiteTensorCopyFromBuffer(tensor: *mut TfLiteTensor, input_data: *const c_void, input_data_size: usize) -> c_int;
    fn TfLiteTensorCopyToBuffer(tensor: *const TfLiteTensor, output_data: *mut c_void, output_data_size: usize) -> c_int;
}

#[cfg(feature = "vision-coral")]
#[link(name = "edgetpu")]
extern "C" {
    fn edgetpu_create_delegate(device_type: c_int, device_path: *const c_char, options: *const c_char) -> *mut TfLiteDelegate;
    fn edgetpu_free_delegate(delegate: *mut TfLiteDelegate);
}

/// How 8-bit pixels map onto a float input tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputScale {
    /// `(x - 127.5) / 127.5`, the SSD mobilenet convention.
    Symmetric,
    /// `x / 255`
    Unit,
}

/// Owned model + interpreter. Not thread-safe; each adapter holds its own.
struct Interpreter {
    path: String,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg(feature = "vision-coral")]
    delegate: Option<*mut TfLiteDelegate>,
}

// The raw pointers are only touched through &mut self.
unsafe impl Send for Interpreter {}

impl Interpreter {
    fn load(model_path: &str, use_coral: bool) -> Result<Self> {
        let cpath = CString::new(model_path)?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", model_path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        if opts.is_null() {
            unsafe { TfLiteModelDelete(model) };
            anyhow::bail!("failed to create tflite options");
        }
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, 2); } // conservative

        let mut this = Self {
            path: model_path.to_string(),
            model,
            opts,
            interp: ptr::null_mut(),
            #[cfg(feature = "vision-coral")]
            delegate: None,
        };

        #[cfg(feature = "vision-coral")]
        if use_coral {
            let d = unsafe { edgetpu_create_delegate(0, ptr::null(), ptr::null()) };
            anyhow::ensure!(!d.is_null(), "failed to create EdgeTPU delegate");
            unsafe { TfLiteInterpreterOptionsAddDelegate(this.opts, d); }
            this.delegate = Some(d);
        }

        #[cfg(not(feature = "vision-coral"))]
        if use_coral {
            anyhow::bail!("detector.use_coral=true but binary not built with --features vision-coral");
        }

        this.interp = unsafe { TfLiteInterpreterCreate(this.model, this.opts) };
        anyhow::ensure!(!this.interp.is_null(), "failed to create tflite interpreter for {}", model_path);

        let rc = unsafe { TfLiteInterpreterAllocateTensors(this.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: loaded TFLite model: {}", model_path);
        Ok(this)
    }

    fn input(&mut self) -> Result<*mut TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!t.is_null(), "{}: no input tensor", self.path);
        Ok(t)
    }

    fn output(&self, index: usize) -> Result<*const TfLiteTensor> {
        let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index as c_int) };
        anyhow::ensure!(!t.is_null(), "{}: no output tensor {}", self.path, index);
        Ok(t)
    }

    fn output_count(&self) -> usize {
        unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) }.max(0) as usize
    }

    /// Input height and width, assuming NHWC.
    fn input_hw(&mut self) -> Result<(u32, u32)> {
        let dims = tensor_dims(self.input()?);
        match dims.as_slice() {
            [1, h, w, 3] if *h > 0 && *w > 0 => Ok((*h as u32, *w as u32)),
            other => anyhow::bail!("{}: expected NHWC rgb input, got dims {:?}", self.path, other),
        }
    }

    /// Resizes `img` to the input size and copies it in, converting to the
    /// tensor's element type.
    fn set_image(&mut self, img: &RgbImage, scale: InputScale) -> Result<()> {
        let (h, w) = self.input_hw()?;
        let resized = image::imageops::resize(img, w, h, FilterType::Triangle);
        let input = self.input()?;
        match unsafe { TfLiteTensorType(input) } {
            TFLITE_UINT8 => copy_in(input, resized.as_raw()),
            TFLITE_FLOAT32 => {
                let data: Vec<f32> = resized
                    .as_raw()
                    .iter()
                    .map(|&p| match scale {
                        InputScale::Symmetric => (p as f32 - 127.5) / 127.5,
                        InputScale::Unit => p as f32 / 255.0,
                    })
                    .collect();
                copy_in(input, &data)
            }
            other => anyhow::bail!("{}: unsupported input tensor type {}", self.path, other),
        }
    }

    fn set_floats(&mut self, values: &[f32]) -> Result<()> {
        let input = self.input()?;
        anyhow::ensure!(
            unsafe { TfLiteTensorType(input) } == TFLITE_FLOAT32,
            "{}: classifier input must be float32",
            self.path
        );
        copy_in(input, values)
    }

    fn invoke(&mut self) -> Result<()> {
        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed for {}", self.path);
        Ok(())
    }

    fn output_f32(&self, index: usize) -> Result<Vec<f32>> {
        let t = self.output(index)?;
        let bytes = unsafe { TfLiteTensorByteSize(t) };
        match unsafe { TfLiteTensorType(t) } {
            TFLITE_FLOAT32 => {
                let mut out = vec![0f32; bytes / std::mem::size_of::<f32>()];
                let rc = unsafe {
                    TfLiteTensorCopyToBuffer(t, out.as_mut_ptr() as *mut c_void, out.len() * std::mem::size_of::<f32>())
                };
                anyhow::ensure!(rc == 0, "{}: copy output {} failed", self.path, index);
                Ok(out)
            }
            TFLITE_UINT8 => {
                let mut out = vec![0u8; bytes];
                let rc = unsafe { TfLiteTensorCopyToBuffer(t, out.as_mut_ptr() as *mut c_void, bytes) };
                anyhow::ensure!(rc == 0, "{}: copy output {} failed", self.path, index);
                Ok(out.into_iter().map(|v| v as f32 / 255.0).collect())
            }
            other => anyhow::bail!("{}: unsupported output tensor type {}", self.path, other),
        }
    }

    fn output_name(&self, index: usize) -> Result<String> {
        let name = unsafe { TfLiteTensorName(self.output(index)?) };
        if name.is_null() {
            return Ok(String::new());
        }
        Ok(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
    }

    fn describe(&mut self) -> Result<String> {
        let input = self.input()?;
        let mut s = format!(
            "TFLite inspect {}:\n- input[0] dims={:?} type={} bytes={}\n",
            self.path,
            tensor_dims(input),
            unsafe { TfLiteTensorType(input) },
            unsafe { TfLiteTensorByteSize(input) },
        );
        for i in 0..self.output_count() {
            let t = self.output(i)?;
            s.push_str(&format!(
                "- output[{}] name={} dims={:?} type={} bytes={}\n",
                i,
                self.output_name(i)?,
                tensor_dims(t),
                unsafe { TfLiteTensorType(t) },
                unsafe { TfLiteTensorByteSize(t) },
            ));
        }
        Ok(s)
    }
}

fn copy_in<T>(tensor: *mut TfLiteTensor, data: &[T]) -> Result<()> {
    let need = std::mem::size_of_val(data);
    let have = unsafe { TfLiteTensorByteSize(tensor) };
    anyhow::ensure!(have == need, "input tensor size mismatch: {} != {}", have, need);
    let rc = unsafe { TfLiteTensorCopyFromBuffer(tensor, data.as_ptr() as *const c_void, need) };
    anyhow::ensure!(rc == 0, "TfLiteTensorCopyFromBuffer failed");
    Ok(())
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd.max(0) as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "vision-coral")]
        unsafe {
            if let Some(d) = self.delegate {
                edgetpu_free_delegate(d);
            }
        }
    }
}

/// Tensor summary for `lit vision inspect`.
pub fn inspect(model_path: &str, use_coral: bool) -> Result<String> {
    Interpreter::load(model_path, use_coral)?.describe()
}

/// SSD-style detector: boxes, classes and scores as separate outputs.
pub struct TfliteDetector {
    interp: Interpreter,
    // output tensor index of boxes, classes, scores
    order: (usize, usize, usize),
}

impl TfliteDetector {
    pub fn new(model_path: &str, use_coral: bool) -> Result<Self> {
        let interp = Interpreter::load(model_path, use_coral)?;
        anyhow::ensure!(
            interp.output_count() >= 3,
            "{}: expected boxes/classes/scores outputs, got {}",
            model_path,
            interp.output_count()
        );
        // TF2 exports name their outputs StatefulPartitionedCall and reorder them
        let order = if interp.output_name(0)?.contains("StatefulPartitionedCall") {
            (1, 3, 0)
        } else {
            (0, 1, 2)
        };
        Ok(Self { interp, order })
    }
}

impl Detector for TfliteDetector {
    fn detect(&mut self, frame: &Frame) -> Result<RawDetections> {
        self.interp.set_image(&frame.image, InputScale::Symmetric)?;
        self.interp.invoke()?;

        let (bi, ci, si) = self.order;
        let boxes = self.interp.output_f32(bi)?;
        let classes = self.interp.output_f32(ci)?;
        let scores = self.interp.output_f32(si)?;
        Ok(RawDetections {
            boxes: boxes.chunks_exact(4).map(|b| [b[0], b[1], b[2], b[3]]).collect(),
            classes: classes.iter().map(|&c| c.max(0.0) as usize).collect(),
            scores,
        })
    }
}

/// Single-hand landmark model: 21 (x, y, z) points in input pixels plus a
/// hand presence score.
pub struct TfliteHandLandmarker {
    interp: Interpreter,
    min_presence: f32,
}

impl TfliteHandLandmarker {
    pub fn new(model_path: &str, min_presence: f32) -> Result<Self> {
        let interp = Interpreter::load(model_path, false)?;
        anyhow::ensure!(interp.output_count() >= 2, "{}: expected landmarks and presence outputs", model_path);
        Ok(Self { interp, min_presence })
    }
}

impl HandLandmarker for TfliteHandLandmarker {
    fn landmarks(&mut self, crop: &RgbImage) -> Result<Option<Vec<[f32; 2]>>> {
        let (in_h, in_w) = self.interp.input_hw()?;
        self.interp.set_image(crop, InputScale::Unit)?;
        self.interp.invoke()?;

        let presence = self
            .interp
            .output_f32(1)?
            .first()
            .copied()
            .context("empty hand presence output")?;
        // some exports emit a logit
        let presence = if (0.0..=1.0).contains(&presence) {
            presence
        } else {
            1.0 / (1.0 + (-presence).exp())
        };
        if presence < self.min_presence {
            return Ok(None);
        }

        let raw = self.interp.output_f32(0)?;
        anyhow::ensure!(raw.len() >= 63, "landmark output too small: {}", raw.len());
        let normalized: Vec<[f32; 2]> = raw
            .chunks_exact(3)
            .take(21)
            .map(|p| [p[0] / in_w as f32, p[1] / in_h as f32])
            .collect();
        Ok(Some(landmarks_to_pixels(&normalized, crop.width(), crop.height())))
    }
}

/// Keypoint MLP: preprocessed landmark vector in, class scores out.
pub struct TfliteKeypointClassifier {
    interp: Interpreter,
}

impl TfliteKeypointClassifier {
    pub fn new(model_path: &str) -> Result<Self> {
        Ok(Self { interp: Interpreter::load(model_path, false)? })
    }
}

impl GestureClassifier for TfliteKeypointClassifier {
    fn classify(&mut self, features: &[f32]) -> Result<usize> {
        self.interp.set_floats(features)?;
        self.interp.invoke()?;
        let scores = self.interp.output_f32(0)?;
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .context("empty classifier output")
    }
}
