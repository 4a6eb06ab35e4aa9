//! Shared helpers: deterministic data and a direct depthwise convolution.

#![allow(dead_code)]

use texc_ir::{Buf, DType, Evaluator, Expr, Tensor};
use texc_ops::{ArgValue, LowerError};

/// A depthwise convolution problem.
#[derive(Clone, Copy, Debug)]
pub struct Case {
    pub n: i64,
    pub channels: i64,
    pub h: i64,
    pub w: i64,
    pub kernel: i64,
    pub stride: i64,
    pub pad: i64,
}

impl Case {
    pub fn out_h(&self) -> i64 {
        (self.h - self.kernel + 2 * self.pad) / self.stride + 1
    }

    pub fn out_w(&self) -> i64 {
        (self.w - self.kernel + 2 * self.pad) / self.stride + 1
    }

    /// The error peeling reports when a stride 1, pad 1 output is too small
    /// to keep an interior width loop, or has a single row.
    pub fn peel_error(&self) -> Option<LowerError> {
        if (self.kernel, self.stride, self.pad) != (3, 1, 1) {
            return None;
        }
        if self.out_w() <= 2 {
            Some(LowerError::Peel { dim: "width" })
        } else if self.out_h() == 1 {
            Some(LowerError::Peel { dim: "height" })
        } else {
            None
        }
    }

    pub fn input(&self) -> Buf {
        Buf::from_static("input", &[self.n, self.channels, self.h, self.w], DType::Float32)
    }

    pub fn weight(&self) -> Buf {
        Buf::from_static(
            "weight",
            &[self.channels, 1, self.kernel, self.kernel],
            DType::Float32,
        )
    }

    pub fn bias(&self) -> Buf {
        Buf::from_static("bias", &[self.channels], DType::Float32)
    }

    /// Dispatcher operands for this case with fresh buffers.
    pub fn operands(&self, input: &Buf, weight: &Buf, bias: &Buf) -> Vec<ArgValue> {
        vec![
            input.clone().into(),
            weight.clone().into(),
            bias.clone().into(),
            ArgValue::Int(self.stride),
            ArgValue::IntList(vec![self.pad, self.pad]),
            ArgValue::Int(1),
            ArgValue::Int(self.channels),
        ]
    }

    pub fn output_shape(&self) -> Vec<Expr> {
        [self.n, self.channels, self.out_h(), self.out_w()]
            .into_iter()
            .map(Expr::int)
            .collect()
    }
}

/// Deterministic values that are exact in `f32`.
pub fn data(len: i64, seed: u32) -> Vec<f64> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            f64::from(state % 64) / 16.0 - 2.0
        })
        .collect()
}

/// Direct depthwise convolution in single precision, accumulating kernel taps
/// in row-major order after the bias.
pub fn reference(case: &Case, input: &[f64], weight: &[f64], bias: Option<&[f64]>) -> Vec<f64> {
    let (c, h, w, kk) = (case.channels, case.h, case.w, case.kernel);
    let mut out = Vec::new();
    for n in 0..case.n {
        for k in 0..c {
            for oh in 0..case.out_h() {
                for ow in 0..case.out_w() {
                    #[allow(clippy::cast_possible_truncation)]
                    let mut acc = bias.map_or(0.0, |b| b[k as usize] as f32);
                    for r in 0..kk {
                        for s in 0..kk {
                            let ih = oh * case.stride - case.pad + r;
                            let iw = ow * case.stride - case.pad + s;
                            if ih < 0 || iw < 0 || ih >= h || iw >= w {
                                continue;
                            }
                            let x = input[(((n * c + k) * h + ih) * w + iw) as usize] as f32;
                            let wt = weight[((k * kk + r) * kk + s) as usize] as f32;
                            acc += x * wt;
                        }
                    }
                    out.push(f64::from(acc));
                }
            }
        }
    }
    out
}

/// Runs `tensor` with the given input bindings and returns its output.
pub fn run(tensor: &Tensor, inputs: &[(&Buf, &[f64])]) -> Vec<f64> {
    let mut ev = Evaluator::new();
    for (buf, values) in inputs {
        ev.bind_buffer(buf, values.to_vec()).unwrap();
    }
    ev.run_tensor(tensor).unwrap().data.clone()
}

pub fn assert_close(got: &[f64], expected: &[f64]) {
    assert_eq!(got.len(), expected.len());
    for (i, (a, b)) in got.iter().zip(expected).enumerate() {
        assert!((a - b).abs() <= 1e-4, "element {i}: {a} != {b}");
    }
}
