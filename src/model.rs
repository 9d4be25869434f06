//! Sequence classifier: stacked LSTM + per-TR linear read-out.
//!
//! Gate layout follows the usual `[i | f | g | o]` packing:
//!
//! ```text
//! a   = x_t W_ihᵀ + h_{t−1} W_hhᵀ + b          [B, 4H]
//! i,f,o = σ(a_i), σ(a_f), σ(a_o)    g = tanh(a_g)
//! c_t = f ⊙ c_{t−1} + i ⊙ g
//! h_t = o ⊙ tanh(c_t)
//! y_t = (h_t ⊙ m_t) W_fcᵀ + b_fc                [B, K]
//! ```
//!
//! `m_t` is the validity mask, so positions at or past a sequence's length
//! see a zero hidden state and produce `b_fc`, the same output a packed /
//! re-padded recurrent layer gives.
use ndarray::{s, stack, Array2, Array3, ArrayView2, Axis, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::error::{AnalysisError, Result};
use crate::sequence::{PaddedSequenceBatch, PAD_LABEL};

/// Anything that maps a padded batch to per-TR class logits.
pub trait SequenceClassifier {
    fn num_classes(&self) -> usize;

    /// `features [N, T, F]` → logits `[N, max_length, K]`.
    fn forward(&self, features: &Array3<f32>, lengths: &[usize], max_length: usize) -> Result<Array3<f32>>;
}

/// Activations captured during a recorded forward pass.
#[derive(Debug, Default, Clone)]
pub struct ActivationRecorder {
    /// Top LSTM layer output (read-out input), `[N, T, H]`.
    pub lstm: Option<Array3<f32>>,
    /// Read-out output (logits), `[N, T, K]`.
    pub linear: Option<Array3<f32>>,
}

#[derive(Debug, Clone)]
struct LstmLayer {
    w_ih: Array2<f32>, // [4H, in]
    w_hh: Array2<f32>, // [4H, H]
    b: Array2<f32>,    // [1, 4H]
}

struct StepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    i: Array2<f32>,
    f: Array2<f32>,
    g: Array2<f32>,
    o: Array2<f32>,
    c: Array2<f32>,
}

struct Trace {
    layers: Vec<Vec<StepCache>>,
    /// Masked top-layer output per step, `[B, H]`.
    top: Vec<Array2<f32>>,
    /// `[B, 1]` per step.
    masks: Vec<Array2<f32>>,
    logits: Vec<Array2<f32>>,
}

fn sigmoid(a: ArrayView2<f32>) -> Array2<f32> {
    a.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// Stacked LSTM clip classifier.
#[derive(Debug, Clone)]
pub struct LstmClassifier {
    k_feat: usize,
    k_hidden: usize,
    k_class: usize,
    layers: Vec<LstmLayer>,
    fc_w: Array2<f32>, // [K, H]
    fc_b: Array2<f32>, // [1, K]
}

impl LstmClassifier {
    /// Fresh weights, uniform in `±1/√H`, drawn from a ChaCha stream seeded
    /// with `seed`.  Every size must be non-zero.
    pub fn new(k_feat: usize, k_hidden: usize, k_layers: usize, k_class: usize, seed: u64) -> Result<Self> {
        for (name, size) in [("k_feat", k_feat), ("k_hidden", k_hidden), ("k_layers", k_layers), ("k_class", k_class)] {
            if size == 0 {
                return Err(AnalysisError::shape("classifier size", format!("{name} > 0"), size));
            }
        }
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let bound = 1.0 / (k_hidden as f32).sqrt();
        let mut uniform = |shape: (usize, usize)| {
            Array2::from_shape_fn(shape, |_| rng.gen_range(-bound..bound))
        };
        let layers = (0..k_layers)
            .map(|l| {
                let input = if l == 0 { k_feat } else { k_hidden };
                LstmLayer {
                    w_ih: uniform((4 * k_hidden, input)),
                    w_hh: uniform((4 * k_hidden, k_hidden)),
                    b: uniform((1, 4 * k_hidden)),
                }
            })
            .collect();
        let fc_w = uniform((k_class, k_hidden));
        let fc_b = uniform((1, k_class));
        Ok(Self { k_feat, k_hidden, k_class, layers, fc_w, fc_b })
    }

    pub fn k_hidden(&self) -> usize {
        self.k_hidden
    }

    pub fn k_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn n_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    /// Parameters in a fixed order: per layer `w_ih, w_hh, b`, then `fc_w, fc_b`.
    fn parameters(&self) -> Vec<&Array2<f32>> {
        let mut out: Vec<&Array2<f32>> = Vec::with_capacity(3 * self.layers.len() + 2);
        for l in &self.layers {
            out.extend([&l.w_ih, &l.w_hh, &l.b]);
        }
        out.extend([&self.fc_w, &self.fc_b]);
        out
    }

    fn parameters_mut(&mut self) -> Vec<&mut Array2<f32>> {
        let mut out: Vec<&mut Array2<f32>> = Vec::with_capacity(3 * self.layers.len() + 2);
        for l in &mut self.layers {
            out.push(&mut l.w_ih);
            out.push(&mut l.w_hh);
            out.push(&mut l.b);
        }
        out.push(&mut self.fc_w);
        out.push(&mut self.fc_b);
        out
    }

    fn run(&self, x: &Array3<f32>, lengths: &[usize], max_length: usize) -> Result<Trace> {
        let (n, t_in, f) = x.dim();
        if f != self.k_feat {
            return Err(AnalysisError::shape("classifier input features", self.k_feat, f));
        }
        if lengths.len() != n {
            return Err(AnalysisError::shape("classifier lengths", n, lengths.len()));
        }
        if let Some(&too_long) = lengths.iter().find(|&&l| l > max_length || l > t_in) {
            return Err(AnalysisError::shape("sequence length", format!("<= {}", max_length.min(t_in)), too_long));
        }

        let h = self.k_hidden;
        let masks: Vec<Array2<f32>> = (0..max_length)
            .map(|t| Array2::from_shape_fn((n, 1), |(b, _)| if t < lengths[b] { 1.0 } else { 0.0 }))
            .collect();
        let mut inputs: Vec<Array2<f32>> = (0..max_length)
            .map(|t| {
                if t < t_in {
                    x.index_axis(Axis(1), t).to_owned()
                } else {
                    Array2::zeros((n, f))
                }
            })
            .collect();

        let mut layers = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let mut h_prev = Array2::<f32>::zeros((n, h));
            let mut c_prev = Array2::<f32>::zeros((n, h));
            let mut cache = Vec::with_capacity(max_length);
            let mut outputs = Vec::with_capacity(max_length);
            for (x_t, m_t) in inputs.into_iter().zip(&masks) {
                let a = x_t.dot(&layer.w_ih.t()) + h_prev.dot(&layer.w_hh.t()) + &layer.b;
                let i = sigmoid(a.slice(s![.., 0..h]));
                let fg = sigmoid(a.slice(s![.., h..2 * h]));
                let g = a.slice(s![.., 2 * h..3 * h]).mapv(f32::tanh);
                let o = sigmoid(a.slice(s![.., 3 * h..4 * h]));
                let c = &fg * &c_prev + &i * &g;
                let h_t = &o * &c.mapv(f32::tanh);
                outputs.push(&h_t * m_t);
                cache.push(StepCache { x: x_t, h_prev, c_prev, i, f: fg, g, o, c: c.clone() });
                h_prev = h_t;
                c_prev = c;
            }
            layers.push(cache);
            inputs = outputs;
        }

        let logits = inputs.iter().map(|h_t| h_t.dot(&self.fc_w.t()) + &self.fc_b).collect();
        Ok(Trace { layers, top: inputs, masks, logits })
    }

    fn to_array3(steps: &[Array2<f32>], n: usize, width: usize) -> Result<Array3<f32>> {
        if steps.is_empty() {
            return Ok(Array3::zeros((n, 0, width)));
        }
        let views: Vec<ArrayView2<f32>> = steps.iter().map(|a| a.view()).collect();
        // stack → [B, T, width]
        stack(Axis(1), &views).map_err(|e| {
            AnalysisError::shape("stacked steps", format!("{} steps of {n}x{width}", steps.len()), e)
        })
    }

    /// Forward pass that also records hidden and read-out activations.
    pub fn forward_recorded(
        &self,
        features: &Array3<f32>,
        lengths: &[usize],
        max_length: usize,
        recorder: &mut ActivationRecorder,
    ) -> Result<Array3<f32>> {
        let trace = self.run(features, lengths, max_length)?;
        let n = features.dim().0;
        let logits = Self::to_array3(&trace.logits, n, self.k_class)?;
        recorder.lstm = Some(Self::to_array3(&trace.top, n, self.k_hidden)?);
        recorder.linear = Some(logits.clone());
        Ok(logits)
    }

    /// Masked mean cross-entropy of `batch` and its gradient w.r.t. every
    /// parameter (same order as the optimizer state).
    pub fn loss_and_gradients(&self, batch: &PaddedSequenceBatch, max_length: usize) -> Result<(f32, Vec<Array2<f32>>)> {
        if batch.max_length() > max_length {
            return Err(AnalysisError::shape("batch width", format!("<= {max_length}"), batch.max_length()));
        }
        let trace = self.run(&batch.features, &batch.lengths, max_length)?;
        let n = batch.n_sequences();
        let k = self.k_class;

        // ── loss + dL/dlogits ──────────────────────────────────────────────
        let n_valid = batch.labels.iter().filter(|&&y| y != PAD_LABEL).count();
        if n_valid == 0 {
            return Err(AnalysisError::Empty { what: "labelled positions in batch" });
        }
        let scale = 1.0 / n_valid as f32;
        let mut loss = 0.0_f64;
        let mut d_logits = Vec::with_capacity(max_length);
        for (t, logits_t) in trace.logits.iter().enumerate() {
            let mut d = Array2::<f32>::zeros((n, k));
            for b in 0..n {
                let y = if t < batch.max_length() { batch.labels[[b, t]] } else { PAD_LABEL };
                if y == PAD_LABEL {
                    continue;
                }
                if y < 0 || y as usize >= k {
                    return Err(AnalysisError::shape("label", format!("0..{k}"), y));
                }
                let row = logits_t.row(b);
                let max = row.fold(f32::NEG_INFINITY, |a, &v| a.max(v));
                let exps = row.mapv(|v| (v - max).exp());
                let sum = exps.sum();
                loss += (sum.ln() + max - row[y as usize]) as f64;
                let mut dr = d.row_mut(b);
                dr.assign(&(exps / sum * scale));
                dr[y as usize] -= scale;
            }
            d_logits.push(d);
        }
        let loss = (loss / n_valid as f64) as f32;

        // ── read-out ───────────────────────────────────────────────────────
        let mut d_fc_w = Array2::<f32>::zeros(self.fc_w.raw_dim());
        let mut d_fc_b = Array2::<f32>::zeros(self.fc_b.raw_dim());
        let mut d_out: Vec<Array2<f32>> = Vec::with_capacity(max_length);
        for (d, h_t) in d_logits.iter().zip(&trace.top) {
            d_fc_w += &d.t().dot(h_t);
            d_fc_b += &d.sum_axis(Axis(0)).insert_axis(Axis(0));
            d_out.push(d.dot(&self.fc_w));
        }

        // ── BPTT, top layer first ──────────────────────────────────────────
        let h = self.k_hidden;
        let mut layer_grads: Vec<[Array2<f32>; 3]> = Vec::with_capacity(self.layers.len());
        for (layer, cache) in self.layers.iter().zip(&trace.layers).rev() {
            let mut d_w_ih = Array2::<f32>::zeros(layer.w_ih.raw_dim());
            let mut d_w_hh = Array2::<f32>::zeros(layer.w_hh.raw_dim());
            let mut d_b = Array2::<f32>::zeros(layer.b.raw_dim());
            let mut dh_next = Array2::<f32>::zeros((n, h));
            let mut dc_next = Array2::<f32>::zeros((n, h));
            let mut d_in: Vec<Array2<f32>> = vec![Array2::zeros((0, 0)); cache.len()];

            for t in (0..cache.len()).rev() {
                let sc = &cache[t];
                let dh = &d_out[t] * &trace.masks[t] + &dh_next;
                let tc = sc.c.mapv(f32::tanh);
                let d_o = &dh * &tc;
                let dc = &dh * &sc.o * &tc.mapv(|v| 1.0 - v * v) + &dc_next;
                dc_next = &dc * &sc.f;

                let mut da = Array2::<f32>::zeros((n, 4 * h));
                da.slice_mut(s![.., 0..h]).assign(&(&dc * &sc.g * &sc.i.mapv(|v| v * (1.0 - v))));
                da.slice_mut(s![.., h..2 * h]).assign(&(&dc * &sc.c_prev * &sc.f.mapv(|v| v * (1.0 - v))));
                da.slice_mut(s![.., 2 * h..3 * h]).assign(&(&dc * &sc.i * &sc.g.mapv(|v| 1.0 - v * v)));
                da.slice_mut(s![.., 3 * h..4 * h]).assign(&(&d_o * &sc.o.mapv(|v| v * (1.0 - v))));

                d_w_ih += &da.t().dot(&sc.x);
                d_w_hh += &da.t().dot(&sc.h_prev);
                d_b += &da.sum_axis(Axis(0)).insert_axis(Axis(0));
                d_in[t] = da.dot(&layer.w_ih);
                dh_next = da.dot(&layer.w_hh);
            }
            layer_grads.push([d_w_ih, d_w_hh, d_b]);
            d_out = d_in;
        }

        let mut grads = Vec::with_capacity(3 * self.layers.len() + 2);
        for [w_ih, w_hh, b] in layer_grads.into_iter().rev() {
            grads.extend([w_ih, w_hh, b]);
        }
        grads.extend([d_fc_w, d_fc_b]);
        Ok((loss, grads))
    }
}

impl SequenceClassifier for LstmClassifier {
    fn num_classes(&self) -> usize {
        self.k_class
    }

    fn forward(&self, features: &Array3<f32>, lengths: &[usize], max_length: usize) -> Result<Array3<f32>> {
        let trace = self.run(features, lengths, max_length)?;
        Self::to_array3(&trace.logits, features.dim().0, self.k_class)
    }
}

/// Adam optimizer state for one [`LstmClassifier`].
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    steps: u64,
    moments: Vec<(Array2<f32>, Array2<f32>)>,
}

impl Adam {
    /// β = (0.9, 0.999), ε = 1e-8, zeroed moments shaped like `model`.
    pub fn new(model: &LstmClassifier, learning_rate: f32) -> Self {
        let moments = model
            .parameters()
            .into_iter()
            .map(|p| (Array2::zeros(p.raw_dim()), Array2::zeros(p.raw_dim())))
            .collect();
        Self { learning_rate, beta1: 0.9, beta2: 0.999, eps: 1e-8, steps: 0, moments }
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step(&mut self, model: &mut LstmClassifier, grads: &[Array2<f32>]) -> Result<()> {
        let params = model.parameters_mut();
        if params.len() != grads.len() || params.len() != self.moments.len() {
            return Err(AnalysisError::shape("optimizer parameters", params.len(), grads.len()));
        }
        self.steps += 1;
        let t = self.steps as i32;
        let bc1 = 1.0 - self.beta1.powi(t);
        let bc2 = 1.0 - self.beta2.powi(t);
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.eps, self.learning_rate);
        for ((p, g), (m, v)) in params.into_iter().zip(grads).zip(&mut self.moments) {
            if p.raw_dim() != g.raw_dim() {
                return Err(AnalysisError::shape("gradient", format!("{:?}", p.dim()), format!("{:?}", g.dim())));
            }
            Zip::from(p).and(m).and(v).and(g).for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr * (*m / bc1) / ((*v / bc2).sqrt() + eps);
            });
        }
        Ok(())
    }
}
