use crate::backend::{Feature, ModelError};
use ndarray::{Array1, Array2, Array3, Array4, ArrayViewD, ArrayViewMutD, Axis, Dimension, Zip, s};

fn mismatch(context: &str, expected: &[usize], actual: &[usize]) -> ModelError {
    ModelError::ShapeMismatch {
        context: context.to_string(),
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

fn ensure_same_shape<D: Dimension>(
    context: &str,
    expected: &Array<D>,
    actual: &Array<D>,
) -> Result<(), ModelError> {
    if expected.shape() != actual.shape() {
        return Err(mismatch(context, expected.shape(), actual.shape()));
    }
    Ok(())
}

type Array<D> = ndarray::Array<f32, D>;

/// Output length of a sliding window along one axis.
fn window_count(len: usize, kernel: usize, stride: usize) -> Result<usize, ModelError> {
    if stride == 0 || kernel == 0 {
        return Err(ModelError::Topology(format!(
            "kernel {kernel} and stride {stride} must be non-zero"
        )));
    }
    if len < kernel {
        return Err(ModelError::Topology(format!(
            "input extent {len} is smaller than kernel {kernel}"
        )));
    }
    Ok((len - kernel) / stride + 1)
}

/// 2D convolution with square kernels, weights laid out as
/// (out_channels, in_channels, k, k).
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Array4<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    pub padding: usize,
}

impl Conv2d {
    /// Zero-initialized convolution.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            weight: Array4::zeros((out_channels, in_channels, kernel, kernel)),
            bias: Array1::zeros(out_channels),
            stride,
            padding,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_channels(&self) -> usize {
        self.weight.dim().0
    }

    pub fn kernel_size(&self) -> usize {
        self.weight.dim().2
    }

    fn output_dim(&self, height: usize, width: usize) -> Result<(usize, usize), ModelError> {
        let k = self.kernel_size();
        Ok((
            window_count(height + 2 * self.padding, k, self.stride)?,
            window_count(width + 2 * self.padding, k, self.stride)?,
        ))
    }

    fn check_input(&self, input: &Array3<f32>) -> Result<(), ModelError> {
        let (channels, height, width) = input.dim();
        if channels != self.in_channels() {
            return Err(mismatch(
                "conv2d input",
                &[self.in_channels(), height, width],
                input.shape(),
            ));
        }
        Ok(())
    }

    pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        self.check_input(input)?;
        let (_, height, width) = input.dim();
        let (out_h, out_w) = self.output_dim(height, width)?;
        let (k, stride) = (self.kernel_size(), self.stride);
        let padded = pad(input, self.padding);

        let mut output = Array3::zeros((self.out_channels(), out_h, out_w));
        for (oc, mut plane) in output.outer_iter_mut().enumerate() {
            plane.fill(self.bias[oc]);
            for (ic, src) in padded.outer_iter().enumerate() {
                for ky in 0..k {
                    for kx in 0..k {
                        let weight = self.weight[[oc, ic, ky, kx]];
                        if weight == 0.0 {
                            continue;
                        }
                        let window = src.slice(s![
                            ky..ky + stride * (out_h - 1) + 1;stride,
                            kx..kx + stride * (out_w - 1) + 1;stride
                        ]);
                        Zip::from(&mut plane)
                            .and(&window)
                            .for_each(|out, &x| *out += weight * x);
                    }
                }
            }
        }
        Ok(output)
    }

    /// Gradient with respect to the input, given the gradient at the output.
    pub fn backward(
        &self,
        input: &Array3<f32>,
        grad_output: &Array3<f32>,
    ) -> Result<Array3<f32>, ModelError> {
        self.check_input(input)?;
        let (in_c, height, width) = input.dim();
        let (out_h, out_w) = self.output_dim(height, width)?;
        let expected = [self.out_channels(), out_h, out_w];
        if grad_output.shape() != expected {
            return Err(mismatch("conv2d grad", &expected, grad_output.shape()));
        }

        let (k, stride, p) = (self.kernel_size(), self.stride, self.padding);
        let mut grad_padded = Array3::<f32>::zeros((in_c, height + 2 * p, width + 2 * p));
        for (oc, grad_plane) in grad_output.outer_iter().enumerate() {
            for (ic, mut dst) in grad_padded.outer_iter_mut().enumerate() {
                for ky in 0..k {
                    for kx in 0..k {
                        let weight = self.weight[[oc, ic, ky, kx]];
                        if weight == 0.0 {
                            continue;
                        }
                        let mut window = dst.slice_mut(s![
                            ky..ky + stride * (out_h - 1) + 1;stride,
                            kx..kx + stride * (out_w - 1) + 1;stride
                        ]);
                        Zip::from(&mut window)
                            .and(&grad_plane)
                            .for_each(|dx, &g| *dx += weight * g);
                    }
                }
            }
        }

        Ok(grad_padded
            .slice(s![.., p..p + height, p..p + width])
            .to_owned())
    }
}

fn pad(input: &Array3<f32>, padding: usize) -> Array3<f32> {
    if padding == 0 {
        return input.clone();
    }
    let (c, h, w) = input.dim();
    let mut padded = Array3::zeros((c, h + 2 * padding, w + 2 * padding));
    padded
        .slice_mut(s![.., padding..padding + h, padding..padding + w])
        .assign(input);
    padded
}

#[derive(Debug, Clone, Copy)]
pub struct MaxPool2d {
    pub kernel: usize,
    pub stride: usize,
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize) -> Self {
        Self { kernel, stride }
    }

    fn output_dim(&self, height: usize, width: usize) -> Result<(usize, usize), ModelError> {
        Ok((
            window_count(height, self.kernel, self.stride)?,
            window_count(width, self.kernel, self.stride)?,
        ))
    }

    /// Position of the first maximum inside a pooling window.
    fn argmax(&self, plane: ndarray::ArrayView2<'_, f32>, oy: usize, ox: usize) -> (usize, usize) {
        let (y0, x0) = (oy * self.stride, ox * self.stride);
        let mut best = (y0, x0);
        let mut best_value = f32::NEG_INFINITY;
        for y in y0..y0 + self.kernel {
            for x in x0..x0 + self.kernel {
                let value = plane[[y, x]];
                if value > best_value {
                    best_value = value;
                    best = (y, x);
                }
            }
        }
        best
    }

    pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        let (c, h, w) = input.dim();
        let (out_h, out_w) = self.output_dim(h, w)?;
        let mut output = Array3::zeros((c, out_h, out_w));
        for (plane, mut out) in input.outer_iter().zip(output.outer_iter_mut()) {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let (y, x) = self.argmax(plane, oy, ox);
                    out[[oy, ox]] = plane[[y, x]];
                }
            }
        }
        Ok(output)
    }

    pub fn backward(
        &self,
        input: &Array3<f32>,
        grad_output: &Array3<f32>,
    ) -> Result<Array3<f32>, ModelError> {
        let (c, h, w) = input.dim();
        let (out_h, out_w) = self.output_dim(h, w)?;
        if grad_output.dim() != (c, out_h, out_w) {
            return Err(mismatch("maxpool grad", &[c, out_h, out_w], grad_output.shape()));
        }

        let mut grad_input = Array3::zeros((c, h, w));
        for ((plane, grad), mut dst) in input
            .outer_iter()
            .zip(grad_output.outer_iter())
            .zip(grad_input.outer_iter_mut())
        {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let (y, x) = self.argmax(plane, oy, ox);
                    dst[[y, x]] += grad[[oy, ox]];
                }
            }
        }
        Ok(grad_input)
    }
}

/// Fully connected layer, weights laid out as (out_features, in_features).
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            weight: Array2::zeros((out_features, in_features)),
            bias: Array1::zeros(out_features),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.dim().1
    }

    pub fn out_features(&self) -> usize {
        self.weight.dim().0
    }

    pub fn forward(&self, input: &Array1<f32>) -> Result<Array1<f32>, ModelError> {
        if input.len() != self.in_features() {
            return Err(mismatch("linear input", &[self.in_features()], input.shape()));
        }
        Ok(self.weight.dot(input) + &self.bias)
    }

    pub fn backward(&self, grad_output: &Array1<f32>) -> Result<Array1<f32>, ModelError> {
        if grad_output.len() != self.out_features() {
            return Err(mismatch("linear grad", &[self.out_features()], grad_output.shape()));
        }
        Ok(self.weight.t().dot(grad_output))
    }
}

fn global_avg_pool(input: &Array3<f32>) -> Result<Array1<f32>, ModelError> {
    let (c, h, w) = input.dim();
    if h * w == 0 {
        return Err(mismatch("global average pool", &[c, 1, 1], input.shape()));
    }
    Ok(input.sum_axis(Axis(2)).sum_axis(Axis(1)) / (h * w) as f32)
}

fn global_avg_pool_backward(
    input: &Array3<f32>,
    grad_output: &Array1<f32>,
) -> Result<Array3<f32>, ModelError> {
    let (c, h, w) = input.dim();
    if grad_output.len() != c {
        return Err(mismatch("global average pool grad", &[c], grad_output.shape()));
    }
    let scale = 1.0 / (h * w) as f32;
    Ok(Array3::from_shape_fn((c, h, w), |(ch, _, _)| {
        grad_output[ch] * scale
    }))
}

fn relu_backward<D: Dimension>(
    input: &Array<D>,
    grad_output: &Array<D>,
) -> Result<Array<D>, ModelError> {
    ensure_same_shape("relu grad", input, grad_output)?;
    Ok(Zip::from(grad_output)
        .and(input)
        .map_collect(|&g, &x| if x > 0.0 { g } else { 0.0 }))
}

#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    Relu,
    MaxPool2d(MaxPool2d),
    GlobalAvgPool,
    Linear(Linear),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::Relu => "relu",
            Layer::MaxPool2d(_) => "maxpool2d",
            Layer::GlobalAvgPool => "global_avg_pool",
            Layer::Linear(_) => "linear",
        }
    }

    fn unsupported(&self, input: &Feature) -> ModelError {
        let input_kind = match input {
            Feature::Map(_) => "feature map",
            Feature::Vector(_) => "vector",
        };
        ModelError::Topology(format!("{} cannot take a {input_kind} input", self.kind()))
    }

    pub fn forward(&self, input: &Feature) -> Result<Feature, ModelError> {
        match (self, input) {
            (Layer::Conv2d(conv), Feature::Map(x)) => Ok(Feature::Map(conv.forward(x)?)),
            (Layer::Relu, Feature::Map(x)) => Ok(Feature::Map(x.mapv(|v| v.max(0.0)))),
            (Layer::Relu, Feature::Vector(x)) => Ok(Feature::Vector(x.mapv(|v| v.max(0.0)))),
            (Layer::MaxPool2d(pool), Feature::Map(x)) => Ok(Feature::Map(pool.forward(x)?)),
            (Layer::GlobalAvgPool, Feature::Map(x)) => Ok(Feature::Vector(global_avg_pool(x)?)),
            (Layer::Linear(linear), Feature::Vector(x)) => {
                Ok(Feature::Vector(linear.forward(x)?))
            }
            _ => Err(self.unsupported(input)),
        }
    }

    /// Gradient with respect to this layer's input.
    pub fn backward(&self, input: &Feature, grad_output: &Feature) -> Result<Feature, ModelError> {
        match (self, input, grad_output) {
            (Layer::Conv2d(conv), Feature::Map(x), Feature::Map(g)) => {
                Ok(Feature::Map(conv.backward(x, g)?))
            }
            (Layer::Relu, Feature::Map(x), Feature::Map(g)) => {
                Ok(Feature::Map(relu_backward(x, g)?))
            }
            (Layer::Relu, Feature::Vector(x), Feature::Vector(g)) => {
                Ok(Feature::Vector(relu_backward(x, g)?))
            }
            (Layer::MaxPool2d(pool), Feature::Map(x), Feature::Map(g)) => {
                Ok(Feature::Map(pool.backward(x, g)?))
            }
            (Layer::GlobalAvgPool, Feature::Map(x), Feature::Vector(g)) => {
                Ok(Feature::Map(global_avg_pool_backward(x, g)?))
            }
            (Layer::Linear(linear), Feature::Vector(_), Feature::Vector(g)) => {
                Ok(Feature::Vector(linear.backward(g)?))
            }
            _ => Err(mismatch(
                &format!("{} backward", self.kind()),
                &input.shape(),
                &grad_output.shape(),
            )),
        }
    }

    /// Named parameters, `weight` then `bias`.
    pub fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, f32>)> {
        match self {
            Layer::Conv2d(Conv2d { weight, bias, .. }) => vec![
                ("weight", weight.view().into_dyn()),
                ("bias", bias.view().into_dyn()),
            ],
            Layer::Linear(Linear { weight, bias }) => vec![
                ("weight", weight.view().into_dyn()),
                ("bias", bias.view().into_dyn()),
            ],
            _ => Vec::new(),
        }
    }

    pub fn parameters_mut(&mut self) -> Vec<(&'static str, ArrayViewMutD<'_, f32>)> {
        match self {
            Layer::Conv2d(Conv2d { weight, bias, .. }) => vec![
                ("weight", weight.view_mut().into_dyn()),
                ("bias", bias.view_mut().into_dyn()),
            ],
            Layer::Linear(Linear { weight, bias }) => vec![
                ("weight", weight.view_mut().into_dyn()),
                ("bias", bias.view_mut().into_dyn()),
            ],
            _ => Vec::new(),
        }
    }

    /// Inputs feeding each output unit, for fan-in scaled initialization.
    pub fn fan_in(&self) -> usize {
        match self {
            Layer::Conv2d(conv) => conv.in_channels() * conv.kernel_size() * conv.kernel_size(),
            Layer::Linear(linear) => linear.in_features(),
            _ => 0,
        }
    }
}
